pub fn default_enabled() -> bool {
    true
}

/// Venue local time is UTC+8
pub fn default_utc_offset_hours() -> i32 {
    8
}

pub fn default_session_open() -> String {
    "09:00".to_string()
}

pub fn default_session_close() -> String {
    "17:00".to_string()
}

pub fn default_trading_days() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

pub fn default_lot_size() -> u32 {
    100
}

pub fn default_max_connections() -> u32 {
    20
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_log_filter() -> String {
    "info".to_string()
}
