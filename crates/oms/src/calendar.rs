//! Venue trading calendar
//!
//! Sessions run on fixed weekdays between an open and a close time in the
//! venue's local time, which is a fixed offset from UTC. The window is
//! half-open: an order at exactly the close time is outside the session.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday,
};

use crate::error::{OmsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingCalendar {
    offset: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
    days: Vec<Weekday>,
}

impl TradingCalendar {
    pub fn new(
        utc_offset_hours: i32,
        open: NaiveTime,
        close: NaiveTime,
        days: Vec<Weekday>,
    ) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            OmsError::Config(format!("invalid utc offset: {} hours", utc_offset_hours))
        })?;
        if open >= close {
            return Err(OmsError::Config(format!(
                "session open {} must be before close {}",
                open, close
            )));
        }
        if days.is_empty() {
            return Err(OmsError::Config("no trading days".to_string()));
        }
        Ok(Self {
            offset,
            open,
            close,
            days,
        })
    }

    /// Monday to Friday, 09:00 to 17:00 at UTC+8
    pub fn standard() -> Self {
        Self {
            offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            days: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
        }
    }

    pub fn from_config(trading: &config::TradingConfig) -> Result<Self> {
        let open = config::parse_session_time(&trading.session_open).ok_or_else(|| {
            OmsError::Config(format!("invalid session_open '{}'", trading.session_open))
        })?;
        let close = config::parse_session_time(&trading.session_close).ok_or_else(|| {
            OmsError::Config(format!("invalid session_close '{}'", trading.session_close))
        })?;
        let days = trading
            .trading_days
            .iter()
            .map(|d| {
                config::parse_trading_day(d)
                    .ok_or_else(|| OmsError::Config(format!("invalid trading day '{}'", d)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(trading.utc_offset_hours, open, close, days)
    }

    /// `at` in venue local time
    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.days.contains(&date.weekday())
    }

    /// True inside a session: a trading day, at or after the open and
    /// before the close
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = self.local(at);
        let time = local.time();
        self.is_trading_day(local.date_naive()) && time >= self.open && time < self.close
    }

    /// First session open strictly after `after`
    pub fn next_open(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_boundary(after, self.open)
    }

    /// First session close strictly after `after`
    pub fn next_close(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_boundary(after, self.close)
    }

    fn next_boundary(&self, after: DateTime<Utc>, time: NaiveTime) -> Option<DateTime<Utc>> {
        let start = self.local(after).date_naive();
        (0..=7)
            .filter_map(|days| start.checked_add_signed(Duration::days(days)))
            .filter(|date| self.is_trading_day(*date))
            .filter_map(|date| {
                self.offset
                    .from_local_datetime(&date.and_time(time))
                    .single()
            })
            .map(|local| local.with_timezone(&Utc))
            .find(|candidate| *candidate > after)
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::standard()
    }
}
