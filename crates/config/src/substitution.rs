use anyhow::{Context, Result};
use regex::Regex;
use std::env;
use tracing::{debug, warn};

const PLACEHOLDER: &str = r"\$\{(\w+)\}|\$(\w+)";

fn placeholder_regex() -> Result<Regex> {
    Regex::new(PLACEHOLDER).context("Invalid placeholder pattern")
}

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME
///
/// Unset variables keep their placeholder so validation can report them.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = placeholder_regex()?;
    let mut missing_vars = Vec::new();

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let placeholder = &caps[0];
        let Some(var_name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
            return placeholder.to_string();
        };
        match env::var(var_name) {
            Ok(value) => {
                debug!("Substituting environment variable: {}", var_name);
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                placeholder.to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (may fail validation): {:?}",
            missing_vars
        );
    }

    Ok(result.into_owned())
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    placeholder_regex()
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

/// Names of the unresolved placeholders in `content`
pub fn unresolved_env_vars(content: &str) -> Vec<String> {
    let Ok(re) = placeholder_regex() else {
        return Vec::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_both_forms() {
        env::set_var("LEDGER_TEST_DB_HOST", "db.internal");
        let out = substitute_env_vars("url: postgres://${LEDGER_TEST_DB_HOST}/x and $LEDGER_TEST_DB_HOST").unwrap();
        assert_eq!(out, "url: postgres://db.internal/x and db.internal");
    }

    #[test]
    fn test_unset_variable_keeps_placeholder() {
        env::remove_var("LEDGER_TEST_UNSET_VAR");
        let out = substitute_env_vars("url: ${LEDGER_TEST_UNSET_VAR}").unwrap();
        assert_eq!(out, "url: ${LEDGER_TEST_UNSET_VAR}");
        assert!(has_unresolved_env_vars(&out));
        assert_eq!(unresolved_env_vars(&out), vec!["LEDGER_TEST_UNSET_VAR".to_string()]);
    }
}
