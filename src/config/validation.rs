//! Configuration parsing helpers.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a duration string using humantime.
///
/// Accepts `500ms`, `5s`, `1m30s` and the like; bare numbers are rejected.
///
/// # Examples
///
/// ```
/// use regtrace::config::parse_duration;
///
/// assert_eq!(parse_duration("5s").unwrap().as_secs(), 5);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// assert!(parse_duration("5").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `${VAR:-default}`; unset variables without a
/// default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is valid")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let default_value = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_poll_intervals() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration(" 100ms ").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("30").is_err());
    }

    #[test]
    fn test_expand_env_vars_untouched() {
        assert_eq!(expand_env_vars("path: data/regtrace.db"), "path: data/regtrace.db");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("port: ${REGTRACE_UNSET_PORT_TEST:-9100}");
        assert_eq!(result, "port: 9100");
        assert_eq!(expand_env_vars("bind: '${REGTRACE_UNSET_BIND_TEST}'"), "bind: ''");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: only this test touches this variable.
        unsafe {
            std::env::set_var("REGTRACE_TEST_DB_DIR", "/var/lib/regtrace");
        }
        let result = expand_env_vars("path: ${REGTRACE_TEST_DB_DIR}/readings.db");
        assert_eq!(result, "path: /var/lib/regtrace/readings.db");
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("REGTRACE_TEST_DB_DIR");
        }
    }
}
