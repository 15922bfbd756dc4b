//! Per-action option maps
//!
//! Options are opaque key/value strings handed to each action at
//! construction. Neither the registry nor the watcher interprets them.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use node_cleanup_common::Error;

/// Longest duration [`parse_duration`] accepts (30 days)
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Key fragments whose values are never logged
const SENSITIVE_KEY_FRAGMENTS: [&str; 4] = ["token", "webhook", "password", "secret"];

/// Opaque option map for one action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOptions {
    values: BTreeMap<String, String>,
}

impl ActionOptions {
    /// Create an empty option map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set an option
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw value; empty strings count as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value or the given default
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Duration value; an unparseable value falls back to `default` with a warning
    pub fn get_duration(&self, key: &str, default: Duration) -> Duration {
        match self.get(key) {
            None => default,
            Some(raw) => match parse_duration(raw) {
                Ok(d) => d,
                Err(e) => {
                    warn!(option = %key, value = %raw, ?default, error = %e, "Invalid duration option, using default");
                    default
                }
            },
        }
    }

    /// Iterate options with sensitive values masked, for logging
    pub fn redacted(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| {
            let lower = k.to_ascii_lowercase();
            if SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lower.contains(f)) {
                (k.as_str(), "***REDACTED***")
            } else {
                (k.as_str(), v.as_str())
            }
        })
    }

    /// Number of options set
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no options are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ActionOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Parse a human-friendly duration string.
///
/// Supports `Nh` (hours), `Nm` (minutes), `Ns` (seconds) and `Nms`
/// (milliseconds). A bare number is read as seconds.
/// Examples: "5m" → 300s, "300s" → 300s, "250ms" → 250ms.
///
/// Values above [`MAX_DURATION`] are rejected.
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();
    let invalid = || Error::config(format!("invalid duration '{}', expected e.g. 5m, 30s, 250ms", s));
    let scaled = |n: &str, unit: u64| -> Result<Duration, Error> {
        let n: u64 = n.parse().map_err(|_| invalid())?;
        n.checked_mul(unit)
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    };

    let duration = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse().map(Duration::from_millis).map_err(|_| invalid())?
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled(hours, 3600)?
    } else if let Some(minutes) = s.strip_suffix('m') {
        scaled(minutes, 60)?
    } else if let Some(secs) = s.strip_suffix('s') {
        scaled(secs, 1)?
    } else {
        scaled(s, 1)?
    };

    if duration > MAX_DURATION {
        return Err(Error::config(format!(
            "duration '{}' exceeds the maximum of {:?}",
            s, MAX_DURATION
        )));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1h", Duration::from_secs(3600))]
    #[case("5m", Duration::from_secs(300))]
    #[case("300s", Duration::from_secs(300))]
    #[case("250ms", Duration::from_millis(250))]
    #[case("15", Duration::from_secs(15))]
    #[case(" 10s ", Duration::from_secs(10))]
    fn test_parse_duration(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("ten seconds")]
    #[case("-5s")]
    #[case("1.5m")]
    #[case("9999999999999999h")]
    #[case("999999999999999999m")]
    #[case("18446744073709551616s")]
    #[case("31d")]
    fn test_parse_duration_rejects_garbage(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }

    #[rstest]
    #[case("720h", true)]
    #[case("721h", false)]
    #[case("43200m", true)]
    #[case("2592001", false)]
    #[case("5000000000ms", false)]
    fn test_parse_duration_is_bounded(#[case] input: &str, #[case] accepted: bool) {
        let result = parse_duration(input);
        assert_eq!(result.is_ok(), accepted, "{} -> {:?}", input, result);
        if let Ok(d) = result {
            assert!(d <= MAX_DURATION);
        }
    }

    #[test]
    fn test_get_duration_falls_back_on_overflow() {
        let opts = ActionOptions::new()
            .with("timeout", "9999999999999999h")
            .with("delay", "999999999999999999m");
        assert_eq!(
            opts.get_duration("timeout", Duration::from_secs(300)),
            Duration::from_secs(300)
        );
        assert_eq!(opts.get_duration("delay", Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let opts = ActionOptions::new().with("apiEndpoint", "");
        assert_eq!(opts.get("apiEndpoint"), None);
        assert_eq!(opts.get_or("apiEndpoint", "http://portworx-api:9001"), "http://portworx-api:9001");
    }

    #[test]
    fn test_get_duration_falls_back_on_invalid_value() {
        let opts = ActionOptions::new()
            .with("timeout", "soon")
            .with("delay", "2s");
        assert_eq!(
            opts.get_duration("timeout", Duration::from_secs(300)),
            Duration::from_secs(300)
        );
        assert_eq!(opts.get_duration("delay", Duration::ZERO), Duration::from_secs(2));
        assert_eq!(opts.get_duration("missing", Duration::from_secs(7)), Duration::from_secs(7));
    }

    #[test]
    fn test_redacted_masks_sensitive_keys() {
        let opts: ActionOptions = [
            ("slackWebhookUrl", "https://hooks.example/abc"),
            ("apiToken", "s3cr3t"),
            ("channel", "#infrastructure"),
        ]
        .into_iter()
        .collect();

        let shown: BTreeMap<&str, &str> = opts.redacted().collect();
        assert_eq!(shown["slackWebhookUrl"], "***REDACTED***");
        assert_eq!(shown["apiToken"], "***REDACTED***");
        assert_eq!(shown["channel"], "#infrastructure");
        assert_eq!(opts.len(), 3);
    }
}
