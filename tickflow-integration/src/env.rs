use std::{str::FromStr, time::Duration};
use tracing::warn;

/// Fetch the environment variable, falling back to the provided default if it is unset
/// or empty.
pub fn string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Fetch and parse the environment variable, falling back to the provided default if it
/// is unset, empty, or unparseable.
pub fn parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    let Ok(value) = std::env::var(key) else {
        return default;
    };

    if value.is_empty() {
        return default;
    }

    match value.parse() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(key, value, "could not parse environment variable, using default");
            default
        }
    }
}

/// Fetch a [`Duration`] environment variable, accepting `"500ms"`, `"2s"`, `"1m"`,
/// `"1h"`, or a bare integer interpreted as seconds.
pub fn duration(key: &str, default: Duration) -> Duration {
    let Ok(value) = std::env::var(key) else {
        return default;
    };

    match parse_duration(&value) {
        Some(duration) => duration,
        None => {
            if !value.is_empty() {
                warn!(key, value, "could not parse duration environment variable, using default");
            }
            default
        }
    }
}

/// Fetch a comma-separated list environment variable.
pub fn list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value.split(',').map(str::to_string).collect(),
        _ => default.iter().map(|entry| entry.to_string()).collect(),
    }
}

fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Some(millis) = value.strip_suffix("ms") {
        return millis.parse().ok().map(Duration::from_millis);
    }
    if let Some(hours) = value.strip_suffix('h') {
        return hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3_600));
    }
    if let Some(minutes) = value.strip_suffix('m') {
        return minutes.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }

    value
        .strip_suffix('s')
        .unwrap_or(value)
        .parse()
        .ok()
        .map(Duration::from_secs)
}
