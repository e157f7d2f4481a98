//! Environment-derived configuration for [`crate::factory::HttpFactory`],
//! per the `XRD_HTTP*` variable table.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty timeout string")]
    Empty,
    #[error("malformed timeout string: {0:?}")]
    Malformed(String),
}

/// Parses a Go-style duration string: a sequence of `<number><unit>`
/// tokens (unit in `ns`/`us`/`ms`/`s`/`m`/`h`), fractions allowed (e.g.
/// `1.5s`, `1h5m`, `1s500ms`). `"0"` is the only unitless value accepted.
pub fn parse_timeout(input: &str) -> Result<Duration, Error> {
    if input.is_empty() {
        return Err(Error::Empty);
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    let mut rest = input;
    let mut saw_token = false;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| Error::Malformed(input.to_string()))?;
        if digits_end == 0 {
            return Err(Error::Malformed(input.to_string()));
        }
        let number: f64 =
            rest[..digits_end].parse().map_err(|_| Error::Malformed(input.to_string()))?;
        rest = &rest[digits_end..];

        let unit_end = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let seconds_per_unit = match unit {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(Error::Malformed(input.to_string())),
        };
        total += number * seconds_per_unit;
        saw_token = true;
    }

    if !saw_token {
        return Err(Error::Malformed(input.to_string()));
    }
    Ok(Duration::from_secs_f64(total.max(0.0)))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_timeout(name: &str, default: Duration) -> Duration {
    env_string(name).and_then(|v| parse_timeout(&v).ok()).unwrap_or(default)
}

fn env_clamped_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    env_string(name)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

/// Client X.509 credential locations, resolved with the
/// `X509_USER_PROXY` / `/tmp/x509up_u<uid>` fallback chain.
#[derive(Debug, Clone, Default)]
pub struct CredentialConfig {
    pub ca_file: Option<String>,
    pub ca_dir: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub disabled: bool,
}

impl CredentialConfig {
    fn from_env() -> Self {
        if env_string("XRD_HTTPDISABLEX509").is_some() {
            return CredentialConfig { disabled: true, ..Default::default() };
        }

        let cert_file = env_string("XRD_HTTPCLIENTCERTFILE").or_else(|| env_string("XRD_HTTPCERTFILE"));
        let key_file = env_string("XRD_HTTPCLIENTKEYFILE").or_else(default_proxy_path);

        CredentialConfig {
            ca_file: env_string("XRD_HTTPCERTFILE"),
            ca_dir: env_string("XRD_HTTPCERTDIR"),
            cert_file,
            key_file,
            disabled: false,
        }
    }
}

fn default_proxy_path() -> Option<String> {
    if let Some(proxy) = env_string("X509_USER_PROXY") {
        return Some(proxy);
    }
    #[cfg(unix)]
    {
        let uid = unsafe { libc::getuid() };
        return Some(format!("/tmp/x509up_u{uid}"));
    }
    #[allow(unreachable_code)]
    None
}

#[derive(Debug, Clone)]
pub struct Config {
    pub statistics_location: Option<String>,
    pub minimum_header_timeout: Duration,
    pub default_header_timeout: Duration,
    pub header_timeout_cushion: Duration,
    pub dest_host_dial: bool,
    pub max_pending_ops: usize,
    pub num_threads: usize,
    pub stall_timeout: Duration,
    pub slow_rate_bytes_sec: u64,
    pub credentials: CredentialConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            statistics_location: None,
            minimum_header_timeout: Duration::from_secs(2),
            default_header_timeout: Duration::from_millis(9500),
            header_timeout_cushion: Duration::from_millis(0),
            dest_host_dial: false,
            max_pending_ops: crate::handler_queue::HandlerQueue::<()>::DEFAULT_CAPACITY,
            num_threads: 8,
            stall_timeout: Duration::from_secs(5),
            slow_rate_bytes_sec: 0,
            credentials: CredentialConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Config::default();
        Config {
            statistics_location: env_string("XRD_HTTPSTATISTICSLOCATION"),
            minimum_header_timeout: env_timeout(
                "XRD_HTTPMINIMUMHEADERTIMEOUT",
                default.minimum_header_timeout,
            ),
            default_header_timeout: env_timeout(
                "XRD_HTTPDEFAULTHEADERTIMEOUT",
                default.default_header_timeout,
            ),
            header_timeout_cushion: env_timeout(
                "XRD_HTTPHEADERTIMEOUTCUSHION",
                default.header_timeout_cushion,
            ),
            dest_host_dial: env_string("XRD_HTTPDESTHOSTDIAL").is_some(),
            max_pending_ops: env_clamped_u64(
                "XRD_HTTPMAXPENDINGOPS",
                default.max_pending_ops as u64,
                1,
                10_000_000,
            ) as usize,
            num_threads: env_clamped_u64("XRD_HTTPNUMTHREADS", default.num_threads as u64, 1, 1000)
                as usize,
            stall_timeout: Duration::from_secs(env_clamped_u64(
                "XRD_HTTPSTALLTIMEOUT",
                default.stall_timeout.as_secs(),
                0,
                86_400,
            )),
            slow_rate_bytes_sec: env_clamped_u64(
                "XRD_HTTPSLOWRATEBYTESSEC",
                default.slow_rate_bytes_sec,
                0,
                1 << 30,
            ),
            credentials: CredentialConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_timeout("1h5m").unwrap(), Duration::from_secs(3900));
        assert_eq!(parse_timeout("1s500ms").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn parses_fractional_durations() {
        assert_eq!(parse_timeout("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn bare_zero_is_accepted() {
        assert_eq!(parse_timeout("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn empty_string_is_rejected() {
        assert!(matches!(parse_timeout(""), Err(Error::Empty)));
    }

    #[test]
    fn unitless_nonzero_is_rejected() {
        assert!(parse_timeout("5").is_err());
    }

    #[test]
    fn unknown_unit_is_rejected() {
        assert!(parse_timeout("5x").is_err());
    }
}
