//! State-machine base for HTTP/WebDAV operations: timing (header/operation
//! deadlines, stall and slow detection), redirect handling, and the
//! connection-callout hook. Derived operations (`CurlStatOp`,
//! `CurlChecksumOp`, `CurlCopyOp`, and the read/write/open/close/list
//! variants) build on top of [`CurlOperation`] by supplying a [`Verb`] and
//! interpreting the finished [`header_parser::ResponseInfo`] vector.

use crate::header_parser::{HeaderParser, ResponseInfo, Verb};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Lifecycle states an operation passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Constructed,
    Setup,
    Active,
    Redirecting,
    Paused,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpError {
    #[default]
    None,
    HeaderTimeout,
    OperationTimeout,
    TransferStall,
    TransferSlow,
    TransferClientStall,
    Callback,
}

/// Supplies a pre-established socket in place of DNS+connect, keyed by a
/// synthesized `169.254.x.y:port` address so the HTTP stack's resolver can
/// be handed a deterministic answer.
pub trait ConnectionCallout: Send + Sync {
    /// Returns the fake resolve-override address to dial for `url`,
    /// incrementing its reference count.
    fn acquire(&self, url: &Url) -> Option<(std::net::IpAddr, u16)>;
    /// Decrements the reference count on a previously acquired address.
    fn release(&self, addr: std::net::IpAddr, port: u16);
}

/// Bytes-and-duration counters reset on every [`CurlOperation::statistics_reset`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticsSnapshot {
    pub bytes_since_reset: u64,
    pub pre_header_duration: Duration,
    pub post_header_duration: Duration,
    pub pause_duration: Duration,
}

fn normalize_url(url: &str) -> Result<Url, url::ParseError> {
    let rewritten = if let Some(rest) = url.strip_prefix("davs:") {
        format!("https:{rest}")
    } else if let Some(rest) = url.strip_prefix("dav:") {
        format!("http:{rest}")
    } else {
        url.to_string()
    };
    Url::parse(&rewritten)
}

/// Resolves a redirect `Location` against the operation's current URL:
/// absolute paths (leading `/`) replace the path on the existing
/// authority; anything else is parsed as a possibly-relative reference.
fn resolve_redirect(current: &Url, location: &str) -> Result<Url, url::ParseError> {
    if let Some(rest) = location.strip_prefix("davs:") {
        return Url::parse(&format!("https:{rest}"));
    }
    if let Some(rest) = location.strip_prefix("dav:") {
        return Url::parse(&format!("http:{rest}"));
    }
    if location.starts_with('/') {
        let mut next = current.clone();
        next.set_path(location);
        return Ok(next);
    }
    current.join(location)
}

pub struct CurlOperation {
    pub verb: Verb,
    url: Url,
    pub header_deadline: Instant,
    pub operation_deadline: Option<Instant>,
    pub stall_interval: Duration,
    pub slow_rate_floor: u64,
    pub stage: Stage,
    pub error: OpError,
    pub header_parser: HeaderParser,
    callout: Option<Arc<dyn ConnectionCallout>>,

    received_header: bool,
    paused: bool,
    pause_started: Option<Instant>,
    pause_accumulated: Duration,
    setup_at: Instant,
    headers_at: Option<Instant>,

    last_xfer_bytes: u64,
    last_xfer_time: Instant,
    bytes_since_last_progress: u64,
    ema_rate: f64,
    bytes_since_reset: AtomicU64,

    /// -1 while no fake address has been assigned.
    callout_port: AtomicI64,
}

impl CurlOperation {
    pub fn new(verb: Verb, url: &str, header_timeout: Duration) -> Result<Self, url::ParseError> {
        let now = Instant::now();
        Ok(CurlOperation {
            verb,
            url: normalize_url(url)?,
            header_deadline: now + header_timeout,
            operation_deadline: None,
            stall_interval: Duration::from_secs(5),
            slow_rate_floor: 0,
            stage: Stage::Constructed,
            error: OpError::None,
            header_parser: HeaderParser::new(),
            callout: None,
            received_header: false,
            paused: false,
            pause_started: None,
            pause_accumulated: Duration::ZERO,
            setup_at: now,
            headers_at: None,
            last_xfer_bytes: 0,
            last_xfer_time: now,
            bytes_since_last_progress: 0,
            ema_rate: 0.0,
            bytes_since_reset: AtomicU64::new(0),
            callout_port: AtomicI64::new(-1),
        })
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_callout(mut self, callout: Arc<dyn ConnectionCallout>) -> Self {
        self.callout = Some(callout);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn begin(&mut self) {
        self.stage = Stage::Setup;
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            self.pause_started = Some(Instant::now());
            self.stage = Stage::Paused;
        }
    }

    pub fn unpause(&mut self) {
        if let Some(started) = self.pause_started.take() {
            self.pause_accumulated += started.elapsed();
            self.paused = false;
            self.stage = Stage::Active;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Called once a complete status line + headers have been parsed.
    pub fn on_headers_received(&mut self) {
        self.received_header = true;
        self.headers_at = Some(Instant::now());
        self.last_xfer_time = Instant::now();
    }

    /// Called from the worker's progress callback with cumulative bytes
    /// transferred on the active response body.
    pub fn on_progress(&mut self, cumulative_bytes: u64) {
        let delta = cumulative_bytes.saturating_sub(self.last_xfer_bytes);
        if delta > 0 {
            self.bytes_since_last_progress += delta;
            self.bytes_since_reset.fetch_add(delta, Ordering::Relaxed);
            self.last_xfer_bytes = cumulative_bytes;
            self.last_xfer_time = Instant::now();
        }
    }

    /// Checks header/operation/stall/slow timeouts against the current
    /// clock; sets `self.error` and moves to `Failed` if one has fired.
    /// Returns the error if one fired, leaving earlier state untouched
    /// otherwise.
    pub fn check_timeouts(&mut self) -> OpError {
        let now = Instant::now();

        if !self.received_header {
            let paused_so_far =
                self.pause_accumulated + self.pause_started.map(|s| s.elapsed()).unwrap_or_default();
            if now >= self.header_deadline + paused_so_far {
                self.error = OpError::HeaderTimeout;
                self.stage = Stage::Failed;
                return self.error;
            }
            return OpError::None;
        }

        if let Some(deadline) = self.operation_deadline {
            if now >= deadline {
                self.error = OpError::OperationTimeout;
                self.stage = Stage::Failed;
                return self.error;
            }
        }

        let since_progress = self.last_xfer_time.elapsed();
        if since_progress >= self.stall_interval {
            self.error = if self.paused { OpError::TransferClientStall } else { OpError::TransferStall };
            self.stage = Stage::Failed;
            return self.error;
        }

        let dt = since_progress.as_secs_f64().max(1e-6);
        let instantaneous_rate = self.bytes_since_last_progress as f64 / dt;
        let alpha = 1.0 - (-dt / self.stall_interval.as_secs_f64().max(1e-6)).exp();
        self.ema_rate = alpha * instantaneous_rate + (1.0 - alpha) * self.ema_rate;

        if self.slow_rate_floor > 0 && (instantaneous_rate as u64) < self.slow_rate_floor {
            self.error = OpError::TransferSlow;
            self.stage = Stage::Failed;
            return self.error;
        }

        OpError::None
    }

    pub fn ema_rate(&self) -> f64 {
        self.ema_rate
    }

    /// Applies a 3xx redirect: resolves `location` against the current
    /// URL, rewinds header-parser state, and fully releases any
    /// connection-callout address so the next attempt re-resolves.
    pub fn redirect(&mut self, location: &str) -> Result<(), url::ParseError> {
        self.stage = Stage::Redirecting;
        self.url = resolve_redirect(&self.url, location)?;
        self.header_parser.reset_for_redirect();
        self.received_header = false;
        self.release_callout_address();
        self.stage = Stage::Active;
        Ok(())
    }

    /// Acquires (or reuses) a fake resolve-override address from the
    /// configured callout, if any.
    pub fn acquire_callout_address(&self) -> Option<(std::net::IpAddr, u16)> {
        let callout = self.callout.as_ref()?;
        let (addr, port) = callout.acquire(&self.url)?;
        self.callout_port.store(port as i64, Ordering::Relaxed);
        Some((addr, port))
    }

    fn release_callout_address(&self) {
        let port = self.callout_port.swap(-1, Ordering::Relaxed);
        if port >= 0 {
            if let Some(callout) = &self.callout {
                if let Some(ip) = self.url.host().and_then(|h| match h {
                    url::Host::Ipv4(v4) => Some(std::net::IpAddr::V4(v4)),
                    url::Host::Ipv6(v6) => Some(std::net::IpAddr::V6(v6)),
                    url::Host::Domain(_) => None,
                }) {
                    callout.release(ip, port as u16);
                }
            }
        }
    }

    /// Completed response records, oldest (first redirect hop) first.
    pub fn responses(&self) -> &[ResponseInfo] {
        self.header_parser.responses()
    }

    pub fn finish(&mut self) {
        self.stage = Stage::Finished;
        self.release_callout_address();
    }

    pub fn fail(&mut self, error: OpError) {
        self.error = error;
        self.stage = Stage::Failed;
        self.release_callout_address();
    }

    /// Returns and resets `{bytes-since-last-reset, pre-header-duration,
    /// post-header-duration, pause-duration}`.
    pub fn statistics_reset(&mut self) -> StatisticsSnapshot {
        let now = Instant::now();
        let pre_header = self.headers_at.unwrap_or(now).saturating_duration_since(self.setup_at);
        let post_header = self.headers_at.map(|at| now.saturating_duration_since(at)).unwrap_or_default();
        let snapshot = StatisticsSnapshot {
            bytes_since_reset: self.bytes_since_reset.swap(0, Ordering::Relaxed),
            pre_header_duration: pre_header,
            post_header_duration: post_header,
            pause_duration: self.pause_accumulated,
        };
        self.pause_accumulated = Duration::ZERO;
        snapshot
    }
}

impl Drop for CurlOperation {
    fn drop(&mut self) {
        self.release_callout_address();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dav_scheme_is_rewritten_to_http() {
        let op = CurlOperation::new(Verb::Get, "dav://host/path", Duration::from_secs(1)).unwrap();
        assert_eq!(op.url().scheme(), "http");
    }

    #[test]
    fn davs_scheme_is_rewritten_to_https() {
        let op = CurlOperation::new(Verb::Get, "davs://host/path", Duration::from_secs(1)).unwrap();
        assert_eq!(op.url().scheme(), "https");
    }

    #[test]
    fn header_timeout_fires_after_deadline() {
        let mut op = CurlOperation::new(Verb::Get, "http://host/a", Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(op.check_timeouts(), OpError::HeaderTimeout);
        assert_eq!(op.stage, Stage::Failed);
    }

    #[test]
    fn paused_time_excluded_from_header_deadline() {
        let mut op = CurlOperation::new(Verb::Get, "http://host/a", Duration::from_millis(20)).unwrap();
        op.pause();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(op.check_timeouts(), OpError::None);
        op.unpause();
    }

    #[test]
    fn stall_detected_once_progress_stops_for_the_interval() {
        let mut op = CurlOperation::new(Verb::Get, "http://host/a", Duration::from_secs(10)).unwrap();
        op.stall_interval = Duration::from_millis(5);
        op.on_headers_received();
        op.on_progress(10);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(op.check_timeouts(), OpError::TransferStall);
    }

    #[test]
    fn redirect_rewrites_absolute_path_against_existing_authority() {
        let mut op = CurlOperation::new(Verb::Get, "http://host/a/b", Duration::from_secs(1)).unwrap();
        op.redirect("/elsewhere").unwrap();
        assert_eq!(op.url().as_str(), "http://host/elsewhere");
    }

    #[test]
    fn redirect_resolves_relative_location() {
        let mut op = CurlOperation::new(Verb::Get, "http://host/a/b", Duration::from_secs(1)).unwrap();
        op.redirect("c").unwrap();
        assert_eq!(op.url().as_str(), "http://host/a/c");
    }

    #[test]
    fn statistics_reset_clears_accumulators() {
        let mut op = CurlOperation::new(Verb::Get, "http://host/a", Duration::from_secs(1)).unwrap();
        op.on_headers_received();
        op.on_progress(128);
        let snapshot = op.statistics_reset();
        assert_eq!(snapshot.bytes_since_reset, 128);
        assert_eq!(op.statistics_reset().bytes_since_reset, 0);
    }
}
