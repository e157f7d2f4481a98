//! A dedicated thread that drives up to `max_ops` concurrent transfers
//! over [`reqwest`], consuming [`CurlOperation`]s from a shared
//! [`HandlerQueue`] and bumping per-verb/status-code counters.

use crate::curl_operation::{CurlOperation, OpError, Stage};
use crate::handler_queue::{HandlePool, HandlerQueue};
use crate::header_parser::Verb;
use crate::verbs::{self, VerbsCache};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default concurrent-transfer cap per worker, matching the native
/// `CurlWorker`'s `m_max_ops`.
pub const DEFAULT_MAX_OPS: usize = 20;
/// Default maintenance cycle: handle-pool eviction, unpausing, idle retire.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);
/// How often the body-streaming loop re-checks stall/slow/operation
/// timeouts against the clock.
const TIMEOUT_TICK: Duration = Duration::from_millis(200);
/// Redirect hops followed before giving up, matching common HTTP client
/// defaults.
const MAX_REDIRECTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ClientTimeout,
    ServerTimeout,
    CalloutTimeout,
    ProtocolError,
}

/// Per-verb, per-status-code (or per-[`Outcome`] on failure) counters.
#[derive(Default)]
pub struct WorkerStats {
    counts: std::sync::Mutex<HashMap<(Verb, StatusKey), u64>>,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StatusKey {
    Code(u16),
    Outcome(OutcomeKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OutcomeKey {
    ClientTimeout,
    ServerTimeout,
    CalloutTimeout,
    ProtocolError,
}

impl WorkerStats {
    fn bump_code(&self, verb: Verb, code: u16) {
        *self.counts.lock().unwrap().entry((verb, StatusKey::Code(code))).or_insert(0) += 1;
    }

    fn bump_outcome(&self, verb: Verb, outcome: OutcomeKey) {
        *self.counts.lock().unwrap().entry((verb, StatusKey::Outcome(outcome))).or_insert(0) += 1;
    }

    pub fn count_for_code(&self, verb: Verb, code: u16) -> u64 {
        *self.counts.lock().unwrap().get(&(verb, StatusKey::Code(code))).unwrap_or(&0)
    }
}

/// A submitted unit of work: the operation plus when it entered the
/// queue, used for maintenance-cycle idle detection.
pub struct Submission {
    pub operation: CurlOperation,
    pub submitted_at: Instant,
}

impl Submission {
    pub fn new(operation: CurlOperation) -> Self {
        Submission { operation, submitted_at: Instant::now() }
    }
}

pub struct CurlWorker {
    queue: Arc<HandlerQueue<Submission>>,
    client: reqwest::Client,
    max_ops: usize,
    stats: Arc<WorkerStats>,
    verbs_cache: Arc<VerbsCache>,
    stall_interval: Duration,
    slow_rate_floor: u64,
}

impl CurlWorker {
    pub fn new(queue: Arc<HandlerQueue<Submission>>, client: reqwest::Client, max_ops: usize) -> Self {
        CurlWorker {
            queue,
            client,
            max_ops: max_ops.max(1),
            stats: Arc::new(WorkerStats::default()),
            verbs_cache: Arc::new(VerbsCache::new()),
            stall_interval: Duration::from_secs(5),
            slow_rate_floor: 0,
        }
    }

    /// Shares a process-wide verbs cache instead of this worker's own,
    /// so discoveries made on one worker are visible to the others.
    pub fn with_verbs_cache(mut self, verbs_cache: Arc<VerbsCache>) -> Self {
        self.verbs_cache = verbs_cache;
        self
    }

    /// Seeds every operation this worker drives with the configured
    /// stall-detection interval (`XRD_HTTPSTALLTIMEOUT`).
    pub fn with_stall_interval(mut self, stall_interval: Duration) -> Self {
        self.stall_interval = stall_interval;
        self
    }

    /// Seeds every operation this worker drives with the configured
    /// slow-transfer floor, in bytes/sec (`XRD_HTTPSLOWRATEBYTESSEC`).
    pub fn with_slow_rate_floor(mut self, slow_rate_floor: u64) -> Self {
        self.slow_rate_floor = slow_rate_floor;
        self
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the worker loop until the queue shuts down. Spawn this on its
    /// own OS thread; it builds its own current-thread Tokio runtime so
    /// in-flight transfers are multiplexed cooperatively within it.
    pub fn run(&self) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build curl worker runtime");
        runtime.block_on(self.drive());
    }

    async fn drive(&self) {
        let mut in_flight = FuturesUnordered::new();
        let mut last_maintenance = Instant::now();

        loop {
            while in_flight.len() < self.max_ops {
                match self.queue.consume(Some(Duration::from_millis(200))) {
                    Some(submission) => in_flight.push(self.execute(submission)),
                    None => break,
                }
            }

            if in_flight.is_empty() {
                if self.queue.is_shutdown() && self.queue.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            } else {
                in_flight.next().await;
            }

            if last_maintenance.elapsed() >= MAINTENANCE_INTERVAL {
                self.run_maintenance();
                last_maintenance = Instant::now();
            }
        }
    }

    fn run_maintenance(&self) {
        HandlePool::expire(64);
    }

    fn method_for(verb: Verb) -> reqwest::Method {
        match verb {
            Verb::Get => reqwest::Method::GET,
            Verb::Put => reqwest::Method::PUT,
            Verb::Head => reqwest::Method::HEAD,
            Verb::Delete => reqwest::Method::DELETE,
            Verb::Options => reqwest::Method::OPTIONS,
            Verb::PropFind => reqwest::Method::from_bytes(b"PROPFIND").unwrap(),
            Verb::Mkcol => reqwest::Method::from_bytes(b"MKCOL").unwrap(),
        }
    }

    /// Builds the client to issue `op`'s next request with. If a
    /// connection callout supplied a fake resolve-override address, the
    /// hop gets a dedicated client with that override baked in (reqwest
    /// only exposes `resolve` at client-build time, not per-request);
    /// otherwise the shared, pool-reusing client is used as-is.
    fn client_for(&self, op: &CurlOperation) -> reqwest::Client {
        let Some((addr, port)) = op.acquire_callout_address() else {
            return self.client.clone();
        };
        let Some(host) = op.url().host_str() else {
            return self.client.clone();
        };
        reqwest::Client::builder()
            .resolve(host, std::net::SocketAddr::new(addr, port))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| self.client.clone())
    }

    /// Feeds a synthetic status line and every response header into
    /// `op`'s header parser, then a blank line to close out the record --
    /// `reqwest::Response` only exposes a parsed `HeaderMap`, so the raw
    /// line-oriented protocol the parser expects is reconstructed here.
    fn feed_response_headers(op: &mut CurlOperation, response: &reqwest::Response) -> Result<(), OpError> {
        let status = response.status();
        let status_line =
            format!("HTTP/1.1 {} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
        op.header_parser.feed_line(&status_line).map_err(|_| OpError::Callback)?;
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else { continue };
            let line = format!("{}: {value}", name.as_str());
            op.header_parser.feed_line(&line).map_err(|_| OpError::Callback)?;
        }
        op.header_parser.feed_line("").map_err(|_| OpError::Callback)
    }

    async fn execute(&self, mut submission: Submission) {
        let op = &mut submission.operation;
        op.begin();
        op.stall_interval = self.stall_interval;
        op.slow_rate_floor = self.slow_rate_floor;

        let method = Self::method_for(op.verb);

        let outcome = match self.run_redirect_chain(op, &method).await {
            Err(outcome) => outcome,
            Ok(response) => self.stream_body(op, response).await,
        };

        match outcome {
            Outcome::Success => self.stats.completed.fetch_add(1, Ordering::Relaxed),
            _ => self.stats.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Issues `op`'s request, following 3xx redirects itself (rather than
    /// relying on `reqwest`'s built-in policy) so every hop gets pushed
    /// into `op.responses()` and discovered verbs reach the verbs cache.
    /// Returns the final, non-redirect response to stream the body of.
    async fn run_redirect_chain(
        &self,
        op: &mut CurlOperation,
        method: &reqwest::Method,
    ) -> Result<reqwest::Response, Outcome> {
        for _hop in 0..=MAX_REDIRECTS {
            let hop_url = op.url().clone();
            let client = self.client_for(op);
            let header_budget = op.header_deadline.saturating_duration_since(Instant::now());

            let response = match tokio::time::timeout(
                header_budget,
                client.request(method.clone(), hop_url.clone()).send(),
            )
            .await
            {
                Err(_) => {
                    op.fail(OpError::HeaderTimeout);
                    self.stats.bump_outcome(op.verb, OutcomeKey::ClientTimeout);
                    return Err(Outcome::ClientTimeout);
                }
                Ok(Err(_)) => {
                    op.fail(OpError::Callback);
                    self.stats.bump_outcome(op.verb, OutcomeKey::ProtocolError);
                    return Err(Outcome::ProtocolError);
                }
                Ok(Ok(response)) => response,
            };

            op.on_headers_received();
            let status = response.status();
            self.stats.bump_code(op.verb, status.as_u16());
            op.stage = Stage::Active;

            if Self::feed_response_headers(op, &response).is_err() {
                op.fail(OpError::Callback);
                self.stats.bump_outcome(op.verb, OutcomeKey::ProtocolError);
                return Err(Outcome::ProtocolError);
            }

            let observed = op.responses().last().expect("feed_response_headers always pushes one");
            let allow = observed.allow;
            let location = observed.location.clone();
            if !allow.is_empty() {
                self.verbs_cache.put(verbs::cache_key(&hop_url), allow);
            }

            if status.is_redirection() {
                let Some(location) = location else {
                    op.fail(OpError::Callback);
                    self.stats.bump_outcome(op.verb, OutcomeKey::ProtocolError);
                    return Err(Outcome::ProtocolError);
                };
                if let Err(_err) = op.redirect(&location) {
                    op.fail(OpError::Callback);
                    self.stats.bump_outcome(op.verb, OutcomeKey::ProtocolError);
                    return Err(Outcome::ProtocolError);
                }
                continue;
            }

            return Ok(response);
        }

        op.fail(OpError::Callback);
        self.stats.bump_outcome(op.verb, OutcomeKey::ProtocolError);
        Err(Outcome::ProtocolError)
    }

    /// Streams the response body, feeding cumulative byte counts to
    /// `op.on_progress` per chunk while a parallel tick drives
    /// `op.check_timeouts` so stall/slow/operation deadlines are actually
    /// enforced over the life of the transfer, not just at connect time.
    async fn stream_body(&self, op: &mut CurlOperation, response: reqwest::Response) -> Outcome {
        let mut cumulative = 0u64;
        let mut body = response.bytes_stream();
        let mut ticker = tokio::time::interval(TIMEOUT_TICK);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                biased;

                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        cumulative += bytes.len() as u64;
                        op.on_progress(cumulative);
                    }
                    Some(Err(_)) => {
                        op.fail(OpError::Callback);
                        self.stats.bump_outcome(op.verb, OutcomeKey::ProtocolError);
                        return Outcome::ProtocolError;
                    }
                    None => {
                        op.finish();
                        return Outcome::Success;
                    }
                },
                _ = ticker.tick() => {
                    match op.check_timeouts() {
                        OpError::None => {}
                        OpError::OperationTimeout => {
                            self.stats.bump_outcome(op.verb, OutcomeKey::ServerTimeout);
                            return Outcome::ServerTimeout;
                        }
                        OpError::TransferStall | OpError::TransferClientStall | OpError::TransferSlow => {
                            self.stats.bump_outcome(op.verb, OutcomeKey::ServerTimeout);
                            return Outcome::ServerTimeout;
                        }
                        OpError::HeaderTimeout => {
                            self.stats.bump_outcome(op.verb, OutcomeKey::ClientTimeout);
                            return Outcome::ClientTimeout;
                        }
                        OpError::Callback => {
                            self.stats.bump_outcome(op.verb, OutcomeKey::ProtocolError);
                            return Outcome::ProtocolError;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header_parser::Verb;
    use url::Url;

    #[test]
    fn worker_stats_bump_code_and_query_it_back() {
        let stats = WorkerStats::default();
        stats.bump_code(Verb::Get, 200);
        stats.bump_code(Verb::Get, 200);
        stats.bump_code(Verb::Get, 404);
        assert_eq!(stats.count_for_code(Verb::Get, 200), 2);
        assert_eq!(stats.count_for_code(Verb::Get, 404), 1);
        assert_eq!(stats.count_for_code(Verb::Put, 200), 0);
    }

    #[test]
    fn worker_runs_a_request_against_a_local_server() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let server = wiremock_free_server(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
            let queue = Arc::new(HandlerQueue::new(4).unwrap());
            let op = CurlOperation::new(Verb::Get, &server, Duration::from_secs(2)).unwrap();
            queue.produce(Submission::new(op)).unwrap();
            queue.shutdown();

            let worker = CurlWorker::new(Arc::clone(&queue), no_redirect_client(), 4);
            let mut in_flight = FuturesUnordered::new();
            while let Some(submission) = queue.consume(Some(Duration::from_millis(50))) {
                in_flight.push(worker.execute(submission));
            }
            while in_flight.next().await.is_some() {}
            assert_eq!(worker.stats().completed.load(Ordering::Relaxed), 1);
        });
    }

    #[test]
    fn redirect_chain_pushes_a_response_record_per_hop_and_populates_verbs_cache() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let second = wiremock_free_server(
                b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nAllow: GET, PUT\r\n\r\nok",
            )
            .await;
            let first_response =
                format!("HTTP/1.1 302 Found\r\nLocation: {second}\r\nContent-Length: 0\r\n\r\n");
            let first = wiremock_free_server(first_response.as_bytes()).await;

            let queue = Arc::new(HandlerQueue::new(4).unwrap());
            let op = CurlOperation::new(Verb::Get, &first, Duration::from_secs(2)).unwrap();
            let first_key = verbs::cache_key(op.url());
            let second_key = {
                let parsed = Url::parse(&second).unwrap();
                verbs::cache_key(&parsed)
            };
            queue.produce(Submission::new(op)).unwrap();
            queue.shutdown();

            let worker = CurlWorker::new(Arc::clone(&queue), no_redirect_client(), 4);
            let mut in_flight = FuturesUnordered::new();
            while let Some(submission) = queue.consume(Some(Duration::from_millis(50))) {
                in_flight.push(worker.execute(submission));
            }
            while in_flight.next().await.is_some() {}

            assert_eq!(worker.stats().completed.load(Ordering::Relaxed), 1);
            assert!(worker.verbs_cache.get(&second_key).is_some());
            assert!(worker.verbs_cache.get(&first_key).is_none());
        });
    }

    fn no_redirect_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    /// Spins up a trivial local TCP listener speaking one fixed HTTP
    /// response, avoiding a dependency on a test-only HTTP mock crate.
    async fn wiremock_free_server(response: &[u8]) -> String {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let response = response.to_vec();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(&response).await;
            }
        });
        format!("http://{addr}/")
    }
}
