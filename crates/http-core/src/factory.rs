//! Process-wide lifecycle: lazy single-shot initialization of the worker
//! pool, verbs cache, and monitoring thread, mirroring the native
//! `XrdHttpFactory`'s `CreateFile`/`CreateFileSystem` entry points.

use crate::config::Config;
use crate::curl_worker::{CurlWorker, Submission, WorkerStats};
use crate::handler_queue::HandlerQueue;
use crate::verbs::VerbsCache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("factory already shut down")]
    ShutDown,
    #[error(transparent)]
    Queue(#[from] crate::handler_queue::Error),
}

struct Workers {
    handles: Vec<JoinHandle<()>>,
    stats: Vec<Arc<WorkerStats>>,
}

/// Global lifecycle object. Construct one per process (typically behind a
/// `OnceLock`/`lazy_static`); its [`Drop`] triggers [`HttpFactory::shutdown`].
pub struct HttpFactory {
    config: Config,
    queue: Arc<HandlerQueue<Submission>>,
    verbs_cache: Arc<VerbsCache>,
    client: reqwest::Client,
    shutdown: AtomicBool,
    init: Once,
    workers: std::sync::Mutex<Option<Workers>>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
    monitor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl HttpFactory {
    pub fn new(config: Config) -> Arc<Self> {
        // Redirects are followed by the worker itself, one hop at a time,
        // so every hop's headers reach `CurlOperation::responses` and the
        // verbs cache -- reqwest's built-in follower would swallow them.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Arc::new(HttpFactory {
            queue: Arc::new(
                HandlerQueue::new(config.max_pending_ops).expect("failed to create handler queue"),
            ),
            verbs_cache: Arc::new(VerbsCache::new()),
            client,
            config,
            shutdown: AtomicBool::new(false),
            init: Once::new(),
            workers: std::sync::Mutex::new(None),
            sweeper: std::sync::Mutex::new(None),
            monitor: std::sync::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn verbs_cache(&self) -> &Arc<VerbsCache> {
        &self.verbs_cache
    }

    /// Performs one-time startup: spawns `num_threads` [`CurlWorker`]
    /// threads, the verbs-cache expiry thread, and (if configured) the
    /// statistics monitor thread. Safe to call repeatedly; only the first
    /// call has an effect.
    pub fn ensure_started(self: &Arc<Self>) {
        self.init.call_once(|| {
            info!(threads = self.config.num_threads, "starting http-core worker pool");

            let mut handles = Vec::with_capacity(self.config.num_threads);
            let mut stats = Vec::with_capacity(self.config.num_threads);
            for _ in 0..self.config.num_threads {
                let queue = Arc::clone(&self.queue);
                let client = self.client.clone();
                let worker = CurlWorker::new(queue, client, crate::curl_worker::DEFAULT_MAX_OPS)
                    .with_verbs_cache(Arc::clone(&self.verbs_cache))
                    .with_stall_interval(self.config.stall_timeout)
                    .with_slow_rate_floor(self.config.slow_rate_bytes_sec);
                stats.push(worker.stats());
                handles.push(std::thread::spawn(move || worker.run()));
            }
            *self.workers.lock().unwrap() = Some(Workers { handles, stats });

            let verbs_cache = Arc::clone(&self.verbs_cache);
            let self_for_sweep = Arc::clone(self);
            *self.sweeper.lock().unwrap() = Some(std::thread::spawn(move || {
                while !self_for_sweep.shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_secs(60));
                    verbs_cache.sweep();
                }
            }));

            if self.config.statistics_location.is_some() {
                let self_for_monitor = Arc::clone(self);
                *self.monitor.lock().unwrap() =
                    Some(std::thread::spawn(move || self_for_monitor.monitor_loop()));
            }
        });
    }

    fn monitor_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_secs(5));
            let snapshot = self.stats_snapshot();
            if let Some(path) = &self.config.statistics_location {
                if let Err(err) = write_atomic(path, &snapshot) {
                    warn!(%err, path, "failed to write http-core statistics file");
                }
            }
        }
    }

    fn stats_snapshot(&self) -> String {
        let workers = self.workers.lock().unwrap();
        let (completed, failed): (u64, u64) = workers
            .as_ref()
            .map(|w| {
                w.stats.iter().fold((0u64, 0u64), |(c, f), s| {
                    (
                        c + s.completed.load(Ordering::Relaxed),
                        f + s.failed.load(Ordering::Relaxed),
                    )
                })
            })
            .unwrap_or((0, 0));
        serde_json::json!({
            "event": "http_stats",
            "completed": completed,
            "failed": failed,
            "queue_len": self.queue.len(),
        })
        .to_string()
    }

    /// Enqueues `submission` into the shared work queue, blocking if the
    /// queue is at capacity.
    pub fn produce(&self, submission: Submission) -> Result<(), Error> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(Error::ShutDown);
        }
        Ok(self.queue.produce(submission)?)
    }

    /// Cooperative shutdown: wakes the queue so workers drain and exit,
    /// then joins every spawned thread.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }
        self.queue.shutdown();
        if let Some(workers) = self.workers.lock().unwrap().take() {
            for handle in workers.handles {
                let _ = handle.join();
            }
        }
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.monitor.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HttpFactory {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Writes `contents` to `path` atomically via `mkstemp`-style
/// create-in-same-directory + rename, so readers never observe a
/// partially written file.
fn write_atomic(path: &str, contents: &str) -> std::io::Result<()> {
    use std::io::Write;

    let target = std::path::Path::new(path);
    let dir = target.parent().unwrap_or_else(|| std::path::Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
