//! HTTP/WebDAV client engine: a pooled worker model driving concurrent
//! transfers over [`reqwest`], with header-timeout/stall-detection state
//! machines, a connection-callout hook, and a verbs-discovery cache.

pub mod config;
pub mod curl_operation;
pub mod curl_worker;
pub mod factory;
pub mod handler_queue;
pub mod header_parser;
pub mod verbs;

pub use config::Config;
pub use curl_operation::{ConnectionCallout, CurlOperation, OpError, Stage, StatisticsSnapshot};
pub use curl_worker::{CurlWorker, Outcome, Submission, WorkerStats};
pub use factory::HttpFactory;
pub use handler_queue::{HandlePool, HandlerQueue, QueueStats};
pub use header_parser::{Error as HeaderParserError, HeaderParser, ResponseInfo, Verb, VerbSet};
pub use verbs::VerbsCache;
