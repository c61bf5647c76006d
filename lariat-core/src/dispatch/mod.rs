//! Batch dispatch
//!
//! Finalized traces leave the process through a [`TraceSink`]. The
//! [`HttpSink`] posts to the ingestion backend; [`MemorySink`] keeps batches
//! in memory for tests and offline replay.

mod http;
mod retry;
mod sink;

pub use http::{HttpSink, Identity};
pub use retry::{RetryConfig, with_retry};
pub use sink::{MemorySink, TraceSink};
