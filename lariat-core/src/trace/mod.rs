//! Trace collection and hierarchy reconstruction
//!
//! Spans flow in through [`UnifiedTraceCollector::process_span`], accumulate
//! in one [`TraceProcessor`] per trace, and leave as a [`HierarchicalTrace`]
//! flattened into a [`TraceBatch`] when the trace is finalized.
//!
//! # Example
//!
//! ```rust,no_run
//! use lariat_core::dispatch::MemorySink;
//! use lariat_core::trace::{Span, UnifiedTraceCollector};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let collector = UnifiedTraceCollector::new(Arc::new(MemorySink::new()));
//! collector.process_span(Span::new("t1", "explainer").complete()).await;
//! collector.process_span(Span::new("t1", "summarizer").complete()).await;
//!
//! let trace = collector.finalize_trace("t1").await;
//! # }
//! ```

mod collector;
mod export;
mod framework;
mod hierarchy;
mod processor;
mod span;

pub use collector::UnifiedTraceCollector;
pub use export::{AgentRecord, TraceBatch, TraceExporter, TraceFormat, TraceRecord};
pub use framework::{DetectionRule, Framework};
pub use hierarchy::{
    AgentEntry, HierarchicalTrace, LEVEL_AGENT, LEVEL_COMPONENT, LEVEL_ORCHESTRATION,
    LEVEL_SESSION, ModelInfo, TraceDependency, TraceMetadata, duration_ms,
};
pub use processor::{DEFAULT_ORCHESTRATION, TraceProcessor};
pub use span::{ComponentType, Span, SpanStatus, timestamp};
