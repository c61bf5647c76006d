//! # Lariat - Trace collection for agentic LLM applications
//!
//! Lariat is an embedded observability layer. It captures execution spans
//! (agents, LLM calls, tools), reconstructs them into a hierarchical trace
//! per conversation or workflow, tracks chat session lifecycle, and ships
//! finalized traces to an ingestion backend.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lariat_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let lariat = Lariat::init(LariatConfig::load()?)?;
//!     lariat.install_signal_handler();
//!
//!     let chat = lariat.start_chat(SessionOptions::new().name("support")).await;
//!     chat.user_message("How do I reset my password?", None).await;
//!     chat.agent_started("run-1", "explainer", serde_json::json!({})).await;
//!     chat.agent_finished("run-1", serde_json::json!({"answer": "..."}), 420, 180, 0.003).await;
//!
//!     chat.end_session(SessionStatus::Ended).await;
//!     lariat.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Span model**: [`trace::Span`], the unit every producer emits
//! - **Processors**: one [`trace::TraceProcessor`] per trace rebuilds the
//!   session / orchestration / agent / component tree
//! - **Collector**: [`trace::UnifiedTraceCollector`] routes spans, finalizes
//!   traces and drains them on shutdown
//! - **Sessions**: [`conversation::ChatSessionManager`] tracks conversations
//!   and expires idle ones
//! - **Dispatch**: [`dispatch::TraceSink`] implementations deliver batches

pub mod clock;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod sdk;
pub mod trace;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{ConfigBuilder, DispatchConfig, LariatConfig, SessionConfig};
    pub use crate::conversation::{
        ChatSession, ChatSessionManager, ChatSessionSnapshot, SessionOptions, SessionStats,
        SessionStatus, SessionTraceHandler, TimeoutCallback,
    };
    pub use crate::dispatch::{HttpSink, MemorySink, TraceSink};
    pub use crate::error::{LariatError, Result};
    pub use crate::sdk::{Lariat, LariatBuilder, ShutdownReport};
    pub use crate::trace::{
        AgentEntry, ComponentType, Framework, HierarchicalTrace, Span, SpanStatus, TraceBatch,
        TraceExporter, TraceFormat, UnifiedTraceCollector,
    };
}
