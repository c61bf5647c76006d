//! Chat Session Management
//!
//! Conversational session lifecycle, independent of tracing, plus the
//! handler that links a session to a session-scoped trace.
//!
//! # Features
//!
//! - Session lifecycle (active, timeout, ended, cancelled)
//! - Idle and maximum-duration expiry against an injectable clock
//! - Timeout callbacks fired exactly once per session
//! - Background sweeping with cooperative cancellation
//!
//! # Example
//!
//! ```rust,ignore
//! use lariat_core::conversation::{ChatSessionManager, SessionOptions};
//!
//! let manager = ChatSessionManager::new(SessionConfig::default());
//! let session = manager.create_session(SessionOptions::new().name("support")).await;
//! session.add_message(120, 0.002).await;
//!
//! let removed = manager.cleanup_expired_sessions().await;
//! ```

mod handler;
mod manager;
mod session;

pub use handler::SessionTraceHandler;
pub use manager::{ChatSessionManager, SessionStats};
pub use session::{
    ChatSession, ChatSessionSnapshot, FnTimeoutCallback, SessionOptions, SessionStatus,
    TimeoutCallback,
};
