//! Session-scoped trace handler
//!
//! Binds one [`ChatSession`] to one trace. Every turn of the conversation
//! lands in the same trace, each turn under its own agent orchestration, and
//! the trace is finalized once: when the session ends explicitly or when the
//! sweep times it out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

use super::session::{ChatSession, ChatSessionSnapshot, SessionStatus, TimeoutCallback};
use crate::error::Result;
use crate::trace::{ComponentType, HierarchicalTrace, Span, UnifiedTraceCollector};

#[derive(Debug, Default)]
struct HandlerState {
    message_sequence: u64,
    orchestration_id: Option<String>,
    /// run_id -> span started but not yet finished
    runs: HashMap<String, Span>,
}

/// Emits session-linked spans for one conversation
pub struct SessionTraceHandler {
    session: Arc<ChatSession>,
    collector: Arc<UnifiedTraceCollector>,
    trace_id: String,
    state: Mutex<HandlerState>,
    finalized: AtomicBool,
}

/// Finalizes the handler's trace when its session times out. Holds the
/// handler weakly so the session does not keep it alive.
struct FinalizeOnTimeout {
    handler: Weak<SessionTraceHandler>,
}

#[async_trait]
impl TimeoutCallback for FinalizeOnTimeout {
    async fn on_timeout(&self, session: &ChatSessionSnapshot) -> Result<()> {
        if let Some(handler) = self.handler.upgrade() {
            tracing::info!(
                session_id = %session.session_id,
                trace_id = %handler.trace_id,
                "Session expired; finalizing its trace"
            );
            handler.finalize().await;
        }
        Ok(())
    }
}

impl SessionTraceHandler {
    /// Create a handler with a fresh session-scoped trace id and hook it to
    /// the session's timeout
    pub async fn attach(session: Arc<ChatSession>, collector: Arc<UnifiedTraceCollector>) -> Arc<Self> {
        let handler = Arc::new(Self {
            session,
            collector,
            trace_id: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(HandlerState::default()),
            finalized: AtomicBool::new(false),
        });

        let callback: Arc<dyn TimeoutCallback> = Arc::new(FinalizeOnTimeout {
            handler: Arc::downgrade(&handler),
        });
        handler.session.register_timeout_callback(callback).await;
        handler
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn session(&self) -> &Arc<ChatSession> {
        &self.session
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Current orchestration id, set by the latest user message
    pub async fn orchestration_id(&self) -> Option<String> {
        self.state.lock().await.orchestration_id.clone()
    }

    /// Record a user turn and start a new orchestration for it
    pub async fn user_message(&self, content: impl Into<String>, message_id: Option<String>) {
        let content = content.into();
        let sequence = {
            let mut state = self.state.lock().await;
            state.message_sequence += 1;
            state.orchestration_id = Some(uuid::Uuid::new_v4().to_string());
            state.message_sequence
        };
        self.session.add_message(0, 0.0).await;

        let mut span = Span::new(self.trace_id.clone(), "user_message")
            .with_function_name("user_message")
            .with_inputs(serde_json::json!({ "message": content }));
        span.message_type = Some("user_message".to_string());
        span.message_content = Some(content);
        span.user_message_id = message_id;
        self.stamp_session(&mut span, sequence);

        self.collector.process_span(span.complete()).await;
    }

    /// An agent node began executing
    pub async fn agent_started(
        &self,
        run_id: impl Into<String>,
        agent_name: impl Into<String>,
        inputs: serde_json::Value,
    ) {
        let mut state = self.state.lock().await;
        let mut span = Span::new(self.trace_id.clone(), agent_name)
            .with_component_type(ComponentType::Agent)
            .with_inputs(inputs);
        span.message_type = Some("agent_execution".to_string());
        self.stamp_session(&mut span, state.message_sequence);
        span.agent_orchestration_id = state.orchestration_id.clone();
        state.runs.insert(run_id.into(), span);
    }

    /// An agent node finished; emits its span
    pub async fn agent_finished(
        &self,
        run_id: &str,
        outputs: serde_json::Value,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    ) {
        let Some(span) = self.state.lock().await.runs.remove(run_id) else {
            tracing::warn!(trace_id = %self.trace_id, run_id = %run_id, "Finish for unknown run");
            return;
        };
        let span = span
            .with_outputs(outputs)
            .with_tokens(input_tokens, output_tokens)
            .with_cost(cost)
            .complete();

        self.session
            .record_usage(span.token_sum(), span.cost)
            .await;
        self.collector.process_span(span).await;
    }

    /// An agent node failed; emits its span
    pub async fn agent_failed(&self, run_id: &str, error: impl Into<String>) {
        let Some(span) = self.state.lock().await.runs.remove(run_id) else {
            tracing::warn!(trace_id = %self.trace_id, run_id = %run_id, "Failure for unknown run");
            return;
        };
        self.session.update_activity().await;
        self.collector.process_span(span.fail(error)).await;
    }

    /// Stamp the session linkage onto an externally built span and emit it.
    /// An orchestration id already on the span is kept.
    pub async fn record_span(&self, mut span: Span) {
        let (sequence, orchestration) = {
            let state = self.state.lock().await;
            (state.message_sequence, state.orchestration_id.clone())
        };
        span.trace_id = Some(self.trace_id.clone());
        self.stamp_session(&mut span, sequence);
        if span.agent_orchestration_id.is_none() {
            span.agent_orchestration_id = orchestration;
        }
        self.collector.process_span(span).await;
    }

    /// Finalize the session trace. Runs at most once; unfinished runs are
    /// emitted as still running first.
    pub async fn finalize(&self) -> Option<HierarchicalTrace> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return None;
        }

        let pending: Vec<Span> = self.state.lock().await.runs.drain().map(|(_, span)| span).collect();
        for span in pending {
            self.collector.process_span(span).await;
        }
        self.collector.finalize_trace(&self.trace_id).await
    }

    /// End the session with `reason`, then finalize
    pub async fn end_session(&self, reason: SessionStatus) -> Option<HierarchicalTrace> {
        if self.session.end(reason).await {
            tracing::info!(
                session_id = %self.session.session_id(),
                reason = %reason,
                "Chat session ended"
            );
        }
        self.finalize().await
    }

    fn stamp_session(&self, span: &mut Span, sequence: u64) {
        let session_id = self.session.session_id().to_string();
        span.session_id = Some(session_id.clone());
        span.chat_session_id = Some(session_id);
        span.session_type = Some(self.session.session_type().to_string());
        if span.message_sequence.is_none() && sequence > 0 {
            span.message_sequence = Some(sequence);
        }
    }
}
