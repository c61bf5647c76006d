//! Unified trace collector
//!
//! Routes spans to one [`TraceProcessor`] per `trace_id`, finalizes traces on
//! request and drains whatever is still open at shutdown. Nothing here
//! returns an error to the producer; failures are logged.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

use super::export::TraceBatch;
use super::hierarchy::HierarchicalTrace;
use super::processor::TraceProcessor;
use super::span::Span;
use crate::conversation::{ChatSessionManager, ChatSessionSnapshot};
use crate::dispatch::TraceSink;

/// Routes spans to per-trace processors and ships finalized traces
pub struct UnifiedTraceCollector {
    /// trace_id -> processor. Appends happen under the read lock, removal
    /// under the write lock, so finalize always sees a settled buffer.
    processors: RwLock<HashMap<String, Arc<Mutex<TraceProcessor>>>>,
    sink: Arc<dyn TraceSink>,
    sessions: Option<Arc<ChatSessionManager>>,
    environment: String,
    tags: HashMap<String, String>,
    shut_down: AtomicBool,
}

impl UnifiedTraceCollector {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self {
            processors: RwLock::new(HashMap::new()),
            sink,
            sessions: None,
            environment: "development".to_string(),
            tags: HashMap::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Fill session fields of trace summaries from `manager`
    pub fn with_sessions(mut self, manager: Arc<ChatSessionManager>) -> Self {
        self.sessions = Some(manager);
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn sink(&self) -> &Arc<dyn TraceSink> {
        &self.sink
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Route a span to its trace's processor, creating the processor on the
    /// first span of a trace.
    ///
    /// Spans without a `trace_id`, or arriving after shutdown, are dropped.
    pub async fn process_span(&self, span: Span) {
        let Some(trace_id) = span.trace_id().map(str::to_string) else {
            tracing::warn!(
                agent_name = %span.agent_name,
                "Dropping span without trace_id"
            );
            return;
        };

        if self.is_shut_down() {
            tracing::warn!(trace_id = %trace_id, "Collector is shut down; dropping span");
            return;
        }

        {
            let processors = self.processors.read().await;
            if let Some(processor) = processors.get(&trace_id) {
                processor.lock().await.add_span(span);
                return;
            }
        }

        let mut processors = self.processors.write().await;
        // shutdown flips the flag under this lock before taking its snapshot
        if self.is_shut_down() {
            tracing::warn!(trace_id = %trace_id, "Collector is shut down; dropping span");
            return;
        }
        let processor = processors.entry(trace_id.clone()).or_insert_with(|| {
            let processor = TraceProcessor::for_span(trace_id.clone(), &span);
            tracing::debug!(
                trace_id = %trace_id,
                framework = %processor.framework(),
                "Created trace processor"
            );
            Arc::new(Mutex::new(processor))
        });
        processor.lock().await.add_span(span);
    }

    /// Reconstruct, dispatch and forget a trace.
    ///
    /// Unknown ids are a logged no-op. A span arriving for the same id
    /// afterwards starts a new, separate trace.
    pub async fn finalize_trace(&self, trace_id: &str) -> Option<HierarchicalTrace> {
        let removed = self.processors.write().await.remove(trace_id);
        let Some(processor) = removed else {
            tracing::warn!(trace_id = %trace_id, "No open trace to finalize");
            return None;
        };

        let trace = {
            let processor = processor.lock().await;
            match std::panic::catch_unwind(AssertUnwindSafe(|| processor.process_trace())) {
                Ok(trace) => trace,
                Err(_) => {
                    tracing::error!(
                        trace_id = %trace_id,
                        spans = processor.span_count(),
                        "Hierarchy reconstruction failed; trace dropped"
                    );
                    return None;
                }
            }
        };

        let session = self.session_snapshot(&trace).await;
        let batch = TraceBatch::from_trace(&trace, session.as_ref(), &self.environment, &self.tags);

        match self.sink.send_batch(&batch).await {
            Ok(()) => tracing::info!(
                trace_id = %trace_id,
                name = %trace.name,
                agents = batch.agents.len(),
                sink = self.sink.name(),
                "Trace finalized"
            ),
            Err(e) => tracing::error!(
                trace_id = %trace_id,
                sink = self.sink.name(),
                error = %e,
                "Failed to dispatch trace batch; dropped"
            ),
        }

        Some(trace)
    }

    async fn session_snapshot(&self, trace: &HierarchicalTrace) -> Option<ChatSessionSnapshot> {
        let manager = self.sessions.as_ref()?;
        let session_id = trace
            .metadata
            .session_id
            .as_deref()
            .or(trace.metadata.chat_session_id.as_deref())?;
        let session = manager.get_session(session_id).await?;
        Some(session.snapshot().await)
    }

    /// Finalize every open trace once; later calls are no-ops. Returns the
    /// number of traces drained.
    pub async fn shutdown(&self) -> usize {
        let pending: Vec<String> = {
            let processors = self.processors.write().await;
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return 0;
            }
            processors.keys().cloned().collect()
        };
        tracing::info!(pending = pending.len(), "Draining open traces");

        let mut drained = 0;
        for trace_id in pending {
            if self.finalize_trace(&trace_id).await.is_some() {
                drained += 1;
            }
        }
        tracing::info!(drained, "Collector shut down");
        drained
    }

    /// Ids of traces still accumulating spans
    pub async fn open_traces(&self) -> Vec<String> {
        self.processors.read().await.keys().cloned().collect()
    }

    /// Buffered span count of an open trace
    pub async fn span_count(&self, trace_id: &str) -> Option<usize> {
        let processor = self.processors.read().await.get(trace_id).cloned()?;
        let count = processor.lock().await.span_count();
        Some(count)
    }
}
