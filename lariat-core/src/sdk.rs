//! Process-wide collector lifecycle
//!
//! [`Lariat`] bundles the trace collector and the session manager behind an
//! explicit `init` / `shutdown` pair. Shutdown runs exactly once, whether it
//! is triggered by the application or by a termination signal.

use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, system_clock};
use crate::config::LariatConfig;
use crate::conversation::{ChatSessionManager, SessionOptions, SessionTraceHandler};
use crate::dispatch::{HttpSink, TraceSink};
use crate::error::Result;
use crate::trace::UnifiedTraceCollector;

/// Outcome of the single shutdown run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Traces finalized during the drain
    pub drained: usize,
}

/// Collector, session manager and their background tasks
pub struct Lariat {
    config: LariatConfig,
    collector: Arc<UnifiedTraceCollector>,
    sessions: Arc<ChatSessionManager>,
    sink: Arc<dyn TraceSink>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shutdown: OnceCell<ShutdownReport>,
}

impl Lariat {
    /// Build with the HTTP sink and start the session sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn init(config: LariatConfig) -> Result<Arc<Self>> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> LariatBuilder {
        LariatBuilder::default()
    }

    pub fn config(&self) -> &LariatConfig {
        &self.config
    }

    pub fn collector(&self) -> &Arc<UnifiedTraceCollector> {
        &self.collector
    }

    pub fn sessions(&self) -> &Arc<ChatSessionManager> {
        &self.sessions
    }

    /// Create a session and a handler tracing it as one trace
    pub async fn start_chat(&self, options: SessionOptions) -> Arc<SessionTraceHandler> {
        let session = self.sessions.create_session(options).await;
        SessionTraceHandler::attach(session, self.collector.clone()).await
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.initialized()
    }

    /// Run [`shutdown`](Self::shutdown) on Ctrl-C or SIGTERM. The task exits
    /// quietly if shutdown happens some other way first.
    pub fn install_signal_handler(self: &Arc<Self>) -> JoinHandle<()> {
        let lariat = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_termination() => {
                    tracing::info!("Termination signal received");
                    lariat.shutdown().await;
                }
                _ = lariat.cancel.cancelled() => {}
            }
        })
    }

    /// Stop the sweeper, drain every open trace, then close the sink.
    ///
    /// Runs once; concurrent callers wait for that run and later callers get
    /// its report.
    pub async fn shutdown(&self) -> ShutdownReport {
        *self
            .shutdown
            .get_or_init(|| async {
                tracing::info!("Shutting down");
                self.cancel.cancel();

                let sweeper = self.sweeper.lock().await.take();
                if let Some(handle) = sweeper
                    && let Err(e) = handle.await
                {
                    tracing::warn!(error = %e, "Session sweeper ended abnormally");
                }

                let drained = self.collector.shutdown().await;

                if let Err(e) = self.sink.close().await {
                    tracing::error!(sink = self.sink.name(), error = %e, "Failed to close sink");
                }

                tracing::info!(drained, "Shutdown complete");
                ShutdownReport { drained }
            })
            .await
    }
}

async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Builder for [`Lariat`]
#[derive(Default)]
pub struct LariatBuilder {
    config: Option<LariatConfig>,
    sink: Option<Arc<dyn TraceSink>>,
    clock: Option<Arc<dyn Clock>>,
    sweeper: Option<bool>,
}

impl LariatBuilder {
    pub fn config(mut self, config: LariatConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `sink` instead of the HTTP sink
    pub fn sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Decide session expiry against `clock`
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable or disable the background session sweeper (on by default)
    pub fn sweeper(mut self, enabled: bool) -> Self {
        self.sweeper = Some(enabled);
        self
    }

    /// Build and start background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn build(self) -> Result<Arc<Lariat>> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let sink: Arc<dyn TraceSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(HttpSink::new(&config)?),
        };
        let clock = self.clock.unwrap_or_else(system_clock);

        let sessions = Arc::new(ChatSessionManager::with_clock(
            config.sessions.clone(),
            clock,
        ));
        let collector = Arc::new(
            UnifiedTraceCollector::new(sink.clone())
                .with_sessions(sessions.clone())
                .with_environment(config.environment.clone())
                .with_tags(config.tags.clone()),
        );

        let cancel = CancellationToken::new();
        let sweeper = if self.sweeper.unwrap_or(true) {
            Some(sessions.spawn_sweeper(config.sessions.sweep_interval, cancel.clone()))
        } else {
            None
        };

        tracing::info!(
            endpoint = %config.endpoint,
            environment = %config.environment,
            sink = sink.name(),
            "Lariat initialized"
        );

        Ok(Arc::new(Lariat {
            config,
            collector,
            sessions,
            sink,
            cancel,
            sweeper: Mutex::new(sweeper),
            shutdown: OnceCell::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MemorySink;
    use crate::trace::Span;

    #[tokio::test]
    async fn test_shutdown_runs_once() {
        let sink = Arc::new(MemorySink::new());
        let lariat = Lariat::builder().sink(sink.clone()).build().unwrap();

        lariat.collector().process_span(Span::new("t1", "a")).await;
        lariat.collector().process_span(Span::new("t2", "b")).await;

        let (first, second) = tokio::join!(lariat.shutdown(), lariat.shutdown());
        assert_eq!(first, ShutdownReport { drained: 2 });
        assert_eq!(first, second);
        assert_eq!(lariat.shutdown().await.drained, 2);

        assert!(lariat.is_shut_down());
        assert!(sink.is_closed());
        assert_eq!(sink.batch_count().await, 2);
    }

    #[tokio::test]
    async fn test_signal_task_exits_after_shutdown() {
        let lariat = Lariat::builder()
            .sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();
        let signal_task = lariat.install_signal_handler();

        lariat.shutdown().await;
        signal_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = LariatConfig::default();
        config.endpoint = String::new();
        assert!(Lariat::init(config).is_err());
    }
}
