//! Chat Session Manager

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::session::{ChatSession, SessionOptions, SessionStatus};
use crate::clock::{Clock, system_clock};
use crate::config::SessionConfig;
use crate::error::{LariatError, Result};

/// Aggregate statistics across all tracked sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    /// Tracked sessions no longer active, awaiting removal
    pub expired_sessions: usize,
    pub total_messages: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

/// Owns every tracked [`ChatSession`]
pub struct ChatSessionManager {
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl ChatSessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a manager deciding expiry against `clock`
    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a new active session with a fresh id
    pub async fn create_session(&self, options: SessionOptions) -> Arc<ChatSession> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let options = SessionOptions {
            session_type: options
                .session_type
                .or_else(|| Some(self.config.session_type.clone())),
            timeout_minutes: options.timeout_minutes.or(Some(self.config.timeout_minutes)),
            max_duration_minutes: options
                .max_duration_minutes
                .or(Some(self.config.max_duration_minutes)),
            ..options
        };
        let session = Arc::new(ChatSession::new(
            session_id.clone(),
            options,
            self.clock.clone(),
        ));

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session.clone());

        tracing::info!(
            session_id = %session_id,
            session_type = %session.session_type(),
            timeout_minutes = session.timeout_minutes(),
            "Chat session created"
        );
        session
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Move a session to a terminal status.
    ///
    /// Returns `Ok(false)` when the session was already terminal. Timeout
    /// callbacks are not fired for explicit ends.
    ///
    /// # Errors
    ///
    /// Returns [`LariatError::SessionNotFound`] for an untracked id.
    pub async fn end_session(&self, session_id: &str, reason: SessionStatus) -> Result<bool> {
        let session = self
            .get_session(session_id)
            .await
            .ok_or_else(|| LariatError::SessionNotFound(session_id.to_string()))?;

        let ended = session.end(reason).await;
        if ended {
            tracing::info!(session_id = %session_id, reason = %reason, "Chat session ended");
        }
        Ok(ended)
    }

    /// Explicitly stop tracking a session
    pub async fn remove_session(&self, session_id: &str) -> Option<Arc<ChatSession>> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            tracing::debug!(session_id = %session_id, "Chat session removed");
        }
        removed
    }

    pub async fn get_active_sessions(&self) -> Vec<Arc<ChatSession>> {
        let sessions: Vec<Arc<ChatSession>> = self.sessions.read().await.values().cloned().collect();
        let mut active = Vec::new();
        for session in sessions {
            if session.is_active().await {
                active.push(session);
            }
        }
        active
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn get_session_stats(&self) -> SessionStats {
        let sessions: Vec<Arc<ChatSession>> = self.sessions.read().await.values().cloned().collect();
        let mut stats = SessionStats {
            total_sessions: sessions.len(),
            ..Default::default()
        };

        for session in sessions {
            let snapshot = session.snapshot().await;
            if snapshot.status == SessionStatus::Active {
                stats.active_sessions += 1;
            } else {
                stats.expired_sessions += 1;
            }
            stats.total_messages += snapshot.message_count;
            stats.total_tokens += snapshot.total_tokens;
            stats.total_cost += snapshot.total_cost;
        }
        stats
    }

    /// Expire overdue sessions, fire their callbacks, and drop every
    /// non-active session from the map. Returns the number removed.
    ///
    /// Callbacks run without the map lock held, so they may call back into
    /// the manager.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let sessions: Vec<Arc<ChatSession>> = self.sessions.read().await.values().cloned().collect();
        let mut to_remove = Vec::new();

        for session in sessions {
            if let Some(status) = session.expire().await {
                tracing::info!(
                    session_id = %session.session_id(),
                    status = %status,
                    "Chat session expired"
                );
                let failures = session.notify_timeout().await;
                if failures > 0 {
                    tracing::warn!(
                        session_id = %session.session_id(),
                        failures,
                        "Some timeout callbacks failed"
                    );
                }
                to_remove.push(session);
            } else if !session.is_active().await {
                to_remove.push(session);
            }
        }

        if to_remove.is_empty() {
            return 0;
        }

        let mut map = self.sessions.write().await;
        let mut removed = 0;
        for session in to_remove {
            // only drop the entry if it still refers to this session
            if map
                .get(session.session_id())
                .is_some_and(|current| Arc::ptr_eq(current, &session))
            {
                map.remove(session.session_id());
                removed += 1;
            }
        }
        tracing::debug!(removed, remaining = map.len(), "Session sweep complete");
        removed
    }

    /// Run [`cleanup_expired_sessions`](Self::cleanup_expired_sessions) every
    /// `period` until `cancel` fires
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.cleanup_expired_sessions().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manager(clock: &ManualClock) -> ChatSessionManager {
        ChatSessionManager::with_clock(SessionConfig::default(), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_create_applies_config_defaults() {
        let clock = ManualClock::default();
        let config = SessionConfig {
            timeout_minutes: 5,
            session_type: "support".to_string(),
            ..Default::default()
        };
        let manager = ChatSessionManager::with_clock(config, Arc::new(clock));

        let session = manager.create_session(SessionOptions::new()).await;
        assert_eq!(session.timeout_minutes(), 5);
        assert_eq!(session.max_duration_minutes(), 240);
        assert_eq!(session.session_type(), "support");

        let custom = manager
            .create_session(SessionOptions::new().timeout_minutes(1).name("demo"))
            .await;
        assert_eq!(custom.timeout_minutes(), 1);
        assert_eq!(custom.name(), "demo");
        assert_ne!(session.session_id(), custom.session_id());
        assert_eq!(manager.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_end_session_idempotent() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        let session = manager.create_session(SessionOptions::new()).await;

        assert!(manager.end_session(session.session_id(), SessionStatus::Ended).await.unwrap());
        assert!(!manager.end_session(session.session_id(), SessionStatus::Cancelled).await.unwrap());
        assert_eq!(session.status().await, SessionStatus::Ended);

        let missing = manager.end_session("nope", SessionStatus::Ended).await;
        assert!(matches!(missing, Err(LariatError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_stats() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        let a = manager.create_session(SessionOptions::new()).await;
        let b = manager.create_session(SessionOptions::new()).await;

        a.add_message(100, 0.25).await;
        a.add_message(50, 0.25).await;
        b.add_message(10, 0.0).await;
        b.end(SessionStatus::Cancelled).await;

        let stats = manager.get_session_stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.expired_sessions, 1);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.total_tokens, 160);
        assert_eq!(stats.total_cost, 0.5);
        assert_eq!(manager.get_active_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_terminal_sessions() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        let keep = manager.create_session(SessionOptions::new()).await;
        let ended = manager.create_session(SessionOptions::new()).await;
        ended.end(SessionStatus::Ended).await;

        assert_eq!(manager.cleanup_expired_sessions().await, 1);
        assert!(manager.get_session(keep.session_id()).await.is_some());
        assert!(manager.get_session(ended.session_id()).await.is_none());
        assert_eq!(manager.cleanup_expired_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_remove_session_keeps_state() {
        let clock = ManualClock::default();
        let manager = manager(&clock);
        let session = manager.create_session(SessionOptions::new()).await;
        session.add_message(5, 0.0).await;

        let removed = manager.remove_session(session.session_id()).await.unwrap();
        assert!(Arc::ptr_eq(&removed, &session));
        assert!(removed.is_active().await);
        assert_eq!(removed.message_count().await, 1);
        assert!(manager.remove_session(session.session_id()).await.is_none());
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let clock = ManualClock::default();
        let manager = Arc::new(manager(&clock));
        let session = manager
            .create_session(SessionOptions::new().timeout_minutes(1))
            .await;

        let cancel = CancellationToken::new();
        let handle = manager.spawn_sweeper(Duration::from_secs(60), cancel.clone());

        clock.advance(chrono::Duration::minutes(2));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(session.status().await, SessionStatus::Timeout);
        assert_eq!(manager.session_count().await, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
