//! Chat Session

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::Result;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session is accepting messages
    Active,
    /// Idle for longer than the timeout
    Timeout,
    /// Ran past its maximum duration, or ended explicitly
    Ended,
    /// Cancelled explicitly
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Timeout => "timeout",
            SessionStatus::Ended => "ended",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    /// Every status except `Active` is terminal
    pub fn is_terminal(&self) -> bool {
        *self != SessionStatus::Active
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called once when a session times out or runs past its maximum duration
#[async_trait]
pub trait TimeoutCallback: Send + Sync {
    async fn on_timeout(&self, session: &ChatSessionSnapshot) -> Result<()>;
}

/// Adapter turning a closure into a [`TimeoutCallback`]
pub struct FnTimeoutCallback<F>(pub F);

#[async_trait]
impl<F> TimeoutCallback for FnTimeoutCallback<F>
where
    F: Fn(&ChatSessionSnapshot) -> Result<()> + Send + Sync,
{
    async fn on_timeout(&self, session: &ChatSessionSnapshot) -> Result<()> {
        (self.0)(session)
    }
}

/// Options for creating a session; unset values fall back to the manager's
/// [`SessionConfig`](crate::config::SessionConfig)
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub name: Option<String>,
    pub session_type: Option<String>,
    pub timeout_minutes: Option<i64>,
    pub max_duration_minutes: Option<i64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn session_type(mut self, session_type: impl Into<String>) -> Self {
        self.session_type = Some(session_type.into());
        self
    }

    pub fn timeout_minutes(mut self, minutes: i64) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    pub fn max_duration_minutes(mut self, minutes: i64) -> Self {
        self.max_duration_minutes = Some(minutes);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Serializable point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSessionSnapshot {
    pub session_id: String,
    pub name: String,
    pub session_type: String,
    pub timeout_minutes: i64,
    pub max_duration_minutes: i64,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub status: SessionStatus,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Minutes since start (until `end_time` once ended)
    pub duration_minutes: f64,
    /// Minutes of idle time left before timeout, 0 when not active
    pub time_to_timeout_minutes: f64,
}

/// Mutable part of a session, guarded by one lock so that metric increments
/// and status transitions are atomic with respect to each other
#[derive(Debug, Clone)]
struct SessionActivity {
    last_activity: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    message_count: u64,
    total_tokens: u64,
    total_cost: f64,
    status: SessionStatus,
}

/// A conversational session
pub struct ChatSession {
    session_id: String,
    name: String,
    session_type: String,
    timeout_minutes: i64,
    max_duration_minutes: i64,
    start_time: DateTime<Utc>,
    metadata: HashMap<String, serde_json::Value>,
    clock: Arc<dyn Clock>,
    activity: RwLock<SessionActivity>,
    callbacks: RwLock<Vec<Arc<dyn TimeoutCallback>>>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("session_id", &self.session_id)
            .field("name", &self.name)
            .field("session_type", &self.session_type)
            .field("timeout_minutes", &self.timeout_minutes)
            .field("max_duration_minutes", &self.max_duration_minutes)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Create an active session starting now.
    ///
    /// `options` must already carry concrete timeouts and type; missing ones
    /// fall back to the built-in defaults (30 / 240 minutes, "chat").
    pub fn new(session_id: impl Into<String>, options: SessionOptions, clock: Arc<dyn Clock>) -> Self {
        let session_id = session_id.into();
        let now = clock.now();
        Self {
            name: options
                .name
                .unwrap_or_else(|| format!("chat_session_{}", session_id)),
            session_type: options.session_type.unwrap_or_else(|| "chat".to_string()),
            timeout_minutes: options.timeout_minutes.unwrap_or(30),
            max_duration_minutes: options.max_duration_minutes.unwrap_or(240),
            start_time: now,
            metadata: options.metadata,
            clock,
            activity: RwLock::new(SessionActivity {
                last_activity: now,
                end_time: None,
                message_count: 0,
                total_tokens: 0,
                total_cost: 0.0,
                status: SessionStatus::Active,
            }),
            callbacks: RwLock::new(Vec::new()),
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_type(&self) -> &str {
        &self.session_type
    }

    pub fn timeout_minutes(&self) -> i64 {
        self.timeout_minutes
    }

    pub fn max_duration_minutes(&self) -> i64 {
        self.max_duration_minutes
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub async fn status(&self) -> SessionStatus {
        self.activity.read().await.status
    }

    pub async fn is_active(&self) -> bool {
        self.status().await == SessionStatus::Active
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        self.activity.read().await.last_activity
    }

    pub async fn message_count(&self) -> u64 {
        self.activity.read().await.message_count
    }

    /// Refresh the activity clock. Ignored once the session is terminal.
    pub async fn update_activity(&self) -> bool {
        let mut activity = self.activity.write().await;
        if activity.status != SessionStatus::Active {
            return false;
        }
        activity.last_activity = self.clock.now();
        true
    }

    /// Count a message and accumulate its usage. Ignored once the session is
    /// terminal.
    pub async fn add_message(&self, tokens: u64, cost: f64) -> bool {
        let mut activity = self.activity.write().await;
        if activity.status != SessionStatus::Active {
            return false;
        }
        activity.message_count += 1;
        activity.total_tokens = activity.total_tokens.saturating_add(tokens);
        activity.total_cost += cost;
        activity.last_activity = self.clock.now();
        true
    }

    /// Accumulate usage without counting a message
    pub async fn record_usage(&self, tokens: u64, cost: f64) -> bool {
        let mut activity = self.activity.write().await;
        if activity.status != SessionStatus::Active {
            return false;
        }
        activity.total_tokens = activity.total_tokens.saturating_add(tokens);
        activity.total_cost += cost;
        activity.last_activity = self.clock.now();
        true
    }

    /// True iff idle time exceeds `timeout_minutes` or total duration exceeds
    /// `max_duration_minutes`. Both comparisons are strict.
    pub async fn should_end_session(&self) -> bool {
        let activity = self.activity.read().await;
        self.expiry_reason(&activity, self.clock.now()).is_some()
    }

    fn expiry_reason(&self, activity: &SessionActivity, now: DateTime<Utc>) -> Option<SessionStatus> {
        if exceeds(now - activity.last_activity, self.timeout_minutes) {
            Some(SessionStatus::Timeout)
        } else if exceeds(now - self.start_time, self.max_duration_minutes) {
            Some(SessionStatus::Ended)
        } else {
            None
        }
    }

    /// Transition an active, overdue session to `timeout` or `ended`.
    ///
    /// Returns the new status only for the caller that made the transition,
    /// so callbacks run exactly once.
    pub(crate) async fn expire(&self) -> Option<SessionStatus> {
        let mut activity = self.activity.write().await;
        if activity.status != SessionStatus::Active {
            return None;
        }
        let now = self.clock.now();
        let reason = self.expiry_reason(&activity, now)?;
        activity.status = reason;
        activity.end_time = Some(now);
        Some(reason)
    }

    /// Explicit terminal transition. Returns false if already terminal.
    ///
    /// Passing `Active` is treated as `Ended`.
    pub async fn end(&self, reason: SessionStatus) -> bool {
        let reason = match reason {
            SessionStatus::Active => SessionStatus::Ended,
            other => other,
        };
        let mut activity = self.activity.write().await;
        if activity.status != SessionStatus::Active {
            return false;
        }
        activity.status = reason;
        activity.end_time = Some(self.clock.now());
        true
    }

    /// Minutes since start, up to `end_time` once ended
    pub async fn duration_minutes(&self) -> f64 {
        let activity = self.activity.read().await;
        self.duration_minutes_at(&activity, self.clock.now())
    }

    /// Minutes of idle time left before timeout
    pub async fn time_to_timeout_minutes(&self) -> f64 {
        let activity = self.activity.read().await;
        self.time_to_timeout_at(&activity, self.clock.now())
    }

    fn duration_minutes_at(&self, activity: &SessionActivity, now: DateTime<Utc>) -> f64 {
        let end = activity.end_time.unwrap_or(now);
        minutes(end - self.start_time)
    }

    fn time_to_timeout_at(&self, activity: &SessionActivity, now: DateTime<Utc>) -> f64 {
        if activity.status != SessionStatus::Active {
            return 0.0;
        }
        let idle = minutes(now - activity.last_activity);
        (self.timeout_minutes as f64 - idle).max(0.0)
    }

    pub async fn snapshot(&self) -> ChatSessionSnapshot {
        let activity = self.activity.read().await;
        let now = self.clock.now();
        ChatSessionSnapshot {
            session_id: self.session_id.clone(),
            name: self.name.clone(),
            session_type: self.session_type.clone(),
            timeout_minutes: self.timeout_minutes,
            max_duration_minutes: self.max_duration_minutes,
            start_time: self.start_time,
            last_activity: activity.last_activity,
            end_time: activity.end_time,
            message_count: activity.message_count,
            total_tokens: activity.total_tokens,
            total_cost: activity.total_cost,
            status: activity.status,
            metadata: self.metadata.clone(),
            duration_minutes: self.duration_minutes_at(&activity, now),
            time_to_timeout_minutes: self.time_to_timeout_at(&activity, now),
        }
    }

    /// Register a callback; registering the same `Arc` twice is a no-op
    pub async fn register_timeout_callback(&self, callback: Arc<dyn TimeoutCallback>) -> bool {
        let mut callbacks = self.callbacks.write().await;
        if callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    pub async fn unregister_timeout_callback(&self, callback: &Arc<dyn TimeoutCallback>) -> bool {
        let mut callbacks = self.callbacks.write().await;
        let before = callbacks.len();
        callbacks.retain(|c| !Arc::ptr_eq(c, callback));
        callbacks.len() != before
    }

    pub async fn callback_count(&self) -> usize {
        self.callbacks.read().await.len()
    }

    /// Run every registered callback once. Failures are logged individually
    /// and counted; they never stop the remaining callbacks.
    pub(crate) async fn notify_timeout(&self) -> usize {
        let callbacks = self.callbacks.read().await.clone();
        let snapshot = self.snapshot().await;
        let mut failures = 0;

        for callback in callbacks {
            if let Err(e) = callback.on_timeout(&snapshot).await {
                failures += 1;
                tracing::error!(
                    session_id = %self.session_id,
                    status = %snapshot.status,
                    error = %e,
                    "Session timeout callback failed"
                );
            }
        }
        failures
    }
}

/// Whether `elapsed` is strictly past a limit of `limit_minutes`. A limit
/// too large for `Duration` is never reached.
fn exceeds(elapsed: Duration, limit_minutes: i64) -> bool {
    match Duration::try_minutes(limit_minutes) {
        Some(limit) => elapsed > limit,
        None => false,
    }
}

fn minutes(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 60_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LariatError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(clock: &ManualClock) -> ChatSession {
        ChatSession::new(
            "s1",
            SessionOptions::new().timeout_minutes(30).max_duration_minutes(240),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn test_new_session_defaults() {
        let clock = ManualClock::default();
        let session = ChatSession::new("abc", SessionOptions::new(), Arc::new(clock.clone()));

        assert_eq!(session.name(), "chat_session_abc");
        assert_eq!(session.session_type(), "chat");
        assert_eq!(session.timeout_minutes(), 30);
        assert_eq!(session.max_duration_minutes(), 240);
        assert!(session.is_active().await);
        assert_eq!(session.last_activity().await, clock.now());
    }

    #[tokio::test]
    async fn test_idle_boundary_is_strict() {
        let clock = ManualClock::default();
        let session = session(&clock);

        clock.advance(Duration::minutes(30));
        assert!(!session.should_end_session().await);

        clock.advance(Duration::milliseconds(1));
        assert!(session.should_end_session().await);
    }

    #[tokio::test]
    async fn test_huge_limits_never_expire() {
        let clock = ManualClock::default();
        let session = ChatSession::new(
            "s1",
            SessionOptions::new()
                .timeout_minutes(i64::MAX)
                .max_duration_minutes(i64::MAX),
            Arc::new(clock.clone()),
        );

        clock.advance(Duration::days(365 * 100));
        assert!(!session.should_end_session().await);
        assert!(session.expire().await.is_none());
        assert!(session.time_to_timeout_minutes().await > 0.0);
        assert!(session.snapshot().await.time_to_timeout_minutes > 0.0);
    }

    #[tokio::test]
    async fn test_duration_boundary_independent_of_messages() {
        let clock = ManualClock::default();
        let session = session(&clock);

        for _ in 0..24 {
            clock.advance(Duration::minutes(10));
            session.add_message(5, 0.01).await;
        }
        assert_eq!(session.message_count().await, 24);
        assert!(!session.should_end_session().await);

        clock.advance(Duration::seconds(1));
        assert!(session.should_end_session().await);
        assert_eq!(session.expire().await, Some(SessionStatus::Ended));
    }

    #[tokio::test]
    async fn test_activity_resets_idle_clock() {
        let clock = ManualClock::default();
        let session = session(&clock);

        clock.advance(Duration::minutes(20));
        assert!(session.update_activity().await);
        clock.advance(Duration::minutes(20));
        assert!(!session.should_end_session().await);
        assert_eq!(session.time_to_timeout_minutes().await, 10.0);
    }

    #[tokio::test]
    async fn test_expire_transitions_once() {
        let clock = ManualClock::default();
        let session = session(&clock);
        clock.advance(Duration::minutes(31));

        assert_eq!(session.expire().await, Some(SessionStatus::Timeout));
        assert_eq!(session.expire().await, None);
        assert_eq!(session.status().await, SessionStatus::Timeout);
        assert_eq!(session.snapshot().await.end_time, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_terminal_session_ignores_updates() {
        let clock = ManualClock::default();
        let session = session(&clock);

        assert!(session.end(SessionStatus::Cancelled).await);
        assert!(!session.end(SessionStatus::Ended).await);
        assert!(!session.add_message(10, 0.5).await);
        assert!(!session.update_activity().await);

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.status, SessionStatus::Cancelled);
        assert_eq!(snapshot.message_count, 0);
        assert_eq!(snapshot.time_to_timeout_minutes, 0.0);
    }

    #[tokio::test]
    async fn test_callbacks_deduplicated_and_isolated() {
        let clock = ManualClock::default();
        let session = session(&clock);
        let calls = Arc::new(AtomicUsize::new(0));

        let counting: Arc<dyn TimeoutCallback> = {
            let calls = calls.clone();
            Arc::new(FnTimeoutCallback(move |_: &ChatSessionSnapshot| -> Result<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        };
        let failing: Arc<dyn TimeoutCallback> =
            Arc::new(FnTimeoutCallback(|_: &ChatSessionSnapshot| -> Result<()> {
                Err(LariatError::Other("boom".to_string()))
            }));

        assert!(session.register_timeout_callback(failing.clone()).await);
        assert!(session.register_timeout_callback(counting.clone()).await);
        assert!(!session.register_timeout_callback(counting.clone()).await);
        assert_eq!(session.callback_count().await, 2);

        assert_eq!(session.notify_timeout().await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(session.unregister_timeout_callback(&failing).await);
        assert!(!session.unregister_timeout_callback(&failing).await);
        assert_eq!(session.notify_timeout().await, 0);
    }
}
