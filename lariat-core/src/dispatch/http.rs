//! HTTP sink for the ingestion backend

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::retry::{RetryConfig, with_retry};
use super::sink::TraceSink;
use crate::config::LariatConfig;
use crate::error::{LariatError, Result};
use crate::trace::TraceBatch;

/// Identity resolved once through the whoami endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// How long a failed whoami is remembered before the next lookup
pub const IDENTITY_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
enum IdentityCache {
    Unresolved,
    Resolved(Identity),
    /// Lookup failed at this instant
    Failed(Instant),
}

/// Posts batches to `{endpoint}/api/v1/traces/batch`
pub struct HttpSink {
    client: reqwest::Client,
    batch_url: String,
    whoami_url: String,
    api_key: Option<String>,
    /// Configured project, takes precedence over the whoami answer
    project_id: Option<String>,
    request_timeout: Duration,
    identity_timeout: Duration,
    retry: RetryConfig,
    identity_retry_after: Duration,
    identity: RwLock<IdentityCache>,
}

impl HttpSink {
    /// Create a sink from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LariatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lariat/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            batch_url: config.batch_url(),
            whoami_url: config.whoami_url(),
            api_key: config.api_key.clone(),
            project_id: config.project_id.clone(),
            request_timeout: config.dispatch.request_timeout,
            identity_timeout: config.dispatch.identity_timeout,
            retry: RetryConfig::from_dispatch(&config.dispatch),
            identity_retry_after: IDENTITY_RETRY_AFTER,
            identity: RwLock::new(IdentityCache::Unresolved),
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override how long a failed identity lookup is remembered
    pub fn with_identity_retry_after(mut self, retry_after: Duration) -> Self {
        self.identity_retry_after = retry_after;
        self
    }

    /// The cached identity, if one has been resolved
    pub async fn cached_identity(&self) -> Option<Identity> {
        match &*self.identity.read().await {
            IdentityCache::Resolved(identity) => Some(identity.clone()),
            _ => None,
        }
    }

    /// Resolve identity, calling whoami until the first success. After a
    /// failure, lookups are skipped for `identity_retry_after`.
    pub async fn identity(&self) -> Identity {
        let cached = self.from_cache(&*self.identity.read().await);
        if let Some(identity) = cached {
            return identity;
        }

        let mut cached = self.identity.write().await;
        // another caller may have resolved it while we waited
        if let Some(identity) = self.from_cache(&cached) {
            return identity;
        }

        match self.fetch_identity().await {
            Ok(remote) => {
                let identity = Identity {
                    user_id: remote.user_id,
                    project_id: self.project_id.clone().or(remote.project_id),
                };
                tracing::info!(
                    user_id = ?identity.user_id,
                    project_id = ?identity.project_id,
                    "Resolved backend identity"
                );
                *cached = IdentityCache::Resolved(identity.clone());
                identity
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_after = ?self.identity_retry_after,
                    "Identity lookup failed; sending without user id"
                );
                *cached = IdentityCache::Failed(Instant::now());
                self.fallback_identity()
            }
        }
    }

    fn from_cache(&self, cache: &IdentityCache) -> Option<Identity> {
        match cache {
            IdentityCache::Resolved(identity) => Some(identity.clone()),
            IdentityCache::Failed(at) if at.elapsed() < self.identity_retry_after => {
                Some(self.fallback_identity())
            }
            _ => None,
        }
    }

    fn fallback_identity(&self) -> Identity {
        Identity {
            user_id: None,
            project_id: self.project_id.clone(),
        }
    }

    async fn fetch_identity(&self) -> Result<Identity> {
        let mut request = self
            .client
            .get(&self.whoami_url)
            .timeout(self.identity_timeout);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LariatError::Dispatch {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Identity>().await?)
    }

    async fn post_batch(&self, batch: &TraceBatch, identity: &Identity) -> Result<u16> {
        let mut request = self
            .client
            .post(&self.batch_url)
            .timeout(self.request_timeout)
            .json(batch);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(ref user_id) = identity.user_id {
            request = request.header("X-User-ID", user_id);
        }
        if let Some(ref project_id) = identity.project_id {
            request = request.header("X-Project-ID", project_id);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(status.as_u16())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(LariatError::Dispatch {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl TraceSink for HttpSink {
    async fn send_batch(&self, batch: &TraceBatch) -> Result<()> {
        let identity = self.identity().await;
        if identity.project_id.is_none() {
            tracing::warn!("No project id configured or resolved; backend will pick one");
        }

        let identity = &identity;
        let status = with_retry(&self.retry, move |_| self.post_batch(batch, identity)).await?;
        tracing::info!(
            status,
            traces = batch.traces.len(),
            agents = batch.agents.len(),
            "Batch delivered"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
