//! AI Bridge - Remote Classification Client
//!
//! Gửi cửa sổ sample gần nhất tới remote service và nhận về `AnomalyAnalysis`.
//! Xoay vòng nhiều credential, sống sót qua rate limit, retry với backoff.
//! Thất bại ở đây không bao giờ là lỗi của người dùng: pipeline sẽ fallback
//! sang local classifier.
//!
//! ## Structure
//! - `error`: RemoteError + retry taxonomy
//! - `credentials`: round-robin pool with cooldowns
//! - `backoff`: exponential backoff with jitter
//! - `request`: request shaping + strict response parsing
//! - `transport`: `CompletionTransport` seam + reqwest implementation

pub mod backoff;
pub mod credentials;
pub mod error;
pub mod request;
pub mod transport;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use backoff::RetryPolicy;
pub use credentials::{hash_credential, CredentialPool, CredentialUsage};
pub use error::RemoteError;
pub use request::{parse_response, AnalysisRequest, ExecutionContext};
pub use transport::{CompletionTransport, HttpTransport};

use crate::logic::config::RemoteSettings;
use crate::logic::threat::AnomalyAnalysis;

// ============================================================================
// ANALYZER
// ============================================================================

pub struct RemoteAnalyzer {
    transport: Arc<dyn CompletionTransport>,
    pool: CredentialPool,
    policy: RetryPolicy,
    model: String,
}

impl RemoteAnalyzer {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        credentials: Vec<String>,
        cooldown: Duration,
        policy: RetryPolicy,
        model: &str,
    ) -> Self {
        let pool = CredentialPool::new(transport.provider(), credentials, cooldown);
        Self {
            transport,
            pool,
            policy,
            model: model.to_string(),
        }
    }

    /// `Ok(None)` when no endpoint or no credentials are configured
    pub fn from_settings(settings: &RemoteSettings) -> Result<Option<Self>, RemoteError> {
        if settings.endpoint.trim().is_empty() || settings.credentials.is_empty() {
            return Ok(None);
        }

        let transport = HttpTransport::new(
            &settings.endpoint,
            Duration::from_secs(settings.timeout_secs.max(1)),
        )?;
        let analyzer = Self::new(
            Arc::new(transport),
            settings.credentials.clone(),
            Duration::from_secs(settings.cooldown_secs),
            settings.retry_policy(),
            &settings.model,
        );

        if analyzer.pool.is_empty() {
            return Ok(None);
        }
        log::info!(
            "Remote analyzer ready: provider={}, credentials={}",
            analyzer.pool.provider(),
            analyzer.pool.len()
        );
        Ok(Some(analyzer))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn credential_usage(&self) -> Vec<CredentialUsage> {
        self.pool.usage_snapshot()
    }

    /// Classify one window. Rate limits rotate to the next credential at
    /// once; other transient errors back off; anything else fails fast.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnomalyAnalysis, RemoteError> {
        if self.pool.is_empty() {
            return Err(RemoteError::NotConfigured);
        }

        // bounds the loop even if cooldowns are zero
        let budget = self.pool.len() as u32 + self.policy.max_attempts.max(1);
        let mut transient_failures = 0u32;
        let mut last_error: Option<RemoteError> = None;

        for _ in 0..budget {
            let Some(lease) = self.pool.next() else {
                log::warn!("Remote analysis: no credential available");
                return Err(RemoteError::CredentialsExhausted);
            };

            let started = Instant::now();
            let outcome = match self.transport.complete(&lease.key, request).await {
                Ok(text) => parse_response(&text),
                Err(e) => Err(e),
            };
            let elapsed_ms = started.elapsed().as_millis();

            match outcome {
                Ok(analysis) => {
                    self.pool.record_success(&lease);
                    log::info!(
                        "Remote attempt ok: credential={} type={} score={:.2} ({} ms)",
                        lease.id, analysis.anomaly_type, analysis.anomaly_score, elapsed_ms
                    );
                    return Ok(analysis);
                }
                Err(RemoteError::RateLimited { retry_after }) => {
                    log::warn!("Remote attempt rate limited: credential={} ({} ms)", lease.id, elapsed_ms);
                    self.pool.mark_rate_limited(&lease, retry_after);
                    last_error = Some(RemoteError::RateLimited { retry_after });
                }
                Err(e) if e.is_retryable() => {
                    self.pool.record_failure(&lease);
                    log::warn!("Remote attempt failed: credential={} error={} ({} ms)", lease.id, e, elapsed_ms);
                    if transient_failures + 1 >= self.policy.max_attempts {
                        return Err(RemoteError::RetriesExhausted(e.to_string()));
                    }
                    let delay = self.policy.delay(transient_failures);
                    transient_failures += 1;
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.pool.record_failure(&lease);
                    log::warn!("Remote attempt failed permanently: credential={} error={} ({} ms)", lease.id, e, elapsed_ms);
                    return Err(e);
                }
            }
        }

        Err(RemoteError::RetriesExhausted(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "attempt budget spent".to_string()),
        ))
    }
}
