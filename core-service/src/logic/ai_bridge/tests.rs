//! Remote analyzer tests over scripted transports

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::request::{AnalysisRequest, ExecutionContext};
use super::transport::{CompletionTransport, TransportFuture};
use super::{RemoteAnalyzer, RemoteError, RetryPolicy};
use crate::logic::features::FeatureSnapshot;
use crate::logic::threat::AnomalyType;

const OK_BODY: &str = r#"{"isAnomalous":true,"anomalyScore":0.9,"anomalyType":"cpu_spike",
    "explanation":"pegged","confidence":0.95,"recommendations":["slow down"]}"#;

/// Replays a fixed list of outcomes; repeats the last one when drained
struct Scripted {
    outcomes: Mutex<VecDeque<Result<String, RemoteError>>>,
    calls: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(outcomes: Vec<Result<String, RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl CompletionTransport for Scripted {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn complete<'a>(&'a self, credential: &'a str, _request: &'a AnalysisRequest) -> TransportFuture<'a> {
        self.calls.lock().push(credential.to_string());
        let outcome = {
            let mut outcomes = self.outcomes.lock();
            if outcomes.len() > 1 {
                outcomes.pop_front()
            } else {
                outcomes.front().cloned()
            }
        };
        Box::pin(async move { outcome.unwrap_or(Err(RemoteError::Network("script empty".into()))) })
    }
}

fn analyzer(transport: Arc<Scripted>, keys: &[&str], max_attempts: u32) -> RemoteAnalyzer {
    RemoteAnalyzer::new(
        transport,
        keys.iter().map(|k| k.to_string()).collect(),
        Duration::from_secs(60),
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        "test-model",
    )
}

fn request() -> AnalysisRequest {
    let context = ExecutionContext {
        run_id: "run-1".into(),
        command: "yes".into(),
        ..Default::default()
    };
    AnalysisRequest::new("test-model", &[], FeatureSnapshot::default(), Some(context))
}

#[tokio::test]
async fn test_success_first_try() {
    let transport = Scripted::new(vec![Ok(OK_BODY.to_string())]);
    let analyzer = analyzer(transport.clone(), &["k1", "k2"], 3);

    let analysis = analyzer.analyze(&request()).await.unwrap();
    assert_eq!(analysis.anomaly_type, AnomalyType::CpuSpike);
    assert_eq!(transport.calls(), vec!["k1"]);

    let usage = analyzer.credential_usage();
    assert_eq!(usage[0].successes, 1);
    assert_eq!(usage[0].provider, "scripted");
}

#[tokio::test]
async fn test_rate_limit_rotates_then_succeeds() {
    let transport = Scripted::new(vec![
        Err(RemoteError::RateLimited { retry_after: None }),
        Ok(OK_BODY.to_string()),
    ]);
    let analyzer = analyzer(transport.clone(), &["k1", "k2"], 3);

    assert!(analyzer.analyze(&request()).await.is_ok());
    assert_eq!(transport.calls(), vec!["k1", "k2"]);
    assert_eq!(analyzer.credential_usage()[0].rate_limited, 1);
}

#[tokio::test]
async fn test_rate_limited_everywhere_exhausts_credentials() {
    let transport = Scripted::new(vec![Err(RemoteError::RateLimited { retry_after: None })]);
    let analyzer = analyzer(transport.clone(), &["k1", "k2", "k3"], 3);

    let err = analyzer.analyze(&request()).await.unwrap_err();
    assert_eq!(err, RemoteError::CredentialsExhausted);
    assert_eq!(transport.calls(), vec!["k1", "k2", "k3"]);

    // cooldown survives across invocations
    let err = analyzer.analyze(&request()).await.unwrap_err();
    assert_eq!(err, RemoteError::CredentialsExhausted);
    assert_eq!(transport.calls().len(), 3);
}

#[tokio::test]
async fn test_server_errors_retry_then_give_up() {
    let transport = Scripted::new(vec![Err(RemoteError::Server(503))]);
    let analyzer = analyzer(transport.clone(), &["k1"], 3);

    let err = analyzer.analyze(&request()).await.unwrap_err();
    assert!(matches!(err, RemoteError::RetriesExhausted(_)));
    assert_eq!(transport.calls().len(), 3);
}

#[tokio::test]
async fn test_transient_then_success() {
    let transport = Scripted::new(vec![Err(RemoteError::Timeout), Ok(OK_BODY.to_string())]);
    let analyzer = analyzer(transport.clone(), &["k1"], 3);

    assert!(analyzer.analyze(&request()).await.is_ok());
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn test_malformed_and_auth_fail_fast() {
    let transport = Scripted::new(vec![Ok("{\"verdict\":\"fine\"}".to_string())]);
    let malformed = analyzer(transport.clone(), &["k1", "k2"], 3);
    let err = malformed.analyze(&request()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Malformed(_)));
    assert_eq!(transport.calls().len(), 1);

    let transport = Scripted::new(vec![Err(RemoteError::Unauthorized(401))]);
    let unauthorized = analyzer(transport.clone(), &["k1", "k2"], 3);
    let err = unauthorized.analyze(&request()).await.unwrap_err();
    assert_eq!(err, RemoteError::Unauthorized(401));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_no_credentials_is_not_configured() {
    let transport = Scripted::new(vec![Ok(OK_BODY.to_string())]);
    let analyzer = analyzer(transport.clone(), &[], 3);
    assert_eq!(analyzer.analyze(&request()).await.unwrap_err(), RemoteError::NotConfigured);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_huge_retry_after_falls_back_without_panic() {
    let transport = Scripted::new(vec![Err(RemoteError::RateLimited {
        retry_after: Some(Duration::from_secs(u64::MAX)),
    })]);
    let analyzer = analyzer(transport.clone(), &["k1"], 3);

    let err = analyzer.analyze(&request()).await.unwrap_err();
    assert_eq!(err, RemoteError::CredentialsExhausted);
    assert_eq!(transport.calls().len(), 1);
    assert!(analyzer.credential_usage()[0].cooldown_until.is_some());
}
