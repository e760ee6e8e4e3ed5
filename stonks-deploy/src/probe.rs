//! Health prober
//!
//! The stack reports complete well before minikube has pulled and started the
//! application, so the first few probes are expected to fail at the transport
//! level. Those failures are recorded and retried; only running out of
//! attempts (or being cancelled) ends the loop without success.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ProbeError, ProbeFailure};

/// Body marker only the stonks application emits.
pub const DEFAULT_MARKER: &str = "data=";

/// Attempt budget and spacing for one probe loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub attempt_timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(3),
        }
    }
}

/// Result of a single probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub attempt: u32,
    /// The HTTP call completed, whatever the status code
    pub responded: bool,
    /// The success predicate accepted the body
    pub matched: bool,
    pub error: Option<ProbeError>,
}

/// One HTTP GET returning the response body
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, ProbeError>;
}

/// [`HttpGet`] over a shared `reqwest` client
#[derive(Debug, Clone, Default)]
pub struct ReqwestGet {
    client: reqwest::Client,
}

impl ReqwestGet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpGet for ReqwestGet {
    async fn get(&self, url: &str, timeout: Duration) -> Result<String, ProbeError> {
        let classify = |e: reqwest::Error| {
            let url = url.to_string();
            if e.is_timeout() {
                ProbeError::Timeout { url }
            } else if e.is_connect() {
                ProbeError::Connect {
                    url,
                    message: e.to_string(),
                }
            } else {
                ProbeError::Request {
                    url,
                    message: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;
        response.text().await.map_err(classify)
    }
}

/// [`HttpGet`] replaying canned results in order, for tests and dry runs.
///
/// Once the script runs out every call fails as connection refused.
#[derive(Debug, Default)]
pub struct ScriptedGet {
    responses: Mutex<VecDeque<Result<String, ProbeError>>>,
    calls: AtomicU32,
}

impl ScriptedGet {
    pub fn new(responses: Vec<Result<String, ProbeError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of GETs issued so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpGet for ScriptedGet {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<String, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        next.unwrap_or_else(|| {
            Err(ProbeError::Connect {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
        })
    }
}

/// Predicate accepting bodies that contain `marker`
pub fn contains_marker(marker: impl Into<String>) -> impl Fn(&str) -> bool + Send + Sync {
    let marker = marker.into();
    move |body: &str| body.contains(&marker)
}

/// Bounded, time-spaced HTTP probing
#[derive(Clone)]
pub struct HealthProber {
    http: Arc<dyn HttpGet>,
    policy: ProbePolicy,
}

impl HealthProber {
    pub fn new(http: Arc<dyn HttpGet>, policy: ProbePolicy) -> Self {
        Self { http, policy }
    }

    pub fn policy(&self) -> ProbePolicy {
        self.policy
    }

    /// Probe `url` until `predicate` accepts a response body.
    ///
    /// Returns the attempt number that succeeded. `on_attempt` sees every
    /// outcome in order. The interval is slept between attempts only, never
    /// after the last one.
    pub async fn probe_until_healthy<P, F>(
        &self,
        url: &str,
        predicate: P,
        cancel: &CancellationToken,
        mut on_attempt: F,
    ) -> Result<u32, ProbeFailure>
    where
        P: Fn(&str) -> bool,
        F: FnMut(&ProbeOutcome),
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempts = 0;

        while attempts < max_attempts {
            let attempt = attempts + 1;

            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ProbeFailure::ProbeCancelled { attempts }),
                response = self.http.get(url, self.policy.attempt_timeout) => response,
            };
            attempts = attempt;

            let outcome = match response {
                Ok(body) => ProbeOutcome {
                    attempt,
                    responded: true,
                    matched: predicate(&body),
                    error: None,
                },
                Err(error) => {
                    debug!(attempt, error = %error, "probe transport error");
                    ProbeOutcome {
                        attempt,
                        responded: false,
                        matched: false,
                        error: Some(error),
                    }
                }
            };
            on_attempt(&outcome);

            if outcome.matched {
                info!(url, attempt, "service healthy");
                return Ok(attempt);
            }

            if attempts == max_attempts {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ProbeFailure::ProbeCancelled { attempts }),
                () = sleep(self.policy.interval) => {}
            }
        }

        Err(ProbeFailure::Exhausted { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    fn refused() -> Result<String, ProbeError> {
        Err(ProbeError::Connect {
            url: "http://x".to_string(),
            message: "connection refused".to_string(),
        })
    }

    fn policy(max_attempts: u32, interval_secs: u64) -> ProbePolicy {
        ProbePolicy {
            max_attempts,
            interval: Duration::from_secs(interval_secs),
            attempt_timeout: Duration::from_secs(3),
        }
    }

    #[tokio::test]
    async fn test_match_on_second_attempt_stops_probing() {
        let http = Arc::new(ScriptedGet::new(vec![
            Ok("<html>nginx</html>".to_string()),
            Ok("symbol=MSFT, data=[1.0, 2.0]".to_string()),
            Ok("data=never read".to_string()),
        ]));
        let prober = HealthProber::new(http.clone(), policy(3, 0));

        let mut seen = Vec::new();
        let attempt = prober
            .probe_until_healthy(
                "http://x",
                contains_marker(DEFAULT_MARKER),
                &CancellationToken::new(),
                |o| seen.push(o.clone()),
            )
            .await
            .unwrap();

        assert_eq!(attempt, 2);
        assert_eq!(http.calls(), 2);
        assert_eq!(seen.len(), 2);
        assert!(seen[0].responded && !seen[0].matched);
        assert!(seen[1].matched);
    }

    #[tokio::test]
    async fn test_all_transport_errors_exhaust() {
        let http = Arc::new(ScriptedGet::new(vec![refused(), refused(), refused()]));
        let prober = HealthProber::new(http.clone(), policy(3, 0));

        let mut seen = Vec::new();
        let err = prober
            .probe_until_healthy(
                "http://x",
                contains_marker(DEFAULT_MARKER),
                &CancellationToken::new(),
                |o| seen.push(o.clone()),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ProbeFailure::Exhausted { attempts: 3 });
        assert_eq!(http.calls(), 3);
        assert!(seen.iter().all(|o| !o.responded && o.error.is_some()));
        assert_eq!(
            seen.iter().map(|o| o.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_transport_errors_do_not_short_circuit() {
        let http = Arc::new(ScriptedGet::new(vec![
            refused(),
            Err(ProbeError::Timeout {
                url: "http://x".to_string(),
            }),
            refused(),
            Ok("data=ok".to_string()),
        ]));
        let prober = HealthProber::new(http.clone(), policy(10, 0));

        let attempt = prober
            .probe_until_healthy(
                "http://x",
                contains_marker(DEFAULT_MARKER),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(attempt, 4);
        assert_eq!(http.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_sleeps_between_attempts_only() {
        let http = Arc::new(ScriptedGet::new(Vec::new()));
        let prober = HealthProber::new(http.clone(), ProbePolicy::default());

        let started = Instant::now();
        let err = prober
            .probe_until_healthy(
                "http://x",
                contains_marker(DEFAULT_MARKER),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();

        assert_eq!(err, ProbeFailure::Exhausted { attempts: 10 });
        assert_eq!(http.calls(), 10);
        assert_eq!(started.elapsed(), Duration::from_secs(30 * 9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt_never_sleeps() {
        let http = Arc::new(ScriptedGet::new(vec![Ok("data=".to_string())]));
        let prober = HealthProber::new(http, ProbePolicy::default());

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let attempt = prober
            .probe_until_healthy("http://x", contains_marker("data="), &cancel, |_| {})
            .await
            .unwrap();

        assert_eq!(attempt, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_interval() {
        let http = Arc::new(ScriptedGet::new(Vec::new()));
        let prober = HealthProber::new(http.clone(), policy(10, 30));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(45)).await;
            trigger.cancel();
        });

        let err = prober
            .probe_until_healthy("http://x", contains_marker("data="), &cancel, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err, ProbeFailure::ProbeCancelled { attempts: 2 });
        assert_eq!(http.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_is_immediately_exhausted() {
        let http = Arc::new(ScriptedGet::new(Vec::new()));
        let prober = HealthProber::new(http.clone(), policy(0, 0));

        let cancel = CancellationToken::new();
        let err = prober
            .probe_until_healthy("http://x", contains_marker("data="), &cancel, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err, ProbeFailure::Exhausted { attempts: 0 });
        assert_eq!(http.calls(), 0);
    }

    /// Serve one canned body per connection, in order
    async fn serve(bodies: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await.unwrap();
                let response = format!(
                    "HTTP/1.1 200 OK\r\n\
                     content-type: text/plain\r\n\
                     content-length: {}\r\n\
                     connection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_reqwest_probe_against_local_server() {
        let url = serve(vec!["starting", "success data=42"]).await;
        let prober = HealthProber::new(Arc::new(ReqwestGet::new()), policy(3, 0));

        let mut seen = Vec::new();
        let cancel = CancellationToken::new();
        let attempt = prober
            .probe_until_healthy(&url, contains_marker(DEFAULT_MARKER), &cancel, |o| {
                seen.push(o.clone());
            })
            .await
            .unwrap();

        assert_eq!(attempt, 2);
        assert!(seen[0].responded && !seen[0].matched);
    }

    #[tokio::test]
    async fn test_reqwest_connection_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ReqwestGet::new()
            .get(&format!("http://{addr}/"), Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connect { .. }));
    }
}
