//! # Readiness Prober
//!
//! Polls the subject's HTTP endpoint until it answers or the retry budget
//! runs out. A refused connection is the normal state of affairs for the
//! first few hundred milliseconds of every trial, so failures here are
//! never errors: the caller only learns whether the subject became ready.
//!
//! A probe attempt succeeds when the server returns a status below 400.
//! Redirects are not followed; a 3xx answer already proves the server is
//! up. Anything else (refused connect, timeout, an error status) consumes
//! one retry.

use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{SweepError, SweepResult};

/// Pause between failed attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on a single attempt (connect, request and response head).
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOutcome {
    pub ready: bool,
    /// Number of attempts issued, including the successful one.
    pub attempts: u32,
}

/// Configurable prober for one endpoint.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: Client,
    endpoint: Endpoint,
    max_retries: u32,
    retry_interval: Duration,
}

impl ReadinessProbe {
    pub fn new(endpoint: Endpoint, max_retries: u32) -> SweepResult<Self> {
        // Every trial starts a fresh subject; pooled connections would point
        // at the previous, already terminated one.
        let client = Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .pool_max_idle_per_host(0)
            .redirect(Policy::none())
            .build()
            .map_err(SweepError::HttpClient)?;

        Ok(Self {
            client,
            endpoint,
            max_retries,
            retry_interval: RETRY_INTERVAL,
        })
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Poll until the endpoint answers or `max_retries` attempts have failed.
    pub async fn wait(&self) -> ReadinessOutcome {
        let mut retries = self.max_retries;
        let mut attempts = 0;
        while retries > 0 {
            attempts += 1;
            let response = self
                .client
                .get(self.endpoint.url().clone())
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match response {
                Ok(r) => {
                    debug!("{} answered with {}", self.endpoint, r.status());
                    return ReadinessOutcome {
                        ready: true,
                        attempts,
                    };
                }
                Err(e) => debug!("...waiting for {} ({})", self.endpoint, e),
            }
            sleep(self.retry_interval).await;
            retries -= 1;
        }
        ReadinessOutcome {
            ready: false,
            attempts,
        }
    }
}

/// Poll `endpoint` with the default interval; true once it answers.
pub async fn wait_ready(endpoint: &Endpoint, max_retries: u32) -> SweepResult<bool> {
    let probe = ReadinessProbe::new(endpoint.clone(), max_retries)?;
    Ok(probe.wait().await.ready)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(listener: TcpListener, response: &'static str) {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(response.as_bytes()).await;
        }
    }

    async fn local_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// An address nothing is listening on: bind, note the port, drop.
    async fn unused_endpoint() -> Endpoint {
        let (listener, port) = local_listener().await;
        drop(listener);
        format!("http://127.0.0.1:{}", port).parse().unwrap()
    }

    #[tokio::test]
    async fn test_ready_on_first_success() {
        let (listener, port) = local_listener().await;
        let server = tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ));

        let endpoint: Endpoint = format!("http://127.0.0.1:{}/hello", port).parse().unwrap();
        let outcome = ReadinessProbe::new(endpoint, 5).unwrap().wait().await;
        assert_eq!(
            outcome,
            ReadinessOutcome {
                ready: true,
                attempts: 1
            }
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_redirect_counts_as_ready() {
        let (listener, port) = local_listener().await;
        let server = tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ));

        let endpoint: Endpoint = format!("http://127.0.0.1:{}", port).parse().unwrap();
        let outcome = ReadinessProbe::new(endpoint, 1).unwrap().wait().await;
        assert!(outcome.ready);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_never_ready_exhausts_exact_budget() {
        let endpoint = unused_endpoint().await;
        let outcome = ReadinessProbe::new(endpoint.clone(), 3)
            .unwrap()
            .with_retry_interval(Duration::from_millis(5))
            .wait()
            .await;
        assert!(!outcome.ready);
        assert_eq!(outcome.attempts, 3);

        assert!(!wait_ready(&endpoint, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_error_status_is_not_ready() {
        let (listener, port) = local_listener().await;
        let server = tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ));

        let endpoint: Endpoint = format!("http://127.0.0.1:{}", port).parse().unwrap();
        let outcome = ReadinessProbe::new(endpoint, 2)
            .unwrap()
            .with_retry_interval(Duration::from_millis(5))
            .wait()
            .await;
        assert!(!outcome.ready);
        assert_eq!(outcome.attempts, 2);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_budget_sends_no_request() {
        let endpoint = unused_endpoint().await;
        let outcome = ReadinessProbe::new(endpoint, 0).unwrap().wait().await;
        assert_eq!(outcome.attempts, 0);
        assert!(!outcome.ready);
    }
}
