//! Readiness probing.
//!
//! Polls the server's health endpoint at a fixed interval until it
//! answers 200 or the deadline passes. During startup the endpoint may
//! not even be bound yet, so transport errors and non-success statuses
//! are treated the same way: keep polling.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    TimedOut,
}

/// Fixed-interval health prober.
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
    interval: Duration,
}

impl Prober {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            timeout,
            interval,
        }
    }

    /// Block until the server is healthy or the deadline passes.
    ///
    /// Returns within `timeout + interval` of being called: the deadline
    /// is re-checked after every poll, and the whole loop races a hard
    /// outer bound so a single stalled request cannot extend the wait.
    pub async fn wait_healthy(&self, base_url: &str) -> ProbeOutcome {
        let url = format!("{base_url}/health");
        let started = Instant::now();
        let deadline = started + self.timeout;

        info!(
            url = %url,
            timeout_secs = self.timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Waiting for server readiness"
        );

        match tokio::time::timeout_at(deadline + self.interval, self.poll_loop(&url, started, deadline))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                info!(
                    url = %url,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Readiness wait timed out mid-request"
                );
                ProbeOutcome::TimedOut
            }
        }
    }

    async fn poll_loop(&self, url: &str, started: Instant, deadline: Instant) -> ProbeOutcome {
        loop {
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(
                        url = %url,
                        elapsed_secs = started.elapsed().as_secs(),
                        "Server is healthy"
                    );
                    return ProbeOutcome::Healthy;
                }
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), "Server not ready yet");
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Server not reachable yet");
                }
            }

            if Instant::now() >= deadline {
                info!(
                    url = %url,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Readiness wait timed out"
                );
                return ProbeOutcome::TimedOut;
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
