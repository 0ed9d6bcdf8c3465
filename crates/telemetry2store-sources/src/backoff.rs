//! Exponential backoff for source (re)connection.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use telemetry2store_config::{ConnectionConfig, SourceKind};
use tracing::{warn, Span};

/// Doubling delay, capped at `max_backoff_ms`, for at most `max_retries`
/// retries after the first attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    max_retries: u32,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            failures: 0,
            max_retries: config.max_retries,
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Record a failure. Returns the delay before the next attempt, or `None`
    /// once the budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(self.failures - 1);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }

    /// Number of failed attempts since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Run `attempt` until it succeeds or `backoff` runs out.
pub async fn retry_connect<T, E, F, Fut>(
    kind: SourceKind,
    backoff: &mut Backoff,
    span: &Span,
    mut attempt: F,
) -> Result<T, crate::SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    loop {
        match attempt().await {
            Ok(value) => {
                backoff.reset();
                return Ok(value);
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        parent: span,
                        source = %kind,
                        attempt = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(crate::SourceError::Connection {
                        kind,
                        attempts: backoff.failures(),
                        reason: e.to_string(),
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32) -> ConnectionConfig {
        ConnectionConfig {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let mut backoff = Backoff::new(&config(4));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.failures(), 5);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn zero_retries_fails_on_first_error() {
        let mut backoff = Backoff::new(&config(0));
        assert_eq!(backoff.next_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_connect_recovers_within_budget() {
        let mut backoff = Backoff::new(&config(3));
        let mut calls = 0;
        let result: Result<u32, _> =
            retry_connect(SourceKind::CursorLog, &mut backoff, &Span::none(), || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err("connection refused")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(backoff.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_connect_gives_up_after_budget() {
        let mut backoff = Backoff::new(&config(2));
        let result: Result<(), _> =
            retry_connect(SourceKind::QueueTopic, &mut backoff, &Span::none(), || async {
                Err::<(), _>("broker unreachable")
            })
            .await;
        match result {
            Err(crate::SourceError::Connection { attempts, reason, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, "broker unreachable");
            }
            other => panic!("expected connection error, got {:?}", other),
        }
    }
}
