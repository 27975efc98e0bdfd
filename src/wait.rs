//! Polling of a remote object until it reaches a target state

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::client;

pub const DEFAULT_NOT_FOUND_CHECKS: usize = 20;
const MIN_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("unexpected state '{state}', wanted target '{targets}'")]
    UnexpectedState { state: String, targets: String },
    #[error("timeout while waiting for state to become '{targets}' (last state: '{last_state}', timeout: {timeout:?})")]
    Timeout {
        last_state: String,
        targets: String,
        timeout: Duration,
    },
    #[error("couldn't find resource ({checks} retries)")]
    NotFound { checks: usize },
    #[error(transparent)]
    Refresh(#[from] client::Error),
}

/// Poll `refresh` until the returned state is one of `target`
///
/// `refresh` returns the object (`None` when it does not exist) and its state.
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    pub pending: Vec<&'static str>,
    pub target: Vec<&'static str>,
    pub timeout: Duration,
    pub delay: Duration,
    /// Fixed interval between two polls, an exponential backoff is used when zero
    pub poll_interval: Duration,
    pub not_found_checks: usize,
}

impl Default for StateChangeConf {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            target: Vec::new(),
            timeout: Duration::from_secs(300),
            delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
        }
    }
}

impl StateChangeConf {
    pub fn new(pending: &[&'static str], target: &[&'static str], timeout: Duration) -> Self {
        Self {
            pending: pending.to_vec(),
            target: target.to_vec(),
            timeout,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = client::Result<(Option<T>, String)>>,
    {
        let deadline = Instant::now() + self.timeout;
        let targets = self.target.join(", ");
        let mut last_state = String::new();
        let mut not_found = 0;
        let mut backoff = MIN_BACKOFF;

        tokio::time::sleep(self.delay.min(self.timeout)).await;
        loop {
            let (object, state) = refresh().await?;
            trace!(state, "refreshed state");

            match object {
                None => {
                    not_found += 1;
                    if not_found > self.not_found_checks {
                        return Err(WaitError::NotFound {
                            checks: self.not_found_checks,
                        });
                    }
                }
                Some(object) => {
                    not_found = 0;
                    if self.target.contains(&state.as_str()) {
                        debug!(state, "reached target state");
                        return Ok(object);
                    }
                    if !self.pending.is_empty() && !self.pending.contains(&state.as_str()) {
                        return Err(WaitError::UnexpectedState { state, targets });
                    }
                }
            }
            last_state = state;

            let wait = if self.poll_interval.is_zero() {
                let wait = backoff;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                wait
            } else {
                self.poll_interval
            };
            let now = Instant::now();
            if now + wait > deadline {
                return Err(WaitError::Timeout {
                    last_state,
                    targets,
                    timeout: self.timeout,
                });
            }
            debug!(state = last_state, ?wait, "waiting for state to become '{targets}'");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Durations of the long running operations of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
    /// Wait before the first poll
    pub delay: Duration,
    pub poll_interval: Duration,
}

impl Timeouts {
    pub const fn new(create: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            update,
            delete,
            delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }

    pub const fn minutes(create: u64, update: u64, delete: u64) -> Self {
        Self::new(
            Duration::from_secs(create * 60),
            Duration::from_secs(update * 60),
            Duration::from_secs(delete * 60),
        )
    }

    pub fn on_create(&self, pending: &[&'static str], target: &[&'static str]) -> StateChangeConf {
        self.conf(pending, target, self.create)
    }

    pub fn on_delete(&self, pending: &[&'static str], target: &[&'static str]) -> StateChangeConf {
        self.conf(pending, target, self.delete)
    }

    fn conf(&self, pending: &[&'static str], target: &[&'static str], timeout: Duration) -> StateChangeConf {
        StateChangeConf::new(pending, target, timeout)
            .with_delay(self.delay)
            .with_poll_interval(self.poll_interval)
    }

    /// No delay between polls
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            delay: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            ..Self::minutes(1, 1, 1)
        }
    }
}

/// Retry `op` as long as it fails with an error matched by `retryable`, until `timeout`
pub async fn retry<T, F, Fut>(
    timeout: Duration,
    retryable: fn(&client::Error) -> bool,
    mut op: F,
) -> client::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = client::Result<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut backoff = MIN_BACKOFF;
    loop {
        match op().await {
            Err(err) if retryable(&err) && Instant::now() + backoff <= deadline => {
                debug!(?backoff, "retrying after error: {err}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            result => return result,
        }
    }
}

/// Conflicts and server errors are usually transient
pub fn is_retryable(err: &client::Error) -> bool {
    err.is_conflict() || err.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sequence(states: &'static [&'static str]) -> impl FnMut() -> std::future::Ready<client::Result<(Option<usize>, String)>> {
        let calls = AtomicUsize::new(0);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let state = states[n.min(states.len() - 1)];
            let object = (state != "GONE").then_some(n);
            std::future::ready(Ok((object, state.to_string())))
        }
    }

    fn conf(pending: &[&'static str], target: &[&'static str]) -> StateChangeConf {
        StateChangeConf::new(pending, target, Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn reaches_target() {
        let n = conf(&["PENDING"], &["ACTIVE"])
            .wait_for_state(sequence(&["PENDING", "PENDING", "ACTIVE"]))
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn unexpected_state() {
        let err = conf(&["PENDING"], &["ACTIVE"])
            .wait_for_state(sequence(&["PENDING", "ERROR"]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unexpected state 'ERROR', wanted target 'ACTIVE'");
    }

    #[tokio::test]
    async fn times_out_with_last_state() {
        let conf = StateChangeConf::new(&["PENDING"], &["ACTIVE"], Duration::from_millis(30))
            .with_poll_interval(Duration::from_millis(10));
        let err = conf
            .wait_for_state(sequence(&["PENDING"]))
            .await
            .unwrap_err();
        match err {
            WaitError::Timeout { last_state, .. } => assert_eq!(last_state, "PENDING"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn tolerates_not_found() {
        let states = &["GONE", "GONE", "GONE", "ACTIVE"];
        let n = conf(&[], &["ACTIVE"])
            .wait_for_state(sequence(states))
            .await
            .unwrap();
        assert_eq!(n, 3);

        let mut conf = conf(&[], &["ACTIVE"]);
        conf.not_found_checks = 2;
        let err = conf.wait_for_state(sequence(states)).await.unwrap_err();
        assert!(matches!(err, WaitError::NotFound { checks: 2 }));
    }

    #[tokio::test]
    async fn refresh_errors_abort() {
        let err = conf(&["PENDING"], &["ACTIVE"])
            .wait_for_state(|| async {
                Err::<(Option<()>, String), _>(client::Error::config("boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let calls = AtomicUsize::new(0);
        let value = retry(Duration::from_secs(5), is_retryable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(client::Error::from_response(Method::PUT, "https://x", StatusCode::CONFLICT, ""))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);

        let err = retry(Duration::from_secs(5), is_retryable, || async {
            Err::<(), _>(client::Error::from_response(Method::PUT, "https://x", StatusCode::FORBIDDEN, ""))
        })
        .await
        .unwrap_err();
        assert!(err.is_forbidden());
    }
}
