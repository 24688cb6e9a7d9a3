//! Bounded polling for eventually consistent resources.
//!
//! A create call can succeed before the resource shows up in describe
//! calls, and a delete call can succeed while the resource is still listed.
//! [`wait_until`] re-evaluates a probe at a fixed interval until it reports
//! `true` or the timeout is exceeded.

use super::error::CloudResult;
use crate::config;
use crate::error::{Error, Result};
use std::time::{Duration, Instant};

/// Timeout and interval for [`wait_until`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            timeout: Duration::from_secs(config::DEFAULT_POLL_TIMEOUT_SECS),
            interval: Duration::from_secs(config::DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl PollConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        PollConfig { timeout, interval }
    }

    pub fn from_secs(timeout_secs: u64, interval_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(timeout_secs),
            Duration::from_secs(interval_secs),
        )
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        PollConfig { timeout, ..self }
    }
}

/// Poll `probe` until it returns `Ok(true)`.
///
/// The probe runs immediately, then once per `interval`. A transient
/// collaborator error counts as "not yet"; any other error aborts the wait
/// and is returned wrapped with `what`. Fails with [`Error::Timeout`] once
/// the elapsed time exceeds `timeout`; the last sleep is cut short at the
/// deadline and no probe runs past it. Returns the number of probe calls.
pub fn wait_until<F>(poll: &PollConfig, what: &str, mut probe: F) -> Result<u32>
where
    F: FnMut() -> CloudResult<bool>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match probe() {
            Ok(true) => {
                log::debug!(
                    "{what}: ready after {attempt} attempt(s) in {:?}",
                    start.elapsed()
                );
                return Ok(attempt);
            }
            Ok(false) => log::debug!("{what}: not ready, attempt {attempt}"),
            Err(e) if e.is_transient() => {
                log::warn!("{what}: transient error on attempt {attempt}: {e}")
            }
            Err(source) => {
                return Err(Error::OperationFailed {
                    step: what.to_string(),
                    source,
                })
            }
        }

        let remaining = poll.timeout.saturating_sub(start.elapsed());
        std::thread::sleep(poll.interval.min(remaining));
        if start.elapsed() >= poll.timeout {
            log::error!("{what}: gave up after {attempt} attempt(s)");
            return Err(Error::Timeout {
                what: what.to_string(),
                timeout: poll.timeout,
            });
        }
    }
}

/// Wait until `resource_id` is visible.
pub fn wait_for_resource_existing(
    client: &dyn super::CloudNetwork,
    poll: &PollConfig,
    resource_id: &str,
) -> Result<u32> {
    wait_until(poll, &format!("{resource_id} to exist"), || {
        client.resource_exists(resource_id)
    })
}

/// Wait until `resource_id` is no longer visible.
pub fn wait_for_resource_deleted(
    client: &dyn super::CloudNetwork,
    poll: &PollConfig,
    resource_id: &str,
) -> Result<u32> {
    wait_until(poll, &format!("{resource_id} to be deleted"), || {
        client.resource_exists(resource_id).map(|exists| !exists)
    })
}
