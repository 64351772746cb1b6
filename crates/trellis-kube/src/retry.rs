//! Bounded polling for externally-reconciled objects
//!
//! Every wait in this crate is a call to [`wait_until`]: poll a probe at a
//! fixed interval until it reports ready, reports a fatal error, or the
//! deadline passes.
//!
//! ```text
//!   probe ──▶ Ready ─────────────▶ Ok(())
//!     │       Fatal(e) ──────────▶ Err(e)
//!     │       NotReady / Transient
//!     ▼
//!   sleep(min(interval, deadline - now)) ──▶ probe ...
//!     │
//!   deadline ─────────────────────▶ Err(Timeout { last_error, severe })
//! ```
//!
//! A streak of transient errors longer than the policy's severity threshold
//! is reported louder and marked in the timeout error, but never ends the
//! wait early.

use std::fmt;
use std::future::Future;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{KubeError, Result, WaitCondition};
use trellis_core::RetryPolicy;

/// Result of one probe
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Target state reached
    Ready,
    /// Not there yet
    NotReady(String),
    /// Reading or evaluating the object failed; worth retrying
    Transient(KubeError),
    /// Waiting longer will not help
    Fatal(KubeError),
}

/// What is being waited for, used in logs and timeout errors
#[derive(Debug, Clone)]
pub struct WaitTarget {
    pub resource: String,
    pub condition: WaitCondition,
}

impl WaitTarget {
    pub fn new(resource: impl fmt::Display, condition: WaitCondition) -> Self {
        Self {
            resource: resource.to_string(),
            condition,
        }
    }

    pub fn healthy(resource: impl fmt::Display) -> Self {
        Self::new(resource, WaitCondition::Healthy)
    }

    pub fn deleted(resource: impl fmt::Display) -> Self {
        Self::new(resource, WaitCondition::Deleted)
    }

    pub fn migrated(resource: impl fmt::Display) -> Self {
        Self::new(resource, WaitCondition::Migrated)
    }
}

/// Poll `probe` until it is ready, fails fatally, or time runs out
///
/// The first probe runs immediately. The deadline is the earlier of
/// `policy.timeout` from now and the context's deadline; a probe still
/// running when it passes is abandoned. Cancelling `ctx` ends the wait with
/// [`KubeError::Cancelled`].
pub async fn wait_until<F, Fut>(ctx: &Context, policy: &RetryPolicy, target: &WaitTarget, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeOutcome>,
{
    let start = Instant::now();
    let deadline = match ctx.deadline() {
        Some(ctx_deadline) if ctx_deadline < start + policy.timeout => ctx_deadline,
        _ => start + policy.timeout,
    };

    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;
    let mut streak_start: Option<Instant> = None;
    let mut severe = false;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(KubeError::Cancelled),
            outcome = timeout_at(deadline, probe()) => outcome,
        };

        let Ok(outcome) = outcome else {
            debug!(resource = %target.resource, attempt, "probe abandoned at deadline");
            break;
        };

        match outcome {
            ProbeOutcome::Ready => {
                debug!(resource = %target.resource, attempt, "wait finished");
                return Ok(());
            }
            ProbeOutcome::Fatal(error) => {
                debug!(resource = %target.resource, attempt, error = %error, "wait aborted");
                return Err(error);
            }
            ProbeOutcome::NotReady(reason) => {
                debug!(resource = %target.resource, attempt, reason = %reason, "not ready yet");
                streak_start = None;
                severe = false;
                last_error = Some(reason);
            }
            ProbeOutcome::Transient(error) => {
                let now = Instant::now();
                let since = *streak_start.get_or_insert(now);
                severe = now.duration_since(since) > policy.severe_threshold;
                if severe {
                    warn!(
                        resource = %target.resource,
                        attempt,
                        error = %error,
                        failing_for_ms = now.duration_since(since).as_millis() as u64,
                        "probe keeps failing"
                    );
                } else {
                    debug!(resource = %target.resource, attempt, error = %error, "probe failed, retrying");
                }
                last_error = Some(error.to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let wake = (now + policy.interval).min(deadline);
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(KubeError::Cancelled),
            _ = sleep_until(wake) => {}
        }
    }

    Err(KubeError::Timeout {
        resource: target.resource.clone(),
        condition: target.condition,
        timeout: deadline.duration_since(start),
        last_error,
        severe,
    })
}
