/*!
 # Retrying link operations

 BLE links drop writes for all sorts of transient reasons. [`retry`] runs an
 operation up to [`RetryPolicy::attempts`] times, deciding after each failure
 from the error kind alone whether to give up, back off, or try again.
*/

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::Error;

/// How a failed attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Give up immediately
    Fatal,
    /// Sleep for the policy backoff before the next attempt
    Backoff,
    /// Try again right away
    Immediate,
}

/// Attempt budget and backoff delay
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u8,
    /// Delay applied before retrying a [`RetryClass::Backoff`] failure
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

impl Error {
    /// Classifies this error for [`retry`]
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::DeviceNotFound(_)
            | Error::CharacteristicNotFound(_)
            | Error::NoBluetoothAdapters
            | Error::Config(_) => RetryClass::Fatal,
            Error::Busy(_) => RetryClass::Backoff,
            _ => RetryClass::Immediate,
        }
    }
}

/// Runs `op` until it succeeds, fails fatally, or the attempts run out
///
/// On exhaustion the error of the last attempt is returned unchanged.
pub async fn retry_with<T, E, F, Fut, C>(
    policy: RetryPolicy,
    label: &str,
    classify: C,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> RetryClass,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let class = classify(&err);
        if class == RetryClass::Fatal {
            debug!("{}: fatal error, not retrying: {}", label, err);
            return Err(err);
        }
        if attempt >= attempts {
            warn!(
                "{}: giving up after {}/{} attempts: {}",
                label, attempt, attempts, err
            );
            return Err(err);
        }

        if class == RetryClass::Backoff {
            warn!(
                "{}: {} (attempt {}/{}), backing off {:?}",
                label, err, attempt, attempts, policy.backoff
            );
            tokio::time::sleep(policy.backoff).await;
        } else {
            warn!("{}: {} (attempt {}/{}), retrying", label, err, attempt, attempts);
        }
        attempt += 1;
    }
}

/// [`retry_with`] using [`Error::retry_class`]
pub async fn retry<T, F, Fut>(policy: RetryPolicy, label: &str, op: F) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    retry_with(policy, label, Error::retry_class, op).await
}
