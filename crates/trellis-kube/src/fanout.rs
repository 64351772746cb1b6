//! Concurrent fan-out that never stops early
//!
//! Independent operations (one per bundle, one per component) run
//! concurrently and every one of them runs to completion, even when a
//! sibling has already failed. Failures are collected afterwards.

use futures::future::{BoxFuture, join_all};
use tracing::debug;

use crate::error::{KubeError, Result};

/// Run every task concurrently and combine their failures
///
/// No error: `Ok(())`. One error: that error unchanged. Several errors:
/// [`KubeError::Aggregate`] in task order.
pub async fn run_all(tasks: Vec<BoxFuture<'_, Result<()>>>) -> Result<()> {
    let total = tasks.len();
    let mut errors: Vec<KubeError> = join_all(tasks)
        .await
        .into_iter()
        .filter_map(|result| result.err())
        .collect();

    debug!(total, failed = errors.len(), "fan-out finished");

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(KubeError::Aggregate(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_is_ok() {
        assert!(run_all(Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_single_error_is_returned_unchanged() {
        let tasks = vec![
            async { Ok::<(), KubeError>(()) }.boxed(),
            async { Err(KubeError::Cancelled) }.boxed(),
        ];
        assert!(matches!(run_all(tasks).await, Err(KubeError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_siblings() {
        let finished = Arc::new(AtomicU32::new(0));
        let slow = {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<(), KubeError>(())
            }
            .boxed()
        };
        let tasks = vec![
            async { Err(KubeError::InvalidConfig("a".to_string())) }.boxed(),
            slow,
            async { Err(KubeError::InvalidConfig("b".to_string())) }.boxed(),
        ];

        let err = run_all(tasks).await.unwrap_err();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        match err {
            KubeError::Aggregate(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].to_string(), "invalid configuration: a");
                assert_eq!(errors[1].to_string(), "invalid configuration: b");
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }
}
