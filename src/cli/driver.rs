//! The reference driver loop: repeatedly calls a step function until it
//! reports completion, backing off between attempts (1ms, doubling, capped at 10s) and
//! giving up immediately on a terminal [`ReconcileError`].

use crate::error::ReconcileError;
use crate::utils::retry::next_backoff;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

const MIN_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub enum DriverStep {
    Done,
    Continue,
}

pub async fn run<F, Fut>(mut step: F) -> Result<(), ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<DriverStep, ReconcileError>>,
{
    let mut backoff = MIN_BACKOFF;
    loop {
        match step().await {
            Ok(DriverStep::Done) => {
                info!("driver loop converged");
                return Ok(());
            }
            Ok(DriverStep::Continue) => {
                backoff = next_backoff(backoff, MAX_BACKOFF);
                tokio::time::sleep(backoff).await;
            }
            Err(e) if e.is_terminal() => {
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, backoff_ms = backoff.as_millis(), "retriable error, backing off");
                backoff = next_backoff(backoff, MAX_BACKOFF);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn stops_as_soon_as_step_reports_done() {
        let calls = AtomicUsize::new(0);
        let result = run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(DriverStep::Done)
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_immediately_on_terminal_error() {
        let calls = AtomicUsize::new(0);
        let result = run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ReconcileError::Validation("bad input".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn retriable_error_logs_a_backoff_warning() {
        let calls = AtomicUsize::new(0);
        let _ = run(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(ReconcileError::Transient(crate::error::K8sError::MissingName))
            } else {
                Ok(DriverStep::Done)
            }
        })
        .await;
        assert!(logs_contain("backing off"));
    }

    #[tokio::test]
    async fn retries_a_few_times_before_converging() {
        let calls = AtomicUsize::new(0);
        let result = run(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Ok(DriverStep::Continue)
            } else {
                Ok(DriverStep::Done)
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
