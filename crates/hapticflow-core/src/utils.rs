/*!
 * Utility functions and helpers for HapticFlow.
 */
use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run a future with a timeout
///
/// # Arguments
///
/// * `duration` - The timeout duration
/// * `what` - What is being awaited, used in the timeout error
/// * `future` - The future to run
///
/// # Returns
///
/// The output of the future, or a timeout error if the deadline passes first
pub async fn with_timeout<F, T>(duration: Duration, what: &str, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| Error::timeout(format!("{} did not finish within {:?}", what, duration)))
}

/// Spawn a task in the background and log its outcome
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => {
                debug!("Task '{}' completed successfully", task_name);
            }
            Err(e) => {
                warn!("Task '{}' failed: {}", task_name, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_timeout_success() {
        let result = tokio_test::block_on(with_timeout(Duration::from_secs(1), "answer", async {
            42
        }));
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), "slow answer", async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_spawn_and_log_runs_to_completion() {
        let handle = spawn_and_log("failing", async { Err::<(), _>("boom") });
        assert!(handle.await.is_ok());
    }
}
