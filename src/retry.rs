use crate::error_handler::ErrorHandler;
use crate::models::ErrorCategory;
use log::{error, warn};
use std::future::Future;
use tokio::time::sleep;

/// Retry driven by the error handler's strategy: attempts and delay come from
/// the configured `ErrorHandlingStrategy`, and a category the handler deems
/// non-retryable fails on the first attempt. The delay waits via
/// `tokio::time::sleep`, so other in-flight tasks keep running.
pub async fn retry_with_policy<F, Fut, T, E>(
    handler: &ErrorHandler,
    category: ErrorCategory,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    warn!(
                        "Operation '{}' succeeded after {} retries",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !handler.should_retry(category, attempt) {
                    error!(
                        "Operation '{}' failed with no retry budget left ({:?}): {}",
                        operation_name, category, err
                    );
                    return Err(err);
                }

                let delay = handler.strategy().retry_delay;
                attempt += 1;
                warn!(
                    "Operation '{}' failed (retry {} pending in {:?}): {}",
                    operation_name, attempt, delay, err
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorHandlingStrategy, StrategyUpdate};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_handler(max_retries: u32) -> ErrorHandler {
        let handler = ErrorHandler::new(ErrorHandlingStrategy::default());
        handler.set_strategy(&StrategyUpdate {
            max_retries: Some(max_retries),
            retry_delay: Some(Duration::from_millis(1)),
            ..StrategyUpdate::default()
        });
        handler
    }

    #[tokio::test]
    async fn policy_retry_recovers_for_retryable_category() {
        let handler = fast_handler(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_policy(&handler, ErrorCategory::NetworkError, "fetch", || {
            let attempts = attempts_clone.clone();
            async move {
                let current = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if current < 3 {
                    Err("connection reset")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn policy_retry_stops_at_max_retries() {
        let handler = fast_handler(2);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_policy(&handler, ErrorCategory::SystemError, "flaky", || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), &str>("still down")
            }
        })
        .await;

        assert_eq!(result, Err("still down"));
        // initial attempt plus max_retries retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn policy_retry_fails_fast_for_non_retryable_category() {
        let handler = fast_handler(5);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_policy(&handler, ErrorCategory::DataParsing, "parse", || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), &str>("bad header")
            }
        })
        .await;

        assert_eq!(result, Err("bad header"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
