use super::*;
use std::sync::atomic::{AtomicU32, Ordering};

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 4,
    }
}

#[test]
fn test_delay_grows_exponentially_and_caps() {
    let policy = RetryPolicy {
        max_attempts: 6,
        base_delay_ms: 100,
        multiplier: 2.0,
        max_delay_ms: 500,
    };
    assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
    assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
}

#[test]
fn test_validate_rejects_bad_policies() {
    assert!(RetryPolicy::default().validate().is_ok());
    assert!(RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }.validate().is_err());
    assert!(RetryPolicy { multiplier: 0.5, ..RetryPolicy::default() }.validate().is_err());
    assert!(RetryPolicy { max_delay_ms: 1, ..RetryPolicy::default() }.validate().is_err());
}

#[tokio::test]
async fn test_run_retries_transient_errors_until_success() {
    let calls = AtomicU32::new(0);
    let result = fast_policy(3)
        .run("insert chunk", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(LoadError::timeout("insert chunk", 1))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_run_gives_up_after_max_attempts() {
    let calls = AtomicU32::new(0);
    let result: Result<()> = fast_policy(2)
        .run("fetch chunk", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LoadError::from_driver("fetch chunk", "connection reset by peer")) }
        })
        .await;
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_run_does_not_retry_permanent_errors() {
    let calls = AtomicU32::new(0);
    let result: Result<()> = fast_policy(5)
        .run("insert chunk", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LoadError::from_driver("insert chunk", "Unknown column 'x'")) }
        })
        .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_with_timeout_maps_elapsed_to_timeout_error() {
    let result: Result<()> = with_timeout("fetch chunk", Duration::from_millis(5), async {
        sleep(Duration::from_millis(200)).await;
        Ok(())
    })
    .await;
    assert!(matches!(result, Err(LoadError::Timeout { .. })));

    let result = with_timeout("fetch chunk", Duration::from_secs(1), async {
        Ok::<_, String>(7)
    })
    .await;
    assert_eq!(result.unwrap(), 7);
}
