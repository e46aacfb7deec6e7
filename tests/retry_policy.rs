use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use nowcast_manager::retry::RetryPolicy;

fn policy(max_attempts: u32, jitter: f64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base: Duration::from_millis(1),
        cap: Duration::from_millis(8),
        jitter,
    }
}

#[test]
fn delays_double_up_to_the_cap() {
    let p = policy(10, 0.0);
    let delays: Vec<_> = (0..6).map(|n| p.delay_for(n).as_millis()).collect();
    assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    assert_eq!(p.delay_for(200), Duration::from_millis(8), "no overflow");
}

#[test]
fn jitter_is_bounded_and_reproducible() {
    let p = RetryPolicy::default();
    for attempt in 0..10 {
        let plain = RetryPolicy {
            jitter: 0.0,
            ..p.clone()
        }
        .delay_for(attempt);
        let jittered = p.delay_for(attempt);
        assert!(jittered >= plain);
        assert!(jittered <= plain + plain.mul_f64(p.jitter));
        assert_eq!(jittered, p.delay_for(attempt));
    }
    assert_eq!(p.delay_for(0), Duration::from_millis(200));
}

#[test]
fn once_never_waits() {
    let p = RetryPolicy::once();
    assert_eq!(p.max_attempts, 1);
    assert_eq!(p.delay_for(3), Duration::ZERO);
}

#[tokio::test]
async fn run_succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let result: Result<&str, String> = policy(5, 0.0)
        .run("flaky", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(format!("attempt {n} failed"))
            } else {
                Ok("done")
            }
        })
        .await;

    assert_eq!(result, Ok("done"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn run_returns_the_last_error_when_exhausted() {
    let calls = AtomicU32::new(0);
    let result: Result<(), String> = policy(3, 0.5)
        .run("always failing", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(format!("attempt {n} failed"))
        })
        .await;

    assert_eq!(result, Err("attempt 2 failed".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn zero_attempts_still_tries_once() {
    let calls = AtomicU32::new(0);
    let _: Result<(), String> = policy(0, 0.0)
        .run("zero", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("no".to_string())
        })
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
