use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::backoff::sleep_or_shutdown;
use crate::backoff::Backoff;

#[test]
fn delays_double_until_the_cap() {
    let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(400));

    assert_eq!(backoff.delay(), Duration::from_millis(50));
    assert_eq!(backoff.delay(), Duration::from_millis(100));
    assert_eq!(backoff.delay(), Duration::from_millis(200));
    assert_eq!(backoff.delay(), Duration::from_millis(400));
    assert_eq!(backoff.delay(), Duration::from_millis(400));
    assert_eq!(backoff.tries, 5);
}

#[test]
fn reset_returns_to_the_initial_delay() {
    let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(10));

    backoff.delay();
    backoff.delay();
    backoff.delay();
    assert_eq!(backoff.tries, 3);

    backoff.reset();
    assert_eq!(backoff.tries, 0);
    assert_eq!(backoff.delay(), Duration::from_millis(50));
}

#[test]
fn large_try_counts_do_not_overflow() {
    let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(10));
    for _ in 0..100 {
        assert!(backoff.delay() <= Duration::from_secs(10));
    }
}

#[tokio::test(start_paused = true)]
async fn sleep_completes_without_shutdown() {
    let (_tx, mut rx) = watch::channel(());
    assert!(sleep_or_shutdown(&mut rx, Duration::from_millis(100)).await);
}

#[tokio::test(start_paused = true)]
async fn sleep_is_interrupted_by_shutdown() {
    let (tx, mut rx) = watch::channel(());
    tx.send(()).unwrap();

    // Far longer than the test timeout; only the signal can end it.
    let slept = timeout(
        Duration::from_secs(1),
        sleep_or_shutdown(&mut rx, Duration::from_secs(3600)),
    )
    .await
    .expect("sleep should be interrupted promptly");
    assert!(!slept);
}

#[tokio::test(start_paused = true)]
async fn sleep_is_interrupted_by_late_shutdown() {
    let (tx, mut rx) = watch::channel(());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = tx.send(());
    });

    let slept = timeout(
        Duration::from_secs(1),
        sleep_or_shutdown(&mut rx, Duration::from_secs(3600)),
    )
    .await
    .expect("sleep should be interrupted promptly");
    assert!(!slept);
}
