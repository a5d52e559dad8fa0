//! Integration tests for the question deadline timer.
//!
//! Uses `tokio::time::pause()` (via `start_paused = true`) so sleeps
//! resolve deterministically as we advance the clock.

use std::time::Duration;

use tokio::time::{advance, timeout};
use tugline_clock::DeadlineTimer;

const LIMIT: Duration = Duration::from_millis(30_000);

/// Polls `expired()` with a tiny timeout to check whether it would fire.
async fn fires(timer: &DeadlineTimer) -> bool {
    timeout(Duration::from_millis(1), timer.expired()).await.is_ok()
}

// =========================================================================
// Idle behavior
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_timer_never_fires() {
    let timer = DeadlineTimer::new();
    assert!(!timer.is_armed());
    assert!(!timer.is_paused());
    assert_eq!(timer.remaining(), None);

    advance(Duration::from_secs(3600)).await;
    assert!(!fires(&timer).await);
}

// =========================================================================
// Arm / fire / cancel
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_armed_timer_fires_at_the_limit() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);
    assert!(timer.is_armed());

    // Leave a margin wider than the probe's own timeout, so the probe
    // can't auto-advance the paused clock onto the deadline itself.
    advance(LIMIT - Duration::from_millis(100)).await;
    assert!(!fires(&timer).await, "must not fire early");

    advance(Duration::from_millis(100)).await;
    assert!(fires(&timer).await, "must fire once the limit elapses");
}

#[tokio::test(start_paused = true)]
async fn test_remaining_counts_down_while_armed() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);

    advance(Duration::from_millis(10_000)).await;
    assert_eq!(timer.remaining(), Some(Duration::from_millis(20_000)));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_disarms() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);
    timer.cancel();

    assert!(!timer.is_armed());
    advance(LIMIT * 2).await;
    assert!(!fires(&timer).await);
}

#[tokio::test(start_paused = true)]
async fn test_rearm_replaces_previous_deadline() {
    let mut timer = DeadlineTimer::new();
    timer.arm(Duration::from_millis(5_000));
    timer.arm(LIMIT);

    advance(Duration::from_millis(5_000)).await;
    assert!(!fires(&timer).await, "old deadline must not fire");

    advance(LIMIT - Duration::from_millis(5_000)).await;
    assert!(fires(&timer).await);
}

#[tokio::test(start_paused = true)]
async fn test_zero_duration_arm_fires_immediately() {
    // Rehydration with an already-passed wall-clock deadline arms zero.
    let mut timer = DeadlineTimer::new();
    timer.arm(Duration::ZERO);
    assert!(fires(&timer).await);
}

// =========================================================================
// Pause / resume
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_freezes_remaining_time() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);

    advance(Duration::from_millis(12_000)).await;
    let frozen = timer.pause().expect("armed timer should pause");
    assert_eq!(frozen, Duration::from_millis(18_000));
    assert!(timer.is_paused());
    assert!(!timer.is_armed());

    // Time passing while paused changes nothing.
    advance(Duration::from_secs(600)).await;
    assert!(!fires(&timer).await);
    assert_eq!(timer.remaining(), Some(Duration::from_millis(18_000)));
}

#[tokio::test(start_paused = true)]
async fn test_resume_reschedules_with_frozen_remainder() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);
    advance(Duration::from_millis(12_000)).await;
    timer.pause();
    advance(Duration::from_secs(60)).await;

    let remaining = timer.resume().expect("frozen timer should resume");
    assert_eq!(remaining, Duration::from_millis(18_000));

    advance(Duration::from_millis(17_900)).await;
    assert!(!fires(&timer).await);
    advance(Duration::from_millis(100)).await;
    assert!(fires(&timer).await);
}

#[tokio::test(start_paused = true)]
async fn test_pause_then_resume_with_no_elapsed_time_preserves_deadline() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);
    advance(Duration::from_millis(1_000)).await;

    let frozen = timer.pause().unwrap();
    let resumed = timer.resume().unwrap();
    assert_eq!(frozen, resumed);
    assert_eq!(resumed, Duration::from_millis(29_000));
}

#[tokio::test(start_paused = true)]
async fn test_pause_when_idle_returns_none() {
    let mut timer = DeadlineTimer::new();
    assert_eq!(timer.pause(), None);
}

#[tokio::test(start_paused = true)]
async fn test_resume_when_not_paused_returns_none() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);
    assert_eq!(timer.resume(), None);
    assert!(timer.is_armed(), "resume must not disturb an armed timer");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_clears_frozen_state_too() {
    let mut timer = DeadlineTimer::new();
    timer.arm(LIMIT);
    timer.pause();
    timer.cancel();

    assert!(!timer.is_paused());
    assert_eq!(timer.remaining(), None);
    assert_eq!(timer.resume(), None);
}

#[tokio::test(start_paused = true)]
async fn test_pause_past_deadline_freezes_zero() {
    let mut timer = DeadlineTimer::new();
    timer.arm(Duration::from_millis(100));
    advance(Duration::from_millis(200)).await;

    // The engine may dequeue a pause command after the deadline passed
    // but before the expiry fired; the remainder saturates at zero.
    let frozen = timer.pause().unwrap();
    assert_eq!(frozen, Duration::ZERO);

    timer.resume();
    assert!(fires(&timer).await);
}
