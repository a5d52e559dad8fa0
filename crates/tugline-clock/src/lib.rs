//! Single-shot question deadline timer for Tugline.
//!
//! Each session engine owns one [`DeadlineTimer`]. It is armed when a
//! question starts, frozen (remaining time preserved) on pause, re-armed
//! on resume, and cancelled when the question ends early.
//!
//! # Integration
//!
//! The timer is designed to sit inside the engine actor's
//! `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         _ = deadline.expired() => { /* end the question */ }
//!     }
//! }
//! ```
//!
//! When the timer is unarmed or paused, [`DeadlineTimer::expired`] pends
//! forever — `select!` keeps processing the other branches, and nothing
//! fires until a question is live again.
//!
//! # Rehydration
//!
//! On wake-from-hibernation the engine recomputes the remaining time from
//! the persisted wall-clock deadline and calls [`DeadlineTimer::arm`]
//! with the remainder; an already-passed deadline arms a zero-duration
//! timer, so the end-of-question fires on the first loop iteration.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::debug;

/// The deadline of the currently active question, if any.
///
/// State machine:
///
/// ```text
///   Idle ──(arm)──→ Armed ──(pause)──→ Frozen
///     ↑               │  ↑                │
///     │           (cancel) └──(resume)────┘
///     └───────────────┘
/// ```
#[derive(Debug, Default)]
pub struct DeadlineTimer {
    /// When the active question must end. `None` while idle or frozen.
    deadline: Option<Instant>,
    /// Remaining time captured by `pause`, consumed by `resume`.
    frozen: Option<Duration>,
}

impl DeadlineTimer {
    /// Creates an idle timer (nothing armed).
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to fire `limit` from now.
    ///
    /// Re-arming replaces any previous deadline and clears a frozen
    /// remainder.
    pub fn arm(&mut self, limit: Duration) {
        self.deadline = Some(Instant::now() + limit);
        self.frozen = None;
        debug!(limit_ms = limit.as_millis() as u64, "deadline armed");
    }

    /// Disarms the timer entirely.
    pub fn cancel(&mut self) {
        if self.deadline.take().is_some() || self.frozen.take().is_some() {
            debug!("deadline cancelled");
        }
    }

    /// Freezes the timer, preserving the remaining time.
    ///
    /// Returns the preserved remainder, or `None` if the timer was not
    /// armed. Pausing an already-frozen timer is a no-op.
    pub fn pause(&mut self) -> Option<Duration> {
        let deadline = self.deadline.take()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.frozen = Some(remaining);
        debug!(remaining_ms = remaining.as_millis() as u64, "deadline frozen");
        Some(remaining)
    }

    /// Re-arms a frozen timer with its preserved remainder.
    ///
    /// Returns the remainder it was re-armed with, or `None` if the timer
    /// was not frozen.
    pub fn resume(&mut self) -> Option<Duration> {
        let remaining = self.frozen.take()?;
        self.deadline = Some(Instant::now() + remaining);
        debug!(remaining_ms = remaining.as_millis() as u64, "deadline resumed");
        Some(remaining)
    }

    /// Whether a deadline is currently counting down.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the timer is frozen by a pause.
    pub fn is_paused(&self) -> bool {
        self.frozen.is_some()
    }

    /// Time left before the deadline fires: the live remainder while
    /// armed, the frozen remainder while paused, `None` while idle.
    pub fn remaining(&self) -> Option<Duration> {
        if let Some(deadline) = self.deadline {
            return Some(deadline.saturating_duration_since(Instant::now()));
        }
        self.frozen
    }

    /// Resolves when the armed deadline passes.
    ///
    /// Pends forever while idle or frozen. Cancel-safe: dropping the
    /// future has no effect on the timer state.
    pub async fn expired(&self) {
        match (self.deadline, self.frozen) {
            (Some(deadline), None) => time::sleep_until(deadline).await,
            _ => std::future::pending().await,
        }
    }
}
