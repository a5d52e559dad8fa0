//! Pure scoring and tug arithmetic.
//!
//! Everything here is a standalone function over plain values so the
//! point and rope math is unit-testable without an actor, a clock, or
//! storage.

use std::collections::HashMap;

use tugline_protocol::{
    Side, StreakView, TeamId, POSITION_MAX, POSITION_MIN, SPEED_BONUS_FACTOR,
    TUG_POINTS_DIVISOR,
};
use tugline_store::Ruleset;

/// Resolves the base points for a correct answer: the ruleset override
/// when present, otherwise the value recorded on the question instance.
pub fn base_points(rules: &Ruleset, instance_base: u32) -> u32 {
    rules.points_per_correct.unwrap_or(instance_base)
}

/// Points awarded for a correct answer.
///
/// `base + floor(base × 0.5 × max(0, 1 − t/L))` with the speed bonus
/// enabled, plain `base` otherwise. A 0 ms response earns the full half-
/// base bonus; a response at or past the limit earns none.
pub fn compute_points(
    base: u32,
    response_time_ms: u64,
    time_limit_ms: u64,
    rules: &Ruleset,
) -> u32 {
    if !rules.points_for_speed {
        return base;
    }
    let fraction = if time_limit_ms == 0 {
        0.0
    } else {
        1.0 - response_time_ms as f64 / time_limit_ms as f64
    };
    let bonus = (base as f64 * SPEED_BONUS_FACTOR * fraction.max(0.0)).floor();
    base + bonus as u32
}

/// Signed rope delta for a correct answer worth `points`.
///
/// Magnitude is `points / 10`, multiplied by the streak multiplier once
/// the answering team's current streak has reached the threshold. The
/// multiplier applies to the magnitude after sign assignment, never to
/// the points themselves.
pub fn tug_delta(side: Side, points: u32, streak_current: u32, rules: &Ruleset) -> f64 {
    let mut magnitude = points as f64 / TUG_POINTS_DIVISOR;
    if rules.streak_bonus && streak_current >= rules.streak_threshold {
        magnitude *= rules.streak_multiplier;
    }
    side.direction() * magnitude
}

/// Clamps a rope position into `[0, 100]`.
pub fn clamp_position(position: f64) -> f64 {
    position.clamp(POSITION_MIN, POSITION_MAX)
}

/// Records a correct answer for `team_id` in the streak map: bumps that
/// team's current streak (lifting its max), resets every other team's
/// current streak, and returns the answering team's new current streak.
pub fn bump_streak(streaks: &mut HashMap<TeamId, StreakView>, team_id: TeamId) -> u32 {
    streaks.entry(team_id).or_default();
    let mut new_current = 0;
    for (id, streak) in streaks.iter_mut() {
        if *id == team_id {
            streak.current += 1;
            streak.max = streak.max.max(streak.current);
            new_current = streak.current;
        } else {
            streak.current = 0;
        }
    }
    new_current
}
