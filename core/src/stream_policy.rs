//! Hysteretic chunking policy for the streaming renderer.
//!
//! Each tick the renderer reports how many lines are queued and how old the
//! oldest one is; the policy answers with how many to drain. `smooth` mode
//! paces output one line per tick; `catchup` dumps the whole queue when the
//! renderer falls behind. Hysteresis keeps the mode from flapping: leaving
//! catchup requires a sustained calm window, and re-entering right after
//! leaving requires a severe backlog.

use std::time::Duration;
use std::time::Instant;

const ENTER_QUEUED: usize = 8;
const ENTER_AGE: Duration = Duration::from_millis(120);
const LEAVE_QUEUED: usize = 2;
const LEAVE_AGE: Duration = Duration::from_millis(40);
const CALM_HOLD: Duration = Duration::from_millis(250);
const REENTRY_BLOCK: Duration = Duration::from_millis(250);
const SEVERE_QUEUED: usize = 64;
const SEVERE_AGE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    Smooth,
    Catchup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickScope {
    #[default]
    Normal,
    /// Only drain while in catchup; smooth ticks drain nothing.
    CatchupOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainDecision {
    pub mode: ChunkMode,
    pub drain: usize,
}

#[derive(Debug)]
pub struct ChunkingPolicy {
    mode: ChunkMode,
    calm_since: Option<Instant>,
    left_catchup_at: Option<Instant>,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkingPolicy {
    pub fn new() -> Self {
        Self {
            mode: ChunkMode::Smooth,
            calm_since: None,
            left_catchup_at: None,
        }
    }

    pub fn mode(&self) -> ChunkMode {
        self.mode
    }

    pub fn tick(
        &mut self,
        now: Instant,
        queued: usize,
        oldest_age: Duration,
        scope: TickScope,
    ) -> DrainDecision {
        match self.mode {
            ChunkMode::Smooth => {
                let wants_catchup = queued >= ENTER_QUEUED || oldest_age >= ENTER_AGE;
                if wants_catchup && !self.reentry_blocked(now, queued, oldest_age) {
                    self.mode = ChunkMode::Catchup;
                    self.calm_since = None;
                }
            }
            ChunkMode::Catchup => {
                let calm = queued <= LEAVE_QUEUED && oldest_age <= LEAVE_AGE;
                if calm {
                    let since = *self.calm_since.get_or_insert(now);
                    if now.duration_since(since) >= CALM_HOLD {
                        self.mode = ChunkMode::Smooth;
                        self.calm_since = None;
                        self.left_catchup_at = Some(now);
                    }
                } else {
                    self.calm_since = None;
                }
            }
        }

        let drain = match (self.mode, scope) {
            (ChunkMode::Catchup, _) => queued,
            (ChunkMode::Smooth, TickScope::Normal) => queued.min(1),
            (ChunkMode::Smooth, TickScope::CatchupOnly) => 0,
        };

        DrainDecision {
            mode: self.mode,
            drain,
        }
    }

    fn reentry_blocked(&self, now: Instant, queued: usize, oldest_age: Duration) -> bool {
        let Some(left_at) = self.left_catchup_at else {
            return false;
        };
        if now.duration_since(left_at) >= REENTRY_BLOCK {
            return false;
        }
        let severe = queued >= SEVERE_QUEUED || oldest_age >= SEVERE_AGE;
        !severe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn smooth_drains_at_most_one_line() {
        let mut policy = ChunkingPolicy::new();
        let now = Instant::now();
        let decision = policy.tick(now, 3, ms(10), TickScope::Normal);
        assert_eq!(decision.mode, ChunkMode::Smooth);
        assert_eq!(decision.drain, 1);
    }

    #[test]
    fn queue_depth_triggers_catchup() {
        let mut policy = ChunkingPolicy::new();
        let decision = policy.tick(Instant::now(), 8, ms(10), TickScope::Normal);
        assert_eq!(decision.mode, ChunkMode::Catchup);
        assert_eq!(decision.drain, 8);
    }

    #[test]
    fn oldest_age_triggers_catchup() {
        let mut policy = ChunkingPolicy::new();
        let decision = policy.tick(Instant::now(), 1, ms(120), TickScope::Normal);
        assert_eq!(decision.mode, ChunkMode::Catchup);
        assert_eq!(decision.drain, 1);
    }

    #[test]
    fn calm_must_hold_before_leaving_catchup() {
        let mut policy = ChunkingPolicy::new();
        let start = Instant::now();
        assert_eq!(
            policy.tick(start, 9, ms(10), TickScope::Normal).mode,
            ChunkMode::Catchup
        );
        // Calm begins, but has not held long enough.
        assert_eq!(
            policy.tick(start + ms(200), 2, ms(40), TickScope::Normal).mode,
            ChunkMode::Catchup
        );
        // A busy tick resets the calm streak.
        assert_eq!(
            policy.tick(start + ms(300), 5, ms(80), TickScope::Normal).mode,
            ChunkMode::Catchup
        );
        assert_eq!(
            policy.tick(start + ms(400), 2, ms(30), TickScope::Normal).mode,
            ChunkMode::Catchup
        );
        // 260 ms of sustained calm: leave.
        assert_eq!(
            policy.tick(start + ms(660), 2, ms(30), TickScope::Normal).mode,
            ChunkMode::Smooth
        );
    }

    #[test]
    fn hysteresis_scenario_end_to_end() {
        let mut policy = ChunkingPolicy::new();
        let start = Instant::now();

        let first = policy.tick(start, 9, ms(10), TickScope::Normal);
        assert_eq!(first.mode, ChunkMode::Catchup);

        let second = policy.tick(start + ms(200), 2, ms(40), TickScope::Normal);
        assert_eq!(second.mode, ChunkMode::Catchup);

        let third = policy.tick(start + ms(460), 2, ms(40), TickScope::Normal);
        assert_eq!(third.mode, ChunkMode::Smooth);

        // Re-entry is blocked right after leaving, and catchup_only scope
        // drains nothing in smooth mode.
        let fourth = policy.tick(start + ms(500), 8, ms(10), TickScope::CatchupOnly);
        assert_eq!(fourth.mode, ChunkMode::Smooth);
        assert_eq!(fourth.drain, 0);

        // Severe backlog overrides the re-entry block.
        let fifth = policy.tick(start + ms(520), 64, ms(10), TickScope::Normal);
        assert_eq!(fifth.mode, ChunkMode::Catchup);
        assert_eq!(fifth.drain, 64);
    }

    #[test]
    fn reentry_block_expires() {
        let mut policy = ChunkingPolicy::new();
        let start = Instant::now();
        policy.tick(start, 9, ms(10), TickScope::Normal);
        policy.tick(start + ms(100), 0, ms(0), TickScope::Normal);
        let left = policy.tick(start + ms(400), 0, ms(0), TickScope::Normal);
        assert_eq!(left.mode, ChunkMode::Smooth);

        // Within the block window a mild backlog stays smooth.
        let blocked = policy.tick(start + ms(500), 9, ms(10), TickScope::Normal);
        assert_eq!(blocked.mode, ChunkMode::Smooth);

        // After the window the same backlog re-enters normally.
        let unblocked = policy.tick(start + ms(700), 9, ms(10), TickScope::Normal);
        assert_eq!(unblocked.mode, ChunkMode::Catchup);
    }
}
