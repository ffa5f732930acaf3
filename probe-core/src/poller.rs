//! Completion poller state machine.
//!
//! Decides, one shard at a time, when asynchronous background crawling has
//! drained. Like every module in this crate it performs no I/O: the caller
//! fetches a [`SpiderQueueSnapshot`], hands it in together with the elapsed
//! time and the wall clock, and gets the new [`PollState`] back.
//!
//! ```text
//!            ┌──────────┐  status != 0 or grace over  ┌──────────┐  quiet & nothing near  ┌──────┐
//!  start ──► │ Starting │ ──────────────────────────► │ Settling │ ─────────────────────► │ Done │
//!            └────┬─────┘                             └────┬─────┘                        └──────┘
//!                 │        fetch failed or ceiling hit     │
//!                 └──────────────────┬─────────────────────┘
//!                                    ▼
//!                               ┌──────────┐
//!                               │ TimedOut │
//!                               └──────────┘
//! ```

use std::time::Duration;

use probe_types::{SpiderQueueSnapshot, STATUS_STARTING};

/// Poller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Spider subsystem still initializing.
    Starting,
    /// Polling for the queue to drain.
    Settling,
    /// No near-term work left on this shard.
    Done,
    /// Shard unreachable or the ceiling was exceeded.
    TimedOut,
}

impl PollState {
    /// True for `Done` and `TimedOut`.
    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Done | PollState::TimedOut)
    }
}

/// One poll result as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The spider queue was fetched.
    Snapshot(SpiderQueueSnapshot),
    /// The fetch itself failed.
    Unreachable,
}

/// Timing knobs of the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Sleep between ticks.
    pub interval: Duration,
    /// How long a still-initializing spider is waited for.
    pub startup_grace: Duration,
    /// How long an empty, quiet queue must stay so before it counts as drained.
    pub confirm_window: Duration,
    /// Scheduled entries further out than this are not near-term work.
    pub future_horizon: Duration,
    /// Hard ceiling on the whole poll.
    pub ceiling: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            startup_grace: Duration::from_secs(5),
            confirm_window: Duration::from_secs(2),
            future_horizon: Duration::from_secs(3600),
            ceiling: Duration::from_secs(300),
        }
    }
}

/// Per-shard completion poller - NO I/O, just state transitions.
#[derive(Debug, Clone)]
pub struct CompletionPoller {
    config: PollerConfig,
    state: PollState,
    /// Elapsed time at which this shard's polling began.
    started_at: Duration,
    /// Elapsed time at which the queue was first seen quiet and empty.
    idle_since: Option<Duration>,
}

impl CompletionPoller {
    /// Create a poller in the `Starting` state.
    pub fn new(config: PollerConfig) -> Self {
        Self::starting_at(config, Duration::ZERO)
    }

    /// Create a poller for a shard whose polling begins `started_at` into a
    /// wait shared with other shards.
    ///
    /// The start-up grace runs from `started_at`; the ceiling still bounds
    /// the shared wait as a whole.
    pub fn starting_at(config: PollerConfig, started_at: Duration) -> Self {
        Self {
            config,
            state: PollState::Starting,
            started_at,
            idle_since: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Poller configuration.
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Feed one observation.
    ///
    /// `elapsed` is measured from the start of the whole wait, `now_ms` is
    /// the wall clock in epoch milliseconds (the unit of `spiderTime`).
    pub fn observe(&mut self, elapsed: Duration, now_ms: i64, observation: Observation) -> PollState {
        if self.state.is_terminal() {
            return self.state;
        }

        self.state = match observation {
            Observation::Unreachable => PollState::TimedOut,
            Observation::Snapshot(snapshot) => self.evaluate(elapsed, now_ms, &snapshot),
        };

        if !self.state.is_terminal() && elapsed > self.config.ceiling {
            self.state = PollState::TimedOut;
        }
        self.state
    }

    fn evaluate(&mut self, elapsed: Duration, now_ms: i64, snapshot: &SpiderQueueSnapshot) -> PollState {
        let polling_for = elapsed.saturating_sub(self.started_at);
        if snapshot.status_code == STATUS_STARTING && polling_for < self.config.startup_grace {
            self.idle_since = None;
            return PollState::Starting;
        }

        if !snapshot.is_quiet() {
            self.idle_since = None;
            return PollState::Settling;
        }

        if snapshot.waiting_tree_count == 0 {
            let since = *self.idle_since.get_or_insert(elapsed);
            return if elapsed.saturating_sub(since) >= self.config.confirm_window {
                PollState::Done
            } else {
                PollState::Settling
            };
        }

        self.idle_since = None;
        let horizon_ms = i64::try_from(self.config.future_horizon.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_add(horizon_ms);
        if snapshot.waiting_trees.iter().all(|t| t.spider_time > cutoff) {
            PollState::Done
        } else {
            PollState::Settling
        }
    }
}

impl Default for CompletionPoller {
    fn default() -> Self {
        Self::new(PollerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_types::{WaitingTree, STATUS_STEADY};

    const NOW: i64 = 1_700_000_000_000;
    const HOUR_MS: i64 = 3_600_000;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn quiet(waiting: &[i64]) -> Observation {
        Observation::Snapshot(SpiderQueueSnapshot {
            status_code: STATUS_STEADY,
            waiting_tree_count: waiting.len() as u64,
            waiting_trees: waiting.iter().map(|&spider_time| WaitingTree { spider_time }).collect(),
            ..Default::default()
        })
    }

    fn busy(spider_count: u64) -> Observation {
        Observation::Snapshot(SpiderQueueSnapshot {
            status_code: STATUS_STEADY,
            spider_count,
            ..Default::default()
        })
    }

    fn starting() -> Observation {
        Observation::Snapshot(SpiderQueueSnapshot::default())
    }

    #[test]
    fn unreachable_times_out_immediately() {
        let mut poller = CompletionPoller::default();
        assert_eq!(poller.observe(secs(0), NOW, Observation::Unreachable), PollState::TimedOut);
    }

    #[test]
    fn starting_within_grace() {
        let mut poller = CompletionPoller::default();
        assert_eq!(poller.observe(secs(1), NOW, starting()), PollState::Starting);
        assert_eq!(poller.observe(secs(4), NOW, starting()), PollState::Starting);
    }

    #[test]
    fn starting_past_grace_proceeds() {
        let mut poller = CompletionPoller::default();
        assert_eq!(poller.observe(secs(6), NOW, starting()), PollState::Settling);
    }

    #[test]
    fn late_shard_gets_its_own_grace() {
        let mut poller = CompletionPoller::starting_at(PollerConfig::default(), secs(100));
        assert_eq!(poller.observe(secs(100), NOW, starting()), PollState::Starting);
        assert_eq!(poller.observe(secs(104), NOW, starting()), PollState::Starting);
        assert_eq!(poller.observe(secs(106), NOW, starting()), PollState::Settling);
    }

    #[test]
    fn late_shard_still_bounded_by_shared_ceiling() {
        let mut poller = CompletionPoller::starting_at(PollerConfig::default(), secs(298));
        assert_eq!(poller.observe(secs(299), NOW, starting()), PollState::Starting);
        assert_eq!(poller.observe(secs(301), NOW, starting()), PollState::TimedOut);
    }

    #[test]
    fn never_done_while_spidering() {
        let mut poller = CompletionPoller::default();
        for t in 0..200 {
            let state = poller.observe(secs(t), NOW, busy(1));
            assert_ne!(state, PollState::Done);
        }
    }

    #[test]
    fn empty_queue_needs_confirmation() {
        let mut poller = CompletionPoller::default();
        assert_eq!(poller.observe(secs(10), NOW, quiet(&[])), PollState::Settling);
        assert_eq!(poller.observe(secs(11), NOW, quiet(&[])), PollState::Settling);
        assert_eq!(poller.observe(secs(12), NOW, quiet(&[])), PollState::Done);
    }

    #[test]
    fn activity_resets_confirmation() {
        let mut poller = CompletionPoller::default();
        poller.observe(secs(10), NOW, quiet(&[]));
        poller.observe(secs(11), NOW, busy(1));
        assert_eq!(poller.observe(secs(12), NOW, quiet(&[])), PollState::Settling);
        assert_eq!(poller.observe(secs(14), NOW, quiet(&[])), PollState::Done);
    }

    #[test]
    fn far_future_waiting_trees_are_done() {
        let mut poller = CompletionPoller::default();
        let state = poller.observe(secs(1), NOW, quiet(&[NOW + HOUR_MS + 1, NOW + 2 * HOUR_MS]));
        assert_eq!(state, PollState::Done);
    }

    #[test]
    fn near_waiting_tree_keeps_polling() {
        let mut poller = CompletionPoller::default();
        let state = poller.observe(secs(1), NOW, quiet(&[NOW + 2 * HOUR_MS, NOW + 1000]));
        assert_eq!(state, PollState::Settling);
    }

    #[test]
    fn ceiling_times_out() {
        let mut poller = CompletionPoller::default();
        assert_eq!(poller.observe(secs(299), NOW, busy(3)), PollState::Settling);
        assert_eq!(poller.observe(secs(301), NOW, busy(3)), PollState::TimedOut);
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut poller = CompletionPoller::default();
        poller.observe(secs(0), NOW, Observation::Unreachable);
        assert_eq!(poller.observe(secs(1), NOW, quiet(&[])), PollState::TimedOut);

        let mut poller = CompletionPoller::default();
        poller.observe(secs(0), NOW, quiet(&[NOW + 2 * HOUR_MS]));
        assert_eq!(poller.observe(secs(1), NOW, busy(5)), PollState::Done);
    }

    #[test]
    fn dole_ips_block_completion() {
        let mut poller = CompletionPoller::default();
        let snapshot = SpiderQueueSnapshot {
            status_code: STATUS_STEADY,
            dole_ip_count: 1,
            waiting_tree_count: 1,
            waiting_trees: vec![WaitingTree {
                spider_time: NOW + 2 * HOUR_MS,
            }],
            ..Default::default()
        };
        assert_eq!(
            poller.observe(secs(1), NOW, Observation::Snapshot(snapshot)),
            PollState::Settling
        );
    }
}
