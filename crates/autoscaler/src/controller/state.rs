use std::time::Duration;
use std::time::Instant;

/// Where a node group is in its scaling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
pub enum GroupPhase {
    #[default]
    #[display("idle")]
    Idle,
    #[display("evaluating")]
    Evaluating,
    #[display("scaling_up")]
    ScalingUp,
    #[display("scaling_down")]
    ScalingDown,
    #[display("cooling_down")]
    CoolingDown,
}

/// Direction of a completed scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ActionKind {
    #[display("scale_up")]
    ScaleUp,
    #[display("scale_down")]
    ScaleDown,
}

/// Mutable scaling state of one group. Only the scan loop writes it.
#[derive(Debug, Clone, Default)]
pub struct GroupState {
    pub phase: GroupPhase,
    /// When the last successful scaling action finished
    pub last_action: Option<Instant>,
    pub last_action_kind: Option<ActionKind>,
    /// Start of the current uninterrupted stretch of low utilization
    pub slack_since: Option<Instant>,
}

impl GroupState {
    pub fn in_cooldown(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_action
            .is_some_and(|at| now.saturating_duration_since(at) < cooldown)
    }

    /// Nodes requested by a recent scale-up may not be registered yet, so
    /// another scale-up waits out the cooldown too.
    pub fn scale_up_in_cooldown(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_action_kind == Some(ActionKind::ScaleUp) && self.in_cooldown(now, cooldown)
    }

    /// Tracks how long the group has been continuously below its scale-down
    /// threshold. Any tick above it restarts the window.
    pub fn observe_slack(&mut self, has_slack: bool, now: Instant) {
        match (has_slack, self.slack_since) {
            (true, None) => self.slack_since = Some(now),
            (false, Some(_)) => self.slack_since = None,
            _ => {}
        }
    }

    pub fn slack_duration(&self, now: Instant) -> Duration {
        self.slack_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    pub fn begin_evaluation(&mut self) {
        self.phase = GroupPhase::Evaluating;
    }

    /// Settles the phase once a tick's work for the group is done.
    pub fn finish(&mut self, now: Instant, cooldown: Duration) {
        self.phase = if self.in_cooldown(now, cooldown) {
            GroupPhase::CoolingDown
        } else {
            GroupPhase::Idle
        };
    }

    pub fn action_succeeded(&mut self, kind: ActionKind, now: Instant, cooldown: Duration) {
        self.last_action = Some(now);
        self.last_action_kind = Some(kind);
        self.slack_since = None;
        self.finish(now, cooldown);
    }

    /// A failed action leaves no trace besides the phase reset, so the next
    /// tick re-evaluates from scratch.
    pub fn action_failed(&mut self) {
        self.phase = GroupPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_window_follows_last_action() {
        let start = Instant::now();
        let cooldown = Duration::from_secs(300);
        let mut state = GroupState::default();
        assert!(!state.in_cooldown(start, cooldown));

        state.phase = GroupPhase::ScalingDown;
        state.action_succeeded(ActionKind::ScaleDown, start, cooldown);
        assert_eq!(state.phase, GroupPhase::CoolingDown);
        assert!(state.in_cooldown(start + Duration::from_secs(299), cooldown));
        assert!(!state.in_cooldown(start + Duration::from_secs(300), cooldown));

        state.finish(start + Duration::from_secs(301), cooldown);
        assert_eq!(state.phase, GroupPhase::Idle);
    }

    #[test]
    fn only_a_recent_scale_up_holds_back_the_next_one() {
        let start = Instant::now();
        let cooldown = Duration::from_secs(300);
        let mut state = GroupState::default();

        state.action_succeeded(ActionKind::ScaleDown, start, cooldown);
        assert!(state.in_cooldown(start, cooldown));
        assert!(!state.scale_up_in_cooldown(start, cooldown));

        state.action_succeeded(ActionKind::ScaleUp, start, cooldown);
        assert!(state.scale_up_in_cooldown(start + Duration::from_secs(299), cooldown));
        assert!(!state.scale_up_in_cooldown(start + Duration::from_secs(300), cooldown));
    }

    #[test]
    fn zero_cooldown_returns_to_idle() {
        let now = Instant::now();
        let mut state = GroupState::default();
        state.action_succeeded(ActionKind::ScaleUp, now, Duration::ZERO);
        assert_eq!(state.phase, GroupPhase::Idle);
    }

    #[test]
    fn slack_window_resets_when_load_returns() {
        let start = Instant::now();
        let mut state = GroupState::default();
        state.observe_slack(true, start);
        state.observe_slack(true, start + Duration::from_secs(30));
        assert_eq!(
            state.slack_duration(start + Duration::from_secs(60)),
            Duration::from_secs(60)
        );

        state.observe_slack(false, start + Duration::from_secs(61));
        assert_eq!(state.slack_duration(start + Duration::from_secs(62)), Duration::ZERO);
    }

    #[test]
    fn failure_returns_to_idle_without_cooldown() {
        let now = Instant::now();
        let mut state = GroupState {
            phase: GroupPhase::ScalingUp,
            ..Default::default()
        };
        state.action_failed();
        assert_eq!(state.phase, GroupPhase::Idle);
        assert!(!state.in_cooldown(now, Duration::from_secs(300)));
    }
}
