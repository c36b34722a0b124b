use crate::clicks::ClickBatch;
use crate::model::Role;
use crate::schedule::{ArmKey, FinalizeSchedule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackPhase {
    Idle,
    WindowOpen,
    Finalizing,
}

/// The one tracked contested window. Target and end time travel together as
/// a single value so a countdown can never pair a new deadline with a stale
/// target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackWindow {
    pub target_team_id: String,
    pub ends_at_ms: i64,
}

impl AttackWindow {
    pub fn arm_key(&self) -> ArmKey {
        ArmKey {
            target_team_id: self.target_team_id.clone(),
            ends_at_ms: self.ends_at_ms,
        }
    }
}

/// Side effect the session must run after feeding a status observation in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    None,
    Opened,
    /// A different window replaced the tracked one wholesale. Clicks counted
    /// for the old window but not yet flushed ride along for a best-effort
    /// delivery.
    Replaced { unflushed: u64 },
    /// The window was observed closed without a local finalize. Same
    /// best-effort delivery of the remainder.
    Closed { unflushed: u64 },
}

/// Per-team lifecycle of a contested action: idle, window open, finalizing.
/// Driven by status polls plus the countdown tick; owns the window, the
/// click batch, and the finalize schedule.
#[derive(Debug, Default)]
pub struct AttackSession {
    window: Option<AttackWindow>,
    finalizing: bool,
    clicks: ClickBatch,
    schedule: FinalizeSchedule,
}

impl AttackSession {
    pub fn phase(&self) -> AttackPhase {
        if self.finalizing {
            AttackPhase::Finalizing
        } else if self.window.is_some() {
            AttackPhase::WindowOpen
        } else {
            AttackPhase::Idle
        }
    }

    pub fn window(&self) -> Option<&AttackWindow> {
        self.window.as_ref()
    }

    /// Feeds one status observation (poll or start-attack response) in.
    /// Edge-triggered: re-observing the tracked window is a no-op.
    pub fn observe_status(
        &mut self,
        role: Role,
        reported: Option<AttackWindow>,
        now_ms: i64,
    ) -> WindowEvent {
        if self.finalizing {
            // the finalize sequence owns the state until it resets
            return WindowEvent::None;
        }

        match reported {
            Some(window) => {
                // members treat an expired end time the same as no window
                if !role.is_leader() && window.ends_at_ms <= now_ms {
                    return self.close_if_open();
                }
                match &self.window {
                    Some(current) if *current == window => WindowEvent::None,
                    Some(_) => {
                        let unflushed = self.clicks.take_pending();
                        self.open(role, window);
                        WindowEvent::Replaced { unflushed }
                    }
                    None => {
                        self.open(role, window);
                        WindowEvent::Opened
                    }
                }
            }
            None => self.close_if_open(),
        }
    }

    fn open(&mut self, role: Role, window: AttackWindow) {
        self.clicks.reset();
        if role.is_leader() {
            // an already-expired end time arms as immediately due, so a
            // late-joining leader device still converges on the deadline
            self.schedule.arm(window.arm_key());
        } else {
            self.schedule.disarm();
        }
        self.window = Some(window);
    }

    fn close_if_open(&mut self) -> WindowEvent {
        if self.window.is_none() {
            return WindowEvent::None;
        }
        let unflushed = self.clicks.take_pending();
        self.reset();
        WindowEvent::Closed { unflushed }
    }

    /// Counts a local interaction. Only an open window accepts clicks.
    pub fn register_click(&mut self) -> bool {
        if self.window.is_none() || self.finalizing {
            return false;
        }
        self.clicks.register();
        true
    }

    pub fn take_pending_clicks(&mut self) -> u64 {
        self.clicks.take_pending()
    }

    /// Re-credits a failed flush, but only while `key` still names the
    /// tracked window. Counts drained for a window that was replaced or torn
    /// down in the meantime are dropped; crediting them to the fresh batch
    /// would deliver them against the wrong window.
    pub fn restore_clicks(&mut self, key: &ArmKey, n: u64) -> bool {
        match &self.window {
            Some(window) if window.arm_key() == *key && !self.finalizing => {
                self.clicks.restore(n);
                true
            }
            _ => false,
        }
    }

    pub fn total_clicks(&self) -> u64 {
        self.clicks.total()
    }

    /// Countdown tick, leader side: yields the window to finalize at most
    /// once when the armed deadline (plus grace) has passed.
    pub fn due_finalize(&mut self, role: Role, now_ms: i64, grace_ms: u64) -> Option<ArmKey> {
        if !role.is_leader() || self.finalizing {
            return None;
        }
        self.schedule.due(now_ms, grace_ms)
    }

    /// Enters FINALIZING if `key` still names the tracked window; returns the
    /// remaining clicks for the final synchronous flush. A stale key (window
    /// already replaced or torn down) yields None and changes nothing.
    pub fn begin_finalize(&mut self, key: &ArmKey) -> Option<u64> {
        match &self.window {
            Some(window) if window.arm_key() == *key => {
                self.finalizing = true;
                Some(self.clicks.take_pending())
            }
            _ => None,
        }
    }

    /// Ends the finalize sequence, success or failure: the window is assumed
    /// expired server-side either way and everything returns to idle.
    pub fn finish_finalize(&mut self) {
        self.reset();
    }

    /// Teardown: logout, role change, or window invalidation.
    pub fn reset(&mut self) {
        self.window = None;
        self.finalizing = false;
        self.clicks.reset();
        self.schedule.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(target: &str, ends: i64) -> AttackWindow {
        AttackWindow {
            target_team_id: target.into(),
            ends_at_ms: ends,
        }
    }

    #[test]
    fn opens_on_future_window_and_is_edge_triggered() {
        let mut sess = AttackSession::default();
        assert_eq!(
            sess.observe_status(Role::Member, Some(window("T2", 20_000)), 0),
            WindowEvent::Opened
        );
        assert_eq!(sess.phase(), AttackPhase::WindowOpen);

        // same window re-observed: no-op
        assert_eq!(
            sess.observe_status(Role::Member, Some(window("T2", 20_000)), 5_000),
            WindowEvent::None
        );
    }

    #[test]
    fn replacement_is_atomic() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Leader, Some(window("T2", 20_000)), 0);
        sess.register_click();
        sess.register_click();

        let event = sess.observe_status(Role::Leader, Some(window("T3", 40_000)), 1_000);
        assert_eq!(event, WindowEvent::Replaced { unflushed: 2 });

        // both fields swapped together: never new deadline with old target
        let w = sess.window().unwrap();
        assert_eq!(w.target_team_id, "T3");
        assert_eq!(w.ends_at_ms, 40_000);
        assert_eq!(sess.total_clicks(), 0);
    }

    #[test]
    fn member_closes_when_poll_reports_window_gone() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Member, Some(window("T2", 20_000)), 0);
        sess.register_click();

        let event = sess.observe_status(Role::Member, None, 21_000);
        assert_eq!(event, WindowEvent::Closed { unflushed: 1 });
        assert_eq!(sess.phase(), AttackPhase::Idle);
    }

    #[test]
    fn member_treats_expired_end_time_as_closed() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Member, Some(window("T2", 20_000)), 0);

        let event = sess.observe_status(Role::Member, Some(window("T2", 20_000)), 20_001);
        assert!(matches!(event, WindowEvent::Closed { .. }));
        assert_eq!(sess.phase(), AttackPhase::Idle);
        // member path never arms a finalize
        assert!(sess.due_finalize(Role::Member, 30_000, 0).is_none());
    }

    #[test]
    fn leader_arms_once_and_fires_once() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Leader, Some(window("T2", 20_000)), 0);

        assert!(sess.due_finalize(Role::Leader, 10_000, 500).is_none());
        let key = sess.due_finalize(Role::Leader, 20_500, 500).unwrap();
        assert_eq!(key.target_team_id, "T2");
        assert!(sess.due_finalize(Role::Leader, 99_000, 500).is_none());
    }

    #[test]
    fn late_joining_leader_is_immediately_due() {
        let mut sess = AttackSession::default();
        // poll reports a window whose deadline already passed
        sess.observe_status(Role::Leader, Some(window("T2", 5_000)), 9_000);
        assert_eq!(sess.phase(), AttackPhase::WindowOpen);
        assert!(sess.due_finalize(Role::Leader, 9_000, 500).is_some());
    }

    #[test]
    fn stale_finalize_key_is_rejected() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Leader, Some(window("T2", 20_000)), 0);
        let key = sess.due_finalize(Role::Leader, 20_500, 0).unwrap();

        // window replaced between fire and finalize
        sess.observe_status(Role::Leader, Some(window("T3", 60_000)), 20_600);
        assert!(sess.begin_finalize(&key).is_none());
        assert_eq!(sess.phase(), AttackPhase::WindowOpen);
    }

    #[test]
    fn finalize_sequence_drains_and_resets() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Leader, Some(window("T2", 20_000)), 0);
        for _ in 0..20 {
            sess.register_click();
        }

        let key = sess.due_finalize(Role::Leader, 20_500, 0).unwrap();
        let remaining = sess.begin_finalize(&key).unwrap();
        assert_eq!(remaining, 20);
        assert_eq!(sess.phase(), AttackPhase::Finalizing);
        // no clicks accepted while finalizing
        assert!(!sess.register_click());
        // poll results are ignored mid-finalize
        assert_eq!(
            sess.observe_status(Role::Leader, None, 21_000),
            WindowEvent::None
        );

        sess.finish_finalize();
        assert_eq!(sess.phase(), AttackPhase::Idle);
        assert_eq!(sess.total_clicks(), 0);
    }

    #[test]
    fn restore_with_live_key_recredits() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Leader, Some(window("T2", 20_000)), 0);
        for _ in 0..5 {
            sess.register_click();
        }
        let key = sess.window().unwrap().arm_key();

        let inflight = sess.take_pending_clicks();
        assert!(sess.restore_clicks(&key, inflight));
        assert_eq!(sess.take_pending_clicks(), 5);
    }

    #[test]
    fn restore_after_replacement_is_dropped() {
        let mut sess = AttackSession::default();
        sess.observe_status(Role::Leader, Some(window("T2", 20_000)), 0);
        for _ in 0..10 {
            sess.register_click();
        }
        let key = sess.window().unwrap().arm_key();
        let inflight = sess.take_pending_clicks();

        // window swapped while the flush was out
        sess.observe_status(Role::Leader, Some(window("T3", 40_000)), 1_000);
        sess.register_click();

        assert!(!sess.restore_clicks(&key, inflight));
        assert_eq!(sess.total_clicks(), 1);
        assert_eq!(sess.take_pending_clicks(), 1);
    }

    #[test]
    fn clicks_ignored_while_idle() {
        let mut sess = AttackSession::default();
        assert!(!sess.register_click());
        assert_eq!(sess.total_clicks(), 0);
    }
}
