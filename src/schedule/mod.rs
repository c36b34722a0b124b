/// Identity of one observed attack window. Captured immutably when the
/// schedule is armed so a later state change can never redirect the finalize
/// at a different window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmKey {
    pub target_team_id: String,
    pub ends_at_ms: i64,
}

/// Role-gated one-shot finalize trigger. Armed once per distinct window;
/// re-arming for the identical window is ignored, a different window replaces
/// the arm, and teardown disarms so a stray deadline cannot fire against a
/// window that no longer applies.
#[derive(Debug, Default)]
pub struct FinalizeSchedule {
    armed: Option<ArmKey>,
    fired: bool,
}

impl FinalizeSchedule {
    /// Returns true when this call actually (re)armed the schedule.
    pub fn arm(&mut self, key: ArmKey) -> bool {
        if self.armed.as_ref() == Some(&key) {
            return false;
        }
        self.armed = Some(key);
        self.fired = false;
        true
    }

    /// Yields the armed key at most once, when the deadline (plus grace) has
    /// passed. The grace keeps a fast local clock from closing early.
    pub fn due(&mut self, now_ms: i64, grace_ms: u64) -> Option<ArmKey> {
        if self.fired {
            return None;
        }
        let key = self.armed.as_ref()?;
        if now_ms < key.ends_at_ms.saturating_add(grace_ms as i64) {
            return None;
        }
        self.fired = true;
        Some(key.clone())
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some() && !self.fired
    }

    pub fn disarm(&mut self) {
        self.armed = None;
        self.fired = false;
    }
}
