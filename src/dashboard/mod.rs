use crate::model::Snapshot;

/// Sole owner of the local dashboard snapshot.
///
/// Reads are guarded by a generation counter: `begin_fetch` hands out a
/// ticket, and a completing fetch is applied only if its ticket is still the
/// current one. A forced refresh or an authoritative mutating response
/// supersedes any outstanding read, so a slow response can never overwrite
/// fresher state. Overlapping plain refreshes are suppressed outright.
#[derive(Debug, Default)]
pub struct DashboardSync {
    snapshot: Option<Snapshot>,
    next_gen: u64,
    in_flight: Option<u64>,
}

impl DashboardSync {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Instant hydrate from the persisted cache at login. Stale is fine; the
    /// real fetch that follows replaces it.
    pub fn hydrate(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Starts a read. Returns the ticket to pass back to `complete_fetch`,
    /// or None when an identical fetch is already in flight and this one is
    /// not forced. Forcing supersedes the outstanding read: its response
    /// will be dropped when it eventually lands.
    pub fn begin_fetch(&mut self, force: bool) -> Option<u64> {
        if !force && self.in_flight.is_some() {
            return None;
        }
        let gen = self.next_gen;
        self.next_gen += 1;
        self.in_flight = Some(gen);
        Some(gen)
    }

    /// Finishes the read started with `gen`. Returns true when the result
    /// was applied; a superseded ticket is dropped without touching state.
    pub fn complete_fetch(&mut self, gen: u64, result: Option<Snapshot>) -> bool {
        if self.in_flight != Some(gen) {
            return false;
        }
        self.in_flight = None;
        match result {
            Some(snapshot) => {
                self.snapshot = Some(snapshot);
                true
            }
            // failed fetch: keep whatever we had (possibly the optimistic
            // cache hydrate) and let the next poll try again
            None => false,
        }
    }

    /// Snapshot embedded in a successful mutating response. Replaces state
    /// wholesale and invalidates any read still in flight, which is by
    /// definition older than this response.
    pub fn apply_authoritative(&mut self, snapshot: Snapshot) {
        self.in_flight = None;
        self.snapshot = Some(snapshot);
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Logout: drop local state and invalidate outstanding reads.
    pub fn clear(&mut self) {
        self.snapshot = None;
        self.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MyTeam, Player};

    fn snap(money: i64) -> Snapshot {
        Snapshot {
            player: Player {
                id: "1001".into(),
                ..Default::default()
            },
            my_team: MyTeam {
                money,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn overlapping_refresh_is_suppressed() {
        let mut sync = DashboardSync::default();
        let first = sync.begin_fetch(false).unwrap();
        assert!(sync.begin_fetch(false).is_none());

        assert!(sync.complete_fetch(first, Some(snap(100))));
        assert_eq!(sync.snapshot().unwrap().my_team.money, 100);
        // guard released, next refresh proceeds
        assert!(sync.begin_fetch(false).is_some());
    }

    #[test]
    fn superseded_read_response_is_dropped() {
        let mut sync = DashboardSync::default();
        let stale = sync.begin_fetch(false).unwrap();
        let fresh = sync.begin_fetch(true).unwrap();

        // responses arrive in reversed order: fresh first, stale after
        assert!(sync.complete_fetch(fresh, Some(snap(200))));
        assert!(!sync.complete_fetch(stale, Some(snap(100))));
        assert_eq!(sync.snapshot().unwrap().my_team.money, 200);
    }

    #[test]
    fn authoritative_response_invalidates_outstanding_read() {
        let mut sync = DashboardSync::default();
        let pending = sync.begin_fetch(false).unwrap();

        sync.apply_authoritative(snap(500));
        assert!(!sync.complete_fetch(pending, Some(snap(100))));
        assert_eq!(sync.snapshot().unwrap().my_team.money, 500);
        assert!(!sync.fetch_in_flight());
    }

    #[test]
    fn failed_fetch_keeps_the_hydrated_snapshot() {
        let mut sync = DashboardSync::default();
        sync.hydrate(snap(42));

        let gen = sync.begin_fetch(false).unwrap();
        assert!(!sync.complete_fetch(gen, None));
        assert_eq!(sync.snapshot().unwrap().my_team.money, 42);
        // failure released the guard
        assert!(sync.begin_fetch(false).is_some());
    }

    #[test]
    fn clear_drops_state_and_inflight_guard() {
        let mut sync = DashboardSync::default();
        let gen = sync.begin_fetch(false).unwrap();
        sync.hydrate(snap(1));
        sync.clear();
        assert!(!sync.has_snapshot());
        assert!(!sync.complete_fetch(gen, Some(snap(9))));
        assert!(!sync.has_snapshot());
    }
}
