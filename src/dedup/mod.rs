use crate::model::ResultRecord;

/// Suppresses duplicate delivery of an attack outcome. Both the leader's own
/// finalize response and every participant's status poll can observe the same
/// result; whichever arrives first wins and the other is dropped.
#[derive(Debug, Default)]
pub struct ResultGate {
    last_result_id: Option<String>,
}

impl ResultGate {
    /// Returns true exactly once per distinct result id; the caller renders
    /// the outcome only on true.
    pub fn observe(&mut self, record: &ResultRecord) -> bool {
        if self.last_result_id.as_deref() == Some(record.result_id.as_str()) {
            return false;
        }
        self.last_result_id = Some(record.result_id.clone());
        true
    }

    pub fn last_result_id(&self) -> Option<&str> {
        self.last_result_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ResultRecord {
        ResultRecord {
            result_id: id.into(),
            stolen: false,
            message: String::new(),
        }
    }

    #[test]
    fn same_id_renders_at_most_once() {
        let mut gate = ResultGate::default();
        assert!(gate.observe(&record("r-1")));
        for _ in 0..5 {
            assert!(!gate.observe(&record("r-1")));
        }
    }

    #[test]
    fn new_id_renders_again() {
        let mut gate = ResultGate::default();
        assert!(gate.observe(&record("r-1")));
        assert!(gate.observe(&record("r-2")));
        assert!(!gate.observe(&record("r-2")));
        assert_eq!(gate.last_result_id(), Some("r-2"));
    }

    #[test]
    fn interleaved_observers_share_one_gate() {
        // leader finalize response first, then the poll loop echoing the
        // same id a few cycles in a row
        let mut gate = ResultGate::default();
        assert!(gate.observe(&record("r-9")));
        assert!(!gate.observe(&record("r-9")));
        assert!(!gate.observe(&record("r-9")));
        assert_eq!(gate.last_result_id(), Some("r-9"));
    }
}
