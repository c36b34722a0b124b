/// Local click accumulator for an open attack window.
///
/// `register` is synchronous and never waits on the network; the flush loop
/// drains the pending count with `take_pending` and re-credits it with
/// `restore` if the delivery fails, so the sum of delivered counts always
/// equals the number of registered clicks.
#[derive(Debug, Default)]
pub struct ClickBatch {
    total: u64,
    pending: u64,
}

impl ClickBatch {
    pub fn register(&mut self) {
        self.total = self.total.saturating_add(1);
        self.pending = self.pending.saturating_add(1);
    }

    /// Drains the unflushed count. Returns 0 when there is nothing to send,
    /// in which case the caller skips the network call entirely.
    pub fn take_pending(&mut self) -> u64 {
        std::mem::take(&mut self.pending)
    }

    /// Puts a failed flush back. Clicks registered while the flush was in
    /// flight are already in `pending`, so this only adds the lost amount.
    pub fn restore(&mut self, n: u64) {
        self.pending = self.pending.saturating_add(n);
    }

    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Window teardown / new window: both counters start over.
    pub fn reset(&mut self) {
        self.total = 0;
        self.pending = 0;
    }
}
