/// Receives notifications about a feed's activity. Callbacks run on the task
/// that caused the event and must not block.
pub trait FeedObserver: Send + Sync {
    /// `count` blocks were appended, starting at `start`
    fn on_append(&self, _start: u64, _count: u64) {}

    /// Block `index` arrived from a peer and was verified
    fn on_download(&self, _index: u64, _data: &[u8]) {}

    /// Block `index` was served to a peer
    fn on_upload(&self, _index: u64, _data: &[u8]) {}
}
