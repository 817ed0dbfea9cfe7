//! Wall-clock push id generation.

use tether_engine::{KeyGenerator, PushIdEncoder, RecordId, Timestamp};

/// Generates push ids from the system clock and random entropy.
///
/// Ids sort in creation order, including ids created within the same
/// millisecond or across a backwards clock step.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    encoder: PushIdEncoder,
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyGenerator for PushIdGenerator {
    fn next_id(&mut self) -> RecordId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as Timestamp;

        let mut entropy = [0u8; 12];
        entropy.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..12]);

        self.encoder.encode(now, entropy)
    }
}
