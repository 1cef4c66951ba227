//! Construction-time configuration of a frame triple buffer

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Loss policy of a triple buffer, chosen once at construction
///
/// By default, the buffer is lossy: the producer never waits for the consumer,
/// and a frame which was offered but not taken yet gets replaced by the next
/// one. In lossless mode, the producer instead waits for the consumer to take
/// the pending frame before offering a new one.
///
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// Never overwrite a pending frame that the consumer has not taken yet,
    /// blocking the producer instead
    pub wait_consumer: bool,
}
//
impl Options {
    /// Options for a lossless buffer, where offering a frame may block
    pub const fn lossless() -> Self {
        Self {
            wait_consumer: true,
        }
    }

    /// Options for a lossy buffer, where offering a frame never blocks
    pub const fn lossy() -> Self {
        Self {
            wait_consumer: false,
        }
    }

    /// Change the loss policy
    pub const fn with_wait_consumer(self, wait_consumer: bool) -> Self {
        Self { wait_consumer }
    }
}
