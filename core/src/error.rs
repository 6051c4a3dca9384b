use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("backend directory capacity must be at least 1")]
    ZeroCapacity,

    #[error("backend slot {slot} out of range (capacity {capacity})")]
    SlotOutOfRange { slot: usize, capacity: usize },

    #[error("invalid MAC address: {0}")]
    InvalidMac(String),
}
