//! Unpack stage core: write every archive entry, fan out one notification each

pub mod coordinator;
pub mod publisher;

pub use coordinator::{FanOutCoordinator, UnpackReport, UnpackRequest};
pub use publisher::EntryPublisher;
