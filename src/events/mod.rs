//! Event plumbing: the in-process bus, per-source change detection, and
//! fan-out to live stream clients.

pub mod bus;
pub mod change;
pub mod stream;

pub use bus::{EventBus, EventHandler};
pub use change::ChangeDetector;
pub use stream::{ConnectionManager, StreamFanout};
