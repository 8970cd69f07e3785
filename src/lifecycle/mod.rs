//! Lifecycle of the connection state machine: generations, the perpetual hub
//! auth task, status snapshots and listener notifications.

pub mod auth_loop;
pub mod events;
pub mod manager;
pub mod status;

pub use events::{EventSink, LifecycleEvent};
pub use manager::ClientLifecycleManager;
pub use status::EngineStatus;
