//! Tracker module: user registry, poll passes and their checkpoint.
//!
//! Provides:
//! - `UserRegistry`: Latest event per account plus the upload backlog
//! - `Poller`: One browse/fetch/upload pass at a time
//! - `CheckpointManager`: Persistence of cursor and registry

mod checkpoint;
mod poller;
mod registry;

pub use checkpoint::*;
pub use poller::*;
pub use registry::*;
