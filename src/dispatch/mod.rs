//! Control-plane dispatch: worker pool, reconciliation loop, and worker
//! state synchronization.

pub mod dispatcher;
pub mod embedded;
pub mod pool;
pub mod state_sync;

pub use dispatcher::{DispatchConfig, DispatchHandle, Dispatcher};
pub use embedded::EmbeddedWorker;
pub use pool::{WorkerClient, WorkerPool};
