//! State storage: the engine's persisted memory of physical resources.
//!
//! The state store exclusively owns [`PhysicalRecord`]s; the planner only
//! reads them and the executor is the sole writer advancing their status.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    EngineState, PhysicalRecord, RecordStatus, RunHistoryEntry, RunOperation, STATE_VERSION,
};
