//! HTTP surface of the mirror: posts list, sync trigger, webhook receiver,
//! and a debug snapshot, plus the background sync step the binary reuses.

pub mod routes;
pub mod state;
pub mod sync;

pub use routes::router;
pub use state::AppState;
pub use sync::{run_sync, SyncReport};
