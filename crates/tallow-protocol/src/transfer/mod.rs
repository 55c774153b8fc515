//! Transfer lifecycle: state machine, bitmap, resume, delta sync

pub mod bitmap;
pub mod delta;
pub mod resume;
pub mod state;

pub use bitmap::ChunkBitmap;
pub use delta::{BlockSignature, DeltaConfig};
pub use resume::{ResumeOutcome, RetryPolicy};
pub use state::{Status, TransferId, TransferRecord};
