// Execution Queue Core
//
// Shared types for the execution backbone: the queued unit of work
// (ExecutionMessage), the execution record owned by the workflow store,
// and the two collaborator seams the worker depends on.
//
// Key design decisions:
// - Messages are validated before they ever reach a transport
// - Unknown wire fields are ignored on read for forward compatibility
// - Repository and executor are traits; storage and engine live elsewhere
// - Executor errors are opaque; only the worker reclassifies capacity conflicts

pub mod error;
pub mod execution;
pub mod message;
pub mod telemetry;
pub mod traits;

pub use error::{ExecutorError, MessageError, RepositoryError};
pub use execution::{Execution, ExecutionStatus};
pub use message::{ExecutionMessage, MessageAttributes};
pub use traits::{ExecutionRepository, Executor};
