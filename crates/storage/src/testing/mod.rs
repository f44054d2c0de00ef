//! Testing utilities for the memory backend
//!
//! - **Operation journal**: ordered record of context and transaction activity
//! - **Fault plan**: injects create, save, release and transaction failures
//!
//! # Example
//!
//! ```ignore
//! use unitwork_storage::testing::{FaultPlan, OperationJournal};
//!
//! let backend = MemoryBackend::new();
//! backend.faults().fail_save("OrdersContext", BackendError::failed("disk full"));
//! // ... run a unit of work ...
//! assert_eq!(backend.journal().commit_attempts(), 0);
//! ```

mod faults;
mod journal;

pub use faults::FaultPlan;
pub use journal::{Operation, OperationJournal};
