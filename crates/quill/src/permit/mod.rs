//! Admission pool bounding concurrent calls to the generation provider.
//!
//! The pool is a counting semaphore with a strict FIFO wait queue:
//! - at most `capacity` [`Permit`]s are outstanding at any time
//! - callers arriving while the pool is saturated queue in arrival order
//! - every released permit is handed directly to the longest-waiting caller
//!
//! Permits are RAII tokens. Dropping one releases it, so a permit cannot be
//! released twice and is returned on every exit path of the protected section.
//! Dropping a pending acquisition withdraws the waiter from the queue.

mod pool;
mod waiter;

pub use pool::{AcquireError, AdmissionPool, Permit, PoolSnapshot, ReleaseError};
