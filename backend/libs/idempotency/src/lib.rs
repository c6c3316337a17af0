//! # Idempotency Barrier
//!
//! At-most-once admission gate for externally submitted authorization
//! requests. A client retrying a `POST /authorize` with the same
//! `Idempotency-Key` header receives the stored response verbatim instead of
//! triggering a second saga start.
//!
//! The barrier is a user-facing consistency veneer, not a correctness
//! boundary: two concurrent first requests with the same unused key may both
//! reach the handler, and the duplicate publication is absorbed downstream by
//! the participants' upsert-by-TransactionId discipline. The store write is
//! therefore a conditional put where the backend supports it, and
//! last-writer-wins is acceptable where it does not.
//!
//! Components:
//! - [`KeyStore`]: lookup / conditional-put seam over the backing store
//! - [`DynamoKeyStore`]: DynamoDB backend with native TTL expiry
//! - [`MemoryKeyStore`]: in-process backend for tests and local runs
//! - [`IdempotencyBarrier`]: actix middleware replaying cached responses and
//!   capturing live ones

mod error;
mod middleware;
mod store;

pub use error::{IdempotencyError, IdempotencyResult};
pub use middleware::{IdempotencyBarrier, IDEMPOTENCY_KEY_HEADER};
pub use store::{CachedResponse, DynamoKeyStore, KeyStore, MemoryKeyStore, DEFAULT_TTL};
