//! Request recycling.
//!
//! Requests are checked out through `Coordinator::create_request` and come
//! back here when their `PooledRequest` guard is disposed or dropped.

mod bags;
mod guard;

pub(crate) use bags::acquire;
pub use bags::RequestPool;
pub use guard::PooledRequest;
