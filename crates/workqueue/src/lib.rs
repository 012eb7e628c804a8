//! Work Queue
//!
//! A thread-safe, deduplicating, delay-capable queue of object keys that
//! drives a controller's reconcile loop.
//!
//! # Example
//!
//! ```no_run
//! use workqueue::WorkQueue;
//!
//! # async fn example() {
//! let queue: WorkQueue<String> = WorkQueue::new("secrets");
//! queue.add("default/web-tls".to_string());
//!
//! while let Some(key) = queue.get().await {
//!     // reconcile `key` ...
//!     queue.forget(&key);
//!     queue.done(&key);
//! }
//! # }
//! ```

pub mod queue;
pub mod rate_limiter;

pub use queue::WorkQueue;
pub use rate_limiter::{ExponentialBackoff, ItemRateLimiter};
