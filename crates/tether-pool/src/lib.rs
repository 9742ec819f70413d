//! # tether-pool
//!
//! Lease-based connection pool with lifecycle management.
//!
//! The pool owns a table of physical connections and hands out exclusive
//! [`Lease`]s. A lease is the only way to reach a pooled connection; while
//! it is held no other caller can observe the connection. Dropping the
//! lease checks the connection back in, or discards it when it was marked
//! broken, has outlived its lifetime, or carries session state that cannot
//! be reset.
//!
//! ## Features
//!
//! - Max-open back-pressure with a bounded acquisition wait
//! - Max-idle retention, idle eviction and max-lifetime expiry
//! - Optional health check on checkout
//! - State reset before a dirty connection is reused
//! - Background reaper holding only a weak pool reference
//! - Status snapshot and cumulative metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_pool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! let pool = Pool::builder(manager)
//!     .max_open(5)
//!     .max_idle(5)
//!     .max_lifetime(Duration::from_secs(3600))
//!     .connection_timeout(Duration::from_secs(30))
//!     .build()
//!     .await?;
//!
//! let mut lease = pool.get().await?;
//! // Use connection through the lease...
//! lease.mark_dirty();
//! drop(lease); // checked back in
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Lease, Pool, PoolBuilder, PoolMetrics, PoolStatus};

// Lifecycle management
pub use lifecycle::{ConnectionLifecycle, ConnectionMetadata, HealthCheckResult};
