//! In-memory window cache for one table view.
//!
//! This module provides the `WindowedCache` holding the rows a view has
//! fetched so far, keyed by absolute row position, plus the authoritative
//! `total` reported by the most recent response. The cache lives and dies
//! with its view; nothing is written to disk.

pub mod window;

pub use window::WindowedCache;
