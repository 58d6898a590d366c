//! hcd-blocks: transparent hot/cold compression for content-addressed blocks.
//!
//! Blocks live in a backing store either compressed (cold) or raw (hot). The
//! read path detects the stored algorithm from its magic bytes, decodes, and
//! counts the access; blocks read often enough while cold are promoted to a
//! raw representation by background workers, and quiet hot blocks are
//! demoted again.

pub mod blocks;
pub mod config;
pub mod metrics;
pub mod server;
pub mod store;
