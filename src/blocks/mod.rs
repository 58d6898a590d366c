//! Hot/cold block layer.
//!
//! - [`address`]: BlockAddress, the content-derived block key
//! - [`codec`]: magic-byte detection and codec dispatch
//! - [`block`]: immutable Block values and verification
//! - [`classifier`]: concurrent cold/hot access counters
//! - [`promotion`]: promotion queue, migrator and worker pool
//! - [`materializer`]: the read path tying the pieces together
//! - [`service`]: wiring for a running layer

pub mod address;
pub mod block;
pub mod classifier;
pub mod codec;
pub mod locks;
pub mod materializer;
pub mod promotion;
pub mod service;

pub use address::BlockAddress;
pub use block::{Block, BlockError};
pub use codec::Algorithm;
