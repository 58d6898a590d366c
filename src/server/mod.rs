//! HTTP server exposing stored blocks.
//!
//! - [`gateway`]: raw-block routes, stats and metrics

pub mod gateway;
