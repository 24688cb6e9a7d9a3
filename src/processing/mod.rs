//! Address allocation logic.
//!
//! - [`pool`] - Carving fixed-size blocks from a VPC range
//! - [`overlap`] - Detecting overlapping subnet blocks

mod overlap;
mod pool;

// Re-export public types
pub use overlap::{find_overlapping_blocks, log_overlapping_blocks, OverlapConflict};
pub use pool::{AddressPool, CidrBlock};
