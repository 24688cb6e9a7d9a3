//! Output formatting for VPC subnets.
//!
//! - [`csv`] - aligned CSV rows
//! - [`json`] - JSON snapshot of a VPC
//! - [`terminal`] - field and line helpers

mod csv;
mod json;
mod terminal;

pub use csv::{print_subnets_csv, subnet_rows};
pub use json::{print_subnets_json, VpcSummary};
pub use terminal::{format_field, zone_line};
