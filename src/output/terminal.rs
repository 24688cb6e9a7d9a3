//! Terminal formatting helpers.

use crate::models::Subnet;
use colored::Colorize;

/// Quote `value` and right-align it to at least `width` characters.
pub fn format_field<T: ToString>(value: T, width: usize) -> String {
    format!("{:>width$}", format!("\"{}\"", value.to_string()))
}

/// `ZONE <zone> <PUBLIC|PRIVATE> SUBNET: <id> [<cidr>]`, visibility colored.
pub fn zone_line(subnet: &Subnet) -> String {
    let visibility = subnet.visibility().to_uppercase();
    let visibility = if subnet.private {
        visibility.yellow()
    } else {
        visibility.green()
    };
    format!(
        "ZONE {} {visibility} SUBNET: {} [{}]",
        subnet.zone, subnet.id, subnet.cidr
    )
}
