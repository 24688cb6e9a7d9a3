//! CSV output formatting for VPC subnets.

use crate::models::{num_usable_hosts, Subnet};
use crate::vpc::Vpc;
use colored::Colorize;

use super::terminal::format_field;

const HEADER: &str = r#"   "cnt",          "zone",     "type",       "subnet_cidr",       "hosts",                     "subnet_id",           "route_table_id",                      "name""#;

/// Print the subnets of `vpc` as aligned CSV to stdout.
pub fn print_subnets_csv(vpc: &Vpc) {
    let subnets = vpc.subnets();
    log::info!(
        "#Start print_subnets_csv() {} with {} subnet(s)",
        vpc.id(),
        subnets.len()
    );
    println!("{HEADER}");
    for row in subnet_rows(&subnets) {
        println!("{row}");
    }
    let free = vpc.pool().capacity() as usize - vpc.pool().reserved_count();
    println!(
        "#{}# {} [{}] chain={} free /{} blocks: {free}",
        "NOTE".on_red(),
        vpc.id(),
        vpc.cidr(),
        vpc.chain_state(),
        vpc.pool().child_prefix()
    );
}

/// One CSV row per subnet, in the given order.
pub fn subnet_rows(subnets: &[Subnet]) -> Vec<String> {
    subnets
        .iter()
        .enumerate()
        .map(|(i, s)| csv_row(i + 1, s))
        .collect()
}

fn csv_row(cnt: usize, subnet: &Subnet) -> String {
    let hosts = num_usable_hosts(subnet.cidr.mask).unwrap_or_default();
    format!(
        "{cnt},{zone},{visibility},{cidr},{hosts},{id},{route_table},{name}",
        cnt = format_field(cnt, 8),
        zone = format_field(&subnet.zone, 16),
        visibility = format_field(subnet.visibility(), 10),
        cidr = format_field(subnet.cidr, 19),
        hosts = format_field(format!("{hosts}_hosts"), 13),
        id = format_field(&subnet.id, 31),
        route_table = format_field(subnet.route_table_id.as_deref().unwrap_or("-"), 26),
        name = format_field(&subnet.name, 26),
    )
}
