//! Overlapping subnet block detection.
//!
//! Subnets discovered in an existing VPC were not necessarily carved by
//! this pool; overlaps among them are reported rather than rejected.

use crate::models::{Ipv4, Subnet};
use itertools::Itertools;

/// Two subnets whose blocks share addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapConflict {
    pub first: (String, Ipv4),
    pub second: (String, Ipv4),
}

/// Find every pair of overlapping subnet blocks.
///
/// # Returns
/// Conflicts sorted by the lower block of each pair.
pub fn find_overlapping_blocks(subnets: &[Subnet]) -> Vec<OverlapConflict> {
    let sorted = subnets
        .iter()
        .sorted_by_key(|s| (s.cidr.lo(), s.cidr.mask))
        .collect_vec();

    let mut conflicts = Vec::new();
    for (i, a) in sorted.iter().enumerate() {
        // sorted by start address, so stop at the first block past a's end
        for b in sorted[i + 1..]
            .iter()
            .take_while(|b| b.cidr.lo() <= a.cidr.hi())
        {
            conflicts.push(OverlapConflict {
                first: (a.id.clone(), a.cidr),
                second: (b.id.clone(), b.cidr),
            });
        }
    }
    conflicts
}

/// Log overlapping subnet blocks as warnings.
pub fn log_overlapping_blocks(conflicts: &[OverlapConflict]) {
    if conflicts.is_empty() {
        log::debug!("No overlapping subnet blocks found.");
        return;
    }

    log::warn!("Found {} overlapping subnet block(s):", conflicts.len());
    for conflict in conflicts {
        log::warn!(
            "  {} [{}] overlaps {} [{}]",
            conflict.first.0,
            conflict.first.1,
            conflict.second.0,
            conflict.second.1
        );
    }
}
