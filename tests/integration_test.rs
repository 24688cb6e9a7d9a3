//! Integration tests for vpc-chain
//!
//! These tests drive whole create/delete chains against the in-memory network.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use vpc_chain::cloud::{CloudError, CloudNetwork, Filter, MemoryNetwork, PollConfig};
use vpc_chain::models::{Ipv4, PRIVATE, PUBLIC};
use vpc_chain::processing::find_overlapping_blocks;
use vpc_chain::vpc::ChainState;
use vpc_chain::{Error, Vpc, VpcOptions};

const ZONES: [&str; 3] = ["us-east-2a", "us-east-2b", "us-east-2c"];

fn options() -> VpcOptions {
    VpcOptions::default()
        .with_owner("integration")
        .with_poll(PollConfig::new(
            Duration::from_secs(2),
            Duration::from_millis(1),
        ))
}

fn cidr(s: &str) -> Ipv4 {
    Ipv4::new(s).expect("valid cidr")
}

fn network(lag: u32) -> Arc<MemoryNetwork> {
    Arc::new(MemoryNetwork::new("us-east-2").with_visibility_lag(lag))
}

fn new_vpc(net: &Arc<MemoryNetwork>, block: &str) -> Vpc {
    Vpc::create(net.clone(), "it", cidr(block), options()).expect("Failed to create vpc")
}

#[test]
fn test_chain_carves_blocks_in_address_order() {
    let net = network(0);
    let vpc = new_vpc(&net, "10.0.0.0/16");
    vpc.create_vpc_chain(&ZONES[..2])
        .expect("Failed to create chain");

    let subnets = vpc.subnets();
    let layout: Vec<(String, bool, String)> = subnets
        .iter()
        .map(|s| (s.zone.clone(), s.private, s.cidr.to_string()))
        .collect();
    assert_eq!(
        layout,
        vec![
            ("us-east-2a".to_string(), false, "10.0.0.0/24".to_string()),
            ("us-east-2a".to_string(), true, "10.0.1.0/24".to_string()),
            ("us-east-2b".to_string(), false, "10.0.2.0/24".to_string()),
            ("us-east-2b".to_string(), true, "10.0.3.0/24".to_string()),
        ]
    );
    assert_eq!(vpc.chain_state(), ChainState::Complete);
    assert_eq!(vpc.nat_gateway_ids().len(), 2);
}

#[test]
fn test_pairing_twice_returns_same_subnets() {
    let net = network(2);
    let vpc = new_vpc(&net, "10.0.0.0/16");
    vpc.create_vpc_chain::<&str>(&[])
        .expect("Failed to attach gateway");

    let first = vpc
        .prepare_pair_subnet_by_zone("us-east-2a")
        .expect("Failed first pairing");
    let reserved = vpc.pool().reserved_count();
    let second = vpc
        .prepare_pair_subnet_by_zone("us-east-2a")
        .expect("Failed second pairing");

    let keys: BTreeSet<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(keys, BTreeSet::from([PRIVATE, PUBLIC]));
    assert_eq!(first[PUBLIC].id, second[PUBLIC].id);
    assert_eq!(first[PRIVATE].id, second[PRIVATE].id);
    assert_eq!(vpc.pool().reserved_count(), reserved);
    assert_eq!(net.calls("create_subnet"), 2);
}

#[test]
fn test_pairing_without_gateway_is_dependency_missing() {
    let net = network(0);
    let vpc = new_vpc(&net, "10.0.0.0/16");
    match vpc.prepare_pair_subnet_by_zone("us-east-2a") {
        Err(Error::DependencyMissing { missing, .. }) => assert_eq!(missing, "internet gateway"),
        other => panic!("expected a missing gateway, got {other:?}"),
    }
    assert!(vpc.subnets().is_empty());
}

#[test]
fn test_failed_zone_does_not_stop_other_zones() {
    let net = network(0);
    let vpc = new_vpc(&net, "10.0.0.0/16");
    net.fail_next(
        "create_subnet",
        CloudError::api("UnauthorizedOperation", "not allowed"),
    );

    let err = vpc
        .create_vpc_chain(&ZONES[..2])
        .expect_err("first zone should fail");
    assert_eq!(
        err.cloud_error().and_then(|e| e.code()),
        Some("UnauthorizedOperation")
    );
    // nothing rolled back, the second zone went ahead
    let zones: BTreeSet<String> = vpc.subnets().into_iter().map(|s| s.zone).collect();
    assert_eq!(zones, BTreeSet::from(["us-east-2b".to_string()]));
    assert_ne!(vpc.chain_state(), ChainState::Complete);

    vpc.create_vpc_chain(&ZONES[..2])
        .expect("Retry should resume the chain");
    assert_eq!(vpc.subnets().len(), 4);
    assert_eq!(vpc.chain_state(), ChainState::Complete);
    assert_eq!(net.calls("create_internet_gateway"), 1);
}

#[test]
fn test_blocks_stay_disjoint_across_zones() {
    let net = network(1);
    let vpc = new_vpc(&net, "10.20.0.0/16");
    vpc.create_vpc_chain(&ZONES).expect("Failed to create chain");
    vpc.create_multi_zone_subnet(&ZONES[..1])
        .expect("Failed to add subnets");

    let subnets = vpc.subnets();
    assert_eq!(subnets.len(), 8);
    assert!(find_overlapping_blocks(&subnets).is_empty());
    for (i, a) in subnets.iter().enumerate() {
        for b in &subnets[i + 1..] {
            assert!(!a.cidr.overlaps(&b.cidr), "{a} overlaps {b}");
        }
        assert!(vpc.pool().is_reserved(&a.cidr));
    }
}

#[test]
fn test_concurrent_pairing_across_zones() {
    let net = network(1);
    let vpc = new_vpc(&net, "10.0.0.0/16");
    vpc.create_vpc_chain::<&str>(&[])
        .expect("Failed to attach gateway");

    let shared = &vpc;
    let pairs: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = ZONES
            .iter()
            .map(|zone| scope.spawn(move || shared.prepare_pair_subnet_by_zone(zone)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("pairing thread panicked"))
            .collect()
    });

    for pair in pairs {
        let pair = pair.expect("Failed to pair zone");
        assert_eq!(pair[PUBLIC].zone, pair[PRIVATE].zone);
    }
    let subnets = vpc.subnets();
    assert_eq!(subnets.len(), 6);
    assert!(find_overlapping_blocks(&subnets).is_empty());
    assert_eq!(net.calls("create_internet_gateway"), 1);
    assert_eq!(net.calls("create_nat_gateway"), 3);
    assert_eq!(vpc.pool().reserved_count(), 6);
}

#[test]
fn test_pool_exhaustion_is_reported() {
    let net = network(0);
    let vpc = new_vpc(&net, "10.30.0.0/22");
    vpc.create_vpc_chain(&ZONES[..2])
        .expect("four /24 blocks fit in a /22");
    match vpc.create_subnet("us-east-2c") {
        Err(Error::PoolExhausted {
            parent,
            child_prefix,
        }) => {
            assert_eq!(parent, cidr("10.30.0.0/22"));
            assert_eq!(child_prefix, 24);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn test_create_times_out_when_never_visible() {
    let net = network(1_000_000);
    let fast = VpcOptions::default().with_poll(PollConfig::new(
        Duration::from_millis(20),
        Duration::from_millis(1),
    ));
    match Vpc::create(net.clone(), "slow", cidr("10.0.0.0/16"), fast) {
        Err(Error::Timeout { timeout, .. }) => assert_eq!(timeout, Duration::from_millis(20)),
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[test]
fn test_import_resumes_where_chain_stopped() {
    let net = network(1);
    let vpc = new_vpc(&net, "10.0.0.0/16");
    vpc.create_vpc_chain(&ZONES[..2])
        .expect("Failed to create chain");

    let imported = Vpc::import(net.clone(), vpc.id(), options()).expect("Failed to import");
    assert_eq!(imported.name(), "it");
    assert_eq!(imported.subnets(), vpc.subnets());
    assert_eq!(imported.pool().reserved_count(), 4);
    assert_eq!(imported.nat_gateway_ids(), vpc.nat_gateway_ids());
    assert_eq!(imported.chain_state(), ChainState::NatReady);

    imported
        .create_vpc_chain(&ZONES[..2])
        .expect("Chain should be a no-op");
    assert_eq!(net.calls("create_subnet"), 4);
    assert_eq!(net.calls("create_route_table"), 3);

    let by_subnet = Vpc::import_by_subnet(net.clone(), &vpc.all_private_subnet_ids()[0], options())
        .expect("Failed to import by subnet");
    assert_eq!(by_subnet.id(), vpc.id());
}

#[test]
fn test_delete_chain_leaves_nothing_behind() {
    let net = network(2);
    let vpc = new_vpc(&net, "10.0.0.0/16");
    vpc.create_vpc_chain(&ZONES[..2])
        .expect("Failed to create chain");
    let bastion = vpc
        .prepare_bastion_proxy("us-east-2a", "10.0.0.0/16")
        .expect("Failed to launch bastion");
    assert!(bastion.public_ip.is_some());
    vpc.create_additional_security_groups(2, "", "")
        .expect("Failed to add groups");
    // the cloud is slow to notice a subnet is free
    net.fail_next("delete_subnet", CloudError::api("DependencyViolation", "in use"));

    vpc.delete_vpc_chain(true).expect("Failed to delete chain");

    let vpc_filter = [Filter::vpc(vpc.id())];
    assert!(net.list_subnets(&vpc_filter).unwrap().is_empty());
    assert!(net.list_route_tables(&vpc_filter).unwrap().is_empty());
    assert!(net.list_security_groups(&vpc_filter).unwrap().is_empty());
    assert!(net.list_internet_gateways(vpc.id()).unwrap().is_empty());
    assert!(net
        .list_nat_gateways(vpc.id())
        .unwrap()
        .iter()
        .all(|n| !n.state.is_live()));
    assert!(net
        .list_instances(&vpc_filter)
        .unwrap()
        .iter()
        .all(|i| i.is_terminated()));
    assert!(net.list_addresses(&[]).unwrap().is_empty());
    assert!(net.list_key_pairs(&[]).unwrap().is_empty());
    assert!(!net.resource_exists(vpc.id()).unwrap());
    assert_eq!(vpc.pool().reserved_count(), 0);
    assert_eq!(vpc.chain_state(), ChainState::Init);

    vpc.delete_vpc_chain(true)
        .expect("Deleting twice should succeed");
}
