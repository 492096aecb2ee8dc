//! Integration tests for scanorama-store against a live Postgres instance.
//!
//! These tests require a reachable database (e.g. `docker compose up`).
//! Run with: cargo test --package scanorama-store --test integration -- --ignored
//!
//! Skipped automatically if Postgres is not available.

use chrono::Utc;
use scanorama_core::config::DatabaseConfig;
use scanorama_core::types::{DiscoveryMethod, HostStatus, PortState, Protocol, TargetSelector};
use scanorama_store::{HostFilter, SeedNetwork, Store, StoreError};

async fn connect_or_skip() -> Option<Store> {
    let config = DatabaseConfig::default();
    match Store::connect(&config).await {
        Ok(store) => {
            store.migrate().await.ok()?;
            Some(store)
        }
        Err(e) => {
            eprintln!("Skipping integration test (Postgres not available): {e}");
            None
        }
    }
}

fn seed_network(name: &str, cidr: &str, exclusions: &[&str]) -> SeedNetwork {
    SeedNetwork {
        name: name.to_string(),
        cidr: cidr.to_string(),
        description: Some("integration fixture".to_string()),
        method: DiscoveryMethod::Ping,
        enabled: true,
        exclusions: exclusions.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
#[ignore = "requires live Postgres — run with: cargo test --package scanorama-store --test integration -- --ignored"]
async fn seed_is_idempotent() {
    let Some(store) = connect_or_skip().await else {
        return;
    };
    let _ = store.delete_network("it-seed").await;

    let networks = vec![seed_network("it-seed", "10.99.0.0/24", &["10.99.0.1/32"])];
    let globals = vec!["192.0.2.0/24".to_string()];

    let first = store.seed_from_config(&networks, &globals).await.unwrap();
    assert_eq!(first.networks_upserted, 1);
    assert_eq!(first.network_exclusions, 1);

    let second = store.seed_from_config(&networks, &globals).await.unwrap();
    assert_eq!(second.networks_upserted, 1);

    let net = store.get_network_by_name("it-seed").await.unwrap();
    assert_eq!(net.cidr, "10.99.0.0/24");

    // Wholesale replacement: still exactly one per-network exclusion.
    let exclusions = store.list_exclusions(Some(net.id)).await.unwrap();
    assert_eq!(exclusions.len(), 1);
    assert_eq!(exclusions[0].excluded_cidr, "10.99.0.1/32");

    store.delete_network("it-seed").await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Postgres"]
async fn host_upsert_preserves_first_seen() {
    let Some(store) = connect_or_skip().await else {
        return;
    };

    let t0 = Utc::now() - chrono::Duration::hours(1);
    let first = store
        .upsert_host("10.99.1.7", HostStatus::Up, DiscoveryMethod::Ping, None, None, t0)
        .await
        .unwrap();

    store.set_ignore_scanning("10.99.1.7", true).await.unwrap();

    let t1 = Utc::now();
    let second = store
        .upsert_host(
            "10.99.1.7",
            HostStatus::Up,
            DiscoveryMethod::Tcp,
            Some("linux"),
            Some("Linux 6.1"),
            t1,
        )
        .await
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.first_seen, first.first_seen);
    assert!(second.last_seen > first.last_seen);
    assert_eq!(second.discovery_method, DiscoveryMethod::Tcp);
    assert_eq!(second.os_family.as_deref(), Some("linux"));
    // ignore_scanning survives the upsert.
    assert!(second.ignore_scanning);

    let visible = store
        .list_hosts(&HostFilter {
            show_ignored: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(visible.iter().any(|h| h.ip_address == "10.99.1.7"));

    let live = store.live_hosts(None).await.unwrap();
    assert!(!live.iter().any(|h| h.ip_address == "10.99.1.7"));
}

#[tokio::test]
#[ignore = "requires live Postgres"]
async fn scan_job_round_trip_with_observations() {
    let Some(store) = connect_or_skip().await else {
        return;
    };

    let selector = TargetSelector::Explicit {
        targets: vec!["10.99.2.1".to_string()],
    };
    let job = store
        .create_scan_job(&selector, scanorama_core::types::ScanType::Version, None, "22,80")
        .await
        .unwrap();
    store.mark_scan_running(job.id).await.unwrap();

    let host = store
        .upsert_host("10.99.2.1", HostStatus::Up, DiscoveryMethod::Tcp, None, None, Utc::now())
        .await
        .unwrap();

    let observations = vec![
        (22u16, Protocol::Tcp, PortState::Open, Some("ssh".to_string()), Some("OpenSSH 9.6".to_string())),
        (80u16, Protocol::Tcp, PortState::Closed, None, None),
    ];
    let inserted = store
        .insert_port_observations(host.id, Some(job.id), &observations, Utc::now())
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    store.complete_scan_job(job.id).await.unwrap();

    let stored = store.get_scan_job(job.id).await.unwrap();
    assert_eq!(stored.target_selector, selector);
    assert_eq!(stored.status, scanorama_core::types::JobStatus::Completed);

    let ports = store.observations_for_host(host.id, 10).await.unwrap();
    assert!(ports.iter().any(|p| p.port == 22 && p.state == PortState::Open));
}

#[tokio::test]
#[ignore = "requires live Postgres"]
async fn api_key_lifecycle() {
    let Some(store) = connect_or_skip().await else {
        return;
    };

    let issued = store
        .create_api_key("integration-cli", None, Some("integration fixture"))
        .await
        .unwrap();
    assert!(issued.key.starts_with("sk_"));

    // Listed metadata carries the prefix, never the clear key.
    let listed = store.list_api_keys(false, false).await.unwrap();
    let row = listed
        .iter()
        .find(|k| k.id == issued.metadata.id)
        .expect("created key listed");
    assert_eq!(row.key_prefix, issued.metadata.key_prefix);

    let authed = store.authenticate_api_key(&issued.key).await.unwrap();
    assert_eq!(authed.id, issued.metadata.id);
    assert!(authed.last_used_at.is_none() || authed.last_used_at.is_some());

    store.revoke_api_key(issued.metadata.id).await.unwrap();
    match store.authenticate_api_key(&issued.key).await {
        Err(StoreError::Forbidden) => {}
        other => panic!("expected Forbidden after revocation, got {other:?}"),
    }

    // A made-up key with a plausible prefix is Unauthorized, not Forbidden.
    match store.authenticate_api_key("sk_doesnotexist0000000000").await {
        Err(StoreError::Unauthorized) => {}
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}
