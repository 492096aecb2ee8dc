//! Network and exclusion service: CIDR normalization, the network-size
//! ceiling, exclusion-aware target generation, and config seeding.
//!
//! Enumeration relies on `ipnet::IpNet::hosts()`, which already strips
//! network/broadcast addresses for prefixes shorter than /31 (/127) and
//! includes every address for /31, /32, /127, and /128.

use std::net::IpAddr;

use ipnet::IpNet;
use uuid::Uuid;

use scanorama_core::config::DiscoveryConfig;
use scanorama_store::{SeedNetwork, SeedReport, Store};

use crate::error::{EngineError, Result};

/// Normalize a CIDR or bare address to canonical `addr/prefix` form.
///
/// A single IPv4 address becomes `ip/32`, a single IPv6 address `ip/128`;
/// a valid CIDR is preserved. Idempotent on valid input.
pub fn normalize_cidr(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if let Ok(net) = trimmed.parse::<IpNet>() {
        return Ok(net.to_string());
    }
    if let Ok(addr) = trimmed.parse::<IpAddr>() {
        let prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        return Ok(format!("{addr}/{prefix}"));
    }
    Err(EngineError::TargetInvalid(trimmed.to_string()))
}

/// Parse a stored CIDR, which normalization has already validated.
pub fn parse_cidr(cidr: &str) -> Result<IpNet> {
    cidr.parse()
        .map_err(|_| EngineError::TargetInvalid(cidr.to_string()))
}

/// Reject networks wider than the configured ceiling before any enumeration
/// happens.
pub fn check_network_size(net: &IpNet, config: &DiscoveryConfig) -> Result<()> {
    let min = match net {
        IpNet::V4(_) => config.min_prefix_v4,
        IpNet::V6(_) => config.min_prefix_v6,
    };
    if net.prefix_len() < min {
        return Err(EngineError::NetworkTooLarge {
            prefix: net.prefix_len(),
            min,
        });
    }
    Ok(())
}

/// Enumerate host addresses of `net` in address order, dropping any address
/// matched by an exclusion, capped at `max_hosts`.
pub fn filter_targets(net: IpNet, exclusions: &[IpNet], max_hosts: usize) -> Vec<IpAddr> {
    net.hosts()
        .filter(|addr| !exclusions.iter().any(|excl| excl.contains(addr)))
        .take(max_hosts)
        .collect()
}

/// Generate the exclusion-filtered target list for a stored network.
///
/// Applies the network's own enabled exclusions plus all global ones.
/// Exclusion rows that no longer parse are logged and skipped rather than
/// blocking the run.
pub async fn generate_for_network(
    store: &Store,
    network_id: Uuid,
    config: &DiscoveryConfig,
) -> Result<Vec<IpAddr>> {
    let network = store.get_network(network_id).await?;
    let net = parse_cidr(&network.cidr)?;
    check_network_size(&net, config)?;

    let mut exclusions = Vec::new();
    for row in store.applicable_exclusions(network_id).await? {
        match row.excluded_cidr.parse::<IpNet>() {
            Ok(excl) => exclusions.push(excl),
            Err(_) => {
                tracing::warn!(
                    exclusion_id = %row.id,
                    cidr = %row.excluded_cidr,
                    "Skipping unparseable exclusion"
                );
            }
        }
    }

    let targets = filter_targets(net, &exclusions, config.max_hosts);
    tracing::debug!(
        network = %network.name,
        cidr = %network.cidr,
        exclusions = exclusions.len(),
        targets = targets.len(),
        "Generated target list"
    );
    Ok(targets)
}

/// Seed networks and exclusions from configuration.
///
/// Network CIDRs must be valid; an invalid one aborts the whole pass with
/// `InvalidConfig` before anything is written. Invalid exclusion entries are
/// logged and dropped. The store applies the result in one transaction.
pub async fn seed_from_config(store: &Store, config: &DiscoveryConfig) -> Result<SeedReport> {
    let mut seeds = Vec::with_capacity(config.networks.len());
    for net in &config.networks {
        if net.name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "network with cidr {} has an empty name",
                net.cidr
            )));
        }
        let cidr = normalize_cidr(&net.cidr).map_err(|_| {
            EngineError::InvalidConfig(format!(
                "network {}: invalid cidr {:?}",
                net.name, net.cidr
            ))
        })?;

        let mut exclusions = Vec::new();
        for raw in &net.exclusions {
            match normalize_cidr(raw) {
                Ok(c) => exclusions.push(c),
                Err(_) => {
                    tracing::warn!(network = %net.name, cidr = %raw, "Skipping invalid exclusion");
                }
            }
        }

        seeds.push(SeedNetwork {
            name: net.name.clone(),
            cidr,
            description: net.description.clone(),
            method: net.method,
            enabled: net.enabled,
            exclusions,
        });
    }

    let mut globals = Vec::new();
    for raw in &config.global_exclusions {
        match normalize_cidr(raw) {
            Ok(c) => globals.push(c),
            Err(_) => {
                tracing::warn!(cidr = %raw, "Skipping invalid global exclusion");
            }
        }
    }

    Ok(store.seed_from_config(&seeds, &globals).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn normalize_bare_addresses() {
        assert_eq!(normalize_cidr("10.0.0.1").unwrap(), "10.0.0.1/32");
        assert_eq!(normalize_cidr("fd00::1").unwrap(), "fd00::1/128");
        assert_eq!(normalize_cidr(" 10.0.0.0/24 ").unwrap(), "10.0.0.0/24");
    }

    #[test]
    fn normalize_is_idempotent() {
        for input in ["10.0.0.1", "10.0.0.0/24", "fd00::/64", "fd00::1"] {
            let once = normalize_cidr(input).unwrap();
            let twice = normalize_cidr(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalize_rejects_garbage() {
        for input in ["", "not-a-cidr", "10.0.0.0/33", "300.1.1.1", "10.0.0.0/"] {
            assert!(normalize_cidr(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn ceiling_rejects_wide_networks() {
        let config = DiscoveryConfig::default();
        assert!(matches!(
            check_network_size(&net("10.0.0.0/8"), &config),
            Err(EngineError::NetworkTooLarge { prefix: 8, min: 16 })
        ));
        assert!(check_network_size(&net("10.0.0.0/16"), &config).is_ok());
        assert!(check_network_size(&net("10.0.0.0/30"), &config).is_ok());

        assert!(check_network_size(&net("fd00::/64"), &config).is_err());
        assert!(check_network_size(&net("fd00::/112"), &config).is_ok());
    }

    #[test]
    fn slash_31_and_32_enumerate_all_addresses() {
        assert_eq!(
            filter_targets(net("10.0.0.0/31"), &[], 100),
            vec!["10.0.0.0".parse::<IpAddr>().unwrap(), "10.0.0.1".parse().unwrap()]
        );
        assert_eq!(
            filter_targets(net("10.0.0.7/32"), &[], 100),
            vec!["10.0.0.7".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn wider_masks_strip_network_and_broadcast() {
        let targets = filter_targets(net("10.0.0.0/30"), &[], 100);
        assert_eq!(
            targets,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse().unwrap()
            ]
        );

        let targets = filter_targets(net("192.168.1.0/24"), &[], 10_000);
        assert_eq!(targets.len(), 254);
        assert!(!targets.contains(&"192.168.1.0".parse().unwrap()));
        assert!(!targets.contains(&"192.168.1.255".parse().unwrap()));
    }

    #[test]
    fn exclusions_remove_both_usable_hosts() {
        // corp-lan 10.0.0.0/30 with a network exclusion on .1 and a global
        // exclusion on .2 leaves nothing to probe.
        let exclusions = vec![net("10.0.0.1/32"), net("10.0.0.2/32")];
        assert!(filter_targets(net("10.0.0.0/30"), &exclusions, 10).is_empty());
    }

    #[test]
    fn exclusion_ranges_apply() {
        let exclusions = vec![net("192.168.1.0/28")];
        let targets = filter_targets(net("192.168.1.0/24"), &exclusions, 10_000);
        assert_eq!(targets.len(), 254 - 14);
        assert!(!targets.contains(&"192.168.1.14".parse().unwrap()));
        assert!(targets.contains(&"192.168.1.16".parse().unwrap()));
    }

    #[test]
    fn max_hosts_caps_generation_in_address_order() {
        let targets = filter_targets(net("10.1.0.0/16"), &[], 100);
        assert_eq!(targets.len(), 100);
        assert_eq!(targets[0], "10.1.0.1".parse::<IpAddr>().unwrap());
        // Distinct and ascending.
        let mut sorted = targets.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, targets);
    }
}
