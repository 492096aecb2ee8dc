//! Nmap XML output deserialization.
//!
//! Nmap's `-oX -` flag writes structured XML to stdout. This module holds
//! the typed structs that deserialize from that XML via `quick-xml` with
//! serde, trimmed to the fields Scanorama persists.

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
    pub runstats: Option<RunStats>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub ports: Option<Ports>,
    pub os: Option<OsMatches>,
    pub times: Option<Times>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<NmapPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapPort {
    #[serde(rename = "@protocol")]
    pub protocol: String,
    #[serde(rename = "@portid")]
    pub port_id: u16,
    pub state: PortState,
    pub service: Option<NmapService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapService {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatches {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy")]
    pub accuracy: Option<String>,
}

/// Round-trip timing in microseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct Times {
    #[serde(rename = "@srtt")]
    pub srtt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStats {
    pub hosts: Option<RunStatsHosts>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatsHosts {
    #[serde(rename = "@up")]
    pub up: Option<String>,
    #[serde(rename = "@down")]
    pub down: Option<String>,
    #[serde(rename = "@total")]
    pub total: Option<String>,
}

impl NmapHost {
    /// Extract the IP address (v4 preferred, v6 fallback), if present.
    pub fn ip(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "ipv4")
            .or_else(|| self.addresses.iter().find(|a| a.addr_type == "ipv6"))
            .map(|a| a.addr.as_str())
    }

    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    pub fn is_down(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "down")
    }

    /// Best OS match name (nmap orders by accuracy).
    pub fn os_name(&self) -> Option<&str> {
        self.os
            .as_ref()
            .and_then(|os| os.matches.first())
            .map(|m| m.name.as_str())
    }

    /// Smoothed round-trip time, when nmap reported one.
    pub fn rtt_micros(&self) -> Option<u64> {
        self.times
            .as_ref()
            .and_then(|t| t.srtt.as_deref())
            .and_then(|s| s.parse().ok())
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| EngineError::XmlParse(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_SWEEP_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn -PE 192.168.1.0/24">
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <times srtt="1250" rttvar="300" to="100000"/>
  </host>
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="192.168.1.10" addrtype="ipv4"/>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="192.168.1.99" addrtype="ipv4"/>
  </host>
  <runstats>
    <finished time="1753900000" elapsed="2.50"/>
    <hosts up="2" down="1" total="3"/>
  </runstats>
</nmaprun>"#;

    const PORT_SCAN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sV -p 22,80,443,3306 192.168.1.1">
  <host>
    <status state="up" reason="syn-ack"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="9.6"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack"/>
        <service name="http" product="nginx" version="1.24.0"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="closed" reason="reset"/>
      </port>
      <port protocol="tcp" portid="3306">
        <state state="filtered" reason="no-response"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 5.15" accuracy="95"/>
      <osmatch name="Linux 6.1" accuracy="90"/>
    </os>
  </host>
  <runstats>
    <hosts up="1" down="0" total="1"/>
  </runstats>
</nmaprun>"#;

    #[test]
    fn parse_ping_sweep() {
        let run = parse_nmap_xml(PING_SWEEP_XML.as_bytes()).unwrap();
        assert_eq!(run.hosts.len(), 3);
        assert_eq!(run.hosts.iter().filter(|h| h.is_up()).count(), 2);
        assert_eq!(run.hosts.iter().filter(|h| h.is_down()).count(), 1);

        let gateway = &run.hosts[0];
        assert_eq!(gateway.ip(), Some("192.168.1.1"));
        assert_eq!(gateway.rtt_micros(), Some(1250));

        let stats = run.runstats.unwrap().hosts.unwrap();
        assert_eq!(stats.up.as_deref(), Some("2"));
        assert_eq!(stats.total.as_deref(), Some("3"));
    }

    #[test]
    fn parse_port_scan() {
        let run = parse_nmap_xml(PORT_SCAN_XML.as_bytes()).unwrap();
        let host = &run.hosts[0];
        assert!(host.is_up());
        assert_eq!(host.os_name(), Some("Linux 5.15"));

        let ports = host.ports.as_ref().unwrap();
        assert_eq!(ports.ports.len(), 4);

        let ssh = &ports.ports[0];
        assert_eq!(ssh.port_id, 22);
        assert_eq!(ssh.protocol, "tcp");
        assert_eq!(ssh.state.state, "open");
        let svc = ssh.service.as_ref().unwrap();
        assert_eq!(svc.name, "ssh");
        assert_eq!(svc.product.as_deref(), Some("OpenSSH"));

        let filtered = &ports.ports[3];
        assert_eq!(filtered.state.state, "filtered");
        assert!(filtered.service.is_none());
    }

    #[test]
    fn parse_empty_sweep() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn 10.9.9.0/30">
  <runstats>
    <hosts up="0" down="2" total="2"/>
  </runstats>
</nmaprun>"#;
        let run = parse_nmap_xml(xml.as_bytes()).unwrap();
        assert!(run.hosts.is_empty());
    }

    #[test]
    fn host_without_address_yields_none() {
        let host = NmapHost {
            status: Some(HostStatus {
                state: "up".to_string(),
                reason: None,
            }),
            addresses: vec![Address {
                addr: "AA:BB:CC:DD:EE:01".to_string(),
                addr_type: "mac".to_string(),
            }],
            ports: None,
            os: None,
            times: None,
        };
        assert_eq!(host.ip(), None);
        assert!(host.is_up());
    }

    #[test]
    fn ipv6_address_fallback() {
        let host = NmapHost {
            status: Some(HostStatus {
                state: "up".to_string(),
                reason: None,
            }),
            addresses: vec![Address {
                addr: "fd00::1".to_string(),
                addr_type: "ipv6".to_string(),
            }],
            ports: None,
            os: None,
            times: None,
        };
        assert_eq!(host.ip(), Some("fd00::1"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_nmap_xml(b"not xml at all").is_err());
    }
}
