// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `HOST_INFO` document.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Transport the host receives OSC on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OscTransport {
    #[default]
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "TCP")]
    Tcp,
}

/// Optional OSCQuery capabilities advertised by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostExtensions {
    #[serde(rename = "ACCESS", default)]
    pub access: bool,
    #[serde(rename = "CLIP_MODE", default)]
    pub clip_mode: bool,
    #[serde(rename = "RANGE", default)]
    pub range: bool,
    #[serde(rename = "TYPE", default)]
    pub type_: bool,
    #[serde(rename = "VALUE", default)]
    pub value: bool,
}

impl HostExtensions {
    /// Every extension enabled.
    pub fn all() -> Self {
        Self {
            access: true,
            clip_mode: true,
            range: true,
            type_: true,
            value: true,
        }
    }

    /// Names of the supported extensions, in wire spelling.
    pub fn supported(&self) -> Vec<&'static str> {
        [
            (self.access, "ACCESS"),
            (self.clip_mode, "CLIP_MODE"),
            (self.range, "RANGE"),
            (self.type_, "TYPE"),
            (self.value, "VALUE"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

/// Host descriptor served for `?HOST_INFO` requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(rename = "NAME", default)]
    pub name: String,

    /// Port the host receives OSC datagrams on.
    #[serde(rename = "OSC_PORT", default, skip_serializing_if = "Option::is_none")]
    pub osc_port: Option<u16>,

    #[serde(rename = "OSC_IP", default, skip_serializing_if = "Option::is_none")]
    pub osc_ip: Option<IpAddr>,

    #[serde(rename = "OSC_TRANSPORT", default)]
    pub osc_transport: OscTransport,

    #[serde(rename = "EXTENSIONS", default)]
    pub extensions: HostExtensions,
}

impl HostInfo {
    /// Descriptor for a local UDP OSC receiver.
    pub fn udp(name: impl Into<String>, ip: IpAddr, osc_port: u16) -> Self {
        Self {
            name: name.into(),
            osc_port: Some(osc_port),
            osc_ip: Some(ip),
            osc_transport: OscTransport::Udp,
            extensions: HostExtensions::all(),
        }
    }

    /// OSC endpoint of the host. `OSC_IP` wins over `fallback_ip`; `None`
    /// without an `OSC_PORT`.
    pub fn osc_endpoint(&self, fallback_ip: IpAddr) -> Option<SocketAddr> {
        let port = self.osc_port?;
        Some(SocketAddr::new(self.osc_ip.unwrap_or(fallback_ip), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_wire_keys() {
        let info = HostInfo::udp("Leash-OSC-12345A", IpAddr::V4(Ipv4Addr::LOCALHOST), 9001);
        let json = serde_json::to_value(&info).expect("serialize");

        assert_eq!(json["NAME"], "Leash-OSC-12345A");
        assert_eq!(json["OSC_PORT"], 9001);
        assert_eq!(json["OSC_IP"], "127.0.0.1");
        assert_eq!(json["OSC_TRANSPORT"], "UDP");
        assert_eq!(json["EXTENSIONS"]["CLIP_MODE"], true);
        assert_eq!(json["EXTENSIONS"]["VALUE"], true);
    }

    #[test]
    fn test_parse_peer_descriptor() {
        let info: HostInfo = serde_json::from_str(
            r#"{
                "NAME": "VRChat-Client-ABCDEF",
                "OSC_IP": "192.168.1.20",
                "OSC_PORT": 9000,
                "OSC_TRANSPORT": "UDP",
                "EXTENSIONS": {"ACCESS": true, "VALUE": true}
            }"#,
        )
        .expect("parse");

        assert_eq!(info.extensions.supported(), vec!["ACCESS", "VALUE"]);
        assert_eq!(
            info.osc_endpoint(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            Some("192.168.1.20:9000".parse().expect("addr"))
        );
    }

    #[test]
    fn test_missing_port_has_no_endpoint() {
        let info: HostInfo =
            serde_json::from_str(r#"{"NAME": "peer", "OSC_TRANSPORT": "UDP"}"#).expect("parse");
        assert_eq!(info.osc_endpoint(IpAddr::V4(Ipv4Addr::LOCALHOST)), None);
    }

    #[test]
    fn test_missing_ip_falls_back() {
        let info: HostInfo = serde_json::from_str(r#"{"NAME": "peer", "OSC_PORT": 9000}"#)
            .expect("parse");
        let fallback = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(
            info.osc_endpoint(fallback),
            Some(SocketAddr::new(fallback, 9000))
        );
    }
}
