// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS-SD service advertisement and peer browsing over mDNS.
//!
//! [`Responder`] builds the announcement, goodbye and answer messages for this
//! host's two services. [`ServiceBrowser`] watches responses from other hosts
//! and reports new HTTP services whose instance name carries the target prefix.
//!
//! Both are pure message transformers; the socket loop lives in
//! [`crate::service`].

use crate::mdns::wire::{TYPE_A, TYPE_ANY, TYPE_PTR, TYPE_SRV, TYPE_TXT};
use crate::mdns::{DnsName, Message, Question, Record, RecordData};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::debug;

/// Service type of the HTTP query endpoint.
pub const HTTP_SERVICE: &str = "_oscjson._tcp";
/// Service type of the OSC datagram endpoint.
pub const OSC_SERVICE: &str = "_osc._udp";
/// Instance prefix of the peers this host follows by default.
pub const DEFAULT_TARGET_PREFIX: &str = "VRChat-Client-";

/// TTL of shared (PTR) records.
pub const SHARED_TTL: u32 = 4500;
/// TTL of host-bound (SRV, TXT, A) records.
pub const UNIQUE_TTL: u32 = 120;

/// Stable identity of an advertised service: lowercased full name plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    name: String,
    port: u16,
}

impl ServiceId {
    pub fn new(name: &DnsName, port: u16) -> Self {
        Self {
            name: name.canonical(),
            port,
        }
    }

    /// Identity of `<instance>.<service_type>.local` on `port`.
    pub fn for_instance(instance: &str, service_type: &str, port: u16) -> Self {
        Self::new(&instance_name(instance, service_type), port)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

/// HTTP endpoint of a newly seen target peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub instance: String,
    pub http: SocketAddr,
}

/// Passive browser of `_oscjson._tcp` announcements.
#[derive(Debug)]
pub struct ServiceBrowser {
    known: HashSet<ServiceId>,
    target_prefix: String,
}

impl ServiceBrowser {
    pub fn new(target_prefix: impl Into<String>) -> Self {
        Self {
            known: HashSet::new(),
            target_prefix: target_prefix.into(),
        }
    }

    /// Mark a service as already known (used for our own advertisements).
    pub fn seed(&mut self, id: ServiceId) {
        self.known.insert(id);
    }

    pub fn is_known(&self, id: &ServiceId) -> bool {
        self.known.contains(id)
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Apply every SRV record of a response and return the target peers seen
    /// for the first time.
    pub fn observe(&mut self, msg: &Message) -> Vec<DiscoveredPeer> {
        let mut found = Vec::new();
        if !msg.is_response() {
            return found;
        }

        for record in msg.answer_records() {
            let RecordData::Srv { port, .. } = record.data else {
                continue;
            };

            let (Some(instance), Some(proto)) = (record.name.label(0), record.name.label(2))
            else {
                debug!("mDNS: SRV record with short name {}", record.name);
                continue;
            };
            if proto.eq_ignore_ascii_case("_udp") {
                continue;
            }

            let id = ServiceId::new(&record.name, port);
            if record.ttl == 0 {
                debug!("mDNS: goodbye from {}", id);
                self.known.remove(&id);
                continue;
            }
            if self.known.contains(&id) {
                continue;
            }

            let ip = first_ipv4(msg);
            self.known.insert(id.clone());
            debug!(
                "mDNS: found service {} instance={} ip={:?} port={}",
                id, instance, ip, port
            );

            if instance.starts_with(&self.target_prefix) {
                if let Some(ip) = ip {
                    found.push(DiscoveredPeer {
                        instance: instance.to_string(),
                        http: SocketAddr::new(IpAddr::V4(ip), port),
                    });
                }
            }
        }

        found
    }
}

fn first_ipv4(msg: &Message) -> Option<Ipv4Addr> {
    msg.answer_records().find_map(|r| match r.data {
        RecordData::A(ip) => Some(ip),
        _ => None,
    })
}

fn instance_name(instance: &str, service_type: &str) -> DnsName {
    let mut labels = vec![instance.to_string()];
    labels.extend(DnsName::new(service_type).labels().iter().cloned());
    labels.push("local".to_string());
    DnsName::from_labels(labels)
}

/// One advertised service of this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    pub instance: String,
    pub service_type: &'static str,
    pub port: u16,
    pub addr: Ipv4Addr,
}

impl ServiceProfile {
    pub fn new(
        instance: impl Into<String>,
        service_type: &'static str,
        port: u16,
        addr: Ipv4Addr,
    ) -> Self {
        Self {
            instance: instance.into(),
            service_type,
            port,
            addr,
        }
    }

    /// `<service_type>.local`
    pub fn service_name(&self) -> DnsName {
        DnsName::new(&format!("{}.local", self.service_type))
    }

    /// `<instance>.<service_type>.local`
    pub fn instance_name(&self) -> DnsName {
        instance_name(&self.instance, self.service_type)
    }

    /// `<instance>.local`
    pub fn host_name(&self) -> DnsName {
        DnsName::from_labels(vec![self.instance.clone(), "local".to_string()])
    }

    pub fn id(&self) -> ServiceId {
        ServiceId::new(&self.instance_name(), self.port)
    }

    fn ptr(&self, ttl: u32) -> Record {
        Record::new(
            self.service_name(),
            ttl.min(SHARED_TTL),
            RecordData::Ptr(self.instance_name()),
        )
    }

    fn srv(&self, ttl: u32) -> Record {
        Record::new(
            self.instance_name(),
            ttl.min(UNIQUE_TTL),
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: self.port,
                target: self.host_name(),
            },
        )
        .unique()
    }

    fn txt(&self, ttl: u32) -> Record {
        Record::new(
            self.instance_name(),
            ttl.min(SHARED_TTL),
            RecordData::Txt(vec![b"txtvers=1".to_vec()]),
        )
        .unique()
    }

    fn a(&self, ttl: u32) -> Record {
        Record::new(self.host_name(), ttl.min(UNIQUE_TTL), RecordData::A(self.addr)).unique()
    }
}

/// mDNS responder for a fixed set of profiles.
#[derive(Debug, Clone)]
pub struct Responder {
    profiles: Vec<ServiceProfile>,
}

impl Responder {
    pub fn new(profiles: Vec<ServiceProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[ServiceProfile] {
        &self.profiles
    }

    /// Unsolicited announcement of every profile.
    pub fn announcement(&self) -> Message {
        self.unsolicited(u32::MAX)
    }

    /// Same records as [`Self::announcement`] with TTL 0.
    pub fn goodbye(&self) -> Message {
        self.unsolicited(0)
    }

    fn unsolicited(&self, ttl: u32) -> Message {
        let mut msg = Message::response();
        for profile in &self.profiles {
            push_unique(&mut msg.answers, profile.ptr(ttl));
            push_unique(&mut msg.answers, profile.srv(ttl));
            push_unique(&mut msg.answers, profile.txt(ttl));
            push_unique(&mut msg.additionals, profile.a(ttl));
        }
        msg
    }

    /// PTR queries for the service types of every profile.
    pub fn browse_query(&self) -> Message {
        let mut msg = Message::query();
        for profile in &self.profiles {
            let question = Question {
                name: profile.service_name(),
                qtype: TYPE_PTR,
                qclass: crate::mdns::wire::CLASS_IN,
                unicast_response: false,
            };
            if !msg.questions.contains(&question) {
                msg.questions.push(question);
            }
        }
        msg
    }

    /// Response to a query naming one of our services, instances or host.
    pub fn answer(&self, query: &Message) -> Option<Message> {
        if query.is_response() {
            return None;
        }

        let mut msg = Message::response();
        for question in &query.questions {
            let wants = |rtype: u16| question.qtype == rtype || question.qtype == TYPE_ANY;
            for profile in &self.profiles {
                if question.name.matches(&profile.service_name()) && wants(TYPE_PTR) {
                    push_unique(&mut msg.answers, profile.ptr(u32::MAX));
                    push_unique(&mut msg.additionals, profile.srv(u32::MAX));
                    push_unique(&mut msg.additionals, profile.txt(u32::MAX));
                    push_unique(&mut msg.additionals, profile.a(u32::MAX));
                } else if question.name.matches(&profile.instance_name()) {
                    if wants(TYPE_SRV) {
                        push_unique(&mut msg.answers, profile.srv(u32::MAX));
                        push_unique(&mut msg.additionals, profile.a(u32::MAX));
                    }
                    if wants(TYPE_TXT) {
                        push_unique(&mut msg.answers, profile.txt(u32::MAX));
                    }
                } else if question.name.matches(&profile.host_name()) && wants(TYPE_A) {
                    push_unique(&mut msg.answers, profile.a(u32::MAX));
                }
            }
        }

        // Records already in the answer section need not be repeated.
        let answers = msg.answers.clone();
        msg.additionals.retain(|r| !answers.contains(r));

        (!msg.answers.is_empty()).then_some(msg)
    }
}

fn push_unique(records: &mut Vec<Record>, record: Record) {
    if !records.contains(&record) {
        records.push(record);
    }
}
