// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNS message encoding and decoding (RFC 1035 section 4, mDNS subset).
//!
//! Decoding follows compression pointers; encoding never compresses. Only the
//! record types DNS-SD needs are interpreted (A, AAAA, PTR, SRV, TXT); anything
//! else is kept as raw RDATA.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_ANY: u16 = 255;

pub const CLASS_IN: u16 = 1;
/// mDNS cache-flush bit on record classes (RFC 6762 section 10.2).
pub const CLASS_CACHE_FLUSH: u16 = 0x8000;
/// mDNS unicast-response bit on question classes (RFC 6762 section 5.4).
pub const CLASS_UNICAST_RESPONSE: u16 = 0x8000;

/// QR bit: message is a response.
pub const FLAG_RESPONSE: u16 = 0x8000;
/// AA bit: authoritative answer.
pub const FLAG_AUTHORITATIVE: u16 = 0x0400;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_POINTER_JUMPS: usize = 32;

/// Wire decoding/encoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated at offset {0}")]
    Truncated(usize),

    #[error("invalid compression pointer at offset {0}")]
    BadPointer(usize),

    #[error("label longer than 63 bytes: {0}")]
    LabelTooLong(String),

    #[error("reserved label type 0x{0:02x}")]
    BadLabelType(u8),

    #[error("record data length mismatch for type {rtype}: {len} bytes")]
    BadRdata { rtype: u16, len: usize },
}

/// A domain name as a list of labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DnsName(Vec<String>);

impl DnsName {
    /// Build a name from dotted text (`"_osc._udp.local"`).
    pub fn new(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Build a name from labels that may themselves contain dots.
    pub fn from_labels(labels: Vec<String>) -> Self {
        Self(labels)
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// Lowercased dotted form used for comparisons and identities.
    pub fn canonical(&self) -> String {
        self.0.join(".").to_ascii_lowercase()
    }

    /// Case-insensitive equality.
    pub fn matches(&self, other: &DnsName) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl fmt::Display for DnsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: DnsName,
    pub qtype: u16,
    /// Class with the unicast-response bit stripped.
    pub qclass: u16,
    pub unicast_response: bool,
}

/// Interpreted RDATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(DnsName),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: DnsName,
    },
    Txt(Vec<Vec<u8>>),
    Other { rtype: u16, data: Vec<u8> },
}

impl RecordData {
    pub fn rtype(&self) -> u16 {
        match self {
            Self::A(_) => TYPE_A,
            Self::Aaaa(_) => TYPE_AAAA,
            Self::Ptr(_) => TYPE_PTR,
            Self::Srv { .. } => TYPE_SRV,
            Self::Txt(_) => TYPE_TXT,
            Self::Other { rtype, .. } => *rtype,
        }
    }
}

/// Resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: DnsName,
    /// Class with the cache-flush bit stripped.
    pub class: u16,
    pub cache_flush: bool,
    /// Time to live in seconds; zero announces removal.
    pub ttl: u32,
    pub data: RecordData,
}

impl Record {
    pub fn new(name: DnsName, ttl: u32, data: RecordData) -> Self {
        Self {
            name,
            class: CLASS_IN,
            cache_flush: false,
            ttl,
            data,
        }
    }

    /// Mark as a unique record (cache-flush bit on the wire).
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.cache_flush = true;
        self
    }
}

/// A full DNS message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// Empty mDNS query.
    pub fn query() -> Self {
        Self::default()
    }

    /// Empty authoritative mDNS response.
    pub fn response() -> Self {
        Self {
            flags: FLAG_RESPONSE | FLAG_AUTHORITATIVE,
            ..Self::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    /// Records of the answer and additional sections, in that order.
    pub fn answer_records(&self) -> impl Iterator<Item = &Record> {
        self.answers.iter().chain(self.additionals.iter())
    }

    /// Decode a message.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader { buf, pos: 0 };

        let id = reader.u16()?;
        let flags = reader.u16()?;
        let qdcount = reader.u16()?;
        let ancount = reader.u16()?;
        let nscount = reader.u16()?;
        let arcount = reader.u16()?;

        let mut questions = Vec::with_capacity(usize::from(qdcount).min(32));
        for _ in 0..qdcount {
            let name = reader.name()?;
            let qtype = reader.u16()?;
            let raw_class = reader.u16()?;
            questions.push(Question {
                name,
                qtype,
                qclass: raw_class & !CLASS_UNICAST_RESPONSE,
                unicast_response: raw_class & CLASS_UNICAST_RESPONSE != 0,
            });
        }

        let answers = reader.records(ancount)?;
        let authorities = reader.records(nscount)?;
        let additionals = reader.records(arcount)?;

        Ok(Self {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Encode the message.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        for count in [
            self.questions.len(),
            self.answers.len(),
            self.authorities.len(),
            self.additionals.len(),
        ] {
            let count = u16::try_from(count).map_err(|_| WireError::Truncated(out.len()))?;
            out.extend_from_slice(&count.to_be_bytes());
        }

        for q in &self.questions {
            write_name(&mut out, &q.name)?;
            out.extend_from_slice(&q.qtype.to_be_bytes());
            let class = if q.unicast_response {
                q.qclass | CLASS_UNICAST_RESPONSE
            } else {
                q.qclass
            };
            out.extend_from_slice(&class.to_be_bytes());
        }

        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            write_record(&mut out, record)?;
        }

        Ok(out)
    }
}

fn write_name(out: &mut Vec<u8>, name: &DnsName) -> Result<(), WireError> {
    for label in name.labels() {
        if label.len() > MAX_LABEL_LEN {
            return Err(WireError::LabelTooLong(label.clone()));
        }
        // Length checked above.
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

fn write_record(out: &mut Vec<u8>, record: &Record) -> Result<(), WireError> {
    write_name(out, &record.name)?;
    out.extend_from_slice(&record.data.rtype().to_be_bytes());
    let class = if record.cache_flush {
        record.class | CLASS_CACHE_FLUSH
    } else {
        record.class
    };
    out.extend_from_slice(&class.to_be_bytes());
    out.extend_from_slice(&record.ttl.to_be_bytes());

    let mut rdata = Vec::new();
    match &record.data {
        RecordData::A(addr) => rdata.extend_from_slice(&addr.octets()),
        RecordData::Aaaa(addr) => rdata.extend_from_slice(&addr.octets()),
        RecordData::Ptr(name) => write_name(&mut rdata, name)?,
        RecordData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            rdata.extend_from_slice(&priority.to_be_bytes());
            rdata.extend_from_slice(&weight.to_be_bytes());
            rdata.extend_from_slice(&port.to_be_bytes());
            write_name(&mut rdata, target)?;
        }
        RecordData::Txt(entries) => {
            for entry in entries {
                let len = u8::try_from(entry.len()).map_err(|_| WireError::BadRdata {
                    rtype: TYPE_TXT,
                    len: entry.len(),
                })?;
                rdata.push(len);
                rdata.extend_from_slice(entry);
            }
            if entries.is_empty() {
                rdata.push(0);
            }
        }
        RecordData::Other { data, .. } => rdata.extend_from_slice(data),
    }

    let rdlen = u16::try_from(rdata.len()).map_err(|_| WireError::BadRdata {
        rtype: record.data.rtype(),
        len: rdata.len(),
    })?;
    out.extend_from_slice(&rdlen.to_be_bytes());
    out.extend_from_slice(&rdata);
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::Truncated(self.pos))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(WireError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a possibly compressed name starting at the cursor.
    fn name(&mut self) -> Result<DnsName, WireError> {
        let mut labels = Vec::new();
        let mut pos = self.pos;
        let mut resume: Option<usize> = None;
        let mut jumps = 0;

        loop {
            let len = *self.buf.get(pos).ok_or(WireError::Truncated(pos))?;
            match len & 0xC0 {
                0x00 => {
                    pos += 1;
                    if len == 0 {
                        break;
                    }
                    let end = pos + usize::from(len);
                    let bytes = self.buf.get(pos..end).ok_or(WireError::Truncated(pos))?;
                    labels.push(String::from_utf8_lossy(bytes).into_owned());
                    pos = end;
                }
                0xC0 => {
                    let low = *self.buf.get(pos + 1).ok_or(WireError::Truncated(pos))?;
                    let target = (usize::from(len & 0x3F) << 8) | usize::from(low);
                    jumps += 1;
                    if target >= self.buf.len() || jumps > MAX_POINTER_JUMPS {
                        return Err(WireError::BadPointer(pos));
                    }
                    if resume.is_none() {
                        resume = Some(pos + 2);
                    }
                    pos = target;
                }
                other => return Err(WireError::BadLabelType(other)),
            }
        }

        self.pos = resume.unwrap_or(pos);
        Ok(DnsName(labels))
    }

    fn records(&mut self, count: u16) -> Result<Vec<Record>, WireError> {
        let mut out = Vec::with_capacity(usize::from(count).min(32));
        for _ in 0..count {
            out.push(self.record()?);
        }
        Ok(out)
    }

    fn record(&mut self) -> Result<Record, WireError> {
        let name = self.name()?;
        let rtype = self.u16()?;
        let raw_class = self.u16()?;
        let ttl = self.u32()?;
        let rdlen = usize::from(self.u16()?);
        let rdata_start = self.pos;
        let rdata = self.take(rdlen)?;

        let data = match rtype {
            TYPE_A => {
                let octets: [u8; 4] = rdata
                    .try_into()
                    .map_err(|_| WireError::BadRdata { rtype, len: rdlen })?;
                RecordData::A(Ipv4Addr::from(octets))
            }
            TYPE_AAAA => {
                let octets: [u8; 16] = rdata
                    .try_into()
                    .map_err(|_| WireError::BadRdata { rtype, len: rdlen })?;
                RecordData::Aaaa(Ipv6Addr::from(octets))
            }
            TYPE_PTR => RecordData::Ptr(self.name_at(rdata_start)?),
            TYPE_SRV => {
                if rdlen < 7 {
                    return Err(WireError::BadRdata { rtype, len: rdlen });
                }
                RecordData::Srv {
                    priority: u16::from_be_bytes([rdata[0], rdata[1]]),
                    weight: u16::from_be_bytes([rdata[2], rdata[3]]),
                    port: u16::from_be_bytes([rdata[4], rdata[5]]),
                    target: self.name_at(rdata_start + 6)?,
                }
            }
            TYPE_TXT => RecordData::Txt(parse_txt(rdata)),
            _ => RecordData::Other {
                rtype,
                data: rdata.to_vec(),
            },
        };

        Ok(Record {
            name,
            class: raw_class & !CLASS_CACHE_FLUSH,
            cache_flush: raw_class & CLASS_CACHE_FLUSH != 0,
            ttl,
            data,
        })
    }

    /// Read a name at `offset` without moving the cursor.
    fn name_at(&self, offset: usize) -> Result<DnsName, WireError> {
        let mut sub = Reader {
            buf: self.buf,
            pos: offset,
        };
        sub.name()
    }
}

fn parse_txt(mut rdata: &[u8]) -> Vec<Vec<u8>> {
    let mut entries = Vec::new();
    while let Some((&len, rest)) = rdata.split_first() {
        let len = usize::from(len).min(rest.len());
        if len > 0 {
            entries.push(rest[..len].to_vec());
        }
        rdata = &rest[len..];
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_canonical_and_match() {
        let a = DnsName::new("VRChat-Client-ABC._oscjson._tcp.local.");
        let b = DnsName::new("vrchat-client-abc._OSCJSON._tcp.local");
        assert_eq!(a.labels().len(), 4);
        assert_eq!(a.canonical(), "vrchat-client-abc._oscjson._tcp.local");
        assert!(a.matches(&b));
        assert_eq!(a.label(2), Some("_tcp"));
    }

    #[test]
    fn test_service_response_survives_encoding() {
        let instance = DnsName::new("VRChat-Client-ABC._oscjson._tcp.local");
        let mut msg = Message::response();
        msg.answers.push(Record::new(
            DnsName::new("_oscjson._tcp.local"),
            4500,
            RecordData::Ptr(instance.clone()),
        ));
        msg.additionals.push(
            Record::new(
                instance.clone(),
                120,
                RecordData::Srv {
                    priority: 0,
                    weight: 0,
                    port: 41234,
                    target: DnsName::new("VRChat-Client-ABC.local"),
                },
            )
            .unique(),
        );
        msg.additionals.push(Record::new(
            instance,
            4500,
            RecordData::Txt(vec![b"txtvers=1".to_vec()]),
        ));
        msg.additionals.push(
            Record::new(
                DnsName::new("VRChat-Client-ABC.local"),
                120,
                RecordData::A(Ipv4Addr::new(192, 168, 1, 20)),
            )
            .unique(),
        );

        let bytes = msg.encode().expect("encode");
        let back = Message::decode(&bytes).expect("decode");

        assert!(back.is_response());
        assert_eq!(back, msg);
    }

    #[test]
    fn test_decode_compressed_srv() {
        // Response with one SRV answer whose target points back into the owner name.
        let mut buf = vec![
            0x00, 0x00, 0x84, 0x00, // id, flags
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, // counts
        ];
        // Owner name at offset 12: "peer" "_oscjson" "_tcp" "local"
        for label in ["peer", "_oscjson", "_tcp", "local"] {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&TYPE_SRV.to_be_bytes());
        buf.extend_from_slice(&(CLASS_IN | CLASS_CACHE_FLUSH).to_be_bytes());
        buf.extend_from_slice(&120u32.to_be_bytes());
        // rdata: priority, weight, port, then "peer" + pointer to "local" (offset 12+5+9+5 = 31)
        let rdata = [
            0x00, 0x00, 0x00, 0x00, 0x1F, 0x90, 0x04, b'p', b'e', b'e', b'r', 0xC0, 31,
        ];
        buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(&rdata);

        let msg = Message::decode(&buf).expect("decode");
        let record = &msg.answers[0];
        assert!(record.cache_flush);
        assert_eq!(record.class, CLASS_IN);
        assert_eq!(
            record.data,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 8080,
                target: DnsName::new("peer.local"),
            }
        );
    }

    #[test]
    fn test_decode_truncated() {
        let msg = Message::decode(&[0x00, 0x00, 0x84]);
        assert!(matches!(msg, Err(WireError::Truncated(_))));

        // Header claims one answer that is not present.
        let header = [0, 0, 0x84, 0, 0, 0, 0, 1, 0, 0, 0, 0];
        assert!(Message::decode(&header).is_err());
    }

    #[test]
    fn test_decode_pointer_loop_rejected() {
        let mut buf = vec![0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        // Question name is a pointer to itself.
        buf.extend_from_slice(&[0xC0, 12, 0, 12, 0, 1]);
        assert!(matches!(
            Message::decode(&buf),
            Err(WireError::BadPointer(_))
        ));
    }

    #[test]
    fn test_question_unicast_bit() {
        let mut msg = Message::query();
        msg.questions.push(Question {
            name: DnsName::new("_osc._udp.local"),
            qtype: TYPE_PTR,
            qclass: CLASS_IN,
            unicast_response: true,
        });
        let back = Message::decode(&msg.encode().expect("encode")).expect("decode");
        assert!(!back.is_response());
        assert!(back.questions[0].unicast_response);
        assert_eq!(back.questions[0].qclass, CLASS_IN);
    }

    #[test]
    fn test_label_too_long() {
        let mut msg = Message::query();
        msg.questions.push(Question {
            name: DnsName::new(&"x".repeat(64)),
            qtype: TYPE_A,
            qclass: CLASS_IN,
            unicast_response: false,
        });
        assert!(matches!(msg.encode(), Err(WireError::LabelTooLong(_))));
    }
}
