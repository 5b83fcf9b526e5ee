// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC 1.0 packet codec.
//!
//! Messages are encoded; messages and bundles are decoded, bundles flattened
//! into their messages in order. A bundle element that fails to decode is
//! skipped; the rest of the bundle still decodes.

use std::fmt;
use thiserror::Error;
use tracing::debug;

const BUNDLE_TAG: &[u8] = b"#bundle\0";
const MAX_BUNDLE_DEPTH: usize = 8;

/// OSC codec and channel errors.
#[derive(Debug, Error)]
pub enum OscError {
    #[error("packet truncated: {0}")]
    Truncated(&'static str),

    #[error("address must start with '/': {0:?}")]
    BadAddress(String),

    #[error("missing type tag string")]
    MissingTypeTags,

    #[error("unsupported type tag '{0}'")]
    UnsupportedTag(char),

    #[error("string is not valid UTF-8")]
    InvalidString,

    #[error("bundle nesting deeper than {MAX_BUNDLE_DEPTH}")]
    BundleTooDeep,

    #[error("blob of {0} bytes does not fit")]
    BlobTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
    Blob(Vec<u8>),
    Long(i64),
    Double(f64),
    Bool(bool),
    Nil,
}

impl OscArg {
    fn tag(&self) -> char {
        match self {
            Self::Int(_) => 'i',
            Self::Float(_) => 'f',
            Self::Str(_) => 's',
            Self::Blob(_) => 'b',
            Self::Long(_) => 'h',
            Self::Double(_) => 'd',
            Self::Bool(true) => 'T',
            Self::Bool(false) => 'F',
            Self::Nil => 'N',
        }
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{:?}", v),
            Self::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Nil => f.write_str("nil"),
        }
    }
}

/// Address plus arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn first_arg(&self) -> Option<&OscArg> {
        self.args.first()
    }
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    // At least one NUL, then pad to a multiple of four.
    let padded = pad4(s.len() + 1);
    out.resize(out.len() + (padded - s.len()), 0);
}

/// Encode a single message.
pub fn encode_message(msg: &OscMessage) -> Result<Vec<u8>, OscError> {
    if !msg.address.starts_with('/') {
        return Err(OscError::BadAddress(msg.address.clone()));
    }

    let mut out = Vec::with_capacity(64);
    write_str(&mut out, &msg.address);

    let tags: String = std::iter::once(',')
        .chain(msg.args.iter().map(OscArg::tag))
        .collect();
    write_str(&mut out, &tags);

    for arg in &msg.args {
        match arg {
            OscArg::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Str(v) => write_str(&mut out, v),
            OscArg::Blob(v) => {
                let len = i32::try_from(v.len()).map_err(|_| OscError::BlobTooLarge(v.len()))?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(v);
                out.resize(out.len() + (pad4(v.len()) - v.len()), 0);
            }
            OscArg::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
            OscArg::Bool(_) | OscArg::Nil => {}
        }
    }

    Ok(out)
}

/// Decode a packet into its messages.
pub fn decode_packet(buf: &[u8]) -> Result<Vec<OscMessage>, OscError> {
    let mut out = Vec::new();
    decode_into(buf, 0, &mut out)?;
    Ok(out)
}

fn decode_into(buf: &[u8], depth: usize, out: &mut Vec<OscMessage>) -> Result<(), OscError> {
    if buf.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(OscError::BundleTooDeep);
        }
        let mut cursor = Cursor::new(buf);
        cursor.take(BUNDLE_TAG.len(), "bundle tag")?;
        cursor.take(8, "bundle timetag")?;
        while !cursor.is_empty() {
            let len = cursor.u32("bundle element size")? as usize;
            let element = cursor.take(len, "bundle element")?;
            if let Err(e) = decode_into(element, depth + 1, out) {
                debug!("Skipping bundle element {}: {}", element_address(element), e);
            }
        }
        return Ok(());
    }

    out.push(decode_message(buf)?);
    Ok(())
}

/// Leading address string of an element, for logging.
fn element_address(element: &[u8]) -> String {
    Cursor::new(element)
        .string("address")
        .unwrap_or_else(|_| "<unreadable>".to_string())
}

fn decode_message(buf: &[u8]) -> Result<OscMessage, OscError> {
    let mut cursor = Cursor::new(buf);
    let address = cursor.string("address")?;
    if !address.starts_with('/') {
        return Err(OscError::BadAddress(address));
    }

    if cursor.is_empty() {
        return Ok(OscMessage::new(address, Vec::new()));
    }
    let tags = cursor.string("type tags")?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(OscError::MissingTypeTags);
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(cursor.u32("int")? as i32),
            'f' => OscArg::Float(f32::from_bits(cursor.u32("float")?)),
            's' => OscArg::Str(cursor.string("string")?),
            'b' => {
                let len = cursor.u32("blob size")? as usize;
                let data = cursor.take(len, "blob")?.to_vec();
                cursor.take(pad4(len) - len, "blob padding")?;
                OscArg::Blob(data)
            }
            'h' => OscArg::Long(cursor.u64("long")? as i64),
            'd' => OscArg::Double(f64::from_bits(cursor.u64("double")?)),
            'T' => OscArg::Bool(true),
            'F' => OscArg::Bool(false),
            'N' => OscArg::Nil,
            other => return Err(OscError::UnsupportedTag(other)),
        };
        args.push(arg);
    }

    Ok(OscMessage::new(address, args))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], OscError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(OscError::Truncated(what))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, OscError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, OscError> {
        let b = self.take(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn string(&mut self, what: &'static str) -> Result<String, OscError> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(OscError::Truncated(what))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| OscError::InvalidString)?
            .to_string();
        self.take(pad4(nul + 1), what)?;
        Ok(s)
    }
}
