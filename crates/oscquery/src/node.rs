// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSCQuery namespace tree.
//!
//! A tree document is a recursive JSON object keyed by path segment. Every
//! node carries `FULL_PATH` and `ACCESS`; interior nodes carry `CONTENTS`,
//! leaves carry `VALUE` and `TYPE`.
//!
//! ```text
//! /                       ACCESS 0, CONTENTS
//! +-- avatar              ACCESS 2, CONTENTS
//!     +-- change          VALUE ["avtr_..."], TYPE "s"
//!     +-- parameters      CONTENTS
//!         +-- Leash_Z+    VALUE [0.25], TYPE "f"
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Tree invariant violations reported by [`OscNode::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {path} has both VALUE and CONTENTS")]
    LeafWithChildren { path: String },

    #[error("child {segment} of {parent} has FULL_PATH {actual}, expected {expected}")]
    PathMismatch {
        parent: String,
        segment: String,
        expected: String,
        actual: String,
    },
}

/// Access mode of a node (`ACCESS` integer code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// 0: no value attached.
    #[default]
    NoValue,
    /// 1: value may be read.
    ReadOnly,
    /// 2: value may be written.
    WriteOnly,
    /// 3: value may be read and written.
    ReadWrite,
}

impl AccessMode {
    /// Integer code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::NoValue => 0,
            Self::ReadOnly => 1,
            Self::WriteOnly => 2,
            Self::ReadWrite => 3,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::NoValue),
            1 => Some(Self::ReadOnly),
            2 => Some(Self::WriteOnly),
            3 => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

impl Serialize for AccessMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for AccessMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ACCESS code {}", code)))
    }
}

/// A scalar carried in a leaf's `VALUE` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Nil,
}

impl ParamValue {
    /// String view of a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
            Self::Nil => f.write_str("nil"),
        }
    }
}

/// One node of the namespace tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscNode {
    /// Absolute namespace path.
    #[serde(rename = "FULL_PATH")]
    pub full_path: String,

    #[serde(rename = "ACCESS", default)]
    pub access: AccessMode,

    /// Leaf values.
    #[serde(rename = "VALUE", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<ParamValue>>,

    /// OSC type tags, one per value.
    #[serde(
        rename = "TYPE",
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "ser_type_tags",
        deserialize_with = "de_type_tags"
    )]
    pub type_tags: Option<Vec<String>>,

    /// Children keyed by path segment.
    #[serde(rename = "CONTENTS", default, skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, OscNode>>,
}

impl OscNode {
    /// Create an interior node with no children yet.
    pub fn branch(full_path: impl Into<String>, access: AccessMode) -> Self {
        Self {
            full_path: full_path.into(),
            access,
            value: None,
            type_tags: None,
            children: Some(BTreeMap::new()),
        }
    }

    /// Create a leaf node with a single value.
    pub fn leaf(
        full_path: impl Into<String>,
        access: AccessMode,
        value: ParamValue,
        type_tag: impl Into<String>,
    ) -> Self {
        Self {
            full_path: full_path.into(),
            access,
            value: Some(vec![value]),
            type_tags: Some(vec![type_tag.into()]),
            children: None,
        }
    }

    /// Create a childless node without a value.
    pub fn empty(full_path: impl Into<String>, access: AccessMode) -> Self {
        Self {
            full_path: full_path.into(),
            access,
            value: None,
            type_tags: None,
            children: None,
        }
    }

    /// Attach a child under `segment`, turning this node into an interior node.
    #[must_use]
    pub fn with_child(mut self, segment: impl Into<String>, child: OscNode) -> Self {
        self.children
            .get_or_insert_with(BTreeMap::new)
            .insert(segment.into(), child);
        self
    }

    /// Path of the child named `segment`.
    pub fn child_path(&self, segment: &str) -> String {
        if self.full_path.ends_with('/') {
            format!("{}{}", self.full_path, segment)
        } else {
            format!("{}/{}", self.full_path, segment)
        }
    }

    /// True if the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Direct child by segment name.
    pub fn child(&self, segment: &str) -> Option<&OscNode> {
        self.children.as_ref()?.get(segment)
    }

    /// Follow a relative or absolute sub-path (`"avatar/parameters"`,
    /// `"/avatar/parameters"`) through `CONTENTS`.
    pub fn descend(&self, path: &str) -> Option<&OscNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// First value of a leaf.
    pub fn first_value(&self) -> Option<&ParamValue> {
        self.value.as_ref()?.first()
    }

    /// Flatten the subtree into `full_path -> first value`, one entry per
    /// childless node.
    pub fn flatten(&self) -> BTreeMap<String, Option<ParamValue>> {
        let mut out = BTreeMap::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut BTreeMap<String, Option<ParamValue>>) {
        match &self.children {
            None => {
                out.insert(self.full_path.clone(), self.first_value().cloned());
            }
            Some(children) => {
                for child in children.values() {
                    child.flatten_into(out);
                }
            }
        }
    }

    /// Check the leaf/interior split and child path invariants.
    pub fn validate(&self) -> Result<(), TreeError> {
        let Some(children) = &self.children else {
            return Ok(());
        };

        if self.value.is_some() {
            return Err(TreeError::LeafWithChildren {
                path: self.full_path.clone(),
            });
        }

        for (segment, child) in children {
            let expected = self.child_path(segment);
            if child.full_path != expected {
                return Err(TreeError::PathMismatch {
                    parent: self.full_path.clone(),
                    segment: segment.clone(),
                    expected,
                    actual: child.full_path.clone(),
                });
            }
            child.validate()?;
        }

        Ok(())
    }
}

// TYPE is a single OSC type-tag string ("ff") on the wire; some hosts send an
// array instead.
fn ser_type_tags<S: Serializer>(tags: &Option<Vec<String>>, s: S) -> Result<S::Ok, S::Error> {
    match tags {
        Some(tags) => s.serialize_str(&tags.concat()),
        None => s.serialize_none(),
    }
}

fn de_type_tags<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Option::<Tags>::deserialize(d)? {
        None => None,
        Some(Tags::Joined(s)) => Some(s.chars().map(String::from).collect()),
        Some(Tags::List(list)) => Some(list),
    })
}
