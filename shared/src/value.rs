// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Resource values.
//!
//! A resource carries one of the primitive LwM2M data types, a chunked
//! byte/character payload (reassembled across CoAP blocks), or an external
//! user-owned stream that the engine reads through a callback.

use std::fmt;
use std::rc::Rc;

use crate::path::{Iid, Oid, UriPath};

/// Declared type of a resource, as written in its spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Bytes,
    String,
    Int,
    Double,
    Bool,
    ObjLnk,
    Uint,
    Time,
    ExternalBytes,
    ExternalString,
}

/// An Object-link value: a reference to `/oid/iid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjLink {
    pub oid: Oid,
    pub iid: Iid,
}

/// One chunk of a byte or character payload.
///
/// `offset` is the chunk's position within the full value; a chunk whose
/// `offset + data.len()` equals `full_length` is the final one. Fully
/// assembled values have `offset == 0` and `full_length == Some(data.len())`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BytesChunk {
    pub data: Vec<u8>,
    pub offset: usize,
    pub full_length: Option<usize>,
}

impl BytesChunk {
    /// A complete, single-chunk value.
    pub fn whole(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let full_length = Some(data.len());
        BytesChunk {
            data,
            offset: 0,
            full_length,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.full_length
            .map_or(false, |full| self.offset + self.data.len() == full)
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// A read-only stream owned by the user, surfaced to the engine as a
/// resource value. The engine never writes through this interface.
pub trait ExternalData {
    /// Total length, when known up front.
    fn len(&self) -> Option<usize>;

    /// Copies up to `buf.len()` bytes starting at `offset`; returns the
    /// number of bytes copied (0 at end of stream).
    fn read(&self, offset: usize, buf: &mut [u8]) -> anyhow::Result<usize>;
}

/// Tagged union over every value a resource can hold.
#[derive(Clone, Default)]
pub enum ResourceValue {
    #[default]
    Null,
    Int(i64),
    Uint(u64),
    Double(f64),
    Bool(bool),
    /// Unix timestamp, seconds.
    Time(i64),
    ObjLnk(ObjLink),
    Bytes(BytesChunk),
    String(BytesChunk),
    ExternalBytes(Rc<dyn ExternalData>),
    ExternalString(Rc<dyn ExternalData>),
}

impl ResourceValue {
    pub fn string(s: impl Into<String>) -> Self {
        ResourceValue::String(BytesChunk::whole(s.into().into_bytes()))
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        ResourceValue::Bytes(BytesChunk::whole(b))
    }

    /// The declared type this value satisfies; `None` for `Null`.
    pub fn resource_type(&self) -> Option<ResourceType> {
        match self {
            ResourceValue::Null => None,
            ResourceValue::Int(_) => Some(ResourceType::Int),
            ResourceValue::Uint(_) => Some(ResourceType::Uint),
            ResourceValue::Double(_) => Some(ResourceType::Double),
            ResourceValue::Bool(_) => Some(ResourceType::Bool),
            ResourceValue::Time(_) => Some(ResourceType::Time),
            ResourceValue::ObjLnk(_) => Some(ResourceType::ObjLnk),
            ResourceValue::Bytes(_) => Some(ResourceType::Bytes),
            ResourceValue::String(_) => Some(ResourceType::String),
            ResourceValue::ExternalBytes(_) => Some(ResourceType::ExternalBytes),
            ResourceValue::ExternalString(_) => Some(ResourceType::ExternalString),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ResourceValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ResourceValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            ResourceValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_objlnk(&self) -> Option<ObjLink> {
        match self {
            ResourceValue::ObjLnk(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_chunk(&self) -> Option<&BytesChunk> {
        match self {
            ResourceValue::Bytes(c) | ResourceValue::String(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResourceValue::String(c) => c.as_str(),
            _ => None,
        }
    }
}

impl fmt::Debug for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceValue::Null => write!(f, "Null"),
            ResourceValue::Int(v) => write!(f, "Int({})", v),
            ResourceValue::Uint(v) => write!(f, "Uint({})", v),
            ResourceValue::Double(v) => write!(f, "Double({})", v),
            ResourceValue::Bool(v) => write!(f, "Bool({})", v),
            ResourceValue::Time(v) => write!(f, "Time({})", v),
            ResourceValue::ObjLnk(v) => write!(f, "ObjLnk({}:{})", v.oid, v.iid),
            ResourceValue::Bytes(c) => write!(f, "Bytes({} bytes @{})", c.len(), c.offset),
            ResourceValue::String(c) => match c.as_str() {
                Some(s) => write!(f, "String({:?})", s),
                None => write!(f, "String({} bytes @{})", c.len(), c.offset),
            },
            ResourceValue::ExternalBytes(_) => write!(f, "ExternalBytes(..)"),
            ResourceValue::ExternalString(_) => write!(f, "ExternalString(..)"),
        }
    }
}

/// External streams are opaque and never compare equal.
impl PartialEq for ResourceValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ResourceValue::Null, ResourceValue::Null) => true,
            (ResourceValue::Int(a), ResourceValue::Int(b)) => a == b,
            (ResourceValue::Uint(a), ResourceValue::Uint(b)) => a == b,
            (ResourceValue::Double(a), ResourceValue::Double(b)) => a == b,
            (ResourceValue::Bool(a), ResourceValue::Bool(b)) => a == b,
            (ResourceValue::Time(a), ResourceValue::Time(b)) => a == b,
            (ResourceValue::ObjLnk(a), ResourceValue::ObjLnk(b)) => a == b,
            (ResourceValue::Bytes(a), ResourceValue::Bytes(b)) => a == b,
            (ResourceValue::String(a), ResourceValue::String(b)) => a == b,
            _ => false,
        }
    }
}

/// One `(path, declared type, value)` triple exchanged between the engine
/// and the codec. The declared type disambiguates `Null` and lets the codec
/// pick the wire representation before the value is materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub path: UriPath,
    pub rtype: ResourceType,
    pub value: ResourceValue,
}

impl Record {
    pub fn new(path: UriPath, rtype: ResourceType, value: ResourceValue) -> Self {
        Record { path, rtype, value }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn whole_chunk_is_last() {
        let chunk = BytesChunk::whole(b"abc".to_vec());
        assert!(chunk.is_last());
        assert_eq!(chunk.full_length, Some(3));
    }

    #[test]
    fn partial_chunk_is_not_last() {
        let chunk = BytesChunk {
            data: b"ab".to_vec(),
            offset: 0,
            full_length: Some(4),
        };
        assert!(!chunk.is_last());
        let tail = BytesChunk {
            data: b"cd".to_vec(),
            offset: 2,
            full_length: Some(4),
        };
        assert!(tail.is_last());
    }

    #[test]
    fn type_of_value() {
        assert_eq!(ResourceValue::Null.resource_type(), None);
        assert_eq!(
            ResourceValue::Double(1.0).resource_type(),
            Some(ResourceType::Double)
        );
        assert_eq!(
            ResourceValue::string("x").resource_type(),
            Some(ResourceType::String)
        );
    }

    #[test]
    fn external_values_never_compare_equal() {
        struct Zeroes;
        impl ExternalData for Zeroes {
            fn len(&self) -> Option<usize> {
                Some(0)
            }
            fn read(&self, _offset: usize, _buf: &mut [u8]) -> anyhow::Result<usize> {
                Ok(0)
            }
        }
        let a = ResourceValue::ExternalBytes(Rc::new(Zeroes));
        let b = a.clone();
        assert!(a != b);
    }
}
