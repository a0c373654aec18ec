//! LwM2M URI paths.
//!
//! A path addresses up to four levels of the data model:
//! `/` (root), `/oid`, `/oid/iid`, `/oid/iid/rid`, `/oid/iid/rid/riid`.
//! Identifiers are 16-bit; [`ID_INVALID`] (`0xFFFF`) never addresses a live
//! entity.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Object identifier.
pub type Oid = u16;
/// Object-instance identifier.
pub type Iid = u16;
/// Resource identifier.
pub type Rid = u16;
/// Resource-instance identifier.
pub type Riid = u16;

/// Reserved identifier value. Never assigned to a live entity; engine APIs
/// express "no id" as `Option::None` instead of leaking this sentinel.
pub const ID_INVALID: u16 = 0xFFFF;

/// How many components of a [`UriPath`] are significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathLevel {
    Root = 0,
    Object = 1,
    Instance = 2,
    Resource = 3,
    ResourceInstance = 4,
}

/// A tagged 4-tuple `(oid, iid, rid, riid)` with an explicit depth.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct UriPath {
    ids: [u16; 4],
    len: u8,
}

impl UriPath {
    pub const fn root() -> Self {
        UriPath {
            ids: [ID_INVALID; 4],
            len: 0,
        }
    }

    pub const fn object(oid: Oid) -> Self {
        UriPath {
            ids: [oid, ID_INVALID, ID_INVALID, ID_INVALID],
            len: 1,
        }
    }

    pub const fn instance(oid: Oid, iid: Iid) -> Self {
        UriPath {
            ids: [oid, iid, ID_INVALID, ID_INVALID],
            len: 2,
        }
    }

    pub const fn resource(oid: Oid, iid: Iid, rid: Rid) -> Self {
        UriPath {
            ids: [oid, iid, rid, ID_INVALID],
            len: 3,
        }
    }

    pub const fn resource_instance(oid: Oid, iid: Iid, rid: Rid, riid: Riid) -> Self {
        UriPath {
            ids: [oid, iid, rid, riid],
            len: 4,
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn level(&self) -> PathLevel {
        match self.len {
            0 => PathLevel::Root,
            1 => PathLevel::Object,
            2 => PathLevel::Instance,
            3 => PathLevel::Resource,
            _ => PathLevel::ResourceInstance,
        }
    }

    /// True when the path has at least `level` components.
    pub fn has(&self, level: PathLevel) -> bool {
        self.level() >= level
    }

    /// True when the path has exactly `level` components.
    pub fn is(&self, level: PathLevel) -> bool {
        self.level() == level
    }

    pub fn oid(&self) -> Option<Oid> {
        (self.len >= 1).then(|| self.ids[0])
    }

    pub fn iid(&self) -> Option<Iid> {
        (self.len >= 2).then(|| self.ids[1])
    }

    pub fn rid(&self) -> Option<Rid> {
        (self.len >= 3).then(|| self.ids[2])
    }

    pub fn riid(&self) -> Option<Riid> {
        (self.len >= 4).then(|| self.ids[3])
    }

    /// Truncates the path to at most `level` components.
    pub fn truncated(&self, level: PathLevel) -> UriPath {
        let mut out = *self;
        let keep = (level as u8).min(out.len);
        for idx in keep as usize..4 {
            out.ids[idx] = ID_INVALID;
        }
        out.len = keep;
        out
    }

    /// True when `base` is a (possibly equal) prefix of `self`.
    pub fn starts_with(&self, base: &UriPath) -> bool {
        if base.len > self.len {
            return false;
        }
        self.ids[..base.len as usize] == base.ids[..base.len as usize]
    }
}

impl Default for UriPath {
    fn default() -> Self {
        UriPath::root()
    }
}

impl fmt::Display for UriPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 0 {
            return write!(f, "/");
        }
        for id in &self.ids[..self.len as usize] {
            write!(f, "/{}", id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for UriPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UriPath({})", self)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathParseError {
    #[error("path must start with '/'")]
    MissingSlash,
    #[error("path has more than four components")]
    TooDeep,
    #[error("invalid path component: {0}")]
    InvalidComponent(String),
}

impl FromStr for UriPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('/').ok_or(PathParseError::MissingSlash)?;
        if rest.is_empty() {
            return Ok(UriPath::root());
        }
        let mut ids = [ID_INVALID; 4];
        let mut len = 0u8;
        for part in rest.split('/') {
            if len == 4 {
                return Err(PathParseError::TooDeep);
            }
            let id: u16 = part
                .parse()
                .map_err(|_| PathParseError::InvalidComponent(part.to_string()))?;
            ids[len as usize] = id;
            len += 1;
        }
        Ok(UriPath { ids, len })
    }
}
