// Copyright 2021-2023 Protocol Labs
// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Shared data types for the LwM2M device data-model engine: URI paths,
//! resource values, error kinds, message envelopes and notification
//! attributes. This crate holds no engine logic; everything here is a plain
//! value type that both the engine and its collaborators (codec, transport)
//! can agree on.

pub mod attr;
pub mod error;
pub mod message;
pub mod path;
pub mod value;

pub use error::{DmError, Result};
pub use path::{Iid, Oid, PathLevel, Rid, Riid, UriPath, ID_INVALID};
pub use value::{BytesChunk, ObjLink, Record, ResourceType, ResourceValue};

/// LwM2M Security object.
pub const OID_SECURITY: Oid = 0;
/// LwM2M Server object.
pub const OID_SERVER: Oid = 1;
/// LwM2M Access Control object.
pub const OID_ACCESS_CONTROL: Oid = 2;
/// LwM2M Device object.
pub const OID_DEVICE: Oid = 3;
/// LwM2M Firmware Update object.
pub const OID_FIRMWARE_UPDATE: Oid = 5;
/// OSCORE object.
pub const OID_OSCORE: Oid = 21;

/// Security object resources the engine itself consults when it
/// cross-references server accounts.
pub const SECURITY_RID_SERVER_URI: Rid = 0;
pub const SECURITY_RID_BOOTSTRAP_SERVER: Rid = 1;
pub const SECURITY_RID_SSID: Rid = 10;
pub const SECURITY_RID_OSCORE: Rid = 17;
/// Short Server ID resource of the Server object.
pub const SERVER_RID_SSID: Rid = 0;
