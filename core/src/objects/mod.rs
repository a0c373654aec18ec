// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Well-known objects built on top of the engine's public model API:
//! Security (0), Server (1), Device (3) and Firmware Update (5).
//!
//! Each keeps its instance state behind an `Rc<RefCell<..>>` shared by the
//! resource hooks and the object handlers; mutating transactions snapshot
//! the state in `operation_begin` and restore it when the transaction ends
//! in failure.

use std::collections::BTreeMap;

use lwm2m_shared::value::ResourceValue;
use lwm2m_shared::{DmError, Iid, Result};

pub mod device;
pub mod firmware;
pub mod security;
pub mod server;

pub use device::{device_object, DeviceInit};
pub use firmware::{FirmwareBackend, FirmwareObject, UpdateResult, UpdateState};
pub use security::{SecurityInstance, SecurityObject};
pub use server::{ServerEvents, ServerInstance, ServerInstanceInit, ServerObject};

/// Smallest iid not present in an instance-state map.
pub(crate) fn free_iid<V>(instances: &BTreeMap<Iid, V>) -> Iid {
    let mut candidate = 0;
    for iid in instances.keys() {
        if *iid != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

/// Applies a string chunk at its offset, bounded by `max_len` bytes.
pub(crate) fn write_str_chunk(
    target: &mut String,
    value: &ResourceValue,
    max_len: usize,
) -> Result<()> {
    let ResourceValue::String(chunk) = value else {
        return Err(DmError::BadRequest);
    };
    if chunk.offset + chunk.len() > max_len {
        log::error!("string value too long for this resource");
        return Err(DmError::Memory);
    }
    let mut bytes = std::mem::take(target).into_bytes();
    if chunk.offset == 0 {
        bytes.clear();
    }
    let end = chunk.offset + chunk.len();
    if bytes.len() < end {
        bytes.resize(end, 0);
    }
    bytes[chunk.offset..end].copy_from_slice(&chunk.data);
    *target = String::from_utf8(bytes).map_err(|_| DmError::BadRequest)?;
    Ok(())
}

/// Applies a byte chunk at its offset, bounded by `max_len` bytes.
pub(crate) fn write_bytes_chunk(
    target: &mut Vec<u8>,
    value: &ResourceValue,
    max_len: usize,
) -> Result<()> {
    let ResourceValue::Bytes(chunk) = value else {
        return Err(DmError::BadRequest);
    };
    if chunk.offset + chunk.len() > max_len {
        log::error!("byte value too long for this resource");
        return Err(DmError::Memory);
    }
    if chunk.offset == 0 {
        target.clear();
    }
    let end = chunk.offset + chunk.len();
    if target.len() < end {
        target.resize(end, 0);
    }
    target[chunk.offset..end].copy_from_slice(&chunk.data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use lwm2m_shared::value::BytesChunk;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn free_iid_fills_gaps() {
        let mut map: BTreeMap<Iid, ()> = BTreeMap::new();
        assert_eq!(free_iid(&map), 0);
        map.insert(0, ());
        map.insert(2, ());
        assert_eq!(free_iid(&map), 1);
        map.insert(1, ());
        assert_eq!(free_iid(&map), 3);
    }

    #[test]
    fn string_chunks_reassemble() {
        let mut target = String::new();
        let first = ResourceValue::String(BytesChunk {
            data: b"co".to_vec(),
            offset: 0,
            full_length: Some(4),
        });
        let second = ResourceValue::String(BytesChunk {
            data: b"ap".to_vec(),
            offset: 2,
            full_length: Some(4),
        });
        write_str_chunk(&mut target, &first, 8).unwrap();
        write_str_chunk(&mut target, &second, 8).unwrap();
        assert_eq!(target, "coap");
    }

    #[test]
    fn oversized_chunk_is_memory() {
        let mut target = String::new();
        let err = write_str_chunk(&mut target, &ResourceValue::string("too long"), 4).unwrap_err();
        assert_eq!(err, DmError::Memory);
    }
}
