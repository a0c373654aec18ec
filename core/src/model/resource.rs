// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Resources and resource instances.

use lwm2m_shared::value::{BytesChunk, ResourceValue};
use lwm2m_shared::{DmError, ResourceType, Result, Rid, Riid, ID_INVALID};

use super::handlers::ResourceHooks;

/// What a server may do with a resource. The `Multi` variants hold a keyed
/// set of resource instances; `Execute` resources hold no value at all;
/// `BootstrapReadWrite` is accessible only inside bootstrap transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResOperation {
    Read,
    Write,
    ReadWrite,
    ReadMulti,
    WriteMulti,
    ReadWriteMulti,
    Execute,
    BootstrapReadWrite,
}

impl ResOperation {
    pub fn is_multi_instance(self) -> bool {
        matches!(
            self,
            ResOperation::ReadMulti | ResOperation::WriteMulti | ResOperation::ReadWriteMulti
        )
    }

    pub fn is_readable(self, bootstrap: bool) -> bool {
        match self {
            ResOperation::Read
            | ResOperation::ReadMulti
            | ResOperation::ReadWrite
            | ResOperation::ReadWriteMulti => true,
            ResOperation::BootstrapReadWrite => bootstrap,
            _ => false,
        }
    }

    pub fn is_writable(self, bootstrap: bool) -> bool {
        match self {
            ResOperation::Write
            | ResOperation::WriteMulti
            | ResOperation::ReadWrite
            | ResOperation::ReadWriteMulti => true,
            ResOperation::BootstrapReadWrite => bootstrap,
            _ => false,
        }
    }
}

/// Immutable resource descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    pub rid: Rid,
    pub operation: ResOperation,
    /// `None` only for executable resources.
    pub value_type: Option<ResourceType>,
}

impl ResourceSpec {
    pub fn new(rid: Rid, operation: ResOperation, value_type: ResourceType) -> Self {
        debug_assert!(operation != ResOperation::Execute);
        ResourceSpec {
            rid,
            operation,
            value_type: Some(value_type),
        }
    }

    pub fn executable(rid: Rid) -> Self {
        ResourceSpec {
            rid,
            operation: ResOperation::Execute,
            value_type: None,
        }
    }
}

/// Owned backing store for one resource value.
#[derive(Debug, Clone, Default)]
pub struct ValueCell {
    value: ResourceValue,
    /// Upper bound for assembled byte/string payloads; `None` is unbounded.
    buffer_cap: Option<usize>,
}

impl ValueCell {
    pub fn new(value: ResourceValue) -> Self {
        ValueCell {
            value,
            buffer_cap: None,
        }
    }

    /// A cell whose byte/string payload may not grow beyond `cap` bytes.
    pub fn bounded(value: ResourceValue, cap: usize) -> Self {
        ValueCell {
            value,
            buffer_cap: Some(cap),
        }
    }

    pub fn value(&self) -> &ResourceValue {
        &self.value
    }

    pub fn set(&mut self, value: ResourceValue) {
        self.value = value;
    }

    pub(crate) fn reset(&mut self) {
        self.value = ResourceValue::Null;
    }

    /// Applies an incoming value, reassembling byte/string chunks at their
    /// offset. Chunks that would grow past the buffer bound fail `Memory`.
    pub(crate) fn write(&mut self, incoming: &ResourceValue) -> Result<()> {
        match incoming {
            ResourceValue::Bytes(chunk) => self.write_chunk(chunk, false),
            ResourceValue::String(chunk) => self.write_chunk(chunk, true),
            other => {
                self.value = other.clone();
                Ok(())
            }
        }
    }

    fn write_chunk(&mut self, chunk: &BytesChunk, is_string: bool) -> Result<()> {
        if let Some(cap) = self.buffer_cap {
            if chunk.offset + chunk.len() > cap {
                log::error!("resource buffer too small for incoming chunk");
                return Err(DmError::Memory);
            }
        }
        // A bootstrap write may target an external value without a hook in
        // place; there is nothing to store into, so the chunk is dropped.
        if matches!(
            self.value,
            ResourceValue::ExternalBytes(_) | ResourceValue::ExternalString(_)
        ) {
            log::debug!("dropping chunk written to external value without a write hook");
            return Ok(());
        }
        if !matches!(
            self.value,
            ResourceValue::Bytes(_) | ResourceValue::String(_)
        ) {
            self.value = if is_string {
                ResourceValue::String(BytesChunk::default())
            } else {
                ResourceValue::Bytes(BytesChunk::default())
            };
        }
        let stored = match &mut self.value {
            ResourceValue::Bytes(stored) | ResourceValue::String(stored) => stored,
            _ => return Err(DmError::Internal),
        };
        if chunk.offset == 0 {
            stored.data.clear();
            stored.full_length = None;
        }
        let end = chunk.offset + chunk.len();
        if stored.data.len() < end {
            stored.data.resize(end, 0);
        }
        stored.data[chunk.offset..end].copy_from_slice(&chunk.data);
        stored.offset = 0;
        if chunk.is_last() {
            stored.full_length = chunk.full_length;
        }
        Ok(())
    }
}

/// One instance of a multi-instance resource.
#[derive(Debug, Clone)]
pub struct ResourceInstance {
    riid: Riid,
    cell: ValueCell,
}

impl ResourceInstance {
    pub fn new(riid: Riid, cell: ValueCell) -> Self {
        debug_assert!(riid != ID_INVALID);
        ResourceInstance { riid, cell }
    }

    pub fn riid(&self) -> Riid {
        self.riid
    }

    pub fn cell(&self) -> &ValueCell {
        &self.cell
    }

    pub(crate) fn cell_mut(&mut self) -> &mut ValueCell {
        &mut self.cell
    }
}

/// The keyed resource-instance set of a multi-instance resource.
#[derive(Debug, Clone)]
pub struct MultiResource {
    instances: Vec<ResourceInstance>,
    capacity: u16,
}

impl MultiResource {
    pub fn with_capacity(capacity: u16) -> Self {
        debug_assert!(capacity != ID_INVALID);
        MultiResource {
            instances: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[ResourceInstance] {
        &self.instances
    }

    pub(crate) fn instances_mut(&mut self) -> &mut [ResourceInstance] {
        &mut self.instances
    }

    pub fn get(&self, riid: Riid) -> Option<&ResourceInstance> {
        self.position(riid).map(|idx| &self.instances[idx])
    }

    pub(crate) fn get_mut(&mut self, riid: Riid) -> Option<&mut ResourceInstance> {
        self.position(riid).map(move |idx| &mut self.instances[idx])
    }

    pub fn position(&self, riid: Riid) -> Option<usize> {
        self.instances
            .binary_search_by_key(&riid, |ri| ri.riid())
            .ok()
    }

    /// Inserts keeping riid order; fails `Memory` at capacity and `Logic`
    /// on a duplicate riid.
    pub(crate) fn insert(&mut self, instance: ResourceInstance) -> Result<usize> {
        if self.instances.len() >= self.capacity as usize {
            log::error!("no space for a new resource instance");
            return Err(DmError::Memory);
        }
        match self
            .instances
            .binary_search_by_key(&instance.riid(), |ri| ri.riid())
        {
            Ok(_) => Err(DmError::Logic),
            Err(idx) => {
                self.instances.insert(idx, instance);
                Ok(idx)
            }
        }
    }

    pub(crate) fn remove(&mut self, riid: Riid) -> Result<ResourceInstance> {
        let idx = self.position(riid).ok_or(DmError::NotFound)?;
        Ok(self.instances.remove(idx))
    }

    pub(crate) fn clear(&mut self) {
        self.instances.clear();
    }
}

/// Storage shape of a resource.
#[derive(Debug, Clone)]
pub enum ResourceKind {
    Single(ValueCell),
    Multi(MultiResource),
    /// Executable resources have no storage; their hook does the work.
    Executable,
}

/// One resource of an instance: an immutable spec, the storage matching the
/// spec's operation kind, and optional user hooks overriding storage access.
#[derive(Clone)]
pub struct Resource {
    spec: ResourceSpec,
    kind: ResourceKind,
    hooks: Option<ResourceHooks>,
}

impl Resource {
    pub fn single(spec: ResourceSpec, cell: ValueCell) -> Self {
        debug_assert!(!spec.operation.is_multi_instance());
        debug_assert!(spec.operation != ResOperation::Execute);
        Resource {
            spec,
            kind: ResourceKind::Single(cell),
            hooks: None,
        }
    }

    pub fn multi(spec: ResourceSpec, capacity: u16) -> Self {
        debug_assert!(spec.operation.is_multi_instance());
        Resource {
            spec,
            kind: ResourceKind::Multi(MultiResource::with_capacity(capacity)),
            hooks: None,
        }
    }

    pub fn executable(rid: Rid, hooks: ResourceHooks) -> Self {
        debug_assert!(hooks.execute.is_some());
        Resource {
            spec: ResourceSpec::executable(rid),
            kind: ResourceKind::Executable,
            hooks: Some(hooks),
        }
    }

    pub fn with_hooks(mut self, hooks: ResourceHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Adds a resource instance during setup, keeping riid order.
    pub fn with_res_instance(mut self, instance: ResourceInstance) -> Self {
        match &mut self.kind {
            ResourceKind::Multi(multi) => {
                multi.insert(instance).expect("resource setup failed");
            }
            _ => debug_assert!(false, "resource is not multi-instance"),
        }
        self
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn rid(&self) -> Rid {
        self.spec.rid
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ResourceKind {
        &mut self.kind
    }

    pub fn hooks(&self) -> Option<&ResourceHooks> {
        self.hooks.as_ref()
    }

    pub fn is_multi_instance(&self) -> bool {
        self.spec.operation.is_multi_instance()
    }

    /// Number of resource instances (1 for single-instance storage).
    pub fn instance_count(&self) -> usize {
        match &self.kind {
            ResourceKind::Multi(multi) => multi.len(),
            ResourceKind::Single(_) => 1,
            ResourceKind::Executable => 0,
        }
    }

    pub fn as_multi(&self) -> Option<&MultiResource> {
        match &self.kind {
            ResourceKind::Multi(multi) => Some(multi),
            _ => None,
        }
    }

    pub(crate) fn as_multi_mut(&mut self) -> Option<&mut MultiResource> {
        match &mut self.kind {
            ResourceKind::Multi(multi) => Some(multi),
            _ => None,
        }
    }

    pub fn single_cell(&self) -> Option<&ValueCell> {
        match &self.kind {
            ResourceKind::Single(cell) => Some(cell),
            _ => None,
        }
    }

    pub(crate) fn single_cell_mut(&mut self) -> Option<&mut ValueCell> {
        match &mut self.kind {
            ResourceKind::Single(cell) => Some(cell),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("spec", &self.spec)
            .field("kind", &self.kind)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}
