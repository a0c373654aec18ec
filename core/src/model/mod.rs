// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The data-model node types: Objects, Instances, Resources.
//!
//! All nodes are owned by the registry; user code reaches them through
//! borrowed views and identifies them by `(oid, iid, rid, riid)`. Lists are
//! kept strictly ascending by identifier at every level.

use std::rc::Rc;

use lwm2m_shared::{DmError, Iid, Oid, Result, Rid, ID_INVALID};

mod handlers;
mod resource;

pub use handlers::{
    ExecuteHook, ObjectHandlers, OpOutcome, ReadHook, ResInstHook, ResRef, ResourceHooks,
    WriteHook,
};
pub use resource::{
    MultiResource, ResOperation, Resource, ResourceInstance, ResourceKind, ResourceSpec,
    ValueCell,
};

/// One instance of an Object; resources are ordered by rid.
#[derive(Debug, Clone)]
pub struct Instance {
    iid: Iid,
    resources: Vec<Resource>,
}

impl Instance {
    pub fn new(iid: Iid) -> Self {
        debug_assert!(iid != ID_INVALID);
        Instance {
            iid,
            resources: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.add_resource(resource);
        self
    }

    /// Inserts keeping rid order. Instances are assembled by trusted setup
    /// code, not by the wire; a duplicate rid is a bug in that code and
    /// panics.
    pub fn add_resource(&mut self, resource: Resource) {
        match self
            .resources
            .binary_search_by_key(&resource.rid(), |res| res.rid())
        {
            Ok(_) => panic!("duplicate rid {}", resource.rid()),
            Err(idx) => self.resources.insert(idx, resource),
        }
    }

    pub fn iid(&self) -> Iid {
        self.iid
    }

    pub(crate) fn set_iid(&mut self, iid: Iid) {
        self.iid = iid;
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub(crate) fn resources_mut(&mut self) -> &mut [Resource] {
        &mut self.resources
    }

    pub fn resource(&self, rid: Rid) -> Option<&Resource> {
        self.position(rid).map(|idx| &self.resources[idx])
    }

    pub fn position(&self, rid: Rid) -> Option<usize> {
        self.resources
            .binary_search_by_key(&rid, |res| res.rid())
            .ok()
    }
}

/// A registered Object: ordered instances, a capacity bound, an optional
/// version string and optional transaction handlers.
#[derive(Clone)]
pub struct Object {
    oid: Oid,
    version: Option<String>,
    instances: Vec<Instance>,
    capacity: u16,
    handlers: Option<Rc<dyn ObjectHandlers>>,
    pub(crate) in_transaction: bool,
}

impl Object {
    pub fn new(oid: Oid, capacity: u16) -> Self {
        debug_assert!(capacity != ID_INVALID);
        Object {
            oid,
            version: None,
            instances: Vec::new(),
            capacity,
            handlers: None,
            in_transaction: false,
        }
    }

    /// Object version advertised by Register and Discover, "X.Y".
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        debug_assert!(version_is_valid(&version), "bad version {:?}", version);
        self.version = Some(version);
        self
    }

    pub fn with_handlers(mut self, handlers: Rc<dyn ObjectHandlers>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Adds an instance during setup, keeping iid order.
    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.insert_instance(instance)
            .expect("instance setup failed");
        self
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub(crate) fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    pub fn instance(&self, iid: Iid) -> Option<&Instance> {
        self.position(iid).map(|idx| &self.instances[idx])
    }

    pub fn position(&self, iid: Iid) -> Option<usize> {
        self.instances
            .binary_search_by_key(&iid, |inst| inst.iid())
            .ok()
    }

    pub fn handlers(&self) -> Option<Rc<dyn ObjectHandlers>> {
        self.handlers.clone()
    }

    /// Smallest iid not yet in use.
    pub fn free_iid(&self) -> Iid {
        for idx in 0..ID_INVALID {
            let taken = self
                .instances
                .get(idx as usize)
                .map_or(false, |inst| inst.iid() == idx);
            if !taken {
                return idx;
            }
        }
        unreachable!("object holds more than 65534 instances")
    }

    pub(crate) fn insert_instance(&mut self, instance: Instance) -> Result<usize> {
        if self.instances.len() >= self.capacity as usize {
            log::error!("maximum number of instances reached for /{}", self.oid);
            return Err(DmError::Memory);
        }
        match self
            .instances
            .binary_search_by_key(&instance.iid(), |inst| inst.iid())
        {
            Ok(_) => {
                log::error!("instance /{}/{} already exists", self.oid, instance.iid());
                Err(DmError::MethodNotAllowed)
            }
            Err(idx) => {
                self.instances.insert(idx, instance);
                Ok(idx)
            }
        }
    }

    pub(crate) fn remove_instance(&mut self, iid: Iid) -> Result<Instance> {
        let idx = self.position(iid).ok_or(DmError::NotFound)?;
        Ok(self.instances.remove(idx))
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("oid", &self.oid)
            .field("version", &self.version)
            .field("instances", &self.instances.len())
            .field("capacity", &self.capacity)
            .field("handlers", &self.handlers.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

/// Object versions are "major.minor" with single-digit-or-more decimal
/// components.
fn version_is_valid(version: &str) -> bool {
    let mut parts = version.split('.');
    let ok = |part: Option<&str>| {
        part.map_or(false, |p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    };
    ok(parts.next()) && ok(parts.next()) && parts.next().is_none()
}

#[cfg(test)]
mod tests {
    use lwm2m_shared::value::ResourceValue;
    use lwm2m_shared::ResourceType;
    use pretty_assertions::assert_eq;

    use super::*;

    fn plain_resource(rid: Rid) -> Resource {
        Resource::single(
            ResourceSpec::new(rid, ResOperation::ReadWrite, ResourceType::Int),
            ValueCell::new(ResourceValue::Int(0)),
        )
    }

    #[test]
    fn resources_kept_sorted() {
        let mut inst = Instance::new(0);
        for rid in [9, 1, 5] {
            inst.add_resource(plain_resource(rid));
        }
        let rids: Vec<_> = inst.resources().iter().map(|res| res.rid()).collect();
        assert_eq!(rids, vec![1, 5, 9]);
        assert!(inst.resource(5).is_some());
        assert!(inst.resource(2).is_none());
    }

    #[test]
    fn instances_kept_sorted() {
        let obj = Object::new(42, 8)
            .with_instance(Instance::new(4))
            .with_instance(Instance::new(1));
        let iids: Vec<_> = obj.instances().iter().map(|inst| inst.iid()).collect();
        assert_eq!(iids, vec![1, 4]);
    }

    #[test]
    fn free_iid_fills_gaps() {
        let obj = Object::new(42, 8)
            .with_instance(Instance::new(0))
            .with_instance(Instance::new(2));
        assert_eq!(obj.free_iid(), 1);
        let obj = Object::new(42, 8)
            .with_instance(Instance::new(0))
            .with_instance(Instance::new(1));
        assert_eq!(obj.free_iid(), 2);
        assert_eq!(Object::new(42, 8).free_iid(), 0);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut obj = Object::new(42, 1).with_instance(Instance::new(0));
        assert_eq!(
            obj.insert_instance(Instance::new(1)).unwrap_err(),
            DmError::Memory
        );
    }

    #[test]
    fn duplicate_iid_rejected() {
        let mut obj = Object::new(42, 4).with_instance(Instance::new(0));
        assert_eq!(
            obj.insert_instance(Instance::new(0)).unwrap_err(),
            DmError::MethodNotAllowed
        );
    }

    #[test]
    fn version_format() {
        assert!(version_is_valid("1.1"));
        assert!(version_is_valid("10.23"));
        assert!(!version_is_valid("1"));
        assert!(!version_is_valid("1.1.1"));
        assert!(!version_is_valid("a.b"));
    }
}
