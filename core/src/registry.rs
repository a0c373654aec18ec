// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The registry: the ordered set of registered Objects, plus the locator
//! that walks a URI path down to the addressed entity.
//!
//! The registry never starts or ends transactions itself; the engine gates
//! registration on its own in-progress flag and borrows the registry
//! exclusively for the duration of an operation.

use lwm2m_shared::{DmError, Oid, Result, UriPath};

use crate::model::{Instance, Object, Resource};

/// Index-based reference to a located entity. Indices are only valid until
/// the next structural mutation; the engine re-locates after inserts and
/// removals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntityIndices {
    pub obj: usize,
    pub inst: Option<usize>,
    pub res: Option<usize>,
    pub res_inst: Option<usize>,
}

impl EntityIndices {
    pub(crate) fn object(obj: usize) -> Self {
        EntityIndices {
            obj,
            inst: None,
            res: None,
            res_inst: None,
        }
    }
}

/// Ordered-by-oid Object set with a fixed capacity.
pub struct Registry {
    objects: Vec<Object>,
    max_objects: usize,
}

impl Registry {
    pub fn with_capacity(max_objects: usize) -> Self {
        Registry {
            objects: Vec::with_capacity(max_objects),
            max_objects,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub(crate) fn objects_mut(&mut self) -> &mut [Object] {
        &mut self.objects
    }

    pub fn find(&self, oid: Oid) -> Option<&Object> {
        self.position(oid).map(|idx| &self.objects[idx])
    }

    pub(crate) fn find_mut(&mut self, oid: Oid) -> Option<&mut Object> {
        self.position(oid).map(move |idx| &mut self.objects[idx])
    }

    pub fn position(&self, oid: Oid) -> Option<usize> {
        self.objects
            .binary_search_by_key(&oid, |obj| obj.oid())
            .ok()
    }

    /// Inserts an Object keeping oid order. Duplicates are `Logic`, a full
    /// registry is `Memory`. In debug builds the Object is checked against
    /// the structural invariants first.
    pub(crate) fn insert(&mut self, mut object: Object) -> Result<()> {
        #[cfg(debug_assertions)]
        check_object(&object)?;

        if self.objects.len() >= self.max_objects {
            log::error!("no space for a new object");
            return Err(DmError::Memory);
        }
        match self
            .objects
            .binary_search_by_key(&object.oid(), |obj| obj.oid())
        {
            Ok(_) => {
                log::error!("object {} already registered", object.oid());
                Err(DmError::Logic)
            }
            Err(idx) => {
                object.in_transaction = false;
                self.objects.insert(idx, object);
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&mut self, oid: Oid) -> Result<Object> {
        match self.position(oid) {
            Some(idx) => Ok(self.objects.remove(idx)),
            None => {
                log::error!("object {} not found", oid);
                Err(DmError::NotFound)
            }
        }
    }

    /// Walks `path` down to its depth. A missing entity at any level is
    /// `NotFound`; so is a resource-instance component on a single-instance
    /// resource.
    pub(crate) fn locate(&self, path: &UriPath) -> Result<EntityIndices> {
        let oid = path.oid().ok_or(DmError::InputArg)?;
        let obj_idx = self.position(oid).ok_or_else(|| {
            log::error!("object not found in data model: {}", path);
            DmError::NotFound
        })?;
        self.locate_within(obj_idx, path)
    }

    /// Like [`Registry::locate`] with the Object already resolved.
    pub(crate) fn locate_within(&self, obj_idx: usize, path: &UriPath) -> Result<EntityIndices> {
        let obj = &self.objects[obj_idx];
        let mut found = EntityIndices::object(obj_idx);

        let Some(iid) = path.iid() else {
            return Ok(found);
        };
        let inst_idx = obj.position(iid).ok_or_else(|| not_found(path))?;
        found.inst = Some(inst_idx);

        let Some(rid) = path.rid() else {
            return Ok(found);
        };
        let inst = &obj.instances()[inst_idx];
        let res_idx = inst.position(rid).ok_or_else(|| not_found(path))?;
        found.res = Some(res_idx);

        let Some(riid) = path.riid() else {
            return Ok(found);
        };
        let res = &inst.resources()[res_idx];
        let Some(multi) = res.as_multi() else {
            log::error!("resource is not multi-instance: {}", path);
            return Err(DmError::NotFound);
        };
        let ri_idx = multi.position(riid).ok_or_else(|| not_found(path))?;
        found.res_inst = Some(ri_idx);
        Ok(found)
    }

    pub(crate) fn object_at(&self, entity: &EntityIndices) -> &Object {
        &self.objects[entity.obj]
    }

    pub(crate) fn object_at_mut(&mut self, entity: &EntityIndices) -> &mut Object {
        &mut self.objects[entity.obj]
    }

    pub(crate) fn instance_at(&self, entity: &EntityIndices) -> Option<&Instance> {
        entity
            .inst
            .map(|idx| &self.objects[entity.obj].instances()[idx])
    }

    pub(crate) fn resource_at(&self, entity: &EntityIndices) -> Option<&Resource> {
        let inst = self.instance_at(entity)?;
        entity.res.map(|idx| &inst.resources()[idx])
    }

    pub(crate) fn resource_at_mut(&mut self, entity: &EntityIndices) -> Option<&mut Resource> {
        let inst_idx = entity.inst?;
        let res_idx = entity.res?;
        Some(&mut self.objects[entity.obj].instances_mut()[inst_idx].resources_mut()[res_idx])
    }
}

fn not_found(path: &UriPath) -> DmError {
    log::error!("entity not found in data model: {}", path);
    DmError::NotFound
}

/// Structural invariant check used at registration time in debug builds.
#[cfg(debug_assertions)]
pub(crate) fn check_object(obj: &Object) -> Result<()> {
    use lwm2m_shared::ID_INVALID;

    if obj.instance_count() > obj.capacity() as usize || obj.capacity() == ID_INVALID {
        log::error!("incorrectly defined object {}", obj.oid());
        return Err(DmError::InputArg);
    }
    let mut last_iid = None;
    for inst in obj.instances() {
        if inst.iid() == ID_INVALID || Some(inst.iid()) <= last_iid {
            log::error!("incorrectly defined object {}", obj.oid());
            return Err(DmError::InputArg);
        }
        last_iid = Some(inst.iid());
        check_instance(inst)?;
    }
    Ok(())
}

#[cfg(debug_assertions)]
pub(crate) fn check_instance(inst: &Instance) -> Result<()> {
    use lwm2m_shared::ID_INVALID;

    let mut last_rid = None;
    for res in inst.resources() {
        if res.rid() == ID_INVALID || Some(res.rid()) <= last_rid {
            log::error!("incorrectly defined instance {}", inst.iid());
            return Err(DmError::InputArg);
        }
        last_rid = Some(res.rid());
        check_resource(res)?;
    }
    Ok(())
}

#[cfg(debug_assertions)]
fn check_resource(res: &Resource) -> Result<()> {
    use lwm2m_shared::ID_INVALID;

    use crate::model::ResourceKind;

    let bad = |msg: &str| {
        log::error!("incorrectly defined resource {}: {}", res.rid(), msg);
        Err(DmError::InputArg)
    };
    match res.kind() {
        ResourceKind::Executable => {
            if res.hooks().map_or(true, |hooks| hooks.execute.is_none()) {
                return bad("executable resource without an execute hook");
            }
        }
        ResourceKind::Single(_) => {
            if res.spec().value_type.is_none() {
                return bad("storage-backed resource without a declared type");
            }
        }
        ResourceKind::Multi(multi) => {
            if res.spec().value_type.is_none() {
                return bad("storage-backed resource without a declared type");
            }
            if multi.len() > multi.capacity() as usize || multi.capacity() == ID_INVALID {
                return bad("resource-instance count exceeds capacity");
            }
            let mut last_riid = None;
            for ri in multi.instances() {
                if ri.riid() == ID_INVALID || Some(ri.riid()) <= last_riid {
                    return bad("resource instances out of order");
                }
                last_riid = Some(ri.riid());
            }
        }
    }
    let is_multi_kind = matches!(res.kind(), ResourceKind::Multi(_));
    if res.spec().operation.is_multi_instance() != is_multi_kind {
        return bad("storage shape does not match the declared operation");
    }
    Ok(())
}
