//! Write-Replace and Write-Update ingestion.
//!
//! Replace wipes the target first (instance reset at depth OI, emptying of
//! the multi-resource at depth OIR); Update mutates in place. The
//! dispatcher drives ingestion entry by entry; each entry is checked
//! against the transaction's base path, the resource's writability and its
//! declared type, then applied through the resource's write hook or the
//! owned storage.

use lwm2m_shared::message::Operation;
use lwm2m_shared::value::Record;
use lwm2m_shared::{DmError, PathLevel, ResourceType, Result, UriPath};

use crate::model::{ResRef, ResourceInstance, ResourceKind, ValueCell};
use crate::registry::EntityIndices;

use super::{DataModel, OpCtx, WriteCtx};

impl DataModel {
    pub(crate) fn begin_write(&mut self, path: &UriPath) -> Result<()> {
        if !path.has(PathLevel::Instance) {
            log::error!("write can't target {}", path);
            return Err(self.fail(DmError::InputArg));
        }
        self.op.transactional = true;
        self.op.ctx = OpCtx::Write(WriteCtx {
            base: *path,
            ..WriteCtx::default()
        });

        let Some(oid) = path.oid() else {
            return Err(self.fail(DmError::InputArg));
        };
        let located = self.locate_and_begin(oid);
        let obj_idx = self.latch(located)?;

        // A bootstrap Replace of a missing instance creates it on the fly.
        let located = self.registry.locate_within(obj_idx, path);
        let entity = match located {
            Err(DmError::NotFound)
                if self.op.bootstrap
                    && self.op.operation == Some(Operation::WriteReplace)
                    && path.is(PathLevel::Instance) =>
            {
                self.op.entity = Some(EntityIndices::object(obj_idx));
                self.create_object_instance(path.iid())?;
                return Ok(());
            }
            other => self.latch(other)?,
        };
        self.op.entity = Some(entity);

        if self.op.operation == Some(Operation::WriteReplace) {
            if path.is(PathLevel::Instance) {
                let reset = self.reset_instance(&entity);
                self.latch(reset)?;
            } else if path.is(PathLevel::Resource) {
                let emptied = self.empty_multi_resource(&entity);
                self.latch(emptied)?;
            }
        }
        Ok(())
    }

    /// Applies one decoded `(path, type, value)` entry to the in-flight
    /// Write or Create.
    pub fn write_entry(&mut self, record: &Record) -> Result<()> {
        self.expect_op(&[
            Operation::Create,
            Operation::WriteReplace,
            Operation::WritePartialUpdate,
        ])?;
        self.check_ongoing()?;

        if !record.path.has(PathLevel::Resource) {
            log::error!("invalid write path: {}", record.path);
            return Err(self.fail(DmError::BadRequest));
        }
        let base = match &self.op.ctx {
            OpCtx::Write(ctx) => ctx.base,
            _ => return Err(self.fail(DmError::Logic)),
        };
        if !record.path.starts_with(&base) {
            log::error!("write record {} outside of request path {}", record.path, base);
            return Err(self.fail(DmError::BadRequest));
        }

        // A Create without an explicit iid learns it from the first record.
        if self.op.operation == Some(Operation::Create) {
            let created = matches!(&self.op.ctx, OpCtx::Write(ctx) if ctx.creation_attempted);
            if !created {
                self.create_object_instance(record.path.iid())?;
            }
        }

        let resource_path = record.path.truncated(PathLevel::Resource);
        let located = self.registry.locate(&resource_path);
        let entity = self.latch(located)?;
        self.op.entity = Some(entity);

        let verified = self.verify_writable(&entity, record);
        self.latch(verified)?;

        let is_multi = self
            .registry
            .resource_at(&entity)
            .map_or(false, |res| res.is_multi_instance());
        let entity = if is_multi {
            let prepared = self.prepare_res_instance(&entity, record);
            self.latch(prepared)?
        } else {
            entity
        };

        let applied = self.apply_value(&entity, record);
        self.latch(applied)
    }

    fn verify_writable(&self, entity: &EntityIndices, record: &Record) -> Result<()> {
        let res = self.registry.resource_at(entity).ok_or(DmError::Logic)?;
        if !res.spec().operation.is_writable(self.op.bootstrap) {
            log::error!("resource {} is not writable", record.path);
            return Err(DmError::BadRequest);
        }
        let declared = res.spec().value_type.ok_or(DmError::BadRequest)?;
        if !type_matches(declared, record.rtype, self.op.bootstrap) {
            log::error!("invalid record type for {}", record.path);
            return Err(DmError::BadRequest);
        }
        if res.is_multi_instance() != record.path.has(PathLevel::ResourceInstance) {
            log::error!("writing to invalid path: {}", record.path);
            return Err(DmError::MethodNotAllowed);
        }
        Ok(())
    }

    /// Locates or creates the resource instance targeted by a multi write,
    /// keeping the list ordered by riid.
    fn prepare_res_instance(
        &mut self,
        entity: &EntityIndices,
        record: &Record,
    ) -> Result<EntityIndices> {
        let riid = record.path.riid().ok_or(DmError::BadRequest)?;
        let res = self.registry.resource_at(entity).ok_or(DmError::Logic)?;
        let rref = ResRef {
            oid: record.path.oid().ok_or(DmError::Logic)?,
            iid: record.path.iid().ok_or(DmError::Logic)?,
            rid: res.rid(),
            riid: Some(riid),
        };
        let created_hook = res.hooks().and_then(|hooks| hooks.instance_created.clone());

        let multi = self
            .registry
            .resource_at_mut(entity)
            .and_then(|res| res.as_multi_mut())
            .ok_or(DmError::Logic)?;
        if let Some(idx) = multi.position(riid) {
            return Ok(EntityIndices {
                res_inst: Some(idx),
                ..*entity
            });
        }
        let idx = multi.insert(ResourceInstance::new(riid, ValueCell::default()))?;
        if let Some(hook) = created_hook {
            if let Err(err) = hook(&rref) {
                log::error!("resource-instance creation hook failed: {}", err);
                let _ = multi.remove(riid);
                return Err(err);
            }
        }
        if let OpCtx::Write(ctx) = &mut self.op.ctx {
            ctx.created_res_insts.push(record.path);
        }
        Ok(EntityIndices {
            res_inst: Some(idx),
            ..*entity
        })
    }

    /// Stores the value through the resource's write hook, or into the
    /// owned cell, honoring chunk offsets.
    fn apply_value(&mut self, entity: &EntityIndices, record: &Record) -> Result<()> {
        let res = self.registry.resource_at(entity).ok_or(DmError::Logic)?;
        if let Some(write) = res.hooks().and_then(|hooks| hooks.write.clone()) {
            let rref = ResRef {
                oid: record.path.oid().ok_or(DmError::Logic)?,
                iid: record.path.iid().ok_or(DmError::Logic)?,
                rid: res.rid(),
                riid: record.path.riid(),
            };
            return write(&rref, &record.value);
        }
        let res = self.registry.resource_at_mut(entity).ok_or(DmError::Logic)?;
        match (entity.res_inst, res.kind_mut()) {
            (Some(idx), ResourceKind::Multi(multi)) => multi
                .instances_mut()
                .get_mut(idx)
                .ok_or(DmError::Logic)?
                .cell_mut()
                .write(&record.value),
            (None, ResourceKind::Single(cell)) => cell.write(&record.value),
            _ => Err(DmError::Internal),
        }
    }

    /// Write-Replace at instance depth: wipes the owned storage of every
    /// resource, then lets the object reset any state it keeps outside the
    /// tree.
    fn reset_instance(&mut self, entity: &EntityIndices) -> Result<()> {
        let obj = self.registry.object_at_mut(entity);
        let oid = obj.oid();
        let handlers = obj.handlers();
        let inst_idx = entity.inst.ok_or(DmError::Logic)?;
        let inst = &mut obj.instances_mut()[inst_idx];
        let iid = inst.iid();
        for res in inst.resources_mut() {
            match res.kind_mut() {
                ResourceKind::Single(cell) => cell.reset(),
                ResourceKind::Multi(multi) => multi.clear(),
                ResourceKind::Executable => {}
            }
        }
        if let Some(handlers) = handlers {
            handlers.instance_reset(oid, iid).map_err(|err| {
                log::error!("instance reset of /{}/{} failed: {}", oid, iid, err);
                err
            })?;
        }
        Ok(())
    }

    /// Write-Replace at resource depth on a multi-resource: deletes every
    /// resource instance before ingestion.
    fn empty_multi_resource(&mut self, entity: &EntityIndices) -> Result<()> {
        let res = self.registry.resource_at(entity).ok_or(DmError::Logic)?;
        if !res.is_multi_instance() {
            return Ok(());
        }
        loop {
            let res = self.registry.resource_at(entity).ok_or(DmError::Logic)?;
            let Some(last) = res
                .as_multi()
                .and_then(|multi| multi.instances().last())
                .map(|ri| ri.riid())
            else {
                return Ok(());
            };
            self.delete_res_instance_at(entity, last)?;
        }
    }
}

/// Bootstrap may push plain strings/bytes at externally-backed resources.
fn type_matches(declared: ResourceType, incoming: ResourceType, bootstrap: bool) -> bool {
    declared == incoming
        || (bootstrap
            && ((incoming == ResourceType::String && declared == ResourceType::ExternalString)
                || (incoming == ResourceType::Bytes && declared == ResourceType::ExternalBytes)))
}
