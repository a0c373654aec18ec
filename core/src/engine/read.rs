//! Read and Read-Composite.
//!
//! `begin` locates the requested entity, pre-counts the readable resource
//! instances underneath it and fixes the iteration start level; each
//! `get_read_entry` then emits one `(path, type, value)` record in
//! ascending iid/rid/riid order.

use lwm2m_shared::message::Operation;
use lwm2m_shared::value::{Record, ResourceValue};
use lwm2m_shared::{
    DmError, PathLevel, ResourceType, Result, UriPath, OID_ACCESS_CONTROL, OID_SERVER,
};

use crate::model::{Instance, Object, ResRef, Resource, ResourceSpec};
use crate::registry::{EntityIndices, Registry};

use super::{DataModel, IterCtx, OpCtx, Produced, ReadCtx};

impl DataModel {
    pub(crate) fn begin_read(&mut self, path: &UriPath) -> Result<()> {
        let Some(oid) = path.oid() else {
            log::error!("read needs at least an object path");
            return Err(self.fail(DmError::InputArg));
        };
        if self.op.bootstrap {
            if oid != OID_SERVER && oid != OID_ACCESS_CONTROL {
                log::error!("bootstrap server can't read object {}", oid);
                return Err(self.fail(DmError::MethodNotAllowed));
            }
            if path.has(PathLevel::Resource) {
                log::error!("bootstrap read can't target a resource");
                return Err(self.fail(DmError::MethodNotAllowed));
            }
        }

        let located = self.locate_and_begin(oid);
        let obj_idx = self.latch(located)?;
        let located = self.registry.locate_within(obj_idx, path);
        let entity = self.latch(located)?;
        self.op.entity = Some(entity);

        let bootstrap = self.op.bootstrap;
        let (level, total) = start_level_and_count(&self.registry, &entity, bootstrap);
        if total == 0 {
            log::error!("no readable resources under {}", path);
            return Err(self.fail(DmError::NotFound));
        }
        self.op.op_count = total;
        self.op.ctx = OpCtx::Read(ReadCtx {
            iter: IterCtx {
                level: Some(level),
                ..IterCtx::default()
            },
            total,
            base: *path,
        });
        Ok(())
    }

    /// Emits the next readable record of the in-flight Read.
    pub fn get_read_entry(&mut self) -> Result<Produced<Record>> {
        self.expect_op(&[Operation::Read])?;
        self.check_ongoing()?;
        self.check_count()?;
        self.pull_record()
    }

    /// Total number of records the in-flight Read will emit.
    pub fn read_record_count(&mut self) -> Result<usize> {
        self.expect_op(&[Operation::Read])?;
        self.check_ongoing()?;
        match &self.op.ctx {
            OpCtx::Read(ctx) => Ok(ctx.total),
            _ => Err(self.fail(DmError::Logic)),
        }
    }

    /// Number of records one base path of a Read-Composite will emit. Also
    /// opens the target Object's transaction.
    pub fn composite_read_count(&mut self, path: &UriPath) -> Result<usize> {
        self.expect_op(&[Operation::ReadComposite])?;
        self.check_ongoing()?;
        let Some(oid) = path.oid() else {
            return Err(self.fail(DmError::InputArg));
        };
        let located = self.locate_and_begin(oid);
        let obj_idx = self.latch(located)?;
        let located = self.registry.locate_within(obj_idx, path);
        let entity = self.latch(located)?;
        let bootstrap = self.op.bootstrap;
        let (_, total) = start_level_and_count(&self.registry, &entity, bootstrap);
        Ok(total)
    }

    /// Emits the next record for `path`. Presenting a path different from
    /// the current base once it is drained switches the sub-iterator to
    /// the new base.
    pub fn get_composite_read_entry(&mut self, path: &UriPath) -> Result<Produced<Record>> {
        self.expect_op(&[Operation::ReadComposite])?;
        self.check_ongoing()?;

        let needs_switch = match &self.op.ctx {
            OpCtx::Read(ctx) => ctx.base != *path && self.op.op_count == 0,
            _ => return Err(self.fail(DmError::Logic)),
        };
        if needs_switch {
            let Some(oid) = path.oid() else {
                return Err(self.fail(DmError::InputArg));
            };
            let located = self.locate_and_begin(oid);
            let obj_idx = self.latch(located)?;
            let located = self.registry.locate_within(obj_idx, path);
            let entity = self.latch(located)?;
            self.op.entity = Some(entity);
            let bootstrap = self.op.bootstrap;
            let (level, total) = start_level_and_count(&self.registry, &entity, bootstrap);
            if total == 0 {
                log::error!("no readable resources under {}", path);
                return Err(self.fail(DmError::NotFound));
            }
            self.op.op_count = total;
            self.op.ctx = OpCtx::Read(ReadCtx {
                iter: IterCtx {
                    level: Some(level),
                    ..IterCtx::default()
                },
                total,
                base: *path,
            });
        }
        self.check_count()?;
        self.pull_record()
    }

    fn pull_record(&mut self) -> Result<Produced<Record>> {
        let entity = self.entity()?;
        let mut iter = match &self.op.ctx {
            OpCtx::Read(ctx) => ctx.iter.clone(),
            _ => return Err(self.fail(DmError::Logic)),
        };
        let bootstrap = self.op.bootstrap;
        let record = match next_read_record(&self.registry, &entity, &mut iter, bootstrap) {
            Ok(record) => record,
            Err(err) => return Err(self.fail(err)),
        };
        if let OpCtx::Read(ctx) = &mut self.op.ctx {
            ctx.iter = iter;
        }
        self.op.op_count -= 1;
        Ok(if self.op.op_count > 0 {
            Produced::More(record)
        } else {
            Produced::Last(record)
        })
    }

    /// Reads the value and declared type at `path` outside any producing
    /// iteration. Used by the discover annotations, bootstrap delete and
    /// the notification sampler.
    pub fn resource_value(&self, path: &UriPath) -> Result<(ResourceValue, ResourceType)> {
        if !path.has(PathLevel::Resource) {
            log::error!("incorrect path for a value read: {}", path);
            return Err(DmError::NotFound);
        }
        let entity = self.registry.locate(path)?;
        let res = self.registry.resource_at(&entity).ok_or(DmError::Logic)?;
        if !res.spec().operation.is_readable(true) {
            log::error!("resource {} is not readable", path);
            return Err(DmError::NotFound);
        }
        if res.is_multi_instance() != path.has(PathLevel::ResourceInstance) {
            log::error!("incorrect path for a value read: {}", path);
            return Err(DmError::NotFound);
        }
        let rtype = res.spec().value_type.ok_or(DmError::NotFound)?;
        let obj = self.registry.object_at(&entity);
        let inst = self.registry.instance_at(&entity).ok_or(DmError::Logic)?;
        let value = read_value(obj, inst, res, entity.res_inst)?;
        Ok((value, rtype))
    }

    /// Declared type of the resource addressed by `path` (any depth at or
    /// below the resource). Answers the codec's type-disambiguation query.
    pub fn resource_type(&self, path: &UriPath) -> Result<ResourceType> {
        self.resource_spec(path)?
            .value_type
            .ok_or(DmError::MethodNotAllowed)
    }

    /// Spec of the resource addressed by `path`.
    pub fn resource_spec(&self, path: &UriPath) -> Result<ResourceSpec> {
        if !path.has(PathLevel::Resource) {
            log::error!("incorrect path for a resource lookup: {}", path);
            return Err(DmError::InputArg);
        }
        let entity = self.registry.locate(&path.truncated(PathLevel::Resource))?;
        let res = self.registry.resource_at(&entity).ok_or(DmError::Logic)?;
        Ok(*res.spec())
    }

    pub(crate) fn latch<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|err| self.fail(err))
    }
}

fn readable_count_resource(res: &Resource, bootstrap: bool) -> usize {
    if !res.spec().operation.is_readable(bootstrap) {
        return 0;
    }
    if !res.is_multi_instance() {
        return 1;
    }
    res.as_multi().map_or(0, |multi| multi.len())
}

fn readable_count_instance(inst: &Instance, bootstrap: bool) -> usize {
    inst.resources()
        .iter()
        .map(|res| readable_count_resource(res, bootstrap))
        .sum()
}

fn readable_count_object(obj: &Object, bootstrap: bool) -> usize {
    obj.instances()
        .iter()
        .map(|inst| readable_count_instance(inst, bootstrap))
        .sum()
}

pub(crate) fn start_level_and_count(
    registry: &Registry,
    entity: &EntityIndices,
    bootstrap: bool,
) -> (PathLevel, usize) {
    let obj = registry.object_at(entity);
    if entity.res_inst.is_some() {
        let readable = registry
            .resource_at(entity)
            .map_or(false, |res| res.spec().operation.is_readable(bootstrap));
        (PathLevel::ResourceInstance, usize::from(readable))
    } else if let Some(res) = registry.resource_at(entity) {
        (PathLevel::Resource, readable_count_resource(res, bootstrap))
    } else if let Some(inst) = registry.instance_at(entity) {
        (PathLevel::Instance, readable_count_instance(inst, bootstrap))
    } else {
        (PathLevel::Object, readable_count_object(obj, bootstrap))
    }
}

fn bump_res(iter: &mut IterCtx, res_count: usize) {
    iter.res_idx += 1;
    if iter.res_idx == res_count {
        iter.res_idx = 0;
        iter.inst_idx += 1;
    }
}

/// Walks forward to the next readable resource instance when the iteration
/// starts above resource level, pre-advancing the cursor past it.
fn advance_to_readable(
    obj: &Object,
    entity: &EntityIndices,
    iter: &mut IterCtx,
    bootstrap: bool,
    start_level: PathLevel,
) -> Result<(usize, usize, Option<usize>)> {
    loop {
        let inst_idx = if start_level == PathLevel::Object {
            iter.inst_idx
        } else {
            entity.inst.ok_or(DmError::Logic)?
        };
        let inst = obj.instances().get(inst_idx).ok_or(DmError::Logic)?;
        let res = inst.resources().get(iter.res_idx).ok_or(DmError::Logic)?;
        if !res.spec().operation.is_readable(bootstrap) {
            bump_res(iter, inst.resources().len());
            continue;
        }
        if res.is_multi_instance() {
            let count = res.as_multi().map_or(0, |multi| multi.len());
            if count == 0 {
                bump_res(iter, inst.resources().len());
                continue;
            }
            let found = (inst_idx, iter.res_idx, Some(iter.res_inst_idx));
            iter.res_inst_idx += 1;
            if iter.res_inst_idx == count {
                iter.res_inst_idx = 0;
                bump_res(iter, inst.resources().len());
            }
            return Ok(found);
        }
        let found = (inst_idx, iter.res_idx, None);
        bump_res(iter, inst.resources().len());
        return Ok(found);
    }
}

fn next_read_record(
    registry: &Registry,
    entity: &EntityIndices,
    iter: &mut IterCtx,
    bootstrap: bool,
) -> Result<Record> {
    let obj = registry.object_at(entity);
    let level = iter.level.ok_or(DmError::Logic)?;
    let (inst_idx, res_idx, ri_idx) = match level {
        PathLevel::Object | PathLevel::Instance => {
            advance_to_readable(obj, entity, iter, bootstrap, level)?
        }
        PathLevel::Resource => {
            let inst_idx = entity.inst.ok_or(DmError::Logic)?;
            let res_idx = entity.res.ok_or(DmError::Logic)?;
            let res = &obj.instances()[inst_idx].resources()[res_idx];
            if res.is_multi_instance() {
                let idx = iter.res_inst_idx;
                iter.res_inst_idx += 1;
                (inst_idx, res_idx, Some(idx))
            } else {
                (inst_idx, res_idx, None)
            }
        }
        PathLevel::ResourceInstance => (
            entity.inst.ok_or(DmError::Logic)?,
            entity.res.ok_or(DmError::Logic)?,
            entity.res_inst,
        ),
        PathLevel::Root => return Err(DmError::Logic),
    };

    let inst = obj.instances().get(inst_idx).ok_or(DmError::Logic)?;
    let res = inst.resources().get(res_idx).ok_or(DmError::Logic)?;
    let riid = match ri_idx {
        Some(idx) => Some(
            res.as_multi()
                .and_then(|multi| multi.instances().get(idx))
                .ok_or(DmError::Logic)?
                .riid(),
        ),
        None => None,
    };
    let path = match riid {
        Some(riid) => UriPath::resource_instance(obj.oid(), inst.iid(), res.rid(), riid),
        None => UriPath::resource(obj.oid(), inst.iid(), res.rid()),
    };
    let rtype = res.spec().value_type.ok_or(DmError::Logic)?;
    let value = read_value(obj, inst, res, ri_idx)?;
    Ok(Record::new(path, rtype, value))
}

/// Reads through the resource's hook when one is attached, otherwise from
/// owned storage.
pub(crate) fn read_value(
    obj: &Object,
    inst: &Instance,
    res: &Resource,
    ri_idx: Option<usize>,
) -> Result<ResourceValue> {
    let riid = match ri_idx {
        Some(idx) => Some(
            res.as_multi()
                .and_then(|multi| multi.instances().get(idx))
                .ok_or(DmError::Logic)?
                .riid(),
        ),
        None => None,
    };
    if let Some(read) = res.hooks().and_then(|hooks| hooks.read.clone()) {
        let rref = ResRef {
            oid: obj.oid(),
            iid: inst.iid(),
            rid: res.rid(),
            riid,
        };
        return read(&rref);
    }
    match ri_idx {
        Some(idx) => Ok(res
            .as_multi()
            .and_then(|multi| multi.instances().get(idx))
            .ok_or(DmError::Logic)?
            .cell()
            .value()
            .clone()),
        None => Ok(res
            .single_cell()
            .ok_or(DmError::Internal)?
            .value()
            .clone()),
    }
}
