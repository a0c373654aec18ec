//! Create.
//!
//! Accepts exactly an Object path. The instance id may arrive three ways:
//! an explicit id in the payload's first record, no id at all (the engine
//! picks the smallest free one when the transaction ends empty), or the id
//! of the first written record.

use lwm2m_shared::message::Operation;
use lwm2m_shared::{DmError, Iid, PathLevel, Result, UriPath};

use super::{DataModel, OpCtx, WriteCtx};

impl DataModel {
    pub(crate) fn begin_create(&mut self, path: &UriPath) -> Result<()> {
        if !path.is(PathLevel::Object) {
            log::error!("create can't target {}", path);
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
        let located = self.registry.locate_within(obj_idx, path);
        let entity = self.latch(located)?;
        self.op.entity = Some(entity);

        let obj = &self.registry.objects()[obj_idx];
        if obj.instance_count() >= obj.capacity() as usize {
            log::error!("maximum number of instances reached for /{}", oid);
            return Err(self.fail(DmError::Memory));
        }
        Ok(())
    }

    /// Creates the instance of the in-flight Create (or bootstrap Replace).
    /// `None` picks the smallest free iid. At most one creation per
    /// transaction; an explicit duplicate iid is `MethodNotAllowed`.
    pub fn create_object_instance(&mut self, iid: Option<Iid>) -> Result<()> {
        let allowed = match self.op.operation {
            Some(Operation::Create) => true,
            Some(Operation::WriteReplace) => self.op.bootstrap,
            _ => false,
        };
        if !allowed {
            log::error!("instance creation outside of a create transaction");
            return Err(self.fail(DmError::Logic));
        }
        self.check_ongoing()?;
        let attempted = matches!(&self.op.ctx, OpCtx::Write(ctx) if ctx.creation_attempted);
        if attempted {
            log::error!("instance already created in this transaction");
            return Err(self.fail(DmError::Logic));
        }
        if let OpCtx::Write(ctx) = &mut self.op.ctx {
            ctx.creation_attempted = true;
        }

        let entity = self.entity()?;
        let obj = self.registry.object_at(&entity);
        let oid = obj.oid();
        if obj.instance_count() >= obj.capacity() as usize {
            log::error!("maximum number of instances reached for /{}", oid);
            return Err(self.fail(DmError::Memory));
        }
        let iid = match iid {
            Some(iid) => {
                if obj.position(iid).is_some() {
                    log::error!("instance /{}/{} already exists", oid, iid);
                    return Err(self.fail(DmError::MethodNotAllowed));
                }
                iid
            }
            None => obj.free_iid(),
        };
        let Some(handlers) = obj.handlers() else {
            log::error!("object {} does not support instance creation", oid);
            return Err(self.fail(DmError::MethodNotAllowed));
        };

        let mut instance = match handlers.instance_create(oid, iid) {
            Ok(instance) => instance,
            Err(err) => {
                log::error!("instance creation for /{}/{} failed: {}", oid, iid, err);
                return Err(self.fail(err));
            }
        };
        instance.set_iid(iid);
        #[cfg(debug_assertions)]
        if let Err(err) = crate::registry::check_instance(&instance) {
            return Err(self.fail(err));
        }

        let inserted = self.registry.object_at_mut(&entity).insert_instance(instance);
        let inst_idx = self.latch(inserted)?;

        if let OpCtx::Write(ctx) = &mut self.op.ctx {
            ctx.created_iid = Some(iid);
            // Later records must stay within the new instance.
            if ctx.base.is(PathLevel::Object) {
                if let Some(oid) = ctx.base.oid() {
                    ctx.base = UriPath::instance(oid, iid);
                }
            }
        }
        self.op.entity = Some(crate::registry::EntityIndices {
            inst: Some(inst_idx),
            ..entity
        });
        Ok(())
    }
}
