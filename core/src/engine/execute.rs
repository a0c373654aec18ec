//! Execute.

use lwm2m_shared::message::Operation;
use lwm2m_shared::{DmError, PathLevel, Result, UriPath};

use crate::model::{ResOperation, ResRef};

use super::DataModel;

impl DataModel {
    pub(crate) fn begin_execute(&mut self, path: &UriPath) -> Result<()> {
        if !path.is(PathLevel::Resource) {
            log::error!("execute can't target {}", path);
            return Err(self.fail(DmError::InputArg));
        }
        let Some(oid) = path.oid() else {
            return Err(self.fail(DmError::InputArg));
        };
        let located = self.locate_and_begin(oid);
        let obj_idx = self.latch(located)?;
        let located = self.registry.locate_within(obj_idx, path);
        let entity = self.latch(located)?;
        self.op.entity = Some(entity);

        let res = self.registry.resource_at(&entity).ok_or(DmError::Logic)?;
        if res.spec().operation != ResOperation::Execute {
            log::error!("resource {} is not executable", path);
            return Err(self.fail(DmError::MethodNotAllowed));
        }
        Ok(())
    }

    /// Invokes the execute hook of the located resource once, with the
    /// request's optional text argument.
    pub fn execute(&mut self, arg: Option<&str>) -> Result<()> {
        self.expect_op(&[Operation::Execute])?;
        self.check_ongoing()?;
        let entity = self.entity()?;

        let obj = self.registry.object_at(&entity);
        let inst = self.registry.instance_at(&entity).ok_or(DmError::Logic)?;
        let res = self.registry.resource_at(&entity).ok_or(DmError::Logic)?;
        let Some(execute) = res.hooks().and_then(|hooks| hooks.execute.clone()) else {
            // Registration validates this; reaching it means the resource
            // was mutated behind the engine's back.
            return Err(self.fail(DmError::Internal));
        };
        let rref = ResRef {
            oid: obj.oid(),
            iid: inst.iid(),
            rid: res.rid(),
            riid: None,
        };
        if let Err(err) = execute(&rref, arg) {
            log::error!("execute hook for {} failed: {}", rref.path(), err);
            return Err(self.fail(err));
        }
        Ok(())
    }
}
