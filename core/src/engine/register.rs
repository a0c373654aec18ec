//! Register and registration Update.
//!
//! Produces the link list sent to the server: every registered Object
//! except Security and OSCORE, one Object-level record (with version)
//! followed by one record per Instance, ascending oid then iid.

use lwm2m_shared::message::Operation;
use lwm2m_shared::{DmError, PathLevel, Result, UriPath, OID_OSCORE, OID_SECURITY};

use super::{DataModel, IterCtx, OpCtx, Produced};

/// One Register link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRecord {
    pub path: UriPath,
    /// Present only on the Object-level link.
    pub version: Option<String>,
}

fn advertised(oid: u16) -> bool {
    oid != OID_SECURITY && oid != OID_OSCORE
}

impl DataModel {
    pub(crate) fn begin_register(&mut self) -> Result<()> {
        let mut count = 0usize;
        for idx in 0..self.registry.len() {
            let obj = &self.registry.objects()[idx];
            if !advertised(obj.oid()) {
                continue;
            }
            count += 1 + obj.instance_count();
            self.call_operation_begin(idx).map_err(|err| self.fail(err))?;
        }
        self.op.op_count = count;
        self.op.ctx = OpCtx::Register(IterCtx {
            level: Some(PathLevel::Object),
            ..IterCtx::default()
        });
        Ok(())
    }

    /// Emits the next Register link.
    pub fn get_register_record(&mut self) -> Result<Produced<RegisterRecord>> {
        self.expect_op(&[Operation::Register, Operation::Update])?;
        self.check_ongoing()?;
        self.check_count()?;

        let mut iter = match &self.op.ctx {
            OpCtx::Register(iter) => iter.clone(),
            _ => return Err(self.fail(DmError::Logic)),
        };

        let record = if iter.level == Some(PathLevel::Object) {
            while self
                .registry
                .objects()
                .get(iter.obj_idx)
                .map_or(false, |obj| !advertised(obj.oid()))
            {
                iter.obj_idx += 1;
            }
            let obj = self
                .registry
                .objects()
                .get(iter.obj_idx)
                .ok_or(DmError::Logic)?;
            let record = RegisterRecord {
                path: UriPath::object(obj.oid()),
                version: obj.version().map(String::from),
            };
            if obj.instance_count() == 0 {
                iter.obj_idx += 1;
            } else {
                iter.level = Some(PathLevel::Instance);
                iter.inst_idx = 0;
            }
            record
        } else {
            let obj = self
                .registry
                .objects()
                .get(iter.obj_idx)
                .ok_or(DmError::Logic)?;
            let inst = obj.instances().get(iter.inst_idx).ok_or(DmError::Logic)?;
            let record = RegisterRecord {
                path: UriPath::instance(obj.oid(), inst.iid()),
                version: None,
            };
            iter.inst_idx += 1;
            if iter.inst_idx == obj.instance_count() {
                iter.level = Some(PathLevel::Object);
                iter.obj_idx += 1;
            }
            record
        };

        self.op.ctx = OpCtx::Register(iter);
        self.op.op_count -= 1;
        Ok(if self.op.op_count > 0 {
            Produced::More(record)
        } else {
            Produced::Last(record)
        })
    }
}
