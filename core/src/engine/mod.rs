// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The data-model engine: transaction lifecycle and the per-operation state
//! machines.
//!
//! Every LwM2M operation runs as one transaction over the registry:
//! [`DataModel::operation_begin`] selects and initializes the matching state
//! machine, step calls drive it, and [`DataModel::operation_end`] validates,
//! commits or rolls back, and releases the single in-flight-operation gate.
//! The first error latches; every later step call short-circuits with
//! [`DmError::Logic`] until the transaction ends.

use lwm2m_shared::message::Operation;
use lwm2m_shared::{DmError, Oid, PathLevel, Result, UriPath};

use crate::model::{Object, OpOutcome};
use crate::registry::{EntityIndices, Registry};

mod create;
mod delete;
mod discover;
mod execute;
mod read;
mod register;
mod write;

pub use discover::{BootstrapDiscoverRecord, DiscoverRecord};
pub use register::RegisterRecord;

/// Outcome of a record-producing step: there is either more to pull after
/// this record, or this record is the final one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Produced<T> {
    More(T),
    Last(T),
}

impl<T> Produced<T> {
    pub fn into_inner(self) -> T {
        match self {
            Produced::More(inner) | Produced::Last(inner) => inner,
        }
    }

    pub fn is_last(&self) -> bool {
        matches!(self, Produced::Last(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Produced<U> {
        match self {
            Produced::More(inner) => Produced::More(f(inner)),
            Produced::Last(inner) => Produced::Last(f(inner)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct IterCtx {
    pub level: Option<PathLevel>,
    pub obj_idx: usize,
    pub inst_idx: usize,
    pub res_idx: usize,
    pub res_inst_idx: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ReadCtx {
    pub iter: IterCtx,
    pub total: usize,
    /// Current base path; for Read-Composite it changes as the caller
    /// switches bases.
    pub base: UriPath,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct WriteCtx {
    pub base: UriPath,
    pub creation_attempted: bool,
    pub created_iid: Option<u16>,
    /// Resource instances created by this transaction, undone on rollback.
    pub created_res_insts: Vec<UriPath>,
}

#[derive(Debug, Clone, Default)]
pub(crate) enum OpCtx {
    #[default]
    Idle,
    Read(ReadCtx),
    Discover(IterCtx),
    BootstrapDiscover(IterCtx),
    Register(IterCtx),
    Write(WriteCtx),
}

#[derive(Default)]
pub(crate) struct OpState {
    pub in_progress: bool,
    pub operation: Option<Operation>,
    pub bootstrap: bool,
    pub transactional: bool,
    pub error: Option<DmError>,
    pub op_count: usize,
    pub entity: Option<EntityIndices>,
    pub ctx: OpCtx,
}

/// The engine instance: the registry plus the state of the (at most one)
/// operation in flight.
pub struct DataModel {
    pub(crate) registry: Registry,
    pub(crate) op: OpState,
}

impl DataModel {
    pub fn new(max_objects: usize) -> Self {
        DataModel {
            registry: Registry::with_capacity(max_objects),
            op: OpState::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn operation(&self) -> Option<Operation> {
        self.op.in_progress.then_some(self.op.operation).flatten()
    }

    pub fn operation_in_progress(&self) -> bool {
        self.op.in_progress
    }

    pub fn is_bootstrap(&self) -> bool {
        self.op.bootstrap
    }

    /// Registers an Object. Fails `Logic` while an operation is in
    /// progress or when the oid is taken, `Memory` when the registry is
    /// full.
    pub fn register_object(&mut self, object: Object) -> Result<()> {
        if self.op.in_progress {
            log::error!("cannot register an object during an operation");
            return Err(DmError::Logic);
        }
        self.registry.insert(object)
    }

    /// Removes an Object; only allowed between operations.
    pub fn unregister_object(&mut self, oid: Oid) -> Result<Object> {
        if self.op.in_progress {
            log::error!("cannot unregister an object during an operation");
            return Err(DmError::Logic);
        }
        self.registry.remove(oid)
    }

    /// Starts a transaction for `operation` rooted at `path`. Fails
    /// `Logic` when another operation is already in flight; any other
    /// failure latches into the transaction, which must still be ended.
    pub fn operation_begin(
        &mut self,
        operation: Operation,
        bootstrap: bool,
        path: &UriPath,
    ) -> Result<()> {
        if self.op.in_progress {
            log::error!("operation already underway");
            return Err(DmError::Logic);
        }
        self.op = OpState {
            in_progress: true,
            operation: Some(operation),
            bootstrap,
            ..OpState::default()
        };
        match operation {
            Operation::ReadComposite => {
                self.op.transactional = true;
                self.op.ctx = OpCtx::Read(ReadCtx::default());
                Ok(())
            }
            Operation::WriteComposite => {
                log::error!("composite write operations are not supported");
                Err(self.fail(DmError::InputArg))
            }
            Operation::Register | Operation::Update => self.begin_register(),
            Operation::Discover => {
                if bootstrap {
                    self.begin_bootstrap_discover(path)
                } else {
                    self.begin_discover(path)
                }
            }
            Operation::Execute => self.begin_execute(path),
            Operation::Read => self.begin_read(path),
            Operation::WriteReplace | Operation::WritePartialUpdate => self.begin_write(path),
            Operation::Create => self.begin_create(path),
            Operation::Delete => self.begin_delete(path),
            _ => {
                log::error!("incorrect operation type: {:?}", operation);
                Err(self.fail(DmError::InputArg))
            }
        }
    }

    /// Ends the transaction: runs the validate pass for transactional
    /// operations, then `operation_end` on every touched Object in
    /// registration order, and releases the gate. Returns the latched
    /// error, a validate failure, or the first commit failure.
    pub fn operation_end(&mut self) -> Result<()> {
        if !self.op.in_progress {
            log::error!("no operation in progress");
            return Err(DmError::Logic);
        }
        // A Create that ends without any record picks the smallest free
        // iid here.
        if self.op.operation == Some(Operation::Create) && self.op.error.is_none() {
            let created = matches!(&self.op.ctx, OpCtx::Write(w) if w.creation_attempted);
            if !created {
                let _ = self.create_object_instance(None);
            }
        }
        self.finish(false)
    }

    /// Aborts the operation between steps: every touched Object sees the
    /// failure outcome and structural changes are undone.
    pub fn operation_cancel(&mut self) -> Result<()> {
        if !self.op.in_progress {
            log::error!("no operation in progress");
            return Err(DmError::Logic);
        }
        self.finish(true)
    }

    fn finish(&mut self, force_failure: bool) -> Result<()> {
        let mut failed = force_failure || self.op.error.is_some();

        if !failed && self.op.transactional {
            for idx in 0..self.registry.len() {
                let obj = &self.registry.objects()[idx];
                if !obj.in_transaction {
                    continue;
                }
                if let Some(handlers) = obj.handlers() {
                    let oid = obj.oid();
                    if let Err(err) = handlers.operation_validate(oid) {
                        log::error!("validation of object {} failed: {}", oid, err);
                        self.op.error = Some(err);
                        failed = true;
                        break;
                    }
                }
            }
        }

        if failed {
            self.rollback_structures();
        }

        for idx in 0..self.registry.len() {
            let obj = &mut self.registry.objects_mut()[idx];
            if !obj.in_transaction {
                continue;
            }
            obj.in_transaction = false;
            let oid = obj.oid();
            let outcome = if failed {
                OpOutcome::Failure
            } else {
                OpOutcome::Success
            };
            if let Some(handlers) = obj.handlers() {
                match handlers.operation_end(oid, outcome) {
                    Ok(()) => {}
                    Err(err) if !failed => {
                        // Commit failed after a successful validate; record
                        // it and keep cleaning up. Remaining objects see
                        // the failure outcome.
                        log::error!("commit of object {} failed: {}", oid, err);
                        self.op.error = Some(err);
                        failed = true;
                    }
                    Err(_) => {}
                }
            }
        }

        self.op.in_progress = false;
        self.op.ctx = OpCtx::Idle;
        self.op.entity = None;
        match self.op.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Undoes structural mutations of a failed transaction: resource
    /// instances created by Writes, then the instance created by Create.
    fn rollback_structures(&mut self) {
        let OpCtx::Write(ctx) = std::mem::take(&mut self.op.ctx) else {
            return;
        };
        for path in ctx.created_res_insts.iter().rev() {
            let Ok(entity) = self.registry.locate(&path.truncated(PathLevel::Resource)) else {
                continue;
            };
            let Some(riid) = path.riid() else { continue };
            if let Some(multi) = self
                .registry
                .resource_at_mut(&entity)
                .and_then(|res| res.as_multi_mut())
            {
                let _ = multi.remove(riid);
            }
        }
        if let (Some(iid), Some(oid)) = (ctx.created_iid, ctx.base.oid()) {
            if let Some(obj) = self.registry.find_mut(oid) {
                let _ = obj.remove_instance(iid);
            }
        }
    }

    /// Latches the first error of the transaction and returns it.
    pub(crate) fn fail(&mut self, err: DmError) -> DmError {
        if self.op.error.is_none() {
            self.op.error = Some(err);
        }
        err
    }

    /// Step-call guard: an operation must be in flight and not yet failed.
    pub(crate) fn check_ongoing(&self) -> Result<()> {
        if !self.op.in_progress {
            log::error!("no operation in progress");
            return Err(DmError::Logic);
        }
        if self.op.error.is_some() {
            return Err(DmError::Logic);
        }
        Ok(())
    }

    /// Guard for producing steps: re-entry after the final record is a
    /// logic error.
    pub(crate) fn check_count(&mut self) -> Result<()> {
        if self.op.op_count == 0 {
            log::error!("no records left in the current operation");
            return Err(self.fail(DmError::Logic));
        }
        Ok(())
    }

    /// Guard that the in-flight operation is one of `expected`.
    pub(crate) fn expect_op(&mut self, expected: &[Operation]) -> Result<()> {
        let matches = self
            .op
            .operation
            .map_or(false, |current| expected.contains(&current));
        if !matches {
            log::error!("incorrect operation");
            return Err(self.fail(DmError::Logic));
        }
        Ok(())
    }

    /// Marks the Object as part of the transaction and runs its
    /// `operation_begin` exactly once.
    pub(crate) fn call_operation_begin(&mut self, obj_idx: usize) -> Result<()> {
        let obj = &mut self.registry.objects_mut()[obj_idx];
        if obj.in_transaction {
            return Ok(());
        }
        obj.in_transaction = true;
        let oid = obj.oid();
        let operation = self.op.operation.ok_or(DmError::Logic)?;
        if let Some(handlers) = obj.handlers() {
            handlers.operation_begin(oid, operation)?;
        }
        Ok(())
    }

    /// Resolves an oid and opens the Object's transaction.
    pub(crate) fn locate_and_begin(&mut self, oid: Oid) -> Result<usize> {
        let obj_idx = self.registry.position(oid).ok_or_else(|| {
            log::error!("object {} not found in data model", oid);
            DmError::NotFound
        })?;
        self.call_operation_begin(obj_idx)?;
        Ok(obj_idx)
    }

    pub(crate) fn entity(&self) -> Result<EntityIndices> {
        self.op.entity.ok_or(DmError::Logic)
    }
}

#[cfg(test)]
mod tests {
    use lwm2m_shared::value::ResourceValue;
    use lwm2m_shared::ResourceType;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Instance, ResOperation, Resource, ResourceSpec, ValueCell};

    fn simple_dm() -> DataModel {
        let mut dm = DataModel::new(4);
        dm.register_object(
            Object::new(3303, 2).with_instance(
                Instance::new(0).with_resource(Resource::single(
                    ResourceSpec::new(5700, ResOperation::Read, ResourceType::Double),
                    ValueCell::new(ResourceValue::Double(0.0)),
                )),
            ),
        )
        .unwrap();
        dm
    }

    #[test]
    fn double_begin_is_logic() {
        let mut dm = simple_dm();
        dm.operation_begin(Operation::Read, false, &UriPath::object(3303))
            .unwrap();
        assert_eq!(
            dm.operation_begin(Operation::Read, false, &UriPath::object(3303))
                .unwrap_err(),
            DmError::Logic
        );
        dm.operation_end().unwrap();
    }

    #[test]
    fn registration_gated_by_operation() {
        let mut dm = simple_dm();
        dm.operation_begin(Operation::Read, false, &UriPath::object(3303))
            .unwrap();
        assert_eq!(
            dm.register_object(Object::new(4, 1)).unwrap_err(),
            DmError::Logic
        );
        assert_eq!(dm.unregister_object(3303).unwrap_err(), DmError::Logic);
        dm.operation_end().unwrap();
        dm.register_object(Object::new(4, 1)).unwrap();
    }

    #[test]
    fn begin_end_clears_transaction_flags() {
        let mut dm = simple_dm();
        dm.operation_begin(Operation::Read, false, &UriPath::object(3303))
            .unwrap();
        assert!(dm.registry().find(3303).unwrap().in_transaction);
        dm.operation_end().unwrap();
        assert!(!dm.registry().find(3303).unwrap().in_transaction);
        assert!(!dm.operation_in_progress());
    }

    #[test]
    fn composite_write_rejected() {
        let mut dm = simple_dm();
        assert_eq!(
            dm.operation_begin(Operation::WriteComposite, false, &UriPath::root())
                .unwrap_err(),
            DmError::InputArg
        );
        assert_eq!(dm.operation_end().unwrap_err(), DmError::InputArg);
    }

    #[test]
    fn end_without_begin_is_logic() {
        let mut dm = simple_dm();
        assert_eq!(dm.operation_end().unwrap_err(), DmError::Logic);
    }
}
