//! User hooks invoked by the engine.
//!
//! Objects attach an [`ObjectHandlers`] implementation for transaction
//! participation and instance lifecycle; individual resources attach
//! [`ResourceHooks`] closures that replace storage-backed access. Both are
//! reference-counted so implementations keep their own state behind interior
//! mutability; the engine only passes entity identifiers.

use std::rc::Rc;

use lwm2m_shared::message::Operation;
use lwm2m_shared::value::ResourceValue;
use lwm2m_shared::{DmError, Iid, Oid, Result, Rid, Riid, UriPath};

use super::Instance;

/// Identifies the entity a resource hook is invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResRef {
    pub oid: Oid,
    pub iid: Iid,
    pub rid: Rid,
    pub riid: Option<Riid>,
}

impl ResRef {
    pub fn path(&self) -> UriPath {
        match self.riid {
            Some(riid) => UriPath::resource_instance(self.oid, self.iid, self.rid, riid),
            None => UriPath::resource(self.oid, self.iid, self.rid),
        }
    }
}

pub type ReadHook = Rc<dyn Fn(&ResRef) -> Result<ResourceValue>>;
pub type WriteHook = Rc<dyn Fn(&ResRef, &ResourceValue) -> Result<()>>;
pub type ExecuteHook = Rc<dyn Fn(&ResRef, Option<&str>) -> Result<()>>;
pub type ResInstHook = Rc<dyn Fn(&ResRef) -> Result<()>>;

/// Optional per-resource overrides. When `read`/`write` are present they
/// replace the owned storage entirely; the lifecycle hooks run after the
/// engine has created or is about to remove a resource instance.
#[derive(Clone, Default)]
pub struct ResourceHooks {
    pub read: Option<ReadHook>,
    pub write: Option<WriteHook>,
    pub execute: Option<ExecuteHook>,
    pub instance_created: Option<ResInstHook>,
    pub instance_deleted: Option<ResInstHook>,
}

impl ResourceHooks {
    pub fn reader(hook: impl Fn(&ResRef) -> Result<ResourceValue> + 'static) -> Self {
        ResourceHooks {
            read: Some(Rc::new(hook)),
            ..Default::default()
        }
    }

    pub fn executor(hook: impl Fn(&ResRef, Option<&str>) -> Result<()> + 'static) -> Self {
        ResourceHooks {
            execute: Some(Rc::new(hook)),
            ..Default::default()
        }
    }

    pub fn with_read(mut self, hook: impl Fn(&ResRef) -> Result<ResourceValue> + 'static) -> Self {
        self.read = Some(Rc::new(hook));
        self
    }

    pub fn with_write(
        mut self,
        hook: impl Fn(&ResRef, &ResourceValue) -> Result<()> + 'static,
    ) -> Self {
        self.write = Some(Rc::new(hook));
        self
    }

    pub fn with_execute(
        mut self,
        hook: impl Fn(&ResRef, Option<&str>) -> Result<()> + 'static,
    ) -> Self {
        self.execute = Some(Rc::new(hook));
        self
    }
}

/// The outcome an object's `operation_end` is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Success,
    Failure,
}

/// Transaction participation and instance lifecycle of one Object.
///
/// `operation_begin` runs at most once per Object per transaction; it is
/// the snapshot point for implementations that roll back on
/// `operation_end(Failure)`. `operation_validate` runs before commit for
/// transactional operations, in registration order; the first failure
/// aborts the commit. `operation_end` always runs for every touched Object.
pub trait ObjectHandlers {
    fn operation_begin(&self, oid: Oid, operation: Operation) -> Result<()> {
        let _ = (oid, operation);
        Ok(())
    }

    fn operation_validate(&self, oid: Oid) -> Result<()> {
        let _ = oid;
        Ok(())
    }

    fn operation_end(&self, oid: Oid, outcome: OpOutcome) -> Result<()> {
        let _ = (oid, outcome);
        Ok(())
    }

    /// Builds a fresh instance for `Create` (and bootstrap writes to a
    /// missing instance). The returned instance must already carry `iid`.
    fn instance_create(&self, oid: Oid, iid: Iid) -> Result<Instance> {
        let _ = (oid, iid);
        log::error!("object does not support instance creation");
        Err(DmError::MethodNotAllowed)
    }

    /// Runs before the engine unlinks an instance; an error vetoes the
    /// delete.
    fn instance_deleted(&self, oid: Oid, iid: Iid) -> Result<()> {
        let _ = (oid, iid);
        Ok(())
    }

    /// Runs after the engine has wiped an instance's owned storage during
    /// Write-Replace; implementations reset any state they keep outside
    /// the tree.
    fn instance_reset(&self, oid: Oid, iid: Iid) -> Result<()> {
        let _ = (oid, iid);
        Ok(())
    }
}
