//! The LwM2M Firmware Update object (oid 5).
//!
//! The state machine Idle → Downloading → Downloaded → Updating → Idle is
//! driven entirely by writes to Package / Package URI, an Execute on
//! Update, and the out-of-band completion calls from the downloader and
//! the updater. The payload sink itself is a user collaborator behind
//! [`FirmwareBackend`]; the object only sequences it and reports State and
//! Update Result.

use std::cell::RefCell;
use std::rc::Rc;

use lwm2m_shared::value::ResourceValue;
use lwm2m_shared::{DmError, ResourceType, Result, Rid, OID_FIRMWARE_UPDATE};

use crate::engine::DataModel;
use crate::model::{
    Instance, Object, ResOperation, ResRef, Resource, ResourceHooks, ResourceInstance,
    ResourceSpec, ValueCell,
};

pub const FW_RID_PACKAGE: Rid = 0;
pub const FW_RID_PACKAGE_URI: Rid = 1;
pub const FW_RID_UPDATE: Rid = 2;
pub const FW_RID_STATE: Rid = 3;
pub const FW_RID_UPDATE_RESULT: Rid = 5;
pub const FW_RID_PKG_NAME: Rid = 6;
pub const FW_RID_PKG_VERSION: Rid = 7;
pub const FW_RID_PROTOCOL_SUPPORT: Rid = 8;
pub const FW_RID_DELIVERY_METHOD: Rid = 9;

const URI_MAX_LEN: usize = 255;

/// Value of the State resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum UpdateState {
    Idle = 0,
    Downloading = 1,
    Downloaded = 2,
    Updating = 3,
}

/// Value of the Update Result resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum UpdateResult {
    Initial = 0,
    Success = 1,
    NotEnoughSpace = 2,
    OutOfMemory = 3,
    ConnectionLost = 4,
    IntegrityFailure = 5,
    UnsupportedType = 6,
    InvalidUri = 7,
    Failed = 8,
    UnsupportedProtocol = 9,
}

/// The user-supplied downloader/updater. Callbacks answer with an
/// [`UpdateResult`] error code that lands in the Update Result resource.
pub trait FirmwareBackend {
    /// A push delivery is starting (first Package chunk).
    fn package_write_start(&self) -> std::result::Result<(), UpdateResult> {
        Ok(())
    }

    /// One chunk of a pushed package.
    fn package_write(&self, data: &[u8]) -> std::result::Result<(), UpdateResult> {
        let _ = data;
        Err(UpdateResult::UnsupportedProtocol)
    }

    /// The pushed package is complete.
    fn package_write_finish(&self) -> std::result::Result<(), UpdateResult> {
        Ok(())
    }

    /// A pull delivery was requested; start downloading `uri`.
    fn uri_write(&self, uri: &str) -> std::result::Result<(), UpdateResult> {
        let _ = uri;
        Err(UpdateResult::UnsupportedProtocol)
    }

    /// Apply the downloaded package.
    fn update(&self) -> std::result::Result<(), UpdateResult>;

    /// A delivery in progress was aborted.
    fn cancel(&self) {}

    fn package_name(&self) -> Option<String> {
        None
    }

    fn package_version(&self) -> Option<String> {
        None
    }
}

struct FwState {
    backend: Rc<dyn FirmwareBackend>,
    state: UpdateState,
    result: UpdateResult,
    uri: String,
}

/// The Firmware Update object.
pub struct FirmwareObject {
    state: Rc<RefCell<FwState>>,
}

impl FirmwareObject {
    pub fn new(backend: Rc<dyn FirmwareBackend>) -> Self {
        FirmwareObject {
            state: Rc::new(RefCell::new(FwState {
                backend,
                state: UpdateState::Idle,
                result: UpdateResult::Initial,
                uri: String::new(),
            })),
        }
    }

    /// Registers the object in `dm`.
    pub fn install(&self, dm: &mut DataModel) -> Result<()> {
        dm.register_object(
            Object::new(OID_FIRMWARE_UPDATE, 1)
                .with_version("1.0")
                .with_instance(build_instance(&self.state)),
        )
    }

    pub fn update_state(&self) -> UpdateState {
        self.state.borrow().state
    }

    pub fn update_result(&self) -> UpdateResult {
        self.state.borrow().result
    }

    /// The downloader reports the end of a pull delivery.
    pub fn download_finished(&self, result: UpdateResult) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.state != UpdateState::Downloading {
            log::error!("no download in progress");
            return Err(DmError::Logic);
        }
        if result == UpdateResult::Success {
            state.state = UpdateState::Downloaded;
            state.result = UpdateResult::Initial;
        } else {
            state.state = UpdateState::Idle;
            state.result = result;
        }
        Ok(())
    }

    /// The updater reports the end of an update.
    pub fn update_finished(&self, result: UpdateResult) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.state != UpdateState::Updating {
            log::error!("no update in progress");
            return Err(DmError::Logic);
        }
        state.state = UpdateState::Idle;
        state.result = result;
        Ok(())
    }
}

fn fail_delivery(state: &mut FwState, result: UpdateResult) -> DmError {
    state.state = UpdateState::Idle;
    state.result = result;
    DmError::BadRequest
}

fn write_package(state: &Rc<RefCell<FwState>>, value: &ResourceValue) -> Result<()> {
    let ResourceValue::Bytes(chunk) = value else {
        return Err(DmError::BadRequest);
    };
    let mut state = state.borrow_mut();
    // An empty write aborts whatever is in progress.
    if chunk.is_empty() && chunk.full_length.unwrap_or(0) == 0 {
        if state.state != UpdateState::Idle {
            state.backend.cancel();
        }
        state.state = UpdateState::Idle;
        state.result = UpdateResult::Initial;
        return Ok(());
    }
    match state.state {
        UpdateState::Idle if chunk.offset == 0 => {
            let backend = Rc::clone(&state.backend);
            if let Err(code) = backend.package_write_start() {
                return Err(fail_delivery(&mut state, code));
            }
            state.state = UpdateState::Downloading;
            state.result = UpdateResult::Initial;
        }
        UpdateState::Downloading => {}
        _ => {
            log::error!("package write in an incompatible state");
            return Err(DmError::BadRequest);
        }
    }
    let backend = Rc::clone(&state.backend);
    if let Err(code) = backend.package_write(&chunk.data) {
        backend.cancel();
        return Err(fail_delivery(&mut state, code));
    }
    if chunk.is_last() {
        if let Err(code) = backend.package_write_finish() {
            return Err(fail_delivery(&mut state, code));
        }
        state.state = UpdateState::Downloaded;
        state.result = UpdateResult::Initial;
    }
    Ok(())
}

fn write_uri(state: &Rc<RefCell<FwState>>, value: &ResourceValue) -> Result<()> {
    let mut state = state.borrow_mut();
    let mut uri = state.uri.clone();
    super::write_str_chunk(&mut uri, value, URI_MAX_LEN)?;
    if uri.is_empty() {
        if state.state != UpdateState::Idle {
            state.backend.cancel();
        }
        state.uri.clear();
        state.state = UpdateState::Idle;
        state.result = UpdateResult::Initial;
        return Ok(());
    }
    if state.state != UpdateState::Idle {
        log::error!("uri write in an incompatible state");
        return Err(DmError::BadRequest);
    }
    let backend = Rc::clone(&state.backend);
    if let Err(code) = backend.uri_write(&uri) {
        state.result = code;
        return Err(DmError::BadRequest);
    }
    state.uri = uri;
    state.state = UpdateState::Downloading;
    state.result = UpdateResult::Initial;
    Ok(())
}

fn execute_update(state: &Rc<RefCell<FwState>>) -> Result<()> {
    let mut state = state.borrow_mut();
    if state.state != UpdateState::Downloaded {
        log::error!("update requested before a package was delivered");
        return Err(DmError::MethodNotAllowed);
    }
    let backend = Rc::clone(&state.backend);
    if let Err(code) = backend.update() {
        state.result = code;
        return Err(DmError::BadRequest);
    }
    state.state = UpdateState::Updating;
    state.result = UpdateResult::Initial;
    Ok(())
}

fn read_resource(state: &Rc<RefCell<FwState>>, rref: &ResRef) -> Result<ResourceValue> {
    let state = state.borrow();
    Ok(match rref.rid {
        FW_RID_PACKAGE_URI => ResourceValue::string(state.uri.clone()),
        FW_RID_STATE => ResourceValue::Int(state.state as i64),
        FW_RID_UPDATE_RESULT => ResourceValue::Int(state.result as i64),
        FW_RID_PKG_NAME => {
            ResourceValue::string(state.backend.package_name().unwrap_or_default())
        }
        FW_RID_PKG_VERSION => {
            ResourceValue::string(state.backend.package_version().unwrap_or_default())
        }
        FW_RID_DELIVERY_METHOD => ResourceValue::Int(2),
        _ => return Err(DmError::NotFound),
    })
}

fn write_resource(
    state: &Rc<RefCell<FwState>>,
    rref: &ResRef,
    value: &ResourceValue,
) -> Result<()> {
    match rref.rid {
        FW_RID_PACKAGE => write_package(state, value),
        FW_RID_PACKAGE_URI => write_uri(state, value),
        _ => Err(DmError::NotFound),
    }
}

fn build_instance(state: &Rc<RefCell<FwState>>) -> Instance {
    let read_state = Rc::clone(state);
    let write_state = Rc::clone(state);
    let exec_state = Rc::clone(state);
    let hooks = ResourceHooks::default()
        .with_read(move |rref| read_resource(&read_state, rref))
        .with_write(move |rref, value| write_resource(&write_state, rref, value))
        .with_execute(move |_rref, _arg| execute_update(&exec_state));

    let mut protocols = Resource::multi(
        ResourceSpec::new(
            FW_RID_PROTOCOL_SUPPORT,
            ResOperation::ReadMulti,
            ResourceType::Int,
        ),
        4,
    );
    if let Some(multi) = protocols.as_multi_mut() {
        // CoAP and CoAPs.
        for (riid, proto) in [(0u16, 0i64), (1, 1)] {
            multi
                .insert(ResourceInstance::new(
                    riid,
                    ValueCell::new(ResourceValue::Int(proto)),
                ))
                .expect("protocol table insert failed");
        }
    }

    Instance::new(0)
        .with_resource(
            Resource::single(
                ResourceSpec::new(FW_RID_PACKAGE, ResOperation::Write, ResourceType::Bytes),
                ValueCell::default(),
            )
            .with_hooks(hooks.clone()),
        )
        .with_resource(
            Resource::single(
                ResourceSpec::new(
                    FW_RID_PACKAGE_URI,
                    ResOperation::ReadWrite,
                    ResourceType::String,
                ),
                ValueCell::default(),
            )
            .with_hooks(hooks.clone()),
        )
        .with_resource(Resource::executable(FW_RID_UPDATE, hooks.clone()))
        .with_resource(
            Resource::single(
                ResourceSpec::new(FW_RID_STATE, ResOperation::Read, ResourceType::Int),
                ValueCell::default(),
            )
            .with_hooks(hooks.clone()),
        )
        .with_resource(
            Resource::single(
                ResourceSpec::new(FW_RID_UPDATE_RESULT, ResOperation::Read, ResourceType::Int),
                ValueCell::default(),
            )
            .with_hooks(hooks.clone()),
        )
        .with_resource(
            Resource::single(
                ResourceSpec::new(FW_RID_PKG_NAME, ResOperation::Read, ResourceType::String),
                ValueCell::default(),
            )
            .with_hooks(hooks.clone()),
        )
        .with_resource(
            Resource::single(
                ResourceSpec::new(FW_RID_PKG_VERSION, ResOperation::Read, ResourceType::String),
                ValueCell::default(),
            )
            .with_hooks(hooks.clone()),
        )
        .with_resource(protocols)
        .with_resource(
            Resource::single(
                ResourceSpec::new(
                    FW_RID_DELIVERY_METHOD,
                    ResOperation::Read,
                    ResourceType::Int,
                ),
                ValueCell::default(),
            )
            .with_hooks(hooks),
        )
}
