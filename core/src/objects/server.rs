// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! The LwM2M Server object (oid 1).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use lwm2m_shared::message::Operation;
use lwm2m_shared::value::ResourceValue;
use lwm2m_shared::{DmError, Iid, Oid, Result, Rid, OID_SERVER, SERVER_RID_SSID};

use crate::engine::DataModel;
use crate::model::{
    Instance, Object, ObjectHandlers, OpOutcome, ResOperation, ResRef, Resource, ResourceHooks,
    ResourceSpec, ValueCell,
};
use lwm2m_shared::ResourceType;

use super::{free_iid, write_str_chunk};

pub const SERVER_RID_LIFETIME: Rid = 1;
pub const SERVER_RID_DEFAULT_MIN_PERIOD: Rid = 2;
pub const SERVER_RID_DEFAULT_MAX_PERIOD: Rid = 3;
pub const SERVER_RID_NOTIFICATION_STORING: Rid = 6;
pub const SERVER_RID_BINDING: Rid = 7;
pub const SERVER_RID_REGISTRATION_UPDATE_TRIGGER: Rid = 8;
pub const SERVER_RID_BOOTSTRAP_REQUEST_TRIGGER: Rid = 9;
pub const SERVER_RID_BOOTSTRAP_ON_REGISTRATION_FAILURE: Rid = 16;
pub const SERVER_RID_MUTE_SEND: Rid = 23;

/// Transport letters this device can bind with.
const SUPPORTED_BINDING_MODES: &str = "UT";
const BINDING_MAX_LEN: usize = 8;

/// State of one Server object instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInstance {
    pub ssid: u16,
    pub lifetime: i64,
    pub default_min_period: i64,
    pub default_max_period: i64,
    pub notification_storing: bool,
    pub binding: String,
    pub bootstrap_on_registration_failure: bool,
    pub mute_send: bool,
}

impl Default for ServerInstance {
    fn default() -> Self {
        ServerInstance {
            ssid: 0,
            lifetime: 0,
            default_min_period: 0,
            default_max_period: 0,
            notification_storing: false,
            binding: String::new(),
            bootstrap_on_registration_failure: true,
            mute_send: false,
        }
    }
}

/// Initial configuration for one Server account.
#[derive(Debug, Clone)]
pub struct ServerInstanceInit {
    pub iid: Option<Iid>,
    pub ssid: u16,
    pub lifetime: i64,
    pub binding: String,
    pub default_min_period: i64,
    pub default_max_period: i64,
    pub notification_storing: bool,
    pub bootstrap_on_registration_failure: Option<bool>,
    pub mute_send: bool,
}

impl ServerInstanceInit {
    pub fn new(ssid: u16, lifetime: i64, binding: impl Into<String>) -> Self {
        ServerInstanceInit {
            iid: None,
            ssid,
            lifetime,
            binding: binding.into(),
            default_min_period: 0,
            default_max_period: 0,
            notification_storing: false,
            bootstrap_on_registration_failure: None,
            mute_send: false,
        }
    }
}

/// Executable triggers surfaced to the registration machinery.
pub trait ServerEvents {
    fn registration_update_trigger(&self, ssid: u16) -> Result<()> {
        let _ = ssid;
        Err(DmError::MethodNotAllowed)
    }

    fn bootstrap_request_trigger(&self, ssid: u16) -> Result<()> {
        let _ = ssid;
        Err(DmError::MethodNotAllowed)
    }
}

struct State {
    instances: BTreeMap<Iid, ServerInstance>,
    snapshot: Option<BTreeMap<Iid, ServerInstance>>,
    op: Option<Operation>,
    events: Option<Rc<dyn ServerEvents>>,
}

/// The Server object: owns the account state and installs itself into the
/// data model.
pub struct ServerObject {
    state: Rc<RefCell<State>>,
    capacity: u16,
}

impl ServerObject {
    pub fn new(capacity: u16) -> Self {
        ServerObject {
            state: Rc::new(RefCell::new(State {
                instances: BTreeMap::new(),
                snapshot: None,
                op: None,
                events: None,
            })),
            capacity,
        }
    }

    pub fn with_events(self, events: Rc<dyn ServerEvents>) -> Self {
        self.state.borrow_mut().events = Some(events);
        self
    }

    /// Adds a pre-provisioned account before installation.
    pub fn add_instance(&self, init: ServerInstanceInit) -> Result<Iid> {
        let mut state = self.state.borrow_mut();
        if state.instances.len() >= self.capacity as usize {
            log::error!("maximum number of server instances reached");
            return Err(DmError::Memory);
        }
        if state
            .instances
            .values()
            .any(|inst| inst.ssid == init.ssid)
        {
            log::error!("server instance with ssid {} already exists", init.ssid);
            return Err(DmError::BadRequest);
        }
        let iid = match init.iid {
            Some(iid) => {
                if state.instances.contains_key(&iid) {
                    log::error!("server instance {} already exists", iid);
                    return Err(DmError::BadRequest);
                }
                iid
            }
            None => free_iid(&state.instances),
        };
        let instance = ServerInstance {
            ssid: init.ssid,
            lifetime: init.lifetime,
            default_min_period: init.default_min_period,
            default_max_period: init.default_max_period,
            notification_storing: init.notification_storing,
            binding: init.binding,
            bootstrap_on_registration_failure: init
                .bootstrap_on_registration_failure
                .unwrap_or(true),
            mute_send: init.mute_send,
        };
        if !instance_is_valid(&instance) {
            log::error!("invalid server instance configuration");
            return Err(DmError::BadRequest);
        }
        state.instances.insert(iid, instance);
        Ok(iid)
    }

    /// Registers the object (with its configured instances) in `dm`.
    pub fn install(&self, dm: &mut DataModel) -> Result<()> {
        let mut object = Object::new(OID_SERVER, self.capacity)
            .with_version("1.1")
            .with_handlers(Rc::new(Handlers {
                state: Rc::clone(&self.state),
            }));
        let iids: Vec<Iid> = self.state.borrow().instances.keys().copied().collect();
        for iid in iids {
            object = object.with_instance(build_instance(&self.state, iid));
        }
        dm.register_object(object)
    }

    pub fn instance(&self, iid: Iid) -> Option<ServerInstance> {
        self.state.borrow().instances.get(&iid).cloned()
    }

    /// The iid of the account registered for `ssid`.
    pub fn find_instance_by_ssid(&self, ssid: u16) -> Option<Iid> {
        self.state
            .borrow()
            .instances
            .iter()
            .find(|(_, inst)| inst.ssid == ssid)
            .map(|(iid, _)| *iid)
    }
}

fn is_mutating(op: Option<Operation>) -> bool {
    matches!(
        op,
        Some(Operation::Create)
            | Some(Operation::WriteReplace)
            | Some(Operation::WritePartialUpdate)
            | Some(Operation::WriteComposite)
    )
}

fn binding_is_valid(binding: &str) -> bool {
    !binding.is_empty()
        && binding.chars().all(|c| SUPPORTED_BINDING_MODES.contains(c))
        && binding
            .chars()
            .enumerate()
            .all(|(idx, c)| !binding[..idx].contains(c))
}

fn instance_is_valid(inst: &ServerInstance) -> bool {
    inst.ssid != 0
        && inst.ssid != u16::MAX
        && inst.lifetime > 0
        && inst.default_min_period >= 0
        && inst.default_max_period >= 0
        && (inst.default_max_period == 0 || inst.default_max_period >= inst.default_min_period)
        && binding_is_valid(&inst.binding)
}

struct Handlers {
    state: Rc<RefCell<State>>,
}

impl ObjectHandlers for Handlers {
    fn operation_begin(&self, _oid: Oid, operation: Operation) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.op = Some(operation);
        if is_mutating(Some(operation)) {
            state.snapshot = Some(state.instances.clone());
        }
        Ok(())
    }

    fn operation_validate(&self, _oid: Oid) -> Result<()> {
        let state = self.state.borrow();
        if !is_mutating(state.op) {
            return Ok(());
        }
        let mut seen = Vec::new();
        for inst in state.instances.values() {
            if !instance_is_valid(inst) {
                log::error!("server instance failed validation");
                return Err(DmError::BadRequest);
            }
            if seen.contains(&inst.ssid) {
                log::error!("duplicate ssid {} across server instances", inst.ssid);
                return Err(DmError::BadRequest);
            }
            seen.push(inst.ssid);
        }
        Ok(())
    }

    fn operation_end(&self, _oid: Oid, outcome: OpOutcome) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if outcome == OpOutcome::Failure && is_mutating(state.op) {
            if let Some(snapshot) = state.snapshot.take() {
                state.instances = snapshot;
            }
        }
        state.snapshot = None;
        state.op = None;
        Ok(())
    }

    fn instance_create(&self, _oid: Oid, iid: Iid) -> Result<Instance> {
        self.state
            .borrow_mut()
            .instances
            .insert(iid, ServerInstance::default());
        Ok(build_instance(&self.state, iid))
    }

    fn instance_deleted(&self, _oid: Oid, iid: Iid) -> Result<()> {
        self.state.borrow_mut().instances.remove(&iid);
        Ok(())
    }

    fn instance_reset(&self, _oid: Oid, iid: Iid) -> Result<()> {
        if let Some(inst) = self.state.borrow_mut().instances.get_mut(&iid) {
            *inst = ServerInstance::default();
        }
        Ok(())
    }
}

fn read_resource(state: &Rc<RefCell<State>>, rref: &ResRef) -> Result<ResourceValue> {
    let state = state.borrow();
    let inst = state.instances.get(&rref.iid).ok_or(DmError::NotFound)?;
    Ok(match rref.rid {
        SERVER_RID_SSID => ResourceValue::Int(i64::from(inst.ssid)),
        SERVER_RID_LIFETIME => ResourceValue::Int(inst.lifetime),
        SERVER_RID_DEFAULT_MIN_PERIOD => ResourceValue::Int(inst.default_min_period),
        SERVER_RID_DEFAULT_MAX_PERIOD => ResourceValue::Int(inst.default_max_period),
        SERVER_RID_NOTIFICATION_STORING => ResourceValue::Bool(inst.notification_storing),
        SERVER_RID_BINDING => ResourceValue::string(inst.binding.clone()),
        SERVER_RID_BOOTSTRAP_ON_REGISTRATION_FAILURE => {
            ResourceValue::Bool(inst.bootstrap_on_registration_failure)
        }
        SERVER_RID_MUTE_SEND => ResourceValue::Bool(inst.mute_send),
        _ => return Err(DmError::NotFound),
    })
}

fn write_resource(
    state: &Rc<RefCell<State>>,
    rref: &ResRef,
    value: &ResourceValue,
) -> Result<()> {
    let mut state = state.borrow_mut();
    let inst = state
        .instances
        .get_mut(&rref.iid)
        .ok_or(DmError::NotFound)?;
    match rref.rid {
        SERVER_RID_SSID => {
            let ssid = value.as_int().ok_or(DmError::BadRequest)?;
            if ssid <= 0 || ssid >= i64::from(u16::MAX) {
                return Err(DmError::BadRequest);
            }
            inst.ssid = ssid as u16;
        }
        SERVER_RID_LIFETIME => inst.lifetime = value.as_int().ok_or(DmError::BadRequest)?,
        SERVER_RID_DEFAULT_MIN_PERIOD => {
            inst.default_min_period = value.as_int().ok_or(DmError::BadRequest)?
        }
        SERVER_RID_DEFAULT_MAX_PERIOD => {
            inst.default_max_period = value.as_int().ok_or(DmError::BadRequest)?
        }
        SERVER_RID_NOTIFICATION_STORING => {
            inst.notification_storing = value.as_bool().ok_or(DmError::BadRequest)?
        }
        SERVER_RID_BINDING => write_str_chunk(&mut inst.binding, value, BINDING_MAX_LEN)?,
        SERVER_RID_BOOTSTRAP_ON_REGISTRATION_FAILURE => {
            inst.bootstrap_on_registration_failure =
                value.as_bool().ok_or(DmError::BadRequest)?
        }
        SERVER_RID_MUTE_SEND => inst.mute_send = value.as_bool().ok_or(DmError::BadRequest)?,
        _ => return Err(DmError::NotFound),
    }
    Ok(())
}

fn execute_resource(state: &Rc<RefCell<State>>, rref: &ResRef, _arg: Option<&str>) -> Result<()> {
    let (events, ssid) = {
        let state = state.borrow();
        let inst = state.instances.get(&rref.iid).ok_or(DmError::NotFound)?;
        (state.events.clone(), inst.ssid)
    };
    let events = events.ok_or(DmError::MethodNotAllowed)?;
    match rref.rid {
        SERVER_RID_REGISTRATION_UPDATE_TRIGGER => events.registration_update_trigger(ssid),
        SERVER_RID_BOOTSTRAP_REQUEST_TRIGGER => events.bootstrap_request_trigger(ssid),
        _ => Err(DmError::NotFound),
    }
}

fn hooks(state: &Rc<RefCell<State>>) -> ResourceHooks {
    let read_state = Rc::clone(state);
    let write_state = Rc::clone(state);
    let exec_state = Rc::clone(state);
    ResourceHooks::default()
        .with_read(move |rref| read_resource(&read_state, rref))
        .with_write(move |rref, value| write_resource(&write_state, rref, value))
        .with_execute(move |rref, arg| execute_resource(&exec_state, rref, arg))
}

fn build_instance(state: &Rc<RefCell<State>>, iid: Iid) -> Instance {
    let hooks = hooks(state);
    let single = |rid: Rid, op: ResOperation, rtype: ResourceType| {
        Resource::single(ResourceSpec::new(rid, op, rtype), ValueCell::default())
            .with_hooks(hooks.clone())
    };
    Instance::new(iid)
        .with_resource(single(SERVER_RID_SSID, ResOperation::Read, ResourceType::Int))
        .with_resource(single(
            SERVER_RID_LIFETIME,
            ResOperation::ReadWrite,
            ResourceType::Int,
        ))
        .with_resource(single(
            SERVER_RID_DEFAULT_MIN_PERIOD,
            ResOperation::ReadWrite,
            ResourceType::Int,
        ))
        .with_resource(single(
            SERVER_RID_DEFAULT_MAX_PERIOD,
            ResOperation::ReadWrite,
            ResourceType::Int,
        ))
        .with_resource(single(
            SERVER_RID_NOTIFICATION_STORING,
            ResOperation::ReadWrite,
            ResourceType::Bool,
        ))
        .with_resource(single(
            SERVER_RID_BINDING,
            ResOperation::ReadWrite,
            ResourceType::String,
        ))
        .with_resource(Resource::executable(
            SERVER_RID_REGISTRATION_UPDATE_TRIGGER,
            hooks.clone(),
        ))
        .with_resource(Resource::executable(
            SERVER_RID_BOOTSTRAP_REQUEST_TRIGGER,
            hooks.clone(),
        ))
        .with_resource(single(
            SERVER_RID_BOOTSTRAP_ON_REGISTRATION_FAILURE,
            ResOperation::Read,
            ResourceType::Bool,
        ))
        .with_resource(single(
            SERVER_RID_MUTE_SEND,
            ResOperation::ReadWrite,
            ResourceType::Bool,
        ))
}
