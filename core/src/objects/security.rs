//! The LwM2M Security object (oid 0).
//!
//! Every resource is bootstrap-only: regular servers can neither read nor
//! write credentials, and the engine never advertises the object in
//! Register listings. A persistence collaborator can take a consistent
//! snapshot right after a transaction commits.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use lwm2m_shared::message::Operation;
use lwm2m_shared::value::{ObjLink, ResourceValue};
use lwm2m_shared::{
    DmError, Iid, Oid, ResourceType, Result, Rid, OID_SECURITY, SECURITY_RID_BOOTSTRAP_SERVER,
    SECURITY_RID_OSCORE, SECURITY_RID_SERVER_URI, SECURITY_RID_SSID,
};

use crate::engine::DataModel;
use crate::model::{
    Instance, Object, ObjectHandlers, OpOutcome, ResOperation, ResRef, Resource, ResourceHooks,
    ResourceSpec, ValueCell,
};

use super::{free_iid, write_bytes_chunk, write_str_chunk};

pub const SECURITY_RID_SECURITY_MODE: Rid = 2;
pub const SECURITY_RID_PUBLIC_KEY_OR_IDENTITY: Rid = 3;
pub const SECURITY_RID_SERVER_PUBLIC_KEY: Rid = 4;
pub const SECURITY_RID_SECRET_KEY: Rid = 5;

pub const SECURITY_MODE_PSK: i64 = 0;
pub const SECURITY_MODE_RPK: i64 = 1;
pub const SECURITY_MODE_CERTIFICATE: i64 = 2;
pub const SECURITY_MODE_NOSEC: i64 = 3;
pub const SECURITY_MODE_EST: i64 = 4;

const URI_MAX_LEN: usize = 255;
const KEY_MAX_LEN: usize = 256;

/// State of one Security object instance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecurityInstance {
    pub server_uri: String,
    pub bootstrap_server: bool,
    pub security_mode: i64,
    pub public_key_or_identity: Vec<u8>,
    pub server_public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
    pub ssid: u16,
    /// Link to the OSCORE object instance protecting this account.
    pub oscore: Option<ObjLink>,
}

struct State {
    instances: BTreeMap<Iid, SecurityInstance>,
    snapshot: Option<BTreeMap<Iid, SecurityInstance>>,
    op: Option<Operation>,
}

/// The Security object: owns the credential state and installs itself
/// into the data model.
pub struct SecurityObject {
    state: Rc<RefCell<State>>,
    capacity: u16,
}

impl SecurityObject {
    pub fn new(capacity: u16) -> Self {
        SecurityObject {
            state: Rc::new(RefCell::new(State {
                instances: BTreeMap::new(),
                snapshot: None,
                op: None,
            })),
            capacity,
        }
    }

    /// Adds a pre-provisioned account before installation.
    pub fn add_instance(&self, iid: Option<Iid>, instance: SecurityInstance) -> Result<Iid> {
        let mut state = self.state.borrow_mut();
        if state.instances.len() >= self.capacity as usize {
            log::error!("maximum number of security instances reached");
            return Err(DmError::Memory);
        }
        if !instance_is_valid(&instance) {
            log::error!("invalid security instance configuration");
            return Err(DmError::BadRequest);
        }
        let iid = match iid {
            Some(iid) => {
                if state.instances.contains_key(&iid) {
                    log::error!("security instance {} already exists", iid);
                    return Err(DmError::BadRequest);
                }
                iid
            }
            None => free_iid(&state.instances),
        };
        state.instances.insert(iid, instance);
        Ok(iid)
    }

    /// Registers the object (with its configured instances) in `dm`.
    pub fn install(&self, dm: &mut DataModel) -> Result<()> {
        let mut object = Object::new(OID_SECURITY, self.capacity)
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

    pub fn instance(&self, iid: Iid) -> Option<SecurityInstance> {
        self.state.borrow().instances.get(&iid).cloned()
    }

    /// A consistent copy of every account, for the persistence
    /// collaborator. Call it between transactions.
    pub fn snapshot(&self) -> Vec<(Iid, SecurityInstance)> {
        self.state
            .borrow()
            .instances
            .iter()
            .map(|(iid, inst)| (*iid, inst.clone()))
            .collect()
    }

    /// The iid of the bootstrap-server account, if provisioned.
    pub fn bootstrap_instance(&self) -> Option<Iid> {
        self.state
            .borrow()
            .instances
            .iter()
            .find(|(_, inst)| inst.bootstrap_server)
            .map(|(iid, _)| *iid)
    }
}

const URI_SCHEMES: [&str; 4] = ["coap", "coaps", "coap+tcp", "coaps+tcp"];

fn uri_is_valid(uri: &str) -> bool {
    URI_SCHEMES
        .iter()
        .any(|scheme| uri.strip_prefix(scheme).map_or(false, |rest| rest.starts_with(':')))
}

fn mode_is_valid(mode: i64) -> bool {
    (SECURITY_MODE_PSK..=SECURITY_MODE_EST).contains(&mode)
}

fn instance_is_valid(inst: &SecurityInstance) -> bool {
    uri_is_valid(&inst.server_uri)
        && mode_is_valid(inst.security_mode)
        && inst.ssid != u16::MAX
        && (inst.ssid != 0 || inst.bootstrap_server)
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
        for inst in state.instances.values() {
            if !instance_is_valid(inst) {
                log::error!("security instance failed validation");
                return Err(DmError::BadRequest);
            }
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
            .insert(iid, SecurityInstance::default());
        Ok(build_instance(&self.state, iid))
    }

    fn instance_deleted(&self, _oid: Oid, iid: Iid) -> Result<()> {
        self.state.borrow_mut().instances.remove(&iid);
        Ok(())
    }

    fn instance_reset(&self, _oid: Oid, iid: Iid) -> Result<()> {
        if let Some(inst) = self.state.borrow_mut().instances.get_mut(&iid) {
            *inst = SecurityInstance::default();
        }
        Ok(())
    }
}

fn read_resource(state: &Rc<RefCell<State>>, rref: &ResRef) -> Result<ResourceValue> {
    let state = state.borrow();
    let inst = state.instances.get(&rref.iid).ok_or(DmError::NotFound)?;
    Ok(match rref.rid {
        SECURITY_RID_SERVER_URI => ResourceValue::string(inst.server_uri.clone()),
        SECURITY_RID_BOOTSTRAP_SERVER => ResourceValue::Bool(inst.bootstrap_server),
        SECURITY_RID_SECURITY_MODE => ResourceValue::Int(inst.security_mode),
        SECURITY_RID_PUBLIC_KEY_OR_IDENTITY => {
            ResourceValue::bytes(inst.public_key_or_identity.clone())
        }
        SECURITY_RID_SERVER_PUBLIC_KEY => ResourceValue::bytes(inst.server_public_key.clone()),
        SECURITY_RID_SECRET_KEY => ResourceValue::bytes(inst.secret_key.clone()),
        SECURITY_RID_SSID => ResourceValue::Int(i64::from(inst.ssid)),
        SECURITY_RID_OSCORE => match inst.oscore {
            Some(link) => ResourceValue::ObjLnk(link),
            None => return Err(DmError::NotFound),
        },
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
        SECURITY_RID_SERVER_URI => write_str_chunk(&mut inst.server_uri, value, URI_MAX_LEN)?,
        SECURITY_RID_BOOTSTRAP_SERVER => {
            inst.bootstrap_server = value.as_bool().ok_or(DmError::BadRequest)?
        }
        SECURITY_RID_SECURITY_MODE => {
            let mode = value.as_int().ok_or(DmError::BadRequest)?;
            if !mode_is_valid(mode) {
                return Err(DmError::BadRequest);
            }
            inst.security_mode = mode;
        }
        SECURITY_RID_PUBLIC_KEY_OR_IDENTITY => {
            write_bytes_chunk(&mut inst.public_key_or_identity, value, KEY_MAX_LEN)?
        }
        SECURITY_RID_SERVER_PUBLIC_KEY => {
            write_bytes_chunk(&mut inst.server_public_key, value, KEY_MAX_LEN)?
        }
        SECURITY_RID_SECRET_KEY => write_bytes_chunk(&mut inst.secret_key, value, KEY_MAX_LEN)?,
        SECURITY_RID_SSID => {
            let ssid = value.as_int().ok_or(DmError::BadRequest)?;
            if !(0..i64::from(u16::MAX)).contains(&ssid) {
                return Err(DmError::BadRequest);
            }
            inst.ssid = ssid as u16;
        }
        SECURITY_RID_OSCORE => {
            inst.oscore = Some(value.as_objlnk().ok_or(DmError::BadRequest)?)
        }
        _ => return Err(DmError::NotFound),
    }
    Ok(())
}

fn hooks(state: &Rc<RefCell<State>>) -> ResourceHooks {
    let read_state = Rc::clone(state);
    let write_state = Rc::clone(state);
    ResourceHooks::default()
        .with_read(move |rref| read_resource(&read_state, rref))
        .with_write(move |rref, value| write_resource(&write_state, rref, value))
}

fn build_instance(state: &Rc<RefCell<State>>, iid: Iid) -> Instance {
    let hooks = hooks(state);
    let single = |rid: Rid, rtype: ResourceType| {
        Resource::single(
            ResourceSpec::new(rid, ResOperation::BootstrapReadWrite, rtype),
            ValueCell::default(),
        )
        .with_hooks(hooks.clone())
    };
    let mut instance = Instance::new(iid)
        .with_resource(single(SECURITY_RID_SERVER_URI, ResourceType::String))
        .with_resource(single(SECURITY_RID_BOOTSTRAP_SERVER, ResourceType::Bool))
        .with_resource(single(SECURITY_RID_SECURITY_MODE, ResourceType::Int))
        .with_resource(single(
            SECURITY_RID_PUBLIC_KEY_OR_IDENTITY,
            ResourceType::Bytes,
        ))
        .with_resource(single(SECURITY_RID_SERVER_PUBLIC_KEY, ResourceType::Bytes))
        .with_resource(single(SECURITY_RID_SECRET_KEY, ResourceType::Bytes))
        .with_resource(single(SECURITY_RID_SSID, ResourceType::Int));
    let has_oscore = state
        .borrow()
        .instances
        .get(&iid)
        .map_or(false, |inst| inst.oscore.is_some());
    if has_oscore {
        instance = instance.with_resource(single(SECURITY_RID_OSCORE, ResourceType::ObjLnk));
    }
    instance
}
