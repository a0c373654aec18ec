//! The LwM2M Device object (oid 3).
//!
//! A static single-instance object built from constant strings plus an
//! optional reboot action. Bootstrap-Delete skips it by oid; nothing else
//! about it is special to the engine.

use std::rc::Rc;

use lwm2m_shared::value::ResourceValue;
use lwm2m_shared::{DmError, ResourceType, Result, Rid, OID_DEVICE};

use crate::model::{
    Instance, Object, ResOperation, Resource, ResourceHooks, ResourceInstance, ResourceSpec,
    ValueCell,
};

pub const DEVICE_RID_MANUFACTURER: Rid = 0;
pub const DEVICE_RID_MODEL_NUMBER: Rid = 1;
pub const DEVICE_RID_SERIAL_NUMBER: Rid = 2;
pub const DEVICE_RID_FIRMWARE_VERSION: Rid = 3;
pub const DEVICE_RID_REBOOT: Rid = 4;
pub const DEVICE_RID_ERROR_CODE: Rid = 11;
pub const DEVICE_RID_SUPPORTED_BINDINGS: Rid = 16;

/// Initial configuration of the Device object.
#[derive(Default)]
pub struct DeviceInit {
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub supported_bindings: String,
    /// Invoked by an Execute on the Reboot resource.
    pub reboot: Option<Rc<dyn Fn() -> Result<()>>>,
}

/// Builds the Device object, ready for registration.
pub fn device_object(init: DeviceInit) -> Object {
    let mut instance = Instance::new(0);
    let string_res = |rid: Rid, value: &str| {
        Resource::single(
            ResourceSpec::new(rid, ResOperation::Read, ResourceType::String),
            ValueCell::new(ResourceValue::string(value)),
        )
    };
    if let Some(manufacturer) = &init.manufacturer {
        instance.add_resource(string_res(DEVICE_RID_MANUFACTURER, manufacturer));
    }
    if let Some(model) = &init.model_number {
        instance.add_resource(string_res(DEVICE_RID_MODEL_NUMBER, model));
    }
    if let Some(serial) = &init.serial_number {
        instance.add_resource(string_res(DEVICE_RID_SERIAL_NUMBER, serial));
    }
    if let Some(version) = &init.firmware_version {
        instance.add_resource(string_res(DEVICE_RID_FIRMWARE_VERSION, version));
    }
    if let Some(reboot) = init.reboot {
        instance.add_resource(Resource::executable(
            DEVICE_RID_REBOOT,
            ResourceHooks::executor(move |_rref, _arg| reboot()),
        ));
    }
    let mut error_codes = Resource::multi(
        ResourceSpec::new(
            DEVICE_RID_ERROR_CODE,
            ResOperation::ReadMulti,
            ResourceType::Int,
        ),
        8,
    );
    if let Some(multi) = error_codes.as_multi_mut() {
        // No error conditions at boot.
        multi
            .insert(ResourceInstance::new(0, ValueCell::new(ResourceValue::Int(0))))
            .expect("empty multi-resource rejected an instance");
    }
    instance.add_resource(error_codes);
    instance.add_resource(string_res(
        DEVICE_RID_SUPPORTED_BINDINGS,
        &init.supported_bindings,
    ));

    Object::new(OID_DEVICE, 1)
        .with_version("1.1")
        .with_instance(instance)
}

/// Records a device error code, keeping riid order.
pub fn push_error_code(object: &mut Object, code: i64) -> Result<()> {
    let inst = object
        .instances_mut()
        .first_mut()
        .ok_or(DmError::NotFound)?;
    let pos = inst.position(DEVICE_RID_ERROR_CODE).ok_or(DmError::NotFound)?;
    let multi = inst.resources_mut()[pos]
        .as_multi_mut()
        .ok_or(DmError::Internal)?;
    let riid = multi
        .instances()
        .last()
        .map_or(0, |ri| ri.riid().saturating_add(1));
    multi.insert(ResourceInstance::new(
        riid,
        ValueCell::new(ResourceValue::Int(code)),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn init() -> DeviceInit {
        DeviceInit {
            manufacturer: Some("Example Corp".into()),
            model_number: Some("EX-1".into()),
            firmware_version: Some("0.1".into()),
            supported_bindings: "U".into(),
            ..DeviceInit::default()
        }
    }

    #[test]
    fn builds_a_single_instance() {
        let object = device_object(init());
        assert_eq!(object.oid(), OID_DEVICE);
        assert_eq!(object.instance_count(), 1);
        let inst = object.instance(0).unwrap();
        assert!(inst.resource(DEVICE_RID_MANUFACTURER).is_some());
        assert!(inst.resource(DEVICE_RID_SERIAL_NUMBER).is_none());
        assert!(inst.resource(DEVICE_RID_ERROR_CODE).is_some());
    }

    #[test]
    fn error_codes_accumulate() {
        let mut object = device_object(init());
        push_error_code(&mut object, 1).unwrap();
        let multi = object
            .instance(0)
            .unwrap()
            .resource(DEVICE_RID_ERROR_CODE)
            .unwrap()
            .as_multi()
            .unwrap();
        let codes: Vec<_> = multi
            .instances()
            .iter()
            .map(|ri| ri.cell().value().as_int().unwrap())
            .collect();
        assert_eq!(codes, vec![0, 1]);
    }
}
