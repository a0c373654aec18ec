//! The well-known objects driven through the engine: snapshot rollback,
//! bootstrap flows and the firmware state machine.

mod common;

use std::rc::Rc;

use common::{collect_read_records, record, sensor_dm};
use lwm2m_core::engine::DataModel;
use lwm2m_core::objects::{
    device_object, DeviceInit, FirmwareBackend, FirmwareObject, SecurityInstance, SecurityObject,
    ServerInstanceInit, ServerObject, UpdateResult, UpdateState,
};
use lwm2m_core::Produced;
use lwm2m_shared::message::Operation;
use lwm2m_shared::value::{ObjLink, ResourceValue};
use lwm2m_shared::{
    DmError, UriPath, OID_DEVICE, OID_FIRMWARE_UPDATE, OID_OSCORE, OID_SECURITY, OID_SERVER,
};
use pretty_assertions::assert_eq;

fn provisioned_dm() -> (DataModel, SecurityObject, ServerObject) {
    let mut dm = DataModel::new(8);

    let security = SecurityObject::new(3);
    security
        .add_instance(
            Some(0),
            SecurityInstance {
                server_uri: "coaps://bootstrap.example.com:5684".into(),
                bootstrap_server: true,
                security_mode: 3,
                ..SecurityInstance::default()
            },
        )
        .unwrap();
    security
        .add_instance(
            Some(1),
            SecurityInstance {
                server_uri: "coap://server.example.com:5683".into(),
                bootstrap_server: false,
                security_mode: 3,
                ssid: 10,
                ..SecurityInstance::default()
            },
        )
        .unwrap();
    security.install(&mut dm).unwrap();

    let server = ServerObject::new(2);
    server
        .add_instance(ServerInstanceInit::new(10, 86400, "U"))
        .unwrap();
    server.install(&mut dm).unwrap();

    dm.register_object(device_object(DeviceInit {
        manufacturer: Some("Example Corp".into()),
        firmware_version: Some("0.1".into()),
        supported_bindings: "U".into(),
        ..DeviceInit::default()
    }))
    .unwrap();

    (dm, security, server)
}

#[test]
fn server_resources_read_back() {
    let (mut dm, _, _) = provisioned_dm();
    dm.operation_begin(Operation::Read, false, &UriPath::instance(OID_SERVER, 0))
        .unwrap();
    let records = collect_read_records(&mut dm);
    dm.operation_end().unwrap();

    let ssid = records
        .iter()
        .find(|rec| rec.path.rid() == Some(0))
        .unwrap();
    assert_eq!(ssid.value, ResourceValue::Int(10));
    let binding = records
        .iter()
        .find(|rec| rec.path.rid() == Some(7))
        .unwrap();
    assert_eq!(binding.value.as_str(), Some("U"));
}

#[test]
fn server_write_commits_on_success() {
    let (mut dm, _, server) = provisioned_dm();
    dm.operation_begin(
        Operation::WritePartialUpdate,
        false,
        &UriPath::instance(OID_SERVER, 0),
    )
    .unwrap();
    dm.write_entry(&record("/1/0/1", ResourceValue::Int(120)))
        .unwrap();
    dm.operation_end().unwrap();
    assert_eq!(server.instance(0).unwrap().lifetime, 120);
}

#[test]
fn server_validation_failure_rolls_back() {
    let (mut dm, _, server) = provisioned_dm();
    dm.operation_begin(
        Operation::WritePartialUpdate,
        false,
        &UriPath::instance(OID_SERVER, 0),
    )
    .unwrap();
    // The write itself lands, but commit-time validation rejects a
    // non-positive lifetime and restores the snapshot.
    dm.write_entry(&record("/1/0/1", ResourceValue::Int(0)))
        .unwrap();
    assert_eq!(dm.operation_end().unwrap_err(), DmError::BadRequest);
    assert_eq!(server.instance(0).unwrap().lifetime, 86400);
}

#[test]
fn server_ssid_lookup() {
    let (_, _, server) = provisioned_dm();
    assert_eq!(server.find_instance_by_ssid(10), Some(0));
    assert_eq!(server.find_instance_by_ssid(99), None);
}

#[test]
fn register_listing_omits_security() {
    let (mut dm, _, _) = provisioned_dm();
    dm.operation_begin(Operation::Register, false, &UriPath::root())
        .unwrap();
    let mut oids = Vec::new();
    loop {
        match dm.get_register_record().unwrap() {
            Produced::More(rec) => oids.push(rec.path.oid().unwrap()),
            Produced::Last(rec) => {
                oids.push(rec.path.oid().unwrap());
                break;
            }
        }
    }
    dm.operation_end().unwrap();
    assert!(!oids.contains(&OID_SECURITY));
    assert!(oids.contains(&OID_SERVER));
    assert!(oids.contains(&OID_DEVICE));
}

#[test]
fn bootstrap_discover_annotates_server_accounts() {
    let (mut dm, _, _) = provisioned_dm();
    dm.operation_begin(Operation::Discover, true, &UriPath::root())
        .unwrap();
    let mut records = Vec::new();
    loop {
        match dm.get_bootstrap_discover_record().unwrap() {
            Produced::More(rec) => records.push(rec),
            Produced::Last(rec) => {
                records.push(rec);
                break;
            }
        }
    }
    dm.operation_end().unwrap();

    // The bootstrap Security instance carries neither ssid nor uri.
    let bootstrap = records
        .iter()
        .find(|rec| rec.path == UriPath::instance(OID_SECURITY, 0))
        .unwrap();
    assert_eq!(bootstrap.ssid, None);
    assert_eq!(bootstrap.uri, None);

    let account = records
        .iter()
        .find(|rec| rec.path == UriPath::instance(OID_SECURITY, 1))
        .unwrap();
    assert_eq!(account.ssid, Some(10));
    assert_eq!(account.uri.as_deref(), Some("coap://server.example.com:5683"));

    let server_inst = records
        .iter()
        .find(|rec| rec.path == UriPath::instance(OID_SERVER, 0))
        .unwrap();
    assert_eq!(server_inst.ssid, Some(10));
}

#[test]
fn bootstrap_discover_resolves_oscore_links() {
    let (mut dm, security, _) = provisioned_dm();
    // Link the regular account to OSCORE instance 4.
    let mut linked = security.instance(1).unwrap();
    linked.oscore = Some(ObjLink {
        oid: OID_OSCORE,
        iid: 4,
    });
    dm.unregister_object(OID_SECURITY).unwrap();
    let security = SecurityObject::new(3);
    security
        .add_instance(Some(1), linked)
        .unwrap();
    security.install(&mut dm).unwrap();
    dm.register_object(
        lwm2m_core::model::Object::new(OID_OSCORE, 2)
            .with_instance(lwm2m_core::model::Instance::new(4)),
    )
    .unwrap();

    dm.operation_begin(Operation::Discover, true, &UriPath::object(OID_OSCORE))
        .unwrap();
    let mut records = Vec::new();
    loop {
        match dm.get_bootstrap_discover_record().unwrap() {
            Produced::More(rec) => records.push(rec),
            Produced::Last(rec) => {
                records.push(rec);
                break;
            }
        }
    }
    dm.operation_end().unwrap();

    let oscore_inst = records
        .iter()
        .find(|rec| rec.path == UriPath::instance(OID_OSCORE, 4))
        .unwrap();
    assert_eq!(oscore_inst.ssid, Some(10));
}

#[test]
fn bootstrap_delete_wildcard_spares_bootstrap_account_and_device() {
    let (mut dm, _, _) = provisioned_dm();
    dm.operation_begin(Operation::Delete, true, &UriPath::root())
        .unwrap();
    dm.operation_end().unwrap();

    let security = dm.registry().find(OID_SECURITY).unwrap();
    assert_eq!(security.instance_count(), 1);
    assert!(security.instance(0).is_some());
    assert_eq!(dm.registry().find(OID_DEVICE).unwrap().instance_count(), 1);
    assert_eq!(dm.registry().find(OID_SERVER).unwrap().instance_count(), 0);
}

#[test]
fn bootstrap_delete_directly_targeting_bootstrap_account_is_rejected() {
    let (mut dm, _, _) = provisioned_dm();
    let err = dm
        .operation_begin(Operation::Delete, true, &UriPath::instance(OID_SECURITY, 0))
        .unwrap_err();
    assert_eq!(err, DmError::BadRequest);
    let _ = dm.operation_end();
    assert_eq!(dm.registry().find(OID_SECURITY).unwrap().instance_count(), 2);
}

#[test]
fn bootstrap_write_provisions_a_security_instance() {
    let (mut dm, security, _) = provisioned_dm();
    dm.operation_begin(
        Operation::WriteReplace,
        true,
        &UriPath::instance(OID_SECURITY, 2),
    )
    .unwrap();
    dm.write_entry(&record(
        "/0/2/0",
        ResourceValue::string("coap://second.example.com:5683"),
    ))
    .unwrap();
    dm.write_entry(&record("/0/2/1", ResourceValue::Bool(false)))
        .unwrap();
    dm.write_entry(&record("/0/2/2", ResourceValue::Int(3)))
        .unwrap();
    dm.write_entry(&record("/0/2/10", ResourceValue::Int(11)))
        .unwrap();
    dm.operation_end().unwrap();

    let account = security.instance(2).unwrap();
    assert_eq!(account.ssid, 11);
    assert_eq!(account.server_uri, "coap://second.example.com:5683");
    assert_eq!(dm.registry().find(OID_SECURITY).unwrap().instance_count(), 3);
}

#[test]
fn security_is_not_writable_outside_bootstrap() {
    let (mut dm, _, _) = provisioned_dm();
    dm.operation_begin(
        Operation::WritePartialUpdate,
        false,
        &UriPath::instance(OID_SECURITY, 1),
    )
    .unwrap();
    let err = dm
        .write_entry(&record("/0/1/10", ResourceValue::Int(12)))
        .unwrap_err();
    assert_eq!(err, DmError::BadRequest);
    let _ = dm.operation_end();
}

#[test]
fn security_snapshot_exposes_accounts() {
    let (_, security, _) = provisioned_dm();
    let snapshot = security.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().any(|(_, inst)| inst.bootstrap_server));
    assert_eq!(security.bootstrap_instance(), Some(0));
}

#[test]
fn device_object_reads() {
    let (mut dm, _, _) = provisioned_dm();
    let (value, _) = dm.resource_value(&"/3/0/0".parse().unwrap()).unwrap();
    assert_eq!(value.as_str(), Some("Example Corp"));
    let (value, _) = dm.resource_value(&"/3/0/16".parse().unwrap()).unwrap();
    assert_eq!(value.as_str(), Some("U"));
}

struct PushBackend;

impl FirmwareBackend for PushBackend {
    fn package_write(&self, _data: &[u8]) -> std::result::Result<(), UpdateResult> {
        Ok(())
    }

    fn update(&self) -> std::result::Result<(), UpdateResult> {
        Ok(())
    }
}

#[test]
fn firmware_update_via_the_engine() {
    let mut dm = DataModel::new(4);
    let fw = FirmwareObject::new(Rc::new(PushBackend));
    fw.install(&mut dm).unwrap();

    // Push the package in one write.
    dm.operation_begin(
        Operation::WritePartialUpdate,
        false,
        &UriPath::instance(OID_FIRMWARE_UPDATE, 0),
    )
    .unwrap();
    dm.write_entry(&record("/5/0/0", ResourceValue::bytes(b"image".to_vec())))
        .unwrap();
    dm.operation_end().unwrap();
    assert_eq!(fw.update_state(), UpdateState::Downloaded);

    let (state, _) = dm.resource_value(&"/5/0/3".parse().unwrap()).unwrap();
    assert_eq!(state, ResourceValue::Int(UpdateState::Downloaded as i64));

    dm.operation_begin(
        Operation::Execute,
        false,
        &UriPath::resource(OID_FIRMWARE_UPDATE, 0, 2),
    )
    .unwrap();
    dm.execute(None).unwrap();
    dm.operation_end().unwrap();
    assert_eq!(fw.update_state(), UpdateState::Updating);

    fw.update_finished(UpdateResult::Success).unwrap();
    let (result, _) = dm.resource_value(&"/5/0/5".parse().unwrap()).unwrap();
    assert_eq!(result, ResourceValue::Int(UpdateResult::Success as i64));
}

#[test]
fn firmware_update_before_download_is_rejected() {
    let mut dm = DataModel::new(4);
    let fw = FirmwareObject::new(Rc::new(PushBackend));
    fw.install(&mut dm).unwrap();

    dm.operation_begin(
        Operation::Execute,
        false,
        &UriPath::resource(OID_FIRMWARE_UPDATE, 0, 2),
    )
    .unwrap();
    assert_eq!(dm.execute(None).unwrap_err(), DmError::MethodNotAllowed);
    let _ = dm.operation_end();
    assert_eq!(fw.update_state(), UpdateState::Idle);
}

#[test]
fn sensor_fixture_coexists_with_well_known_objects() {
    let (mut dm, _) = sensor_dm();
    let server = ServerObject::new(1);
    server
        .add_instance(ServerInstanceInit::new(1, 60, "U"))
        .unwrap();
    server.install(&mut dm).unwrap();
    let oids: Vec<u16> = dm.registry().objects().iter().map(|obj| obj.oid()).collect();
    assert_eq!(oids, vec![OID_SERVER, 3303]);
}
