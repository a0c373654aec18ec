// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Processor-level coverage: block transfers, payload ingestion, type
//! disambiguation and the CoAP response codes.

mod common;

use common::{sensor_dm, TestCodec};
use lwm2m_core::dispatch::{ProcessStatus, Processor};
use lwm2m_core::engine::DataModel;
use lwm2m_shared::message::{
    BlockInfo, BlockKind, CoapCode, ContentFormat, Message, Operation,
};
use lwm2m_shared::{DmError, UriPath};
use pretty_assertions::assert_eq;

fn read_request(path: &str) -> Message {
    let mut msg = Message::request(Operation::Read, path.parse().unwrap());
    msg.accept = Some(ContentFormat::SenmlCbor);
    msg
}

fn write_request(path: &str, payload: &str, operation: Operation) -> Message {
    let mut msg = Message::request(operation, path.parse().unwrap());
    msg.content_format = Some(ContentFormat::SenmlCbor);
    msg.payload = payload.as_bytes().to_vec();
    msg
}

#[test]
fn read_fits_one_message() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut msg = read_request("/3303/0/5700");
    let mut out_buf = [0u8; 256];

    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.msg_code, CoapCode::Content);
    assert_eq!(msg.operation, Operation::Response);
    assert_eq!(msg.content_format, Some(ContentFormat::SenmlCbor));
    assert_eq!(
        String::from_utf8(msg.payload.clone()).unwrap(),
        "/3303/0/5700=d:0\n"
    );
    assert!(!dm.operation_in_progress());
}

#[test]
fn read_spans_blocks_when_the_buffer_is_small() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 32];

    let mut msg = read_request("/3303");
    let mut payload = Vec::new();
    let mut block_number = 0;
    loop {
        let status = processor.process(&mut dm, &mut msg, false, &mut out_buf);
        payload.extend_from_slice(&msg.payload);
        match status.unwrap() {
            ProcessStatus::Finished => break,
            ProcessStatus::BlockTransferNeeded => {
                let block = msg.block.unwrap();
                assert_eq!(block.kind, BlockKind::Block2);
                assert_eq!(block.number, block_number);
                assert_eq!(block.size, 32);
                assert!(block.more);
                block_number += 1;
                // The server asks for the next block.
                msg = read_request("/3303");
                msg.block = Some(BlockInfo {
                    kind: BlockKind::Block2,
                    number: block_number,
                    size: 32,
                    more: false,
                });
            }
            ProcessStatus::WantNextMessage => panic!("read must not want payload"),
        }
    }
    assert!(block_number > 0);
    let text = String::from_utf8(payload).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "/3303/0/5700=d:0",
            "/3303/0/5750=s:",
            "/3303/1/5700=d:2",
            "/3303/1/5750=s:",
        ]
    );
    assert!(!dm.operation_in_progress());
}

#[test]
fn mismatched_block_number_is_4_08() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 16];

    let mut msg = read_request("/3303");
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::BlockTransferNeeded);

    let mut msg = read_request("/3303");
    msg.block = Some(BlockInfo {
        kind: BlockKind::Block2,
        number: 5,
        size: 16,
        more: false,
    });
    let err = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap_err();
    assert_eq!(err, DmError::InputArg);
    assert_eq!(msg.msg_code, CoapCode::RequestEntityIncomplete);
    assert!(!dm.operation_in_progress());
}

#[test]
fn invalid_block_size_fails_when_a_block_is_needed() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    // 20 bytes is not a power of two.
    let mut out_buf = [0u8; 20];
    let mut msg = read_request("/3303");
    let err = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap_err();
    assert_eq!(err, DmError::InputArg);
    assert_eq!(msg.msg_code, CoapCode::BadRequest);
    assert!(!dm.operation_in_progress());
}

#[test]
fn write_with_type_disambiguation() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 128];

    // No type tag on the literal: the codec asks the engine for Double.
    let mut msg = write_request(
        "/3303/0/5700",
        "/3303/0/5700=1\n",
        Operation::WritePartialUpdate,
    );
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.msg_code, CoapCode::Changed);

    let (value, _) = dm
        .resource_value(&"/3303/0/5700".parse().unwrap())
        .unwrap();
    assert_eq!(value.as_double(), Some(1.0));
}

#[test]
fn write_spanning_two_blocks() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 128];

    let mut msg = write_request(
        "/3303/0",
        "/3303/0/5750=s:gar",
        Operation::WritePartialUpdate,
    );
    msg.block = Some(BlockInfo {
        kind: BlockKind::Block1,
        number: 0,
        size: 16,
        more: true,
    });
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::WantNextMessage);
    assert!(dm.operation_in_progress());

    let mut msg = write_request("/3303/0", "age\n", Operation::WritePartialUpdate);
    msg.block = Some(BlockInfo {
        kind: BlockKind::Block1,
        number: 1,
        size: 16,
        more: false,
    });
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.msg_code, CoapCode::Changed);

    let (value, _) = dm
        .resource_value(&"/3303/0/5750".parse().unwrap())
        .unwrap();
    assert_eq!(value.as_str(), Some("garage"));
}

#[test]
fn create_answers_2_01() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 128];

    let mut msg = write_request("/3303", "/3303/2/5700=d:1\n", Operation::Create);
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.msg_code, CoapCode::Created);
    assert_eq!(dm.registry().find(3303).unwrap().instance_count(), 3);
}

#[test]
fn delete_answers_2_02() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 128];

    let mut msg = Message::request(Operation::Delete, "/3303/1".parse().unwrap());
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.msg_code, CoapCode::Deleted);
    assert_eq!(dm.registry().find(3303).unwrap().instance_count(), 1);
}

#[test]
fn execute_answers_2_04() {
    use lwm2m_core::model::{Instance, Object, Resource, ResourceHooks};

    let mut dm = DataModel::new(4);
    dm.register_object(
        Object::new(50, 1).with_instance(Instance::new(0).with_resource(
            Resource::executable(1, ResourceHooks::executor(|_rref, _arg| Ok(()))),
        )),
    )
    .unwrap();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 64];

    let mut msg = Message::request(Operation::Execute, "/50/0/1".parse().unwrap());
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.msg_code, CoapCode::Changed);
}

#[test]
fn missing_path_answers_4_04() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 64];

    let mut msg = read_request("/3304");
    let err = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap_err();
    assert_eq!(err, DmError::NotFound);
    assert_eq!(msg.msg_code, CoapCode::NotFound);
    assert!(!dm.operation_in_progress());
}

#[test]
fn bad_write_answers_4_00_and_rolls_back() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 64];

    let mut msg = write_request(
        "/3303/0",
        "/3303/0/5700=d:1\n/3303/1/5700=d:2\n",
        Operation::WritePartialUpdate,
    );
    let err = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap_err();
    assert_eq!(err, DmError::BadRequest);
    assert_eq!(msg.msg_code, CoapCode::BadRequest);
    assert!(!dm.operation_in_progress());
}

#[test]
fn stop_cancels_a_transfer_in_flight() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 16];

    let mut msg = read_request("/3303");
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::BlockTransferNeeded);
    assert!(dm.operation_in_progress());

    processor.stop(&mut dm).unwrap();
    assert!(!dm.operation_in_progress());
    assert_eq!(processor.stop(&mut dm).unwrap_err(), DmError::Logic);
}

#[test]
fn bootstrap_discover_lists_objects_and_instances() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 512];

    let mut msg = Message::request(Operation::Discover, UriPath::root());
    let status = processor
        .process(&mut dm, &mut msg, true, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.msg_code, CoapCode::Content);
    assert_eq!(msg.content_format, Some(ContentFormat::LinkFormat));
    let text = String::from_utf8(msg.payload.clone()).unwrap();
    assert_eq!(text, "</3303>;ver=1.1\n</3303/0>\n</3303/1>\n");
}

#[test]
fn register_produces_the_link_list() {
    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec);
    let mut out_buf = [0u8; 512];

    let mut msg = Message::request(Operation::Register, UriPath::root());
    let status = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap();
    assert_eq!(status, ProcessStatus::Finished);
    assert_eq!(msg.operation, Operation::Register);
    assert_eq!(msg.content_format, Some(ContentFormat::LinkFormat));
    let text = String::from_utf8(msg.payload.clone()).unwrap();
    assert_eq!(text, "</3303>;ver=1.1\n</3303/0>\n</3303/1>\n");
}

#[test]
fn denied_access_answers_4_01() {
    use lwm2m_core::access::InstanceAccess;
    use std::rc::Rc;

    struct DenyAll;
    impl InstanceAccess for DenyAll {
        fn allowed(
            &self,
            _action: Operation,
            _oid: u16,
            _iid: u16,
            _ssid: Option<u16>,
        ) -> bool {
            false
        }
    }

    let (mut dm, _) = sensor_dm();
    let mut processor = Processor::new(TestCodec).with_access(Rc::new(DenyAll), Some(1));
    let mut out_buf = [0u8; 64];

    let mut msg = read_request("/3303/0");
    let err = processor
        .process(&mut dm, &mut msg, false, &mut out_buf)
        .unwrap_err();
    assert_eq!(err, DmError::Unauthorized);
    assert_eq!(msg.msg_code, CoapCode::Unauthorized);
    assert!(!dm.operation_in_progress());
}
