// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Shared fixtures: a sensor-style test object and a line-oriented test
//! codec implementing the codec traits.

// Each test binary compiles its own copy; not all of them use every helper.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use lwm2m_core::dispatch::codec::{
    Codec, DecodeEvent, IoPayload, LinkEncoder, LinkRecord, PayloadStatus, ValueDecoder,
    ValueEncoder,
};
use lwm2m_core::engine::DataModel;
use lwm2m_core::model::{
    Instance, Object, ObjectHandlers, ResOperation, Resource, ResourceHooks, ResourceSpec,
    ValueCell,
};
use lwm2m_shared::message::{ContentFormat, Operation};
use lwm2m_shared::value::{BytesChunk, ObjLink, Record, ResourceValue};
use lwm2m_shared::{Iid, Oid, ResourceType, Result, UriPath};

pub const SENSOR_OID: Oid = 3303;
pub const RID_VALUE: u16 = 5700;
pub const RID_APPLICATION_TYPE: u16 = 5750;
pub const RID_CALIBRATION: u16 = 5821;
pub const RID_SAMPLES: u16 = 6000;

/// One sensor instance: a readable Double, a writable String, a writable
/// bounded Bytes blob and a writable multi-instance Int.
pub fn sensor_instance(iid: Iid, value: f64) -> Instance {
    Instance::new(iid)
        .with_resource(Resource::single(
            ResourceSpec::new(RID_VALUE, ResOperation::ReadWrite, ResourceType::Double),
            ValueCell::new(ResourceValue::Double(value)),
        ))
        .with_resource(Resource::single(
            ResourceSpec::new(
                RID_APPLICATION_TYPE,
                ResOperation::ReadWrite,
                ResourceType::String,
            ),
            ValueCell::new(ResourceValue::string("")),
        ))
        .with_resource(Resource::single(
            ResourceSpec::new(RID_CALIBRATION, ResOperation::Write, ResourceType::Bytes),
            ValueCell::bounded(ResourceValue::Null, 16),
        ))
        .with_resource(Resource::multi(
            ResourceSpec::new(RID_SAMPLES, ResOperation::ReadWriteMulti, ResourceType::Int),
            8,
        ))
}

/// Object handlers backing the sensor: fresh instances carry the standard
/// resource set, deletes and resets are accepted, and every lifecycle call
/// is recorded for order assertions.
pub struct SensorHandlers {
    pub calls: Rc<RefCell<Vec<String>>>,
}

impl ObjectHandlers for SensorHandlers {
    fn operation_begin(&self, oid: Oid, operation: Operation) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("begin:{}:{:?}", oid, operation));
        Ok(())
    }

    fn operation_validate(&self, oid: Oid) -> Result<()> {
        self.calls.borrow_mut().push(format!("validate:{}", oid));
        Ok(())
    }

    fn operation_end(&self, oid: Oid, outcome: lwm2m_core::model::OpOutcome) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("end:{}:{:?}", oid, outcome));
        Ok(())
    }

    fn instance_create(&self, oid: Oid, iid: Iid) -> Result<Instance> {
        self.calls
            .borrow_mut()
            .push(format!("create:{}:{}", oid, iid));
        Ok(sensor_instance(iid, 0.0))
    }

    fn instance_deleted(&self, oid: Oid, iid: Iid) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("delete:{}:{}", oid, iid));
        Ok(())
    }

    fn instance_reset(&self, oid: Oid, iid: Iid) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("reset:{}:{}", oid, iid));
        Ok(())
    }
}

/// The standard fixture: `/3303` with instances 0 (value 0.0) and 1
/// (value 2.0), capacity 3, lifecycle handlers attached.
pub fn sensor_object(calls: &Rc<RefCell<Vec<String>>>) -> Object {
    Object::new(SENSOR_OID, 3)
        .with_version("1.1")
        .with_handlers(Rc::new(SensorHandlers {
            calls: Rc::clone(calls),
        }))
        .with_instance(sensor_instance(0, 0.0))
        .with_instance(sensor_instance(1, 2.0))
}

pub fn sensor_dm() -> (DataModel, Rc<RefCell<Vec<String>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut dm = DataModel::new(8);
    dm.register_object(sensor_object(&calls)).unwrap();
    (dm, calls)
}

/// A hook-backed readable resource returning values from a shared cell,
/// for observation tests.
pub fn dynamic_sensor(iid: Iid, source: Rc<RefCell<f64>>) -> Instance {
    Instance::new(iid).with_resource(
        Resource::single(
            ResourceSpec::new(RID_VALUE, ResOperation::Read, ResourceType::Double),
            ValueCell::default(),
        )
        .with_hooks(ResourceHooks::reader(move |_rref| {
            Ok(ResourceValue::Double(*source.borrow()))
        })),
    )
}

// ---------------------------------------------------------------------------
// Test codec: a line-oriented text rendition of the wire formats.
//
// Encoders render one line per record; decoders parse `path=literal`
// lines, returning `WantType` for untagged literals so the
// type-disambiguation round trip is exercised.
// ---------------------------------------------------------------------------

pub struct TestCodec;

#[derive(Default)]
pub struct TestLinkEncoder {
    pending: Vec<u8>,
}

#[derive(Default)]
pub struct TestValueEncoder {
    pending: Vec<u8>,
    format: Option<ContentFormat>,
}

pub struct TestValueDecoder {
    buffer: String,
    finished: bool,
    pending_line: Option<String>,
}

impl Codec for TestCodec {
    type Link = TestLinkEncoder;
    type Out = TestValueEncoder;
    type In = TestValueDecoder;

    fn open_register(&self) -> anyhow::Result<Self::Link> {
        Ok(TestLinkEncoder::default())
    }

    fn open_discover(&self, _base: &UriPath, _depth: Option<u8>) -> anyhow::Result<Self::Link> {
        Ok(TestLinkEncoder::default())
    }

    fn open_bootstrap_discover(&self, _base: &UriPath) -> anyhow::Result<Self::Link> {
        Ok(TestLinkEncoder::default())
    }

    fn open_out(
        &self,
        _operation: Operation,
        _base: &UriPath,
        _records: usize,
        accept: Option<ContentFormat>,
    ) -> anyhow::Result<Self::Out> {
        Ok(TestValueEncoder {
            pending: Vec::new(),
            format: accept,
        })
    }

    fn open_in(
        &self,
        _operation: Operation,
        _base: &UriPath,
        _format: Option<ContentFormat>,
    ) -> anyhow::Result<Self::In> {
        Ok(TestValueDecoder {
            buffer: String::new(),
            finished: false,
            pending_line: None,
        })
    }
}

fn drain_pending(pending: &mut Vec<u8>, buf: &mut [u8]) -> (usize, PayloadStatus) {
    let take = pending.len().min(buf.len());
    buf[..take].copy_from_slice(&pending[..take]);
    pending.drain(..take);
    if pending.is_empty() {
        (take, PayloadStatus::Done)
    } else {
        (take, PayloadStatus::NeedMoreBuffer)
    }
}

impl IoPayload for TestLinkEncoder {
    fn take_payload(&mut self, buf: &mut [u8]) -> anyhow::Result<(usize, PayloadStatus)> {
        Ok(drain_pending(&mut self.pending, buf))
    }
}

impl LinkEncoder for TestLinkEncoder {
    fn new_entry(&mut self, record: &LinkRecord) -> anyhow::Result<()> {
        let mut line = format!("<{}>", record.path);
        if let Some(version) = &record.version {
            line.push_str(&format!(";ver={}", version));
        }
        if let Some(ssid) = record.ssid {
            line.push_str(&format!(";ssid={}", ssid));
        }
        if let Some(uri) = &record.uri {
            line.push_str(&format!(";uri=\"{}\"", uri));
        }
        if let Some(dim) = record.dim {
            line.push_str(&format!(";dim={}", dim));
        }
        line.push('\n');
        self.pending.extend_from_slice(line.as_bytes());
        Ok(())
    }
}

impl IoPayload for TestValueEncoder {
    fn take_payload(&mut self, buf: &mut [u8]) -> anyhow::Result<(usize, PayloadStatus)> {
        Ok(drain_pending(&mut self.pending, buf))
    }
}

impl ValueEncoder for TestValueEncoder {
    fn new_entry(&mut self, record: &Record) -> anyhow::Result<()> {
        let value = match &record.value {
            ResourceValue::Null => "null".to_string(),
            ResourceValue::Int(v) => format!("i:{}", v),
            ResourceValue::Uint(v) => format!("u:{}", v),
            ResourceValue::Double(v) => format!("d:{}", v),
            ResourceValue::Bool(v) => format!("B:{}", v),
            ResourceValue::Time(v) => format!("t:{}", v),
            ResourceValue::ObjLnk(link) => format!("o:{}:{}", link.oid, link.iid),
            ResourceValue::String(chunk) => {
                format!("s:{}", chunk.as_str().unwrap_or_default())
            }
            ResourceValue::Bytes(chunk) => {
                let hex: String = chunk.data.iter().map(|b| format!("{:02x}", b)).collect();
                format!("b:{}", hex)
            }
            ResourceValue::ExternalBytes(_) | ResourceValue::ExternalString(_) => {
                anyhow::bail!("external values are streamed, not encoded inline")
            }
        };
        let line = format!("{}={}\n", record.path, value);
        self.pending.extend_from_slice(line.as_bytes());
        Ok(())
    }

    fn format(&self) -> ContentFormat {
        self.format.unwrap_or(ContentFormat::SenmlCbor)
    }
}

fn parse_tagged(literal: &str) -> anyhow::Result<Option<ResourceValue>> {
    let Some((tag, rest)) = literal.split_once(':') else {
        return Ok(None);
    };
    let value = match tag {
        "i" => ResourceValue::Int(rest.parse()?),
        "u" => ResourceValue::Uint(rest.parse()?),
        "d" => ResourceValue::Double(rest.parse()?),
        "B" => ResourceValue::Bool(rest.parse()?),
        "t" => ResourceValue::Time(rest.parse()?),
        "s" => ResourceValue::string(rest),
        "b" => {
            let bytes: anyhow::Result<Vec<u8>> = (0..rest.len())
                .step_by(2)
                .map(|idx| Ok(u8::from_str_radix(&rest[idx..idx + 2], 16)?))
                .collect();
            ResourceValue::bytes(bytes?)
        }
        "o" => {
            let (oid, iid) = rest.split_once(':').ok_or_else(|| {
                anyhow::anyhow!("malformed objlnk literal: {}", rest)
            })?;
            ResourceValue::ObjLnk(ObjLink {
                oid: oid.parse()?,
                iid: iid.parse()?,
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn parse_with_hint(literal: &str, hint: ResourceType) -> anyhow::Result<ResourceValue> {
    Ok(match hint {
        ResourceType::Int => ResourceValue::Int(literal.parse()?),
        ResourceType::Uint => ResourceValue::Uint(literal.parse()?),
        ResourceType::Double => ResourceValue::Double(literal.parse()?),
        ResourceType::Bool => ResourceValue::Bool(literal.parse()?),
        ResourceType::Time => ResourceValue::Time(literal.parse()?),
        ResourceType::String | ResourceType::ExternalString => ResourceValue::string(literal),
        ResourceType::Bytes | ResourceType::ExternalBytes => {
            ResourceValue::bytes(literal.as_bytes().to_vec())
        }
        ResourceType::ObjLnk => {
            let (oid, iid) = literal
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("malformed objlnk literal: {}", literal))?;
            ResourceValue::ObjLnk(ObjLink {
                oid: oid.parse()?,
                iid: iid.parse()?,
            })
        }
    })
}

impl ValueDecoder for TestValueDecoder {
    fn feed(&mut self, payload: &[u8], finished: bool) -> anyhow::Result<()> {
        self.buffer.push_str(std::str::from_utf8(payload)?);
        self.finished = finished;
        Ok(())
    }

    fn next_entry(&mut self, type_hint: Option<ResourceType>) -> anyhow::Result<DecodeEvent> {
        if let Some(line) = self.pending_line.take() {
            let (path, literal) = split_line(&line)?;
            let hint = type_hint
                .ok_or_else(|| anyhow::anyhow!("entry re-requested without a type hint"))?;
            let value = parse_with_hint(literal, hint)?;
            let rtype = value.resource_type().unwrap_or(hint);
            return Ok(DecodeEvent::Entry(Record::new(path, rtype, value)));
        }

        let line = match self.buffer.find('\n') {
            Some(pos) => {
                let line = self.buffer[..pos].to_string();
                self.buffer.drain(..=pos);
                line
            }
            None => {
                if !self.finished {
                    return Ok(DecodeEvent::WantNextPayload);
                }
                if self.buffer.trim().is_empty() {
                    return Ok(DecodeEvent::Eof);
                }
                std::mem::take(&mut self.buffer)
            }
        };
        if line.trim().is_empty() {
            return if self.finished && self.buffer.trim().is_empty() {
                Ok(DecodeEvent::Eof)
            } else {
                Ok(DecodeEvent::WantNextPayload)
            };
        }

        let (path, literal) = split_line(&line)?;
        match parse_tagged(literal)? {
            Some(value) => {
                let rtype = value
                    .resource_type()
                    .ok_or_else(|| anyhow::anyhow!("untyped literal"))?;
                Ok(DecodeEvent::Entry(Record::new(path, rtype, value)))
            }
            None => {
                self.pending_line = Some(line.clone());
                Ok(DecodeEvent::WantType { path })
            }
        }
    }
}

fn split_line(line: &str) -> anyhow::Result<(UriPath, &str)> {
    let (path, literal) = line
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("malformed entry: {}", line))?;
    Ok((path.trim().parse()?, literal.trim()))
}

/// Drains a whole producing operation through the engine API.
pub fn collect_read_records(dm: &mut DataModel) -> Vec<Record> {
    let mut records = Vec::new();
    loop {
        match dm.get_read_entry().unwrap() {
            lwm2m_core::Produced::More(record) => records.push(record),
            lwm2m_core::Produced::Last(record) => {
                records.push(record);
                return records;
            }
        }
    }
}

/// Convenience begin that panics on failure.
pub fn begin(dm: &mut DataModel, op: Operation, path: &str) {
    dm.operation_begin(op, false, &path.parse().unwrap()).unwrap();
}

/// A fully assembled write record.
pub fn record(path: &str, value: ResourceValue) -> Record {
    let rtype = value.resource_type().expect("record needs a typed value");
    Record::new(path.parse().unwrap(), rtype, value)
}

/// A chunk of a larger byte payload.
pub fn bytes_chunk(path: &str, data: &[u8], offset: usize, full: usize) -> Record {
    Record::new(
        path.parse().unwrap(),
        ResourceType::Bytes,
        ResourceValue::Bytes(BytesChunk {
            data: data.to_vec(),
            offset,
            full_length: Some(full),
        }),
    )
}
