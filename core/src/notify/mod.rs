// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Observations and notifications.
//!
//! A fixed-capacity table holds one record per observed resource path:
//! the attributes from Observe and Write-Attributes, the value as of the
//! last notification, the CoAP token and the sequence number.
//! [`Notifications::tick`] samples the data model and marks records whose
//! pmin/pmax window or value change calls for a notification;
//! [`Notifications::emit`] then produces at most one notification per call,
//! in ascending slot order.
//!
//! Only pmin/pmax are honored; Write-Attributes carrying the extended
//! attribute set is rejected.

use lwm2m_shared::attr::NotificationAttrs;
use lwm2m_shared::message::{CoapCode, ContentFormat, Message, Operation, Token};
use lwm2m_shared::value::{Record, ResourceValue};
use lwm2m_shared::{
    DmError, PathLevel, ResourceType, Result, UriPath, OID_OSCORE, OID_SECURITY,
};

use static_assertions::const_assert;

use crate::dispatch::codec::{Codec, IoPayload, PayloadStatus, ValueEncoder};
use crate::engine::DataModel;

/// Observation slots available unless configured otherwise.
pub const DEFAULT_OBSERVATION_CAPACITY: usize = 10;

const_assert!(DEFAULT_OBSERVATION_CAPACITY > 0);

#[derive(Debug, Clone)]
struct Observation {
    path: UriPath,
    /// False for slots that only hold written attributes so far.
    active: bool,
    observe_attrs: NotificationAttrs,
    attrs_set_by_observe: bool,
    write_attrs: NotificationAttrs,
    rtype: ResourceType,
    last_value: ResourceValue,
    last_sent_ms: u64,
    pending: bool,
    token: Token,
    seq: u64,
}

/// The observation table. Owned by the caller next to the engine; all
/// methods borrow the data model read-only.
pub struct Notifications {
    slots: Vec<Option<Observation>>,
}

impl Default for Notifications {
    fn default() -> Self {
        Notifications::with_capacity(DEFAULT_OBSERVATION_CAPACITY)
    }
}

impl Notifications {
    pub fn with_capacity(slots: usize) -> Self {
        Notifications {
            slots: vec![None; slots],
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.as_ref().map_or(false, |obs| obs.active))
            .count()
    }

    fn position(&self, path: &UriPath) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref().map_or(false, |obs| obs.path == *path)
        })
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Starts (or refreshes) an observation and returns the initial
    /// record, stored with sequence number 1.
    pub fn observe(
        &mut self,
        dm: &DataModel,
        path: &UriPath,
        token: Token,
        attrs: NotificationAttrs,
        now_ms: u64,
    ) -> Result<Record> {
        validate_target(dm, path)?;
        if attrs.has_unsupported() {
            log::error!("only pmin/pmax are supported by observations");
            return Err(DmError::MethodNotAllowed);
        }
        let idx = match self.position(path).or_else(|| self.free_slot()) {
            Some(idx) => idx,
            None => {
                log::error!("no space for a new observation");
                return Err(DmError::Memory);
            }
        };
        let (value, rtype) = dm.resource_value(path).map_err(|err| {
            log::error!("observed resource is not readable: {}", err);
            DmError::MethodNotAllowed
        })?;
        let write_attrs = self.slots[idx]
            .as_ref()
            .map(|obs| obs.write_attrs)
            .unwrap_or_default();
        let record = Record::new(*path, rtype, value.clone());
        self.slots[idx] = Some(Observation {
            path: *path,
            active: true,
            observe_attrs: attrs,
            attrs_set_by_observe: attrs.has_any(),
            write_attrs,
            rtype,
            last_value: value,
            last_sent_ms: now_ms,
            pending: false,
            token,
            seq: 1,
        });
        Ok(record)
    }

    /// Ends an observation. Written attributes outlive it.
    pub fn cancel_observe(&mut self, path: &UriPath) -> Result<()> {
        let Some(idx) = self.position(path) else {
            log::debug!("no observation for {}", path);
            return Err(DmError::NotFound);
        };
        let keep_attrs = self.slots[idx]
            .as_ref()
            .map_or(false, |obs| obs.write_attrs.has_any());
        if keep_attrs {
            if let Some(obs) = self.slots[idx].as_mut() {
                obs.active = false;
                obs.pending = false;
                obs.observe_attrs = NotificationAttrs::default();
                obs.attrs_set_by_observe = false;
            }
        } else {
            self.slots[idx] = None;
        }
        Ok(())
    }

    /// Stores pmin/pmax for `path`; the record they land in is picked up
    /// by a later Observe. Attributes beyond pmin/pmax are rejected.
    pub fn write_attributes(
        &mut self,
        dm: &DataModel,
        path: &UriPath,
        attrs: NotificationAttrs,
        now_ms: u64,
    ) -> Result<()> {
        validate_target(dm, path)?;
        if attrs.has_unsupported() {
            log::error!("only pmin/pmax can be written in this build");
            return Err(DmError::MethodNotAllowed);
        }
        match self.position(path) {
            Some(idx) => {
                if let Some(obs) = self.slots[idx].as_mut() {
                    obs.write_attrs = attrs;
                }
            }
            None => {
                let Some(idx) = self.free_slot() else {
                    log::error!("no space for a new observation");
                    return Err(DmError::Memory);
                };
                let (value, rtype) = dm.resource_value(path)?;
                self.slots[idx] = Some(Observation {
                    path: *path,
                    active: false,
                    observe_attrs: NotificationAttrs::default(),
                    attrs_set_by_observe: false,
                    write_attrs: attrs,
                    rtype,
                    last_value: value,
                    last_sent_ms: now_ms,
                    pending: false,
                    token: Token::default(),
                    seq: 0,
                });
            }
        }
        Ok(())
    }

    /// Samples every active observation and marks those whose notification
    /// is due: the pmax period elapsed, or the value changed and pmin
    /// already passed.
    pub fn tick(&mut self, dm: &DataModel, now_ms: u64) -> Result<()> {
        let mut last_err = None;
        for slot in &mut self.slots {
            let Some(obs) = slot.as_mut() else { continue };
            if !obs.active {
                continue;
            }
            let attrs = if obs.attrs_set_by_observe {
                obs.observe_attrs
            } else {
                obs.write_attrs
            };
            let elapsed = (now_ms.saturating_sub(obs.last_sent_ms)) as f64 / 1000.0;
            if let Some(min) = attrs.min_period {
                if f64::from(min) > elapsed {
                    continue;
                }
            }
            if let Some(max) = attrs.max_period {
                if max != 0
                    && max >= attrs.min_period.unwrap_or(0)
                    && elapsed >= f64::from(max)
                {
                    obs.pending = true;
                    continue;
                }
            }
            let current = match dm.resource_value(&obs.path) {
                Ok((value, _)) => value,
                Err(err) => {
                    log::warn!("failed to sample {}: {}", obs.path, err);
                    last_err = Some(err);
                    continue;
                }
            };
            if !values_equal(&obs.last_value, &current) {
                obs.pending = true;
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Emits at most one notification: the first pending record in slot
    /// order. The record's value and timestamp are refreshed and its
    /// sequence number incremented.
    pub fn emit<C: Codec>(
        &mut self,
        dm: &DataModel,
        codec: &C,
        now_ms: u64,
        format: Option<ContentFormat>,
        out_buf: &mut [u8],
    ) -> Result<Option<Message>> {
        let mut last_err = None;
        for slot in &mut self.slots {
            let Some(obs) = slot.as_mut() else { continue };
            if !obs.pending {
                continue;
            }
            match prepare_notification(dm, codec, obs, now_ms, format, out_buf) {
                Ok(msg) => return Ok(Some(msg)),
                Err(err) => {
                    log::warn!("preparing a notification for {} failed", obs.path);
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    /// Message-level entry point for Observe, Cancel-Observe and
    /// Write-Attributes envelopes; fills `msg` in place as the response.
    pub fn handle<C: Codec>(
        &mut self,
        dm: &DataModel,
        codec: &C,
        msg: &mut Message,
        now_ms: u64,
        out_buf: &mut [u8],
    ) -> Result<()> {
        let operation = msg.operation;
        msg.msg_code = CoapCode::InternalServerError;
        let attrs = msg.attributes.notification.unwrap_or_default();
        let uri = msg.uri;

        let outcome = match operation {
            Operation::Observe => {
                msg.operation = Operation::Notify;
                self.observe(dm, &uri, msg.token, attrs, now_ms)
                    .and_then(|record| {
                        let (payload, fmt) = encode_single(codec, &record, msg.accept, out_buf)?;
                        msg.payload = payload;
                        msg.content_format = Some(fmt);
                        msg.observe_number = Some(1);
                        msg.msg_code = CoapCode::Content;
                        Ok(())
                    })
            }
            Operation::CancelObserve => {
                msg.operation = Operation::Response;
                match self.cancel_observe(&uri) {
                    Ok(()) => {
                        msg.msg_code = CoapCode::Content;
                        Ok(())
                    }
                    Err(DmError::NotFound) => {
                        // An unknown observation is answered, not failed.
                        msg.msg_code = CoapCode::NotFound;
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Operation::WriteAttributes => {
                msg.operation = Operation::Response;
                self.write_attributes(dm, &uri, attrs, now_ms).map(|()| {
                    msg.msg_code = CoapCode::Changed;
                })
            }
            other => {
                log::error!("notification handler can't drive {:?}", other);
                Err(DmError::InputArg)
            }
        };
        if let Err(err) = outcome {
            msg.msg_code = err.coap_code();
            return Err(err);
        }
        Ok(())
    }
}

fn prepare_notification<C: Codec>(
    dm: &DataModel,
    codec: &C,
    obs: &mut Observation,
    now_ms: u64,
    format: Option<ContentFormat>,
    out_buf: &mut [u8],
) -> Result<Message> {
    let (value, rtype) = dm.resource_value(&obs.path)?;
    debug_assert!(rtype == obs.rtype);
    let record = Record::new(obs.path, rtype, value.clone());
    let (payload, fmt) = encode_single(codec, &record, format, out_buf)?;

    obs.last_value = value;
    obs.last_sent_ms = now_ms;
    obs.pending = false;
    obs.seq += 1;

    let mut msg = Message::request(Operation::Notify, obs.path);
    msg.msg_code = CoapCode::Content;
    msg.content_format = Some(fmt);
    msg.payload = payload;
    msg.token = obs.token;
    msg.observe_number = Some(obs.seq);
    Ok(msg)
}

/// Encodes one record through the value encoder; a notification must fit
/// the provided buffer.
fn encode_single<C: Codec>(
    codec: &C,
    record: &Record,
    format: Option<ContentFormat>,
    out_buf: &mut [u8],
) -> Result<(Vec<u8>, ContentFormat)> {
    let mut encoder = codec
        .open_out(Operation::Notify, &record.path, 1, format)
        .map_err(|err| {
            log::error!("value encoder initialization failed: {:#}", err);
            DmError::BadRequest
        })?;
    let fmt = encoder.format();
    encoder.new_entry(record).map_err(|err| {
        log::error!("value encoder error: {:#}", err);
        DmError::BadRequest
    })?;
    let (written, status) = encoder.take_payload(out_buf).map_err(|err| {
        log::error!("value encoder error: {:#}", err);
        DmError::BadRequest
    })?;
    if status == PayloadStatus::NeedMoreBuffer {
        log::error!("notification does not fit the output buffer");
        return Err(DmError::Memory);
    }
    Ok((out_buf[..written].to_vec(), fmt))
}

/// Observations are limited to single-instance, non-external resources
/// outside the Security and OSCORE objects.
fn validate_target(dm: &DataModel, path: &UriPath) -> Result<()> {
    if !path.is(PathLevel::Resource) {
        log::error!("observations target resources, not {}", path);
        return Err(DmError::NotImplemented);
    }
    let spec = dm.resource_spec(path)?;
    if spec.operation.is_multi_instance() {
        log::error!("multi-instance resources can't be observed");
        return Err(DmError::NotImplemented);
    }
    if matches!(
        spec.value_type,
        Some(ResourceType::ExternalBytes) | Some(ResourceType::ExternalString)
    ) {
        log::error!("externally backed resources can't be observed");
        return Err(DmError::NotImplemented);
    }
    match path.oid() {
        Some(OID_SECURITY) | Some(OID_OSCORE) => {
            log::error!("observations on {} are not authorized", path);
            Err(DmError::Unauthorized)
        }
        _ => Ok(()),
    }
}

/// Type-appropriate value equality for change detection: doubles compare
/// bitwise, byte/character payloads compare up to the declared full
/// length, external streams never compare equal.
fn values_equal(left: &ResourceValue, right: &ResourceValue) -> bool {
    match (left, right) {
        (ResourceValue::Null, ResourceValue::Null) => true,
        (ResourceValue::Int(a), ResourceValue::Int(b)) => a == b,
        (ResourceValue::Uint(a), ResourceValue::Uint(b)) => a == b,
        (ResourceValue::Time(a), ResourceValue::Time(b)) => a == b,
        (ResourceValue::Bool(a), ResourceValue::Bool(b)) => a == b,
        (ResourceValue::ObjLnk(a), ResourceValue::ObjLnk(b)) => a == b,
        (ResourceValue::Double(a), ResourceValue::Double(b)) => a.to_bits() == b.to_bits(),
        (ResourceValue::Bytes(a), ResourceValue::Bytes(b))
        | (ResourceValue::String(a), ResourceValue::String(b)) => {
            let bound = a.full_length.unwrap_or(a.data.len());
            let left = &a.data[..bound.min(a.data.len())];
            let right = &b.data[..bound.min(b.data.len())];
            left == right
        }
        _ => false,
    }
}
