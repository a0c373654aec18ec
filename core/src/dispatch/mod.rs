// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! Request dispatch: couples decoded CoAP messages to the engine and the
//! codec, one block at a time.
//!
//! The processor owns the per-request bookkeeping (`block_number`, pending
//! encoder payload) that survives across block-transfer round trips. When a
//! producing operation fills the output buffer, [`Processor::process`]
//! returns [`ProcessStatus::BlockTransferNeeded`], the caller ships the
//! partial payload, and re-enters with the next request; consuming
//! operations symmetrically return [`ProcessStatus::WantNextMessage`] until
//! the final block arrives.

use std::rc::Rc;

use lwm2m_shared::message::{
    is_valid_block_size, BlockInfo, BlockKind, CoapCode, ContentFormat, Message, Operation,
};
use lwm2m_shared::{DmError, ResourceType, Result};

use crate::access::InstanceAccess;
use crate::engine::{DataModel, Produced};

pub mod codec;

use codec::{
    Codec, DecodeEvent, IoPayload, LinkEncoder, LinkRecord, PayloadStatus, ValueDecoder,
    ValueEncoder,
};

/// How a `process` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ProcessStatus {
    /// The operation is complete and the response is filled in.
    Finished,
    /// The response carries one block of a larger payload; re-enter with
    /// the server's next block request.
    BlockTransferNeeded,
    /// The request payload continues in another block; re-enter with it.
    WantNextMessage,
}

enum IoCtx<C: Codec> {
    None,
    Link(C::Link),
    Out(C::Out),
    In(C::In),
}

struct InFlight<C: Codec> {
    operation: Operation,
    block_number: u32,
    data_to_copy: bool,
    last_record: bool,
    io: IoCtx<C>,
}

/// Couples the engine to a codec implementation and drives one request
/// (possibly spanning several blocks) at a time.
pub struct Processor<C: Codec> {
    codec: C,
    access: Option<(Rc<dyn InstanceAccess>, Option<u16>)>,
    state: Option<InFlight<C>>,
}

impl<C: Codec> Processor<C> {
    pub fn new(codec: C) -> Self {
        Processor {
            codec,
            access: None,
            state: None,
        }
    }

    /// Installs an access predicate consulted once per instance-addressing
    /// request, with the SSID of the server this processor talks to.
    pub fn with_access(mut self, access: Rc<dyn InstanceAccess>, origin_ssid: Option<u16>) -> Self {
        self.access = Some((access, origin_ssid));
        self
    }

    pub fn in_progress(&self) -> bool {
        self.state.is_some()
    }

    /// Handles one decoded request (or continuation block), filling `msg`
    /// in place as the response. `out_buf` receives produced payload; its
    /// length is the block size offered when a block transfer starts.
    pub fn process(
        &mut self,
        dm: &mut DataModel,
        msg: &mut Message,
        bootstrap: bool,
        out_buf: &mut [u8],
    ) -> Result<ProcessStatus> {
        let operation = msg.operation;

        if self.state.is_none() {
            if let Some((access, origin_ssid)) = &self.access {
                if let (Some(oid), Some(iid)) = (msg.uri.oid(), msg.uri.iid()) {
                    if !access.allowed(operation, oid, iid, *origin_ssid) {
                        log::error!("access denied for {} on {}", operation_name(operation), msg.uri);
                        msg.msg_code = CoapCode::Unauthorized;
                        set_response_operation(msg);
                        return Err(DmError::Unauthorized);
                    }
                }
            }
            if dm.operation_in_progress() {
                log::error!("engine is busy with another operation");
                msg.msg_code = CoapCode::BadRequest;
                set_response_operation(msg);
                return Err(DmError::Logic);
            }
            if let Err(err) = dm.operation_begin(operation, bootstrap, &msg.uri) {
                msg.msg_code = err.coap_code();
                set_response_operation(msg);
                let _ = dm.operation_end();
                return Err(err);
            }
            let io = match self.open_io(dm, msg, bootstrap) {
                Ok(io) => io,
                Err(err) => {
                    log::error!("codec context initialization failed: {:#}", err);
                    msg.msg_code = CoapCode::BadRequest;
                    set_response_operation(msg);
                    let _ = dm.operation_end();
                    return Err(DmError::BadRequest);
                }
            };
            self.state = Some(InFlight {
                operation,
                block_number: 0,
                data_to_copy: false,
                last_record: false,
                io,
            });
        } else {
            let inflight = self.state.as_ref().ok_or(DmError::Logic)?;
            if inflight.operation != operation {
                log::error!("continuation does not match the operation in flight");
                msg.msg_code = CoapCode::BadRequest;
                return self.finalize(dm, msg, Err(DmError::Logic));
            }
            if let Some(block) = msg.block {
                if block.number != inflight.block_number {
                    log::error!("block transfer: packet lost");
                    msg.msg_code = CoapCode::RequestEntityIncomplete;
                    return self.finalize(dm, msg, Err(DmError::InputArg));
                }
            }
        }

        let step = self.run_operation(dm, msg, bootstrap, out_buf);
        match step {
            Ok(ProcessStatus::BlockTransferNeeded) => {
                if !is_valid_block_size(out_buf.len()) {
                    log::error!("output buffer length does not allow block transfers");
                    msg.msg_code = CoapCode::BadRequest;
                    return self.finalize(dm, msg, Err(DmError::InputArg));
                }
                let inflight = self.state.as_mut().ok_or(DmError::Logic)?;
                msg.block = Some(BlockInfo {
                    kind: BlockKind::Block2,
                    number: inflight.block_number,
                    size: out_buf.len() as u32,
                    more: true,
                });
                inflight.block_number += 1;
                set_response_operation(msg);
                Ok(ProcessStatus::BlockTransferNeeded)
            }
            Ok(ProcessStatus::WantNextMessage) => {
                let inflight = self.state.as_mut().ok_or(DmError::Logic)?;
                inflight.block_number += 1;
                set_response_operation(msg);
                Ok(ProcessStatus::WantNextMessage)
            }
            other => {
                if other.is_ok() {
                    if let Some(block) = &mut msg.block {
                        if block.kind == BlockKind::Block2 {
                            block.more = false;
                        }
                    }
                }
                self.finalize(dm, msg, other)
            }
        }
    }

    /// Cancels the request in flight between blocks; the engine rolls the
    /// transaction back.
    pub fn stop(&mut self, dm: &mut DataModel) -> Result<()> {
        if self.state.take().is_some() {
            dm.operation_cancel()
        } else {
            log::error!("no ongoing operation");
            Err(DmError::Logic)
        }
    }

    fn finalize(
        &mut self,
        dm: &mut DataModel,
        msg: &mut Message,
        result: Result<ProcessStatus>,
    ) -> Result<ProcessStatus> {
        self.state = None;
        set_response_operation(msg);
        let end = dm.operation_end();
        match result {
            Err(err) => Err(err),
            Ok(status) => match end {
                Ok(()) => Ok(status),
                Err(err) => {
                    msg.msg_code = err.coap_code();
                    Err(err)
                }
            },
        }
    }

    fn open_io(
        &self,
        dm: &mut DataModel,
        msg: &Message,
        bootstrap: bool,
    ) -> anyhow::Result<IoCtx<C>> {
        match msg.operation {
            Operation::Register | Operation::Update => {
                Ok(IoCtx::Link(self.codec.open_register()?))
            }
            Operation::Discover => {
                if bootstrap {
                    Ok(IoCtx::Link(self.codec.open_bootstrap_discover(&msg.uri)?))
                } else {
                    Ok(IoCtx::Link(
                        self.codec
                            .open_discover(&msg.uri, msg.attributes.discover_depth)?,
                    ))
                }
            }
            Operation::WriteReplace | Operation::WritePartialUpdate | Operation::Create => {
                Ok(IoCtx::In(self.codec.open_in(
                    msg.operation,
                    &msg.uri,
                    msg.content_format,
                )?))
            }
            Operation::Read => {
                let records = dm
                    .read_record_count()
                    .map_err(|err| anyhow::anyhow!("record count unavailable: {}", err))?;
                Ok(IoCtx::Out(self.codec.open_out(
                    Operation::Read,
                    &msg.uri,
                    records,
                    msg.accept,
                )?))
            }
            Operation::Execute | Operation::Delete => Ok(IoCtx::None),
            other => Err(anyhow::anyhow!("unsupported operation {:?}", other)),
        }
    }

    fn run_operation(
        &mut self,
        dm: &mut DataModel,
        msg: &mut Message,
        bootstrap: bool,
        out_buf: &mut [u8],
    ) -> Result<ProcessStatus> {
        match msg.operation {
            Operation::Execute => {
                msg.msg_code = CoapCode::Changed;
                let payload = std::mem::take(&mut msg.payload);
                let arg = if payload.is_empty() {
                    None
                } else {
                    match std::str::from_utf8(&payload) {
                        Ok(arg) => Some(arg.to_owned()),
                        Err(_) => {
                            log::error!("execute argument is not valid text");
                            msg.msg_code = CoapCode::BadRequest;
                            return Err(DmError::BadRequest);
                        }
                    }
                };
                if let Err(err) = dm.execute(arg.as_deref()) {
                    msg.msg_code = err.coap_code();
                    return Err(err);
                }
                Ok(ProcessStatus::Finished)
            }
            Operation::Delete => {
                msg.msg_code = CoapCode::Deleted;
                msg.payload.clear();
                Ok(ProcessStatus::Finished)
            }
            Operation::Register | Operation::Update => {
                msg.payload.clear();
                msg.content_format = Some(ContentFormat::LinkFormat);
                self.produce_links(dm, msg, out_buf, |dm| {
                    dm.get_register_record().map(|produced| {
                        produced.map(|record| LinkRecord {
                            path: record.path,
                            version: record.version,
                            ..LinkRecord::default()
                        })
                    })
                })
            }
            Operation::Discover => {
                msg.payload.clear();
                msg.content_format = Some(ContentFormat::LinkFormat);
                msg.msg_code = CoapCode::Content;
                if bootstrap {
                    self.produce_links(dm, msg, out_buf, |dm| {
                        dm.get_bootstrap_discover_record().map(|produced| {
                            produced.map(|record| LinkRecord {
                                path: record.path,
                                version: record.version,
                                ssid: record.ssid,
                                uri: record.uri,
                                ..LinkRecord::default()
                            })
                        })
                    })
                } else {
                    self.produce_links(dm, msg, out_buf, |dm| {
                        dm.get_discover_record().map(|produced| {
                            produced.map(|record| LinkRecord {
                                path: record.path,
                                version: record.version,
                                dim: record.dim,
                                ..LinkRecord::default()
                            })
                        })
                    })
                }
            }
            Operation::Read => {
                msg.payload.clear();
                msg.msg_code = CoapCode::Content;
                self.produce_values(dm, msg, out_buf)
            }
            Operation::WriteReplace | Operation::WritePartialUpdate | Operation::Create => {
                self.consume_payload(dm, msg)
            }
            other => {
                log::error!("processor can't drive {:?}", other);
                msg.msg_code = CoapCode::BadRequest;
                Err(DmError::InputArg)
            }
        }
    }

    fn produce_links(
        &mut self,
        dm: &mut DataModel,
        msg: &mut Message,
        out_buf: &mut [u8],
        mut next: impl FnMut(&mut DataModel) -> Result<Produced<LinkRecord>>,
    ) -> Result<ProcessStatus> {
        let inflight = self.state.as_mut().ok_or(DmError::Logic)?;
        let IoCtx::Link(encoder) = &mut inflight.io else {
            return Err(DmError::Logic);
        };
        let mut offset = 0usize;
        loop {
            if !inflight.data_to_copy {
                let record = match next(dm) {
                    Ok(produced) => {
                        inflight.last_record = produced.is_last();
                        produced.into_inner()
                    }
                    Err(err) => {
                        msg.msg_code = err.coap_code();
                        return Err(err);
                    }
                };
                if let Err(err) = encoder.new_entry(&record) {
                    log::error!("link encoder error: {:#}", err);
                    msg.msg_code = CoapCode::BadRequest;
                    return Err(DmError::BadRequest);
                }
            }
            match drain(encoder, msg, out_buf, &mut offset)? {
                PayloadStatus::Done => inflight.data_to_copy = false,
                PayloadStatus::NeedMoreBuffer => {
                    inflight.data_to_copy = true;
                    msg.payload = out_buf[..offset].to_vec();
                    return Ok(ProcessStatus::BlockTransferNeeded);
                }
            }
            if inflight.last_record {
                msg.payload = out_buf[..offset].to_vec();
                return Ok(ProcessStatus::Finished);
            }
        }
    }

    fn produce_values(
        &mut self,
        dm: &mut DataModel,
        msg: &mut Message,
        out_buf: &mut [u8],
    ) -> Result<ProcessStatus> {
        let inflight = self.state.as_mut().ok_or(DmError::Logic)?;
        let IoCtx::Out(encoder) = &mut inflight.io else {
            return Err(DmError::Logic);
        };
        msg.content_format = Some(encoder.format());
        let mut offset = 0usize;
        loop {
            if !inflight.data_to_copy {
                let record = match dm.get_read_entry() {
                    Ok(produced) => {
                        inflight.last_record = produced.is_last();
                        produced.into_inner()
                    }
                    Err(err) => {
                        msg.msg_code = err.coap_code();
                        return Err(err);
                    }
                };
                if let Err(err) = encoder.new_entry(&record) {
                    log::error!("value encoder error: {:#}", err);
                    msg.msg_code = CoapCode::BadRequest;
                    return Err(DmError::BadRequest);
                }
            }
            match drain(encoder, msg, out_buf, &mut offset)? {
                PayloadStatus::Done => inflight.data_to_copy = false,
                PayloadStatus::NeedMoreBuffer => {
                    inflight.data_to_copy = true;
                    msg.payload = out_buf[..offset].to_vec();
                    return Ok(ProcessStatus::BlockTransferNeeded);
                }
            }
            if inflight.last_record {
                msg.payload = out_buf[..offset].to_vec();
                return Ok(ProcessStatus::Finished);
            }
        }
    }

    fn consume_payload(&mut self, dm: &mut DataModel, msg: &mut Message) -> Result<ProcessStatus> {
        msg.content_format = None;
        msg.msg_code = if msg.operation == Operation::Create {
            CoapCode::Created
        } else {
            CoapCode::Changed
        };
        let finished = msg.block.map_or(true, |block| !block.more);
        let payload = std::mem::take(&mut msg.payload);

        let inflight = self.state.as_mut().ok_or(DmError::Logic)?;
        let IoCtx::In(decoder) = &mut inflight.io else {
            return Err(DmError::Logic);
        };
        if let Err(err) = decoder.feed(&payload, finished) {
            log::error!("value decoder error: {:#}", err);
            msg.msg_code = CoapCode::BadRequest;
            return Err(DmError::BadRequest);
        }

        let mut type_hint: Option<ResourceType> = None;
        loop {
            let event = match decoder.next_entry(type_hint.take()) {
                Ok(event) => event,
                Err(err) => {
                    log::error!("value decoder error: {:#}", err);
                    msg.msg_code = CoapCode::BadRequest;
                    return Err(DmError::BadRequest);
                }
            };
            match event {
                DecodeEvent::Entry(record) => {
                    if let Err(err) = dm.write_entry(&record) {
                        msg.msg_code = err.coap_code();
                        return Err(err);
                    }
                }
                DecodeEvent::WantType { path } => match dm.resource_type(&path) {
                    Ok(rtype) => type_hint = Some(rtype),
                    Err(err) => {
                        msg.msg_code = err.coap_code();
                        return Err(err);
                    }
                },
                DecodeEvent::WantNextPayload if !finished => {
                    return Ok(ProcessStatus::WantNextMessage)
                }
                DecodeEvent::WantNextPayload => {
                    log::error!("decoder wants more payload but the request is finished");
                    msg.msg_code = CoapCode::BadRequest;
                    return Err(DmError::BadRequest);
                }
                DecodeEvent::Eof => return Ok(ProcessStatus::Finished),
            }
        }
    }
}

fn drain(
    encoder: &mut impl IoPayload,
    msg: &mut Message,
    out_buf: &mut [u8],
    offset: &mut usize,
) -> Result<PayloadStatus> {
    match encoder.take_payload(&mut out_buf[*offset..]) {
        Ok((written, status)) => {
            *offset += written;
            Ok(status)
        }
        Err(err) => {
            log::error!("encoder payload error: {:#}", err);
            msg.msg_code = CoapCode::BadRequest;
            Err(DmError::BadRequest)
        }
    }
}

/// Responses echo the Register/Update operation; everything else answers
/// as a plain response.
fn set_response_operation(msg: &mut Message) {
    if msg.operation != Operation::Register && msg.operation != Operation::Update {
        msg.operation = Operation::Response;
    }
}

fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::Register => "register",
        Operation::Update => "update",
        Operation::Read => "read",
        Operation::ReadComposite => "read-composite",
        Operation::Discover => "discover",
        Operation::WriteReplace => "write-replace",
        Operation::WritePartialUpdate => "write-update",
        Operation::WriteComposite => "write-composite",
        Operation::WriteAttributes => "write-attributes",
        Operation::Execute => "execute",
        Operation::Create => "create",
        Operation::Delete => "delete",
        Operation::Observe => "observe",
        Operation::CancelObserve => "cancel-observe",
        Operation::Notify => "notify",
        Operation::Response => "response",
    }
}
