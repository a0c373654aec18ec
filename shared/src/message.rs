// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The message envelope exchanged between the CoAP layer and the engine.
//!
//! Requests arrive decoded; the engine fills the same envelope in place to
//! form the response (code, payload, content format, block options).

use std::fmt;

use num_derive::FromPrimitive;
use static_assertions::const_assert;

use crate::attr::Attributes;
use crate::path::UriPath;

/// The LwM2M operation selected by the transport for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Register,
    Update,
    Read,
    ReadComposite,
    Discover,
    WriteReplace,
    WritePartialUpdate,
    WriteComposite,
    WriteAttributes,
    Execute,
    Create,
    Delete,
    Observe,
    CancelObserve,
    /// Outgoing non-confirmable notification.
    Notify,
    /// Generic response envelope.
    Response,
}

impl Operation {
    /// Operations that consume a request payload through the value decoder.
    pub fn consumes_payload(&self) -> bool {
        matches!(
            self,
            Operation::WriteReplace
                | Operation::WritePartialUpdate
                | Operation::Create
                | Operation::Execute
        )
    }
}

/// CoAP response code, encoded as `class << 5 | detail`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum CoapCode {
    Empty = 0x00,
    Created = 0x41,
    Deleted = 0x42,
    Valid = 0x43,
    Changed = 0x44,
    Content = 0x45,
    BadRequest = 0x80,
    Unauthorized = 0x81,
    BadOption = 0x82,
    Forbidden = 0x83,
    NotFound = 0x84,
    MethodNotAllowed = 0x85,
    NotAcceptable = 0x86,
    RequestEntityIncomplete = 0x88,
    PreconditionFailed = 0x8C,
    UnsupportedContentFormat = 0x8F,
    InternalServerError = 0xA0,
    NotImplemented = 0xA1,
    ServiceUnavailable = 0xA3,
}

impl CoapCode {
    pub fn class(&self) -> u8 {
        (*self as u8) >> 5
    }

    pub fn detail(&self) -> u8 {
        (*self as u8) & 0x1F
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for CoapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// CoAP content format numbers used by LwM2M.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ContentFormat {
    PlainText = 0,
    LinkFormat = 40,
    OctetStream = 42,
    Cbor = 60,
    SenmlJson = 110,
    SenmlCbor = 112,
    Lwm2mTlv = 11542,
    Lwm2mJson = 11543,
    Lwm2mCbor = 11544,
}

/// Which CoAP block option a transfer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Request payload (uploads).
    Block1,
    /// Response payload (downloads).
    Block2,
}

/// Decoded CoAP block option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub kind: BlockKind,
    pub number: u32,
    pub size: u32,
    pub more: bool,
}

/// Smallest and largest block sizes CoAP permits.
pub const MIN_BLOCK_SIZE: usize = 16;
pub const MAX_BLOCK_SIZE: usize = 1024;

const_assert!(MIN_BLOCK_SIZE.is_power_of_two());
const_assert!(MAX_BLOCK_SIZE.is_power_of_two());

/// True when `size` is usable as a CoAP block size.
pub fn is_valid_block_size(size: usize) -> bool {
    size.is_power_of_two() && (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&size)
}

/// CoAP message token, up to 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Token {
    bytes: [u8; 8],
    len: u8,
}

impl Token {
    pub fn new(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= 8);
        let mut token = Token::default();
        let len = bytes.len().min(8);
        token.bytes[..len].copy_from_slice(&bytes[..len]);
        token.len = len as u8;
        token
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// A decoded request, reused in place as the response.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub operation: Operation,
    pub uri: UriPath,
    pub msg_code: CoapCode,
    pub content_format: Option<ContentFormat>,
    pub accept: Option<ContentFormat>,
    pub payload: Vec<u8>,
    pub block: Option<BlockInfo>,
    pub attributes: Attributes,
    pub token: Token,
    /// CoAP Observe option value on notifications.
    pub observe_number: Option<u64>,
}

impl Message {
    /// A bare request envelope; transports fill in what they decoded.
    pub fn request(operation: Operation, uri: UriPath) -> Self {
        Message {
            operation,
            uri,
            msg_code: CoapCode::Empty,
            content_format: None,
            accept: None,
            payload: Vec::new(),
            block: None,
            attributes: Attributes::default(),
            token: Token::default(),
            observe_number: None,
        }
    }
}
