//! The codec boundary.
//!
//! The wire formats (link-format, SenML-CBOR, LwM2M-CBOR, TLV) live in an
//! external collaborator reached through these traits. Encoders are fed one
//! record at a time and drained into caller-provided buffers, so a payload
//! larger than one CoAP block is produced incrementally; the decoder is fed
//! payload bytes and yields `(path, type, value)` entries, asking the
//! engine for the declared type when the wire representation is ambiguous.
//!
//! Codec failures are foreign errors (`anyhow`); the dispatcher logs them
//! and answers 4.00.

use lwm2m_shared::message::{ContentFormat, Operation};
use lwm2m_shared::value::Record;
use lwm2m_shared::{ResourceType, UriPath};

/// Whether an encoder finished flushing its pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStatus {
    /// The pending entry is fully flushed; feed the next one.
    Done,
    /// The buffer filled up; ship it and drain again into a fresh buffer.
    NeedMoreBuffer,
}

/// One link of a Register, Discover or Bootstrap-Discover listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkRecord {
    pub path: UriPath,
    pub version: Option<String>,
    pub ssid: Option<u16>,
    pub uri: Option<String>,
    pub dim: Option<u16>,
}

/// The drain half shared by every encoder.
pub trait IoPayload {
    /// Copies pending payload into `buf`; returns the number of bytes
    /// written and whether the pending entry is exhausted.
    fn take_payload(&mut self, buf: &mut [u8]) -> anyhow::Result<(usize, PayloadStatus)>;
}

/// Encoder for the link-format listings.
pub trait LinkEncoder: IoPayload {
    fn new_entry(&mut self, record: &LinkRecord) -> anyhow::Result<()>;
}

/// Encoder for value payloads (Read, Observe, Notify).
pub trait ValueEncoder: IoPayload {
    fn new_entry(&mut self, record: &Record) -> anyhow::Result<()>;

    /// The negotiated output format, reported in the response.
    fn format(&self) -> ContentFormat;
}

/// One step of decoding a value payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// A complete entry.
    Entry(Record),
    /// The wire representation is ambiguous; call again with the declared
    /// type of the resource at `path`.
    WantType { path: UriPath },
    /// The current payload is exhausted but the wire said more follows.
    WantNextPayload,
    /// All entries of the request have been produced.
    Eof,
}

/// Decoder for value payloads (Write, Create).
pub trait ValueDecoder {
    /// Feeds one payload (one CoAP block); `finished` marks the last one.
    fn feed(&mut self, payload: &[u8], finished: bool) -> anyhow::Result<()>;

    fn next_entry(&mut self, type_hint: Option<ResourceType>) -> anyhow::Result<DecodeEvent>;
}

/// Factory for the per-operation codec contexts.
pub trait Codec {
    type Link: LinkEncoder;
    type Out: ValueEncoder;
    type In: ValueDecoder;

    fn open_register(&self) -> anyhow::Result<Self::Link>;

    fn open_discover(&self, base: &UriPath, depth: Option<u8>) -> anyhow::Result<Self::Link>;

    fn open_bootstrap_discover(&self, base: &UriPath) -> anyhow::Result<Self::Link>;

    /// Opens a value encoder; `records` is the exact record count the
    /// operation will emit.
    fn open_out(
        &self,
        operation: Operation,
        base: &UriPath,
        records: usize,
        accept: Option<ContentFormat>,
    ) -> anyhow::Result<Self::Out>;

    fn open_in(
        &self,
        operation: Operation,
        base: &UriPath,
        format: Option<ContentFormat>,
    ) -> anyhow::Result<Self::In>;
}
