// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Engine error kinds and their CoAP response mapping.

use thiserror::Error;

use crate::message::CoapCode;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, DmError>;

/// Every error the data-model engine can surface.
///
/// Step functions return the first failure verbatim; once a transaction has
/// failed, subsequent step calls short-circuit with [`DmError::Logic`]. The
/// dispatch layer maps the kind to a CoAP response code via
/// [`DmError::coap_code`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmError {
    /// Caller passed a malformed request to the engine.
    #[error("invalid input argument")]
    InputArg,
    /// Engine misuse: double begin, step outside its operation, re-entry
    /// after the final record.
    #[error("operation logic violated")]
    Logic,
    /// Path does not resolve in the current data model.
    #[error("entity not found")]
    NotFound,
    /// Path resolves but the operation is incompatible with the target.
    #[error("method not allowed")]
    MethodNotAllowed,
    /// Request is semantically wrong.
    #[error("bad request")]
    BadRequest,
    /// Capacity exhausted, or a payload chunk exceeds the resource buffer.
    #[error("out of memory")]
    Memory,
    /// A user handler violated its contract.
    #[error("internal error")]
    Internal,
    /// Not authorized for the target entity.
    #[error("unauthorized")]
    Unauthorized,
    /// Temporary failure; reserved for user handlers.
    #[error("service unavailable")]
    ServiceUnavailable,
    /// Feature not supported in this build.
    #[error("not implemented")]
    NotImplemented,
}

impl DmError {
    /// The CoAP response code reported for this error.
    pub fn coap_code(&self) -> CoapCode {
        match self {
            DmError::InputArg
            | DmError::Logic
            | DmError::BadRequest
            | DmError::Memory
            | DmError::Internal => CoapCode::BadRequest,
            DmError::Unauthorized => CoapCode::Unauthorized,
            DmError::NotFound => CoapCode::NotFound,
            DmError::MethodNotAllowed => CoapCode::MethodNotAllowed,
            DmError::NotImplemented => CoapCode::NotImplemented,
            DmError::ServiceUnavailable => CoapCode::ServiceUnavailable,
        }
    }
}
