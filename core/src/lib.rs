// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

//! LwM2M device data-model engine.
//!
//! The engine owns an in-memory registry of Objects, Instances, Resources
//! and Resource-Instances and drives every LwM2M operation over it as a
//! single-threaded, cancellable transaction. The CoAP transport, the wire
//! codec and the security layer are external collaborators reached through
//! the traits in [`dispatch::codec`].
//!
//! ## Logging
//!
//! This package emits logs using the log façade. Configure the logging
//! backend of your choice during the initialization of the consuming
//! application.

pub use engine::{DataModel, Produced};
pub use registry::Registry;

pub mod access;
pub mod dispatch;
pub mod engine;
pub mod model;
pub mod notify;
pub mod objects;
pub mod registry;
