//! Instance-level access control.
//!
//! Kept apart from the data-model engine: the dispatcher consults the
//! predicate once per located instance before an operation proceeds. A
//! single-server device without Access Control objects grants everything.

use lwm2m_shared::message::Operation;
use lwm2m_shared::{Iid, Oid};

/// User-supplied access predicate.
pub trait InstanceAccess {
    /// Whether the server identified by `ssid` may perform `action` on
    /// `/oid/iid`. `ssid` is `None` for the bootstrap server.
    fn allowed(&self, action: Operation, oid: Oid, iid: Iid, ssid: Option<u16>) -> bool;
}

/// The single-server default: every action is allowed.
pub struct AllowAll;

impl InstanceAccess for AllowAll {
    fn allowed(&self, _action: Operation, _oid: Oid, _iid: Iid, _ssid: Option<u16>) -> bool {
        true
    }
}
