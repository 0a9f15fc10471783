//! Access policy hook.
//!
//! An optional predicate consulted before every cross-bridge property
//! get/set/delete and before call/construct (which use the synthetic keys
//! [`INVOKE`] and [`CONSTRUCT`]). Denial must happen before the host
//! operation runs: check-then-act, never act-then-check. A fault inside
//! the predicate is itself a denial, carrying the fault as detail, so a
//! broken policy fails closed.
//!
//! No policy installed means allow-all.

use std::rc::Rc;

use crate::error::Error;
use crate::host::{HostRef, HostValue};

/// Synthetic key passed to the policy when a host callable is invoked.
pub const INVOKE: &str = "invoke";

/// Synthetic key passed to the policy when a host type is constructed.
pub const CONSTRUCT: &str = "construct";

/// Allow/deny predicate over (host object, key).
pub trait AccessPolicy {
    /// `Ok(true)` allows, `Ok(false)` denies, `Err` denies with detail.
    fn check(&self, object: &HostRef, key: &HostValue) -> Result<bool, Error>;
}

impl<F> AccessPolicy for F
where
    F: Fn(&HostRef, &HostValue) -> bool,
{
    fn check(&self, object: &HostRef, key: &HostValue) -> Result<bool, Error> {
        Ok(self(object, key))
    }
}

/// Gate one access. Called by every trap before touching the host object.
pub(crate) fn enforce(
    policy: Option<&Rc<dyn AccessPolicy>>,
    object: &HostRef,
    key: &HostValue,
) -> Result<(), Error> {
    let Some(policy) = policy else {
        return Ok(());
    };
    match policy.check(object, key) {
        Ok(true) => Ok(()),
        Ok(false) => Err(Error::access_denied(key.describe())),
        Err(fault) => Err(Error::access_fault(key.describe(), fault.to_string())),
    }
}
