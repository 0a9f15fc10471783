//! Value marshaling between host and guest representations.
//!
//! Scalars convert structurally; objects and callables delegate to the
//! proxy bridge so each side's compound values stay owned by their home
//! heap and cross only by reference.
//!
//! Two conversions are strict by design:
//! - integers narrow from the host's `i64` to the guest's fixed-width
//!   `i32` and fail outside that range rather than wrapping or
//!   saturating, preserving `guest(host(v)) == v` for every value that
//!   converts at all;
//! - strings cross between UTF-8 (host) and UTF-16 (guest) with strict
//!   validation, failing on unpaired surrogates instead of substituting
//!   replacement characters.

use std::rc::Rc;

use crate::context::ContextCore;
use crate::engine::{JsString, JsVal};
use crate::error::Error;
use crate::host::{HostObject, HostRef, HostValue};
use crate::object::ScriptObject;
use crate::proxy;

/// Narrow a host integer to the guest's fixed-width representation.
pub fn narrow_int(value: i64) -> Result<i32, Error> {
    i32::try_from(value).map_err(|_| {
        Error::conversion(format!(
            "integer {value} outside the representable guest range"
        ))
    })
}

/// Convert a host value into a guest value, wrapping objects as proxies.
///
/// A [`ScriptObject`] going back to the guest unwraps to its underlying
/// guest value instead of being wrapped a second time.
pub(crate) fn host_to_guest(core: &Rc<ContextCore>, value: &HostValue) -> Result<JsVal, Error> {
    match value {
        HostValue::None => Ok(JsVal::Null),
        HostValue::Bool(b) => Ok(JsVal::Bool(*b)),
        HostValue::Int(i) => Ok(JsVal::Int(narrow_int(*i)?)),
        HostValue::Float(f) => Ok(JsVal::Double(*f)),
        HostValue::Str(s) => Ok(JsVal::String(JsString::from(s.as_str()))),
        HostValue::Object(obj) => {
            if let Some(script) = obj.as_any().downcast_ref::<ScriptObject>() {
                return Ok(script.raw_value());
            }
            proxy::wrap_host(core, obj)
        }
    }
}

/// Convert a guest value into a host value, wrapping objects as
/// [`ScriptObject`]s.
///
/// A guest object that is itself a host proxy unwraps to the original
/// host reference instead of being wrapped a second time.
pub(crate) fn guest_to_host(core: &Rc<ContextCore>, value: &JsVal) -> Result<HostValue, Error> {
    match value {
        JsVal::Undefined | JsVal::Null => Ok(HostValue::None),
        JsVal::Bool(b) => Ok(HostValue::Bool(*b)),
        JsVal::Int(i) => Ok(HostValue::Int((*i).into())),
        JsVal::Double(f) => Ok(HostValue::Float(*f)),
        JsVal::String(s) => Ok(HostValue::Str(s.to_string_strict()?)),
        JsVal::Object(_) | JsVal::Function(_) => {
            if let Some(host) = proxy::unwrap_host(core, value) {
                return Ok(HostValue::Object(host));
            }
            let script: HostRef = ScriptObject::wrap(core, value.clone())?;
            Ok(HostValue::Object(script))
        }
    }
}
