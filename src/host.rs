//! Host-side object model.
//!
//! The embedding application's objects are reference counted (`Rc`) and
//! duck typed: the bridge never knows concrete types, only the protocol
//! surface below. Every protocol method has a default body returning
//! [`HostOpError::Unsupported`], so a host type implements exactly the
//! protocols it speaks and the bridge probes the rest.
//!
//! Protocol failures are three-valued:
//! - `Unsupported`: the object does not speak this protocol at all;
//! - `Missing`: the protocol is spoken but the key/index is absent;
//! - `Failed`: the host operation itself raised.
//!
//! The distinction matters because the proxy traps treat the first two as
//! "try the next access style" while the third is a real error on some
//! paths (set, call) and a fall-through on others (get).

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// Shared handle to a host object.
pub type HostRef = Rc<dyn HostObject>;

/// Outcome of a single host protocol operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostOpError {
    /// The object does not implement this protocol.
    #[error("operation not supported")]
    Unsupported,

    /// The protocol is implemented but the key, attribute, or index is
    /// absent.
    #[error("no such key")]
    Missing,

    /// The host operation raised an error of its own.
    #[error("{0}")]
    Failed(String),
}

impl HostOpError {
    pub fn failed(message: impl Into<String>) -> Self {
        HostOpError::Failed(message.into())
    }
}

/// A discriminated host value: the scalar leaves plus object references.
#[derive(Clone)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Object(HostRef),
}

impl HostValue {
    /// Object payload, if this value is one.
    pub fn as_object(&self) -> Option<&HostRef> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short rendering used in error messages and policy denials.
    pub fn describe(&self) -> String {
        match self {
            HostValue::None => "None".to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Int(i) => i.to_string(),
            HostValue::Float(f) => f.to_string(),
            HostValue::Str(s) => s.clone(),
            HostValue::Object(obj) => format!("<{}>", obj.type_name()),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => write!(f, "None"),
            HostValue::Bool(b) => write!(f, "Bool({b})"),
            HostValue::Int(i) => write!(f, "Int({i})"),
            HostValue::Float(v) => write!(f, "Float({v})"),
            HostValue::Str(s) => write!(f, "Str({s:?})"),
            HostValue::Object(obj) => write!(f, "Object(<{}>)", obj.type_name()),
        }
    }
}

/// Structural equality for scalars; identity for objects.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::None, HostValue::None) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Int(a), HostValue::Float(b)) | (HostValue::Float(b), HostValue::Int(a)) => {
                *a as f64 == *b
            }
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b)) => {
                std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
            }
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        HostValue::Int(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        HostValue::Int(v.into())
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Float(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::Str(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::Str(v)
    }
}

impl From<HostRef> for HostValue {
    fn from(v: HostRef) -> Self {
        HostValue::Object(v)
    }
}

/// One step of host-side iteration.
pub trait HostIterator {
    /// Next item, or `Ok(None)` when exhausted.
    fn next(&mut self) -> Result<Option<HostValue>, HostOpError>;
}

impl<I> HostIterator for I
where
    I: Iterator<Item = HostValue>,
{
    fn next(&mut self) -> Result<Option<HostValue>, HostOpError> {
        Ok(Iterator::next(self))
    }
}

/// The duck-typed protocol surface of a host object.
///
/// `type_name` must be stable per concrete type: it names the guest-side
/// class descriptor shared by all instances of that type. `as_any` backs
/// both the `TypeId`-keyed descriptor cache and wrapper unwrapping.
pub trait HostObject: 'static {
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    // ------------------------------------------------------------------
    // Mapping protocol
    // ------------------------------------------------------------------

    fn get_item(&self, _key: &HostValue) -> Result<HostValue, HostOpError> {
        Err(HostOpError::Unsupported)
    }

    fn set_item(&self, _key: &HostValue, _value: HostValue) -> Result<(), HostOpError> {
        Err(HostOpError::Unsupported)
    }

    fn del_item(&self, _key: &HostValue) -> Result<(), HostOpError> {
        Err(HostOpError::Unsupported)
    }

    /// Number of entries (mapping) or elements (sequence).
    fn len(&self) -> Result<usize, HostOpError> {
        Err(HostOpError::Unsupported)
    }

    fn is_mapping(&self) -> bool {
        false
    }

    // ------------------------------------------------------------------
    // Attribute protocol (fallback path; string keys only)
    // ------------------------------------------------------------------

    fn get_attr(&self, _name: &str) -> Result<HostValue, HostOpError> {
        Err(HostOpError::Unsupported)
    }

    fn set_attr(&self, _name: &str, _value: HostValue) -> Result<(), HostOpError> {
        Err(HostOpError::Unsupported)
    }

    fn del_attr(&self, _name: &str) -> Result<(), HostOpError> {
        Err(HostOpError::Unsupported)
    }

    // ------------------------------------------------------------------
    // Sequence protocol
    // ------------------------------------------------------------------

    fn is_sequence(&self) -> bool {
        false
    }

    fn get_index(&self, _index: usize) -> Result<HostValue, HostOpError> {
        Err(HostOpError::Unsupported)
    }

    // ------------------------------------------------------------------
    // Iterator protocol
    // ------------------------------------------------------------------

    fn iter(&self) -> Result<Box<dyn HostIterator>, HostOpError> {
        Err(HostOpError::Unsupported)
    }

    // ------------------------------------------------------------------
    // Callable protocol
    // ------------------------------------------------------------------

    fn is_callable(&self) -> bool {
        false
    }

    /// Type/constructor identity, distinguishing classes from plain
    /// callables.
    fn is_class(&self) -> bool {
        false
    }

    fn call(&self, _args: &[HostValue]) -> Result<HostValue, HostOpError> {
        Err(HostOpError::Unsupported)
    }
}
