//! Guest→host object wrapping.
//!
//! A [`ScriptObject`] makes a guest value first-class on the host side:
//! it speaks the host mapping protocol (backed by guest property
//! operations), enumerates the guest object's own keys, and iterates over
//! them. It holds one GC root pinning the guest value for the wrapper's
//! lifetime, released exactly once on drop. The wrapper also keeps its
//! originating context core alive, so a `ScriptObject` outliving the
//! user's `Context` handle stays valid.

use std::any::Any;
use std::rc::Rc;

use crate::context::ContextCore;
use crate::engine::{JsObject, JsVal, Request, RootId};
use crate::error::Error;
use crate::host::{HostIterator, HostObject, HostOpError, HostValue};
use crate::marshal;

/// Host-side wrapper of a guest object or function.
pub struct ScriptObject {
    core: Rc<ContextCore>,
    value: JsVal,
    obj: JsObject,
    root: RootId,
}

impl ScriptObject {
    pub(crate) fn wrap(core: &Rc<ContextCore>, value: JsVal) -> Result<Rc<ScriptObject>, Error> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::engine("guest value is not an object"))?;
        let root = {
            let _request = Request::begin(core.engine());
            core.engine().add_root(&value, "ScriptObject")?
        };
        Ok(Rc::new(ScriptObject {
            core: core.clone(),
            value,
            obj,
            root,
        }))
    }

    /// The underlying guest value. Passing a `ScriptObject` back across
    /// the bridge unwraps to this instead of double-wrapping.
    pub fn raw_value(&self) -> JsVal {
        self.value.clone()
    }

    /// Number of own enumerable keys.
    pub fn len(&self) -> Result<usize, Error> {
        let _request = Request::begin(self.core.engine());
        Ok(self.core.engine().enumerate(&self.obj)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Own enumerable keys, in guest insertion order.
    pub fn keys(&self) -> Result<Vec<HostValue>, Error> {
        let _request = Request::begin(self.core.engine());
        let keys = self.core.engine().enumerate(&self.obj)?;
        keys.iter()
            .map(|key| marshal::guest_to_host(&self.core, key))
            .collect()
    }

    pub fn get(&self, key: &HostValue) -> Result<HostValue, Error> {
        let _request = Request::begin(self.core.engine());
        let key = marshal::host_to_guest(&self.core, key)?;
        let value = self.core.engine().get_property(&self.obj, &key)?;
        marshal::guest_to_host(&self.core, &value)
    }

    pub fn set(&self, key: &HostValue, value: HostValue) -> Result<(), Error> {
        let _request = Request::begin(self.core.engine());
        let key = marshal::host_to_guest(&self.core, key)?;
        let value = marshal::host_to_guest(&self.core, &value)?;
        self.core.engine().set_property(&self.obj, &key, &value)
    }

    pub fn delete(&self, key: &HostValue) -> Result<(), Error> {
        let _request = Request::begin(self.core.engine());
        let key = marshal::host_to_guest(&self.core, key)?;
        if self.core.engine().delete_property(&self.obj, &key)? {
            Ok(())
        } else {
            Err(Error::property("unable to delete property"))
        }
    }

    /// Equality against a host mapping or sequence.
    ///
    /// Lengths must match, and every one of the *guest* object's own keys
    /// must resolve on the host side to an equal value; an absent key or
    /// a mismatch is inequality, and a non-mapping non-sequence operand
    /// is an error.
    pub fn eq_host(&self, other: &HostValue) -> Result<bool, Error> {
        let Some(other) = other.as_object() else {
            return Err(Error::property(
                "equality requires a mapping or sequence operand",
            ));
        };
        if !other.is_mapping() && !other.is_sequence() {
            return Err(Error::property(
                "equality requires a mapping or sequence operand",
            ));
        }

        let _request = Request::begin(self.core.engine());
        let keys = self.core.engine().enumerate(&self.obj)?;
        let other_len = other.len().map_err(|e| Error::property(e.to_string()))?;
        if keys.len() != other_len {
            return Ok(false);
        }

        for key in keys {
            let value = self.core.engine().get_property(&self.obj, &key)?;
            let key_host = marshal::guest_to_host(&self.core, &key)?;
            let value_host = marshal::guest_to_host(&self.core, &value)?;
            let other_value = match other.get_item(&key_host) {
                Ok(v) => v,
                // Absent on the host side: unequal, not an error.
                Err(_) => return Ok(false),
            };
            if value_host != other_value {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Drop for ScriptObject {
    fn drop(&mut self) {
        let _request = Request::begin(self.core.engine());
        self.core.engine().remove_root(self.root);
    }
}

impl HostObject for ScriptObject {
    fn type_name(&self) -> &str {
        "ScriptObject"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_mapping(&self) -> bool {
        true
    }

    fn get_item(&self, key: &HostValue) -> Result<HostValue, HostOpError> {
        let _request = Request::begin(self.core.engine());
        let guest_key =
            marshal::host_to_guest(&self.core, key).map_err(|e| HostOpError::failed(e.to_string()))?;
        let value = self
            .core
            .engine()
            .get_property(&self.obj, &guest_key)
            .map_err(|e| HostOpError::failed(e.to_string()))?;
        if value.is_undefined() {
            return Err(HostOpError::Missing);
        }
        marshal::guest_to_host(&self.core, &value).map_err(|e| HostOpError::failed(e.to_string()))
    }

    fn set_item(&self, key: &HostValue, value: HostValue) -> Result<(), HostOpError> {
        self.set(key, value)
            .map_err(|e| HostOpError::failed(e.to_string()))
    }

    fn del_item(&self, key: &HostValue) -> Result<(), HostOpError> {
        self.delete(key)
            .map_err(|e| HostOpError::failed(e.to_string()))
    }

    fn len(&self) -> Result<usize, HostOpError> {
        ScriptObject::len(self).map_err(|e| HostOpError::failed(e.to_string()))
    }

    fn iter(&self) -> Result<Box<dyn HostIterator>, HostOpError> {
        let keys = self
            .keys()
            .map_err(|e| HostOpError::failed(e.to_string()))?;
        Ok(Box::new(keys.into_iter()))
    }
}
