//! Host→guest object proxying.
//!
//! Wrapping a host object produces a guest object whose class descriptor
//! carries the trap table below. One descriptor exists per host *type*
//! per context, cached by `TypeId`, so every instance of a type shares
//! its traps and "is this a host proxy" is a descriptor-identity check.
//!
//! Ownership: the guest object's private slot holds exactly one host
//! reference ([`HostProxySlot`]), released exactly once when the guest
//! collector finalizes the object. The context's pinned set holds a
//! second, context-scoped reference cleared by
//! [`crate::Context::force_collection`].

use std::rc::{Rc, Weak};

use crate::context::ContextCore;
use crate::engine::{ClassId, ClassOps, ClassSpec, JsObject, JsVal, PrivateData};
use crate::error::Error;
use crate::host::{HostObject, HostRef, HostValue};
use crate::iter::{self, IterStyle};
use crate::{marshal, policy};

/// Reserved property name requesting value-style iteration.
pub const ITERATOR_KEY: &str = "iterator";

/// Reserved property name requesting key-style iteration.
pub const FOR_EACH_ITERATOR_KEY: &str = "for-each-iterator";

/// Capability flags probed once per host type at wrap time and cached on
/// the class descriptor, never re-probed per access.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Capabilities {
    pub callable: bool,
    pub constructible: bool,
    pub sequence: bool,
}

impl Capabilities {
    fn probe(obj: &HostRef) -> Self {
        Capabilities {
            callable: obj.is_callable(),
            constructible: obj.is_class(),
            sequence: obj.is_sequence(),
        }
    }
}

/// Cached per-type descriptor: the installed engine class plus the
/// capability flags of the type it proxies.
#[derive(Clone, Copy)]
pub(crate) struct ClassDescriptor {
    pub id: ClassId,
    pub caps: Capabilities,
}

/// Private-slot payload of a host proxy: the one owned host reference.
pub(crate) struct HostProxySlot {
    pub host: HostRef,
}

/// Wrap a host object as a guest value. Callable hosts surface as guest
/// functions.
pub(crate) fn wrap_host(core: &Rc<ContextCore>, obj: &HostRef) -> Result<JsVal, Error> {
    let descriptor = descriptor_for(core, obj)?;
    let proxy = core.engine().new_object(descriptor.id)?;
    core.engine()
        .set_private(&proxy, Rc::new(HostProxySlot { host: obj.clone() }))?;
    core.pin(obj);
    Ok(if descriptor.caps.callable {
        JsVal::Function(proxy)
    } else {
        JsVal::Object(proxy)
    })
}

fn descriptor_for(core: &Rc<ContextCore>, obj: &HostRef) -> Result<ClassDescriptor, Error> {
    let type_id = obj.as_any().type_id();
    if let Some(descriptor) = core.classes.borrow().get(&type_id) {
        return Ok(*descriptor);
    }

    let caps = Capabilities::probe(obj);
    let ops: Rc<dyn ClassOps> = Rc::new(HostClassOps {
        core: Rc::downgrade(core),
        caps,
    });
    let id = core
        .engine()
        .define_class(ClassSpec::new(obj.type_name(), ops))?;
    let descriptor = ClassDescriptor { id, caps };
    core.classes.borrow_mut().insert(type_id, descriptor);
    core.proxy_classes.borrow_mut().insert(id);
    Ok(descriptor)
}

/// If `value` is a host proxy created by this context, recover the
/// original host reference.
pub(crate) fn unwrap_host(core: &Rc<ContextCore>, value: &JsVal) -> Option<HostRef> {
    let obj = value.as_object()?;
    let class = core.engine().class_of(&obj)?;
    if !core.proxy_classes.borrow().contains(&class) {
        return None;
    }
    let private = core.engine().private(&obj)?;
    let slot = private.downcast::<HostProxySlot>().ok()?;
    Some(slot.host.clone())
}

// ============================================================================
// Trap table
// ============================================================================

struct HostClassOps {
    core: Weak<ContextCore>,
    caps: Capabilities,
}

impl HostClassOps {
    fn core(&self) -> Result<Rc<ContextCore>, Error> {
        self.core.upgrade().ok_or(Error::ContextDestroyed)
    }

    fn host_of(&self, core: &Rc<ContextCore>, this: &JsObject) -> Result<HostRef, Error> {
        let private = core
            .engine()
            .private(this)
            .ok_or_else(|| Error::engine("host proxy is missing its private slot"))?;
        let slot = private
            .downcast::<HostProxySlot>()
            .map_err(|_| Error::engine("host proxy private slot has the wrong type"))?;
        Ok(slot.host.clone())
    }

    fn marshal_args(
        &self,
        core: &Rc<ContextCore>,
        args: &[JsVal],
    ) -> Result<Vec<HostValue>, Error> {
        args.iter()
            .map(|arg| marshal::guest_to_host(core, arg))
            .collect()
    }
}

impl ClassOps for HostClassOps {
    fn get(&self, this: &JsObject, key: &JsVal) -> Result<JsVal, Error> {
        let core = self.core()?;
        let host = self.host_of(&core, this)?;
        let key_host = marshal::guest_to_host(&core, key)?;
        policy::enforce(core.policy().as_ref(), &host, &key_host)?;

        // Protocol negotiation: the two reserved names request an
        // iterator instead of an ordinary property. A host object with no
        // iteration support falls through, so a genuine attribute of the
        // same name still resolves.
        if let Some(name) = key_host.as_str() {
            let style = match name {
                ITERATOR_KEY => Some(IterStyle::Values),
                FOR_EACH_ITERATOR_KEY => Some(IterStyle::Keys),
                _ => None,
            };
            if let Some(style) = style {
                if let Some(iterator) =
                    iter::new_host_iter(&core, &host, style, self.caps.sequence)?
                {
                    return Ok(iterator);
                }
            }
        }

        // Item access first, attribute access second; a miss on both
        // styles is undefined, not an error.
        if let Ok(value) = host.get_item(&key_host) {
            return marshal::host_to_guest(&core, &value);
        }
        if let Some(name) = key_host.as_str() {
            if let Ok(value) = host.get_attr(name) {
                return marshal::host_to_guest(&core, &value);
            }
        }
        Ok(JsVal::Undefined)
    }

    fn set(&self, this: &JsObject, key: &JsVal, value: &JsVal) -> Result<(), Error> {
        let core = self.core()?;
        let host = self.host_of(&core, this)?;
        let key_host = marshal::guest_to_host(&core, key)?;
        policy::enforce(core.policy().as_ref(), &host, &key_host)?;

        let value_host = marshal::guest_to_host(&core, value)?;
        if host.set_item(&key_host, value_host.clone()).is_ok() {
            return Ok(());
        }
        if let Some(name) = key_host.as_str() {
            if host.set_attr(name, value_host).is_ok() {
                return Ok(());
            }
        }
        Err(Error::property(format!(
            "cannot set '{}' on <{}> object",
            key_host.describe(),
            host.type_name()
        )))
    }

    fn delete(&self, this: &JsObject, key: &JsVal) -> Result<bool, Error> {
        let core = self.core()?;
        let host = self.host_of(&core, this)?;
        let key_host = marshal::guest_to_host(&core, key)?;
        policy::enforce(core.policy().as_ref(), &host, &key_host)?;

        if host.del_item(&key_host).is_ok() {
            return Ok(true);
        }
        if let Some(name) = key_host.as_str() {
            if host.del_attr(name).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn call(&self, this: &JsObject, args: &[JsVal]) -> Result<JsVal, Error> {
        let core = self.core()?;
        let host = self.host_of(&core, this)?;
        if !self.caps.callable {
            return Err(Error::call(format!(
                "<{}> object is not callable",
                host.type_name()
            )));
        }
        policy::enforce(
            core.policy().as_ref(),
            &host,
            &HostValue::from(policy::INVOKE),
        )?;

        let args = self.marshal_args(&core, args)?;
        let result = host.call(&args).map_err(|e| Error::call(e.to_string()))?;
        marshal::host_to_guest(&core, &result)
    }

    fn construct(&self, this: &JsObject, args: &[JsVal]) -> Result<JsVal, Error> {
        let core = self.core()?;
        let host = self.host_of(&core, this)?;
        if !self.caps.callable {
            return Err(Error::construct(format!(
                "<{}> object is not callable",
                host.type_name()
            )));
        }
        if !self.caps.constructible {
            return Err(Error::construct(format!(
                "<{}> is not a type object",
                host.type_name()
            )));
        }
        policy::enforce(
            core.policy().as_ref(),
            &host,
            &HostValue::from(policy::CONSTRUCT),
        )?;

        let args = self.marshal_args(&core, args)?;
        let instance = host
            .call(&args)
            .map_err(|e| Error::construct(e.to_string()))?;
        marshal::host_to_guest(&core, &instance)
    }

    fn finalize(&self, private: Option<PrivateData>) {
        if let Some(slot) = private.and_then(|p| p.downcast::<HostProxySlot>().ok()) {
            log::trace!("releasing host reference to <{}>", slot.host.type_name());
        }
    }
}
