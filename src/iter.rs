//! Iteration bridging.
//!
//! Adapts host iteration to the guest protocol. The guest drives a
//! bridge iterator by invoking it; each invocation produces one item, and
//! exhaustion raises [`Error::StopIteration`], the engine's catchable
//! loop-termination signal, never an ordinary error.
//!
//! Strategy is chosen once, when the iterator is requested: hosts with
//! indexed-sequence access get a counting cursor that re-queries the
//! length on every step (so truncation mid-iteration is observed, not
//! cached); everything else gets its native host iterator, driven one
//! step per call.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::context::ContextCore;
use crate::engine::{ClassId, ClassOps, ClassSpec, JsObject, JsVal};
use crate::error::Error;
use crate::host::{HostIterator, HostObject, HostOpError, HostRef, HostValue};
use crate::marshal;

/// Which of the two guest iteration styles an iterator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterStyle {
    /// Sequence elements, or mapping values.
    Values,
    /// Sequence indices, or mapping keys.
    Keys,
}

enum Cursor {
    /// Counting index over the sequence protocol.
    Counting(Cell<usize>),
    /// Driven native host iterator.
    Native(RefCell<Box<dyn HostIterator>>),
}

/// Private-slot state of a bridge iterator: owned references to the host
/// source and the cursor, plus the style flag. Released at finalize.
pub(crate) struct IterState {
    source: HostRef,
    cursor: Cursor,
    style: IterStyle,
    mapping: bool,
}

impl IterState {
    fn step(&self, core: &Rc<ContextCore>) -> Result<JsVal, Error> {
        match &self.cursor {
            Cursor::Counting(index) => {
                let len = self
                    .source
                    .len()
                    .map_err(|e| Error::property(e.to_string()))?;
                let i = index.get();
                if i >= len {
                    return Err(Error::StopIteration);
                }
                index.set(i + 1);
                match self.style {
                    IterStyle::Keys => marshal::host_to_guest(core, &HostValue::Int(i as i64)),
                    IterStyle::Values => {
                        let item = self
                            .source
                            .get_index(i)
                            .map_err(|e| Error::property(e.to_string()))?;
                        marshal::host_to_guest(core, &item)
                    }
                }
            }
            Cursor::Native(iter) => {
                let next = iter
                    .borrow_mut()
                    .next()
                    .map_err(|e| Error::property(e.to_string()))?;
                let Some(item) = next else {
                    return Err(Error::StopIteration);
                };
                match self.style {
                    // Value-style over a mapping re-indexes per key; every
                    // other combination yields the native item itself.
                    IterStyle::Values if self.mapping => {
                        let value = self
                            .source
                            .get_item(&item)
                            .map_err(|e| Error::property(e.to_string()))?;
                        marshal::host_to_guest(core, &value)
                    }
                    _ => marshal::host_to_guest(core, &item),
                }
            }
        }
    }
}

struct IterOps {
    core: Weak<ContextCore>,
}

impl ClassOps for IterOps {
    fn call(&self, this: &JsObject, _args: &[JsVal]) -> Result<JsVal, Error> {
        let core = self.core.upgrade().ok_or(Error::ContextDestroyed)?;
        let state = core
            .engine()
            .private(this)
            .and_then(|p| p.downcast::<IterState>().ok())
            .ok_or_else(|| Error::engine("iterator is missing its state slot"))?;
        state.step(&core)
    }
}

/// Build a bridge iterator over `source`, or `Ok(None)` when the host
/// object supports no iteration protocol at all (the caller then falls
/// back to ordinary property lookup).
pub(crate) fn new_host_iter(
    core: &Rc<ContextCore>,
    source: &HostRef,
    style: IterStyle,
    sequence: bool,
) -> Result<Option<JsVal>, Error> {
    let cursor = if sequence {
        Cursor::Counting(Cell::new(0))
    } else {
        match source.iter() {
            Ok(native) => Cursor::Native(RefCell::new(native)),
            Err(HostOpError::Unsupported | HostOpError::Missing) => return Ok(None),
            Err(HostOpError::Failed(message)) => return Err(Error::property(message)),
        }
    };

    let class = iter_class(core)?;
    let iterator = core.engine().new_object(class)?;
    core.engine().set_private(
        &iterator,
        Rc::new(IterState {
            source: source.clone(),
            cursor,
            style,
            mapping: source.is_mapping(),
        }),
    )?;
    Ok(Some(JsVal::Object(iterator)))
}

/// The per-context iterator class, defined on first use.
fn iter_class(core: &Rc<ContextCore>) -> Result<ClassId, Error> {
    if let Some(id) = core.iter_class.get() {
        return Ok(id);
    }
    let ops: Rc<dyn ClassOps> = Rc::new(IterOps {
        core: Rc::downgrade(core),
    });
    let id = core
        .engine()
        .define_class(ClassSpec::new("HostIterator", ops))?;
    core.iter_class.set(Some(id));
    Ok(id)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig, Runtime};
    use crate::engine::mock::{MockContext, MockRuntime};
    use crate::testutil::{AttrObject, DictObject, ListObject};

    fn context() -> (Context, Rc<MockRuntime>) {
        let mock = MockRuntime::new();
        let rt = Runtime::new(mock.clone());
        let cx = Context::new(&rt, ContextConfig::default()).expect("context");
        (cx, mock)
    }

    fn drain(raw: &MockContext, iterator: &JsVal) -> Vec<JsVal> {
        let obj = iterator.as_object().expect("iterator object");
        let mut items = Vec::new();
        loop {
            match raw.call_object(&obj, &[]) {
                Ok(item) => items.push(item),
                Err(e) if e.is_stop_iteration() => break,
                Err(e) => unreachable_err(e),
            }
        }
        items
    }

    #[allow(clippy::panic)]
    fn unreachable_err(e: Error) -> ! {
        panic!("unexpected iteration error: {e}")
    }

    #[test]
    fn test_sequence_value_iteration_in_order() {
        let (cx, mock) = context();
        let list: HostRef = Rc::new(ListObject::from(vec![
            HostValue::Int(10),
            HostValue::Int(20),
            HostValue::Int(30),
        ]));
        let iterator = new_host_iter(&cx.core, &list, IterStyle::Values, true)
            .expect("iter")
            .expect("some");
        let items = drain(&mock.raw_context(), &iterator);
        assert_eq!(items, vec![JsVal::Int(10), JsVal::Int(20), JsVal::Int(30)]);
    }

    #[test]
    fn test_sequence_key_iteration_counts_indices() {
        let (cx, mock) = context();
        let list: HostRef = Rc::new(ListObject::from(vec![
            HostValue::Int(10),
            HostValue::Int(20),
            HostValue::Int(30),
        ]));
        let iterator = new_host_iter(&cx.core, &list, IterStyle::Keys, true)
            .expect("iter")
            .expect("some");
        let items = drain(&mock.raw_context(), &iterator);
        assert_eq!(items, vec![JsVal::Int(0), JsVal::Int(1), JsVal::Int(2)]);
    }

    #[test]
    fn test_exhausted_iterator_keeps_signaling_stop() {
        let (cx, mock) = context();
        let list: HostRef = Rc::new(ListObject::from(vec![HostValue::Int(1)]));
        let iterator = new_host_iter(&cx.core, &list, IterStyle::Values, true)
            .expect("iter")
            .expect("some");
        let obj = iterator.as_object().expect("object");
        let raw = mock.raw_context();
        assert!(raw.call_object(&obj, &[]).is_ok());
        assert!(matches!(
            raw.call_object(&obj, &[]),
            Err(Error::StopIteration)
        ));
        assert!(matches!(
            raw.call_object(&obj, &[]),
            Err(Error::StopIteration)
        ));
    }

    #[test]
    fn test_truncation_mid_iteration_is_observed() {
        let (cx, mock) = context();
        let list = Rc::new(ListObject::from(vec![
            HostValue::Int(1),
            HostValue::Int(2),
            HostValue::Int(3),
            HostValue::Int(4),
        ]));
        let list_ref: HostRef = list.clone();
        let iterator = new_host_iter(&cx.core, &list_ref, IterStyle::Values, true)
            .expect("iter")
            .expect("some");
        let obj = iterator.as_object().expect("object");
        let raw = mock.raw_context();

        assert_eq!(raw.call_object(&obj, &[]).ok(), Some(JsVal::Int(1)));
        list.truncate(2);
        assert_eq!(raw.call_object(&obj, &[]).ok(), Some(JsVal::Int(2)));
        // Length is re-queried, so the cursor sees the shortened list.
        assert!(matches!(
            raw.call_object(&obj, &[]),
            Err(Error::StopIteration)
        ));
    }

    #[test]
    fn test_mapping_iteration_keys_and_values() {
        let (cx, mock) = context();
        let dict = Rc::new(DictObject::new());
        dict.insert("a", HostValue::Int(1));
        dict.insert("b", HostValue::Int(2));
        let dict_ref: HostRef = dict;

        let keys = new_host_iter(&cx.core, &dict_ref, IterStyle::Keys, false)
            .expect("iter")
            .expect("some");
        let items = drain(&mock.raw_context(), &keys);
        assert_eq!(
            items,
            vec![
                JsVal::String(crate::engine::JsString::from("a")),
                JsVal::String(crate::engine::JsString::from("b")),
            ]
        );

        let values = new_host_iter(&cx.core, &dict_ref, IterStyle::Values, false)
            .expect("iter")
            .expect("some");
        let items = drain(&mock.raw_context(), &values);
        assert_eq!(items, vec![JsVal::Int(1), JsVal::Int(2)]);
    }

    #[test]
    fn test_non_iterable_host_object_yields_no_iterator() {
        let (cx, _mock) = context();
        let bare: HostRef = Rc::new(AttrObject::new());
        let result = new_host_iter(&cx.core, &bare, IterStyle::Values, false).expect("iter");
        assert!(result.is_none());
    }
}
