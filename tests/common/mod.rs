//! Host object doubles shared by the integration tests.
#![allow(dead_code)]

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use hostbridge::{
    Context, ContextConfig, HostIterator, HostObject, HostOpError, HostRef, HostValue, Runtime,
};
use hostbridge::engine::mock::MockRuntime;

/// Fresh mock runtime plus a context on it.
#[allow(clippy::expect_used)]
pub fn fixture() -> (Rc<MockRuntime>, Runtime, Context) {
    let mock = MockRuntime::new();
    let runtime = Runtime::new(mock.clone());
    let context = Context::new(&runtime, ContextConfig::default()).expect("context");
    (mock, runtime, context)
}

/// Mapping double that counts every item-protocol touch.
pub struct RecordingDict {
    entries: RefCell<IndexMap<String, HostValue>>,
    reads: Cell<u32>,
    writes: Cell<u32>,
    deletes: Cell<u32>,
}

impl RecordingDict {
    pub fn new() -> Rc<Self> {
        Rc::new(RecordingDict {
            entries: RefCell::new(IndexMap::new()),
            reads: Cell::new(0),
            writes: Cell::new(0),
            deletes: Cell::new(0),
        })
    }

    pub fn insert(&self, key: &str, value: HostValue) {
        self.entries.borrow_mut().insert(key.to_string(), value);
    }

    pub fn reads(&self) -> u32 {
        self.reads.get()
    }

    pub fn writes(&self) -> u32 {
        self.writes.get()
    }

    pub fn deletes(&self) -> u32 {
        self.deletes.get()
    }

    pub fn value_of(&self, key: &str) -> Option<HostValue> {
        self.entries.borrow().get(key).cloned()
    }
}

impl HostObject for RecordingDict {
    fn type_name(&self) -> &str {
        "RecordingDict"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_mapping(&self) -> bool {
        true
    }

    fn get_item(&self, key: &HostValue) -> Result<HostValue, HostOpError> {
        self.reads.set(self.reads.get() + 1);
        let Some(key) = key.as_str() else {
            return Err(HostOpError::Missing);
        };
        self.entries
            .borrow()
            .get(key)
            .cloned()
            .ok_or(HostOpError::Missing)
    }

    fn set_item(&self, key: &HostValue, value: HostValue) -> Result<(), HostOpError> {
        self.writes.set(self.writes.get() + 1);
        let Some(key) = key.as_str() else {
            return Err(HostOpError::failed("keys must be strings"));
        };
        self.entries.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    fn del_item(&self, key: &HostValue) -> Result<(), HostOpError> {
        self.deletes.set(self.deletes.get() + 1);
        let Some(key) = key.as_str() else {
            return Err(HostOpError::Missing);
        };
        self.entries
            .borrow_mut()
            .shift_remove(key)
            .map(|_| ())
            .ok_or(HostOpError::Missing)
    }

    fn len(&self) -> Result<usize, HostOpError> {
        Ok(self.entries.borrow().len())
    }

    fn iter(&self) -> Result<Box<dyn HostIterator>, HostOpError> {
        let keys: Vec<HostValue> = self
            .entries
            .borrow()
            .keys()
            .map(|k| HostValue::Str(k.clone()))
            .collect();
        Ok(Box::new(keys.into_iter()))
    }
}

/// Sequence double.
pub struct FixedList {
    items: RefCell<Vec<HostValue>>,
}

impl FixedList {
    pub fn of_ints(values: &[i64]) -> Rc<Self> {
        Rc::new(FixedList {
            items: RefCell::new(values.iter().map(|v| HostValue::Int(*v)).collect()),
        })
    }

    pub fn truncate(&self, len: usize) {
        self.items.borrow_mut().truncate(len);
    }
}

impl HostObject for FixedList {
    fn type_name(&self) -> &str {
        "FixedList"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_sequence(&self) -> bool {
        true
    }

    fn len(&self) -> Result<usize, HostOpError> {
        Ok(self.items.borrow().len())
    }

    fn get_index(&self, index: usize) -> Result<HostValue, HostOpError> {
        self.items
            .borrow()
            .get(index)
            .cloned()
            .ok_or(HostOpError::Missing)
    }

    fn get_item(&self, key: &HostValue) -> Result<HostValue, HostOpError> {
        match key {
            HostValue::Int(i) if *i >= 0 => self.get_index(*i as usize),
            _ => Err(HostOpError::Missing),
        }
    }
}

/// Callable double that sums integer arguments and records invocations.
pub struct SumCallable {
    pub calls: Cell<u32>,
}

impl SumCallable {
    pub fn new() -> Rc<Self> {
        Rc::new(SumCallable {
            calls: Cell::new(0),
        })
    }
}

impl HostObject for SumCallable {
    fn type_name(&self) -> &str {
        "SumCallable"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, args: &[HostValue]) -> Result<HostValue, HostOpError> {
        self.calls.set(self.calls.get() + 1);
        let mut total: i64 = 0;
        for arg in args {
            match arg {
                HostValue::Int(i) => total += i,
                other => {
                    return Err(HostOpError::failed(format!(
                        "cannot add {}",
                        other.describe()
                    )));
                }
            }
        }
        Ok(HostValue::Int(total))
    }
}

/// Callable double that always raises.
pub struct FaultyCallable;

impl HostObject for FaultyCallable {
    fn type_name(&self) -> &str {
        "FaultyCallable"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, _args: &[HostValue]) -> Result<HostValue, HostOpError> {
        Err(HostOpError::failed("deliberate failure"))
    }
}

/// Non-iterable object carrying a genuine attribute named "iterator",
/// for the reserved-key collision case.
pub struct IteratorAttr;

impl HostObject for IteratorAttr {
    fn type_name(&self) -> &str {
        "IteratorAttr"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, name: &str) -> Result<HostValue, HostOpError> {
        match name {
            "iterator" => Ok(HostValue::from("genuine attribute")),
            _ => Err(HostOpError::Missing),
        }
    }
}

/// Callable that re-enters the context, for nested-execution tests.
pub struct ReentrantCall {
    pub context: RefCell<Option<Context>>,
    pub inner_source: String,
    pub saw_timeout: Cell<bool>,
}

impl ReentrantCall {
    pub fn new(inner_source: &str) -> Rc<Self> {
        Rc::new(ReentrantCall {
            context: RefCell::new(None),
            inner_source: inner_source.to_string(),
            saw_timeout: Cell::new(false),
        })
    }
}

impl HostObject for ReentrantCall {
    fn type_name(&self) -> &str {
        "ReentrantCall"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, _args: &[HostValue]) -> Result<HostValue, HostOpError> {
        let context = self
            .context
            .borrow()
            .clone()
            .ok_or_else(|| HostOpError::failed("no context installed"))?;
        let result = context.execute(&self.inner_source);
        if let Err(hostbridge::Error::ResourceExhausted {
            kind: hostbridge::ResourceKind::Time,
        }) = &result
        {
            self.saw_timeout.set(true);
        }
        Ok(HostValue::None)
    }
}

/// Coerce a concrete double into a `HostRef`.
pub fn as_host<T: HostObject>(obj: &Rc<T>) -> HostRef {
    obj.clone()
}
