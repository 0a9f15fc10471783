//! Host object doubles shared by the unit tests.

use std::any::Any;
use std::cell::{Cell, RefCell};

use indexmap::IndexMap;

use crate::host::{HostIterator, HostObject, HostOpError, HostValue};

/// String-keyed mapping with instrumented item operations.
pub(crate) struct DictObject {
    entries: RefCell<IndexMap<String, HostValue>>,
    item_reads: Cell<u32>,
    item_writes: Cell<u32>,
}

impl DictObject {
    pub fn new() -> Self {
        DictObject {
            entries: RefCell::new(IndexMap::new()),
            item_reads: Cell::new(0),
            item_writes: Cell::new(0),
        }
    }

    pub fn insert(&self, key: &str, value: HostValue) {
        self.entries.borrow_mut().insert(key.to_string(), value);
    }

    pub fn item_reads(&self) -> u32 {
        self.item_reads.get()
    }

    pub fn item_writes(&self) -> u32 {
        self.item_writes.get()
    }
}

impl HostObject for DictObject {
    fn type_name(&self) -> &str {
        "DictObject"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_mapping(&self) -> bool {
        true
    }

    fn get_item(&self, key: &HostValue) -> Result<HostValue, HostOpError> {
        self.item_reads.set(self.item_reads.get() + 1);
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
        self.item_writes.set(self.item_writes.get() + 1);
        let Some(key) = key.as_str() else {
            return Err(HostOpError::failed("dict keys must be strings"));
        };
        self.entries.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    fn del_item(&self, key: &HostValue) -> Result<(), HostOpError> {
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

/// Attribute-only object: no item protocol, so the bridge's fallback path
/// is the only way in.
pub(crate) struct AttrObject {
    attrs: RefCell<IndexMap<String, HostValue>>,
}

impl AttrObject {
    pub fn new() -> Self {
        AttrObject {
            attrs: RefCell::new(IndexMap::new()),
        }
    }

    pub fn set(&self, name: &str, value: HostValue) {
        self.attrs.borrow_mut().insert(name.to_string(), value);
    }
}

impl HostObject for AttrObject {
    fn type_name(&self) -> &str {
        "AttrObject"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, name: &str) -> Result<HostValue, HostOpError> {
        self.attrs
            .borrow()
            .get(name)
            .cloned()
            .ok_or(HostOpError::Missing)
    }

    fn set_attr(&self, name: &str, value: HostValue) -> Result<(), HostOpError> {
        self.attrs.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    fn del_attr(&self, name: &str) -> Result<(), HostOpError> {
        self.attrs
            .borrow_mut()
            .shift_remove(name)
            .map(|_| ())
            .ok_or(HostOpError::Missing)
    }
}

/// Mutable sequence double.
pub(crate) struct ListObject {
    items: RefCell<Vec<HostValue>>,
}

impl ListObject {
    pub fn from(items: Vec<HostValue>) -> Self {
        ListObject {
            items: RefCell::new(items),
        }
    }

    pub fn truncate(&self, len: usize) {
        self.items.borrow_mut().truncate(len);
    }
}

impl HostObject for ListObject {
    fn type_name(&self) -> &str {
        "ListObject"
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

/// Callable double summing its integer arguments.
pub(crate) struct Adder;

impl HostObject for Adder {
    fn type_name(&self) -> &str {
        "Adder"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, args: &[HostValue]) -> Result<HostValue, HostOpError> {
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

/// Type-object double whose construction yields [`Point`] instances.
pub(crate) struct PointType;

impl HostObject for PointType {
    fn type_name(&self) -> &str {
        "PointType"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn is_class(&self) -> bool {
        true
    }

    fn call(&self, args: &[HostValue]) -> Result<HostValue, HostOpError> {
        let coord = |index: usize| match args.get(index) {
            Some(HostValue::Int(i)) => Ok(*i),
            _ => Err(HostOpError::failed("PointType takes two integers")),
        };
        Ok(HostValue::Object(std::rc::Rc::new(Point {
            x: coord(0)?,
            y: coord(1)?,
        })))
    }
}

/// Instance type produced by [`PointType`].
pub(crate) struct Point {
    x: i64,
    y: i64,
}

impl HostObject for Point {
    fn type_name(&self) -> &str {
        "Point"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_attr(&self, name: &str) -> Result<HostValue, HostOpError> {
        match name {
            "x" => Ok(HostValue::Int(self.x)),
            "y" => Ok(HostValue::Int(self.y)),
            _ => Err(HostOpError::Missing),
        }
    }
}
