//! Integration tests for the iteration bridge, driven the way a guest
//! loop construct would: request an iterator via the reserved property
//! names, invoke it until the stop signal.
#![allow(clippy::expect_used)]

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use hostbridge::engine::{EngineContext, JsString, JsVal};
use hostbridge::{Error, HostValue};

use common::{as_host, fixture, FixedList, RecordingDict};

fn jstr(s: &str) -> JsVal {
    JsVal::String(JsString::from(s))
}

/// Register a program that iterates `global_name` via `reserved_key` and
/// pushes every produced item into `sink`.
fn register_loop(
    mock: &hostbridge::engine::mock::MockRuntime,
    source: &str,
    global_name: &'static str,
    reserved_key: &'static str,
    sink: Rc<RefCell<Vec<JsVal>>>,
) {
    mock.program(source, move |cx| {
        let proxy = cx.get_property(&cx.global(), &jstr(global_name))?;
        let target = proxy
            .as_object()
            .ok_or_else(|| Error::script("target is not an object"))?;
        let iterator = cx.get_property(&target, &jstr(reserved_key))?;
        let iterator = iterator
            .as_object()
            .ok_or_else(|| Error::script("no iterator was negotiated"))?;
        loop {
            match cx.call_object(&iterator, &[]) {
                Ok(item) => sink.borrow_mut().push(item),
                Err(e) if e.is_stop_iteration() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(JsVal::Undefined)
    });
}

#[test]
fn test_sequence_value_iteration_yields_elements_in_order() {
    let (mock, _rt, cx) = fixture();
    let list = FixedList::of_ints(&[10, 20, 30]);
    cx.add_global("xs", HostValue::Object(as_host(&list)))
        .expect("add_global");

    let sink: Rc<RefCell<Vec<JsVal>>> = Rc::new(RefCell::new(Vec::new()));
    register_loop(&mock, "for (x of xs)", "xs", "iterator", sink.clone());

    assert!(cx.execute("for (x of xs)").is_ok());
    assert_eq!(
        *sink.borrow(),
        vec![JsVal::Int(10), JsVal::Int(20), JsVal::Int(30)]
    );
}

#[test]
fn test_sequence_key_iteration_yields_indices() {
    let (mock, _rt, cx) = fixture();
    let list = FixedList::of_ints(&[10, 20, 30]);
    cx.add_global("xs", HostValue::Object(as_host(&list)))
        .expect("add_global");

    let sink: Rc<RefCell<Vec<JsVal>>> = Rc::new(RefCell::new(Vec::new()));
    register_loop(
        &mock,
        "for (i in xs)",
        "xs",
        "for-each-iterator",
        sink.clone(),
    );

    assert!(cx.execute("for (i in xs)").is_ok());
    assert_eq!(
        *sink.borrow(),
        vec![JsVal::Int(0), JsVal::Int(1), JsVal::Int(2)]
    );
}

#[test]
fn test_mapping_iteration_in_both_styles() {
    let (mock, _rt, cx) = fixture();
    let dict = RecordingDict::new();
    dict.insert("a", HostValue::Int(1));
    dict.insert("b", HostValue::Int(2));
    cx.add_global("m", HostValue::Object(as_host(&dict)))
        .expect("add_global");

    let keys: Rc<RefCell<Vec<JsVal>>> = Rc::new(RefCell::new(Vec::new()));
    register_loop(&mock, "for (k in m)", "m", "for-each-iterator", keys.clone());
    assert!(cx.execute("for (k in m)").is_ok());
    assert_eq!(*keys.borrow(), vec![jstr("a"), jstr("b")]);

    let values: Rc<RefCell<Vec<JsVal>>> = Rc::new(RefCell::new(Vec::new()));
    register_loop(&mock, "for (v of m)", "m", "iterator", values.clone());
    assert!(cx.execute("for (v of m)").is_ok());
    assert_eq!(*values.borrow(), vec![JsVal::Int(1), JsVal::Int(2)]);
}

#[test]
fn test_stop_iteration_never_escapes_the_loop() {
    // The loop in the program catches the signal; the script completes
    // without surfacing an error to the host caller.
    let (mock, _rt, cx) = fixture();
    let list = FixedList::of_ints(&[]);
    cx.add_global("xs", HostValue::Object(as_host(&list)))
        .expect("add_global");

    let sink: Rc<RefCell<Vec<JsVal>>> = Rc::new(RefCell::new(Vec::new()));
    register_loop(&mock, "for (x of xs)", "xs", "iterator", sink.clone());

    let result = cx.execute("for (x of xs)");
    assert_eq!(result.ok(), Some(HostValue::None));
    assert!(sink.borrow().is_empty());
}

#[test]
fn test_truncation_mid_iteration_is_observed() {
    let (mock, _rt, cx) = fixture();
    let list = FixedList::of_ints(&[1, 2, 3, 4]);
    cx.add_global("xs", HostValue::Object(as_host(&list)))
        .expect("add_global");

    let list_in_program = list.clone();
    let sink: Rc<RefCell<Vec<JsVal>>> = Rc::new(RefCell::new(Vec::new()));
    let sink_in_program = sink.clone();
    mock.program("iterate and truncate", move |cx| {
        let proxy = cx.get_property(&cx.global(), &jstr("xs"))?;
        let target = proxy
            .as_object()
            .ok_or_else(|| Error::script("xs is not an object"))?;
        let iterator = cx.get_property(&target, &jstr("iterator"))?;
        let iterator = iterator
            .as_object()
            .ok_or_else(|| Error::script("no iterator was negotiated"))?;
        loop {
            match cx.call_object(&iterator, &[]) {
                Ok(item) => {
                    sink_in_program.borrow_mut().push(item);
                    // The host shrinks the sequence under the running
                    // loop after the first item.
                    list_in_program.truncate(2);
                }
                Err(e) if e.is_stop_iteration() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(JsVal::Undefined)
    });

    assert!(cx.execute("iterate and truncate").is_ok());
    // The second step still sees index 1 (< new length 2); the third
    // observes the truncation and stops.
    assert_eq!(*sink.borrow(), vec![JsVal::Int(1), JsVal::Int(2)]);
}
