//! Deterministic in-memory engine implementing the embedding contract.
//!
//! This is not a JavaScript VM. It models exactly the engine surface the
//! bridge consumes: an id-keyed object heap with insertion-ordered
//! properties, class trap tables, private slots, mark/sweep collection
//! from registered roots, heap-byte accounting, and the interrupt and
//! error-report hooks. Every knob is observable, so the test suite can
//! force collection pressure, clock advancement, and trap invocation
//! deterministically.
//!
//! Scripts are stand-ins: a test registers a program (a Rust closure)
//! under its source text with [`MockRuntime::program`], and `evaluate`
//! runs it. Sources that are plain literals (`42`, `"hi"`, `true`,
//! `null`) evaluate directly, which is enough for smoke tests and doc
//! examples. Programs receive the executing [`MockContext`] and drive
//! proxy traps the way compiled bytecode would: property access via
//! `get_property`/`set_property`, iteration by repeatedly invoking the
//! iterator object, cooperative interruption via [`MockContext::interrupt`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Error;

use super::{
    ClassId, ClassOps, ClassSpec, EngineContext, EngineRuntime, ErrorReport, ErrorReporter,
    InterruptHandler, JsObject, JsString, JsVal, PrivateData, RootId, RuntimeId, ScriptOrigin,
};

/// Fixed per-object overhead used by the heap accounting.
pub const OBJECT_BASE_BYTES: usize = 64;

/// A registered stand-in for a compiled script.
pub type Program = Rc<dyn Fn(&MockContext) -> Result<JsVal, Error>>;

// ============================================================================
// Shared heap state
// ============================================================================

/// Normalized own-property key. The engine accepts integer and string
/// keys; trapped classes may still see arbitrary key values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PropKey {
    Int(i32),
    Str(String),
}

impl PropKey {
    fn from_val(key: &JsVal) -> Option<PropKey> {
        match key {
            JsVal::Int(i) => Some(PropKey::Int(*i)),
            JsVal::String(s) => s.to_string_strict().ok().map(PropKey::Str),
            _ => None,
        }
    }

    fn to_val(&self) -> JsVal {
        match self {
            PropKey::Int(i) => JsVal::Int(*i),
            PropKey::Str(s) => JsVal::String(JsString::from(s.as_str())),
        }
    }
}

struct ObjectData {
    class: Option<ClassId>,
    props: IndexMap<PropKey, JsVal>,
    private: Option<PrivateData>,
    ballast: usize,
}

impl ObjectData {
    fn plain() -> Self {
        ObjectData {
            class: None,
            props: IndexMap::new(),
            private: None,
            ballast: 0,
        }
    }
}

struct ClassEntry {
    name: String,
    ops: Rc<dyn ClassOps>,
}

/// Heap and bookkeeping shared by every context of one runtime.
struct SharedState {
    next_object: Cell<u64>,
    objects: RefCell<FxHashMap<u64, ObjectData>>,
    next_class: Cell<u32>,
    classes: RefCell<FxHashMap<u32, ClassEntry>>,
    next_root: Cell<u64>,
    roots: RefCell<FxHashMap<u64, JsVal>>,
    globals: RefCell<Vec<JsObject>>,
    programs: RefCell<FxHashMap<String, Program>>,
    gc_runs: Cell<u64>,
    maybe_gc_calls: Cell<u64>,
    request_begins: Cell<u64>,
    request_ends: Cell<u64>,
    request_depth: Cell<i64>,
    interrupt_fires: Cell<u64>,
}

impl SharedState {
    fn new() -> Self {
        SharedState {
            next_object: Cell::new(1),
            objects: RefCell::new(FxHashMap::default()),
            next_class: Cell::new(1),
            classes: RefCell::new(FxHashMap::default()),
            next_root: Cell::new(1),
            roots: RefCell::new(FxHashMap::default()),
            globals: RefCell::new(Vec::new()),
            programs: RefCell::new(FxHashMap::default()),
            gc_runs: Cell::new(0),
            maybe_gc_calls: Cell::new(0),
            request_begins: Cell::new(0),
            request_ends: Cell::new(0),
            request_depth: Cell::new(0),
            interrupt_fires: Cell::new(0),
        }
    }

    fn alloc_object(&self, data: ObjectData) -> JsObject {
        let id = self.next_object.get();
        self.next_object.set(id + 1);
        self.objects.borrow_mut().insert(id, data);
        JsObject::from_raw(id)
    }

    fn class_ops(&self, obj: &JsObject) -> Result<Option<Rc<dyn ClassOps>>, Error> {
        let objects = self.objects.borrow();
        let data = objects
            .get(&obj.raw())
            .ok_or_else(|| stale_handle(obj))?;
        let Some(class) = data.class else {
            return Ok(None);
        };
        Ok(self
            .classes
            .borrow()
            .get(&class.0)
            .map(|entry| entry.ops.clone()))
    }

    fn heap_bytes(&self) -> usize {
        self.objects
            .borrow()
            .values()
            .map(|o| OBJECT_BASE_BYTES + o.ballast)
            .sum()
    }

    /// Mark from roots and globals, sweep the rest, finalize swept
    /// instances after all heap borrows are released.
    fn collect(&self) {
        self.gc_runs.set(self.gc_runs.get() + 1);

        let mut marked: FxHashSet<u64> = FxHashSet::default();
        let mut stack: Vec<u64> = Vec::new();

        for val in self.roots.borrow().values() {
            if let Some(obj) = val.as_object() {
                stack.push(obj.raw());
            }
        }
        for obj in self.globals.borrow().iter() {
            stack.push(obj.raw());
        }

        {
            let objects = self.objects.borrow();
            while let Some(id) = stack.pop() {
                if !marked.insert(id) {
                    continue;
                }
                if let Some(data) = objects.get(&id) {
                    for val in data.props.values() {
                        if let Some(obj) = val.as_object() {
                            if !marked.contains(&obj.raw()) {
                                stack.push(obj.raw());
                            }
                        }
                    }
                }
            }
        }

        let mut swept: Vec<(Option<Rc<dyn ClassOps>>, Option<PrivateData>)> = Vec::new();
        {
            let mut objects = self.objects.borrow_mut();
            let classes = self.classes.borrow();
            let dead: Vec<u64> = objects
                .keys()
                .filter(|id| !marked.contains(id))
                .copied()
                .collect();
            for id in dead {
                if let Some(data) = objects.remove(&id) {
                    let ops = data
                        .class
                        .and_then(|c| classes.get(&c.0).map(|e| e.ops.clone()));
                    swept.push((ops, data.private));
                }
            }
        }

        // Finalizers may drop host references that cascade arbitrarily;
        // run them with no heap borrow held.
        for (ops, private) in swept {
            match ops {
                Some(ops) => ops.finalize(private),
                None => drop(private),
            }
        }
    }
}

fn stale_handle(obj: &JsObject) -> Error {
    Error::engine(format!("stale object handle {}", obj.raw()))
}

// ============================================================================
// Runtime
// ============================================================================

/// A mock engine runtime. Contexts created from it share one heap, which
/// is what makes compiled scripts executable across sibling contexts.
pub struct MockRuntime {
    id: RuntimeId,
    state: Rc<SharedState>,
}

impl MockRuntime {
    pub fn new() -> Rc<MockRuntime> {
        // Ids only need to differ between runtimes within one process.
        thread_local! {
            static NEXT_RUNTIME: Cell<u64> = const { Cell::new(1) };
        }
        let id = NEXT_RUNTIME.with(|n| {
            let id = n.get();
            n.set(id + 1);
            id
        });
        Rc::new(MockRuntime {
            id: RuntimeId(id),
            state: Rc::new(SharedState::new()),
        })
    }

    /// Register a program under its source text. Evaluating that exact
    /// source runs the closure in place of compiled bytecode.
    pub fn program<F>(&self, source: &str, body: F)
    where
        F: Fn(&MockContext) -> Result<JsVal, Error> + 'static,
    {
        self.state
            .programs
            .borrow_mut()
            .insert(source.to_string(), Rc::new(body));
    }

    // -- observability ---------------------------------------------------

    pub fn live_objects(&self) -> usize {
        self.state.objects.borrow().len()
    }

    pub fn heap_bytes(&self) -> usize {
        self.state.heap_bytes()
    }

    pub fn gc_runs(&self) -> u64 {
        self.state.gc_runs.get()
    }

    pub fn maybe_gc_calls(&self) -> u64 {
        self.state.maybe_gc_calls.get()
    }

    pub fn class_count(&self) -> usize {
        self.state.classes.borrow().len()
    }

    pub fn class_name(&self, class: ClassId) -> Option<String> {
        self.state
            .classes
            .borrow()
            .get(&class.0)
            .map(|e| e.name.clone())
    }

    pub fn interrupt_fires(&self) -> u64 {
        self.state.interrupt_fires.get()
    }

    pub fn request_begins(&self) -> u64 {
        self.state.request_begins.get()
    }

    pub fn request_ends(&self) -> u64 {
        self.state.request_ends.get()
    }

    /// Current request nesting depth across all contexts; zero when the
    /// bridge is idle.
    pub fn request_depth(&self) -> i64 {
        self.state.request_depth.get()
    }

    /// A bare context sharing this runtime's heap, for driving the engine
    /// surface directly in tests.
    pub fn raw_context(&self) -> MockContext {
        MockContext {
            runtime_id: self.id,
            state: self.state.clone(),
            global: Cell::new(None),
            strict: Cell::new(false),
            interrupt: RefCell::new(None),
            reporter: RefCell::new(None),
        }
    }
}

impl EngineRuntime for MockRuntime {
    fn id(&self) -> RuntimeId {
        self.id
    }

    fn new_context(&self) -> Result<Box<dyn EngineContext>, Error> {
        Ok(Box::new(MockContext {
            runtime_id: self.id,
            state: self.state.clone(),
            global: Cell::new(None),
            strict: Cell::new(false),
            interrupt: RefCell::new(None),
            reporter: RefCell::new(None),
        }))
    }
}

// ============================================================================
// Context
// ============================================================================

/// One mock engine context. Test programs receive `&MockContext` and use
/// both the [`EngineContext`] surface and the extra helpers below to act
/// like running bytecode.
pub struct MockContext {
    runtime_id: RuntimeId,
    state: Rc<SharedState>,
    global: Cell<Option<JsObject>>,
    strict: Cell<bool>,
    interrupt: RefCell<Option<InterruptHandler>>,
    reporter: RefCell<Option<ErrorReporter>>,
}

impl MockContext {
    /// Fire the cooperative interrupt hook, as the VM would on a backward
    /// branch. Programs should call this once per loop iteration.
    pub fn interrupt(&self) -> Result<(), Error> {
        self.state
            .interrupt_fires
            .set(self.state.interrupt_fires.get() + 1);
        let handler = self.interrupt.borrow().clone();
        match handler {
            Some(handler) => handler(),
            None => Ok(()),
        }
    }

    /// Invoke an object as a function, routing through its class `call`
    /// trap.
    pub fn call_object(&self, obj: &JsObject, args: &[JsVal]) -> Result<JsVal, Error> {
        match self.state.class_ops(obj)? {
            Some(ops) => ops.call(obj, args),
            None => Err(Error::call("object is not callable")),
        }
    }

    /// Invoke an object as a constructor, routing through its class
    /// `construct` trap.
    pub fn construct_object(&self, obj: &JsObject, args: &[JsVal]) -> Result<JsVal, Error> {
        match self.state.class_ops(obj)? {
            Some(ops) => ops.construct(obj, args),
            None => Err(Error::construct("object is not a constructor")),
        }
    }

    /// Allocate an unrooted object carrying `bytes` of ballast; the next
    /// collection reclaims it.
    pub fn alloc_ballast(&self, bytes: usize) -> JsObject {
        let mut data = ObjectData::plain();
        data.ballast = bytes;
        self.state.alloc_object(data)
    }

    /// Allocate a rooted object carrying `bytes` of ballast; survives
    /// collection until the root is removed.
    pub fn alloc_rooted_ballast(&self, bytes: usize) -> Result<RootId, Error> {
        let obj = self.alloc_ballast(bytes);
        self.add_root(&JsVal::Object(obj), "ballast")
    }

    /// Emit a warning through the error-report channel without failing
    /// anything.
    pub fn report_warning(&self, message: &str, origin: &ScriptOrigin) {
        self.deliver_report(&ErrorReport::warning(message, origin));
    }

    pub fn strict(&self) -> bool {
        self.strict.get()
    }

    fn deliver_report(&self, report: &ErrorReport) {
        let reporter = self.reporter.borrow().clone();
        if let Some(reporter) = reporter {
            reporter(report);
        }
    }

    fn report_failure(&self, err: &Error, origin: &ScriptOrigin) {
        if !err.is_stop_iteration() {
            self.deliver_report(&ErrorReport::error(err.to_string(), origin));
        }
    }

    fn run_source(&self, text: &str, origin: &ScriptOrigin) -> Result<JsVal, Error> {
        let program = self.state.programs.borrow().get(text).cloned();
        let result = match program {
            Some(program) => program(self),
            None => parse_literal(text)
                .map_err(|message| Error::compile(message, origin.filename.clone(), origin.line)),
        };
        if let Err(err) = &result {
            self.report_failure(err, origin);
        }
        result
    }
}

impl EngineContext for MockContext {
    fn runtime_id(&self) -> RuntimeId {
        self.runtime_id
    }

    fn begin_request(&self) {
        self.state
            .request_begins
            .set(self.state.request_begins.get() + 1);
        self.state
            .request_depth
            .set(self.state.request_depth.get() + 1);
    }

    fn end_request(&self) {
        self.state
            .request_ends
            .set(self.state.request_ends.get() + 1);
        self.state
            .request_depth
            .set(self.state.request_depth.get() - 1);
    }

    fn set_strict(&self, strict: bool) {
        self.strict.set(strict);
    }

    fn init_global(&self, spec: ClassSpec) -> Result<JsObject, Error> {
        if self.global.get().is_some() {
            return Err(Error::engine("global object already initialized"));
        }
        let class = self.define_class(spec)?;
        let mut data = ObjectData::plain();
        data.class = Some(class);
        let obj = self.state.alloc_object(data);
        self.state.globals.borrow_mut().push(obj);
        self.global.set(Some(obj));
        Ok(obj)
    }

    fn global(&self) -> JsObject {
        self.global.get().unwrap_or(JsObject::from_raw(0))
    }

    fn evaluate(&self, source: &JsString, origin: &ScriptOrigin) -> Result<JsVal, Error> {
        let text = source.to_string_lossy();
        self.run_source(&text, origin)
    }

    fn compile(&self, source: &JsString, origin: &ScriptOrigin) -> Result<JsVal, Error> {
        let text = source.to_string_lossy();
        let known =
            self.state.programs.borrow().contains_key(&text) || parse_literal(&text).is_ok();
        if !known {
            let err = Error::compile(
                "unrecognized program text",
                origin.filename.clone(),
                origin.line,
            );
            self.report_failure(&err, origin);
            return Err(err);
        }
        let mut data = ObjectData::plain();
        data.private = Some(Rc::new(ScriptBlob {
            text,
            origin: origin.clone(),
        }));
        Ok(JsVal::Object(self.state.alloc_object(data)))
    }

    fn execute_script(&self, script: &JsVal) -> Result<JsVal, Error> {
        let obj = script
            .as_object()
            .ok_or_else(|| Error::engine("not a script object"))?;
        let blob = self
            .private(&obj)
            .and_then(|p| p.downcast::<ScriptBlob>().ok())
            .ok_or_else(|| Error::engine("not a script object"))?;
        self.run_source(&blob.text, &blob.origin)
    }

    fn define_class(&self, spec: ClassSpec) -> Result<ClassId, Error> {
        let id = self.state.next_class.get();
        self.state.next_class.set(id + 1);
        self.state.classes.borrow_mut().insert(
            id,
            ClassEntry {
                name: spec.name,
                ops: spec.ops,
            },
        );
        Ok(ClassId(id))
    }

    fn class_of(&self, obj: &JsObject) -> Option<ClassId> {
        self.state.objects.borrow().get(&obj.raw())?.class
    }

    fn new_object(&self, class: ClassId) -> Result<JsObject, Error> {
        if !self.state.classes.borrow().contains_key(&class.0) {
            return Err(Error::engine(format!("unknown class id {}", class.0)));
        }
        let mut data = ObjectData::plain();
        data.class = Some(class);
        Ok(self.state.alloc_object(data))
    }

    fn new_plain_object(&self) -> Result<JsObject, Error> {
        Ok(self.state.alloc_object(ObjectData::plain()))
    }

    fn set_private(&self, obj: &JsObject, data: PrivateData) -> Result<(), Error> {
        let mut objects = self.state.objects.borrow_mut();
        let entry = objects
            .get_mut(&obj.raw())
            .ok_or_else(|| stale_handle(obj))?;
        entry.private = Some(data);
        Ok(())
    }

    fn private(&self, obj: &JsObject) -> Option<PrivateData> {
        self.state
            .objects
            .borrow()
            .get(&obj.raw())?
            .private
            .clone()
    }

    fn get_property(&self, obj: &JsObject, key: &JsVal) -> Result<JsVal, Error> {
        let nkey = PropKey::from_val(key);
        let own = {
            let objects = self.state.objects.borrow();
            let data = objects
                .get(&obj.raw())
                .ok_or_else(|| stale_handle(obj))?;
            nkey.as_ref().and_then(|k| data.props.get(k).cloned())
        };
        if let Some(val) = own {
            return Ok(val);
        }
        match self.state.class_ops(obj)? {
            Some(ops) => ops.get(obj, key),
            None if nkey.is_some() => Ok(JsVal::Undefined),
            None => Err(Error::engine("unsupported property key")),
        }
    }

    fn set_property(&self, obj: &JsObject, key: &JsVal, value: &JsVal) -> Result<(), Error> {
        let nkey = PropKey::from_val(key);
        let has_own = {
            let objects = self.state.objects.borrow();
            let data = objects
                .get(&obj.raw())
                .ok_or_else(|| stale_handle(obj))?;
            nkey.as_ref().is_some_and(|k| data.props.contains_key(k))
        };
        if has_own {
            return self.define_property(obj, key, value);
        }
        match self.state.class_ops(obj)? {
            Some(ops) => ops.set(obj, key, value),
            None => self.define_property(obj, key, value),
        }
    }

    fn delete_property(&self, obj: &JsObject, key: &JsVal) -> Result<bool, Error> {
        let nkey = PropKey::from_val(key);
        let had_own = {
            let mut objects = self.state.objects.borrow_mut();
            let data = objects
                .get_mut(&obj.raw())
                .ok_or_else(|| stale_handle(obj))?;
            match nkey.as_ref() {
                Some(k) => data.props.shift_remove(k).is_some(),
                None => false,
            }
        };
        if had_own {
            return Ok(true);
        }
        match self.state.class_ops(obj)? {
            Some(ops) => ops.delete(obj, key),
            None => Ok(true),
        }
    }

    fn enumerate(&self, obj: &JsObject) -> Result<Vec<JsVal>, Error> {
        let objects = self.state.objects.borrow();
        let data = objects
            .get(&obj.raw())
            .ok_or_else(|| stale_handle(obj))?;
        Ok(data.props.keys().map(PropKey::to_val).collect())
    }

    fn define_property(&self, obj: &JsObject, key: &JsVal, value: &JsVal) -> Result<(), Error> {
        let nkey =
            PropKey::from_val(key).ok_or_else(|| Error::engine("unsupported property key"))?;
        let mut objects = self.state.objects.borrow_mut();
        let data = objects
            .get_mut(&obj.raw())
            .ok_or_else(|| stale_handle(obj))?;
        data.props.insert(nkey, value.clone());
        Ok(())
    }

    fn get_own_property(&self, obj: &JsObject, key: &JsVal) -> Result<Option<JsVal>, Error> {
        let nkey = PropKey::from_val(key);
        let objects = self.state.objects.borrow();
        let data = objects
            .get(&obj.raw())
            .ok_or_else(|| stale_handle(obj))?;
        Ok(nkey.as_ref().and_then(|k| data.props.get(k).cloned()))
    }

    fn delete_own_property(&self, obj: &JsObject, key: &JsVal) -> Result<bool, Error> {
        let nkey = PropKey::from_val(key);
        let mut objects = self.state.objects.borrow_mut();
        let data = objects
            .get_mut(&obj.raw())
            .ok_or_else(|| stale_handle(obj))?;
        Ok(match nkey.as_ref() {
            Some(k) => data.props.shift_remove(k).is_some(),
            None => false,
        })
    }

    fn add_root(&self, val: &JsVal, _note: &'static str) -> Result<RootId, Error> {
        let id = self.state.next_root.get();
        self.state.next_root.set(id + 1);
        self.state.roots.borrow_mut().insert(id, val.clone());
        Ok(RootId(id))
    }

    fn remove_root(&self, root: RootId) {
        self.state.roots.borrow_mut().remove(&root.0);
    }

    fn heap_bytes(&self) -> usize {
        self.state.heap_bytes()
    }

    fn gc(&self) {
        self.state.collect();
    }

    fn maybe_gc(&self) {
        self.state
            .maybe_gc_calls
            .set(self.state.maybe_gc_calls.get() + 1);
    }

    fn set_interrupt_handler(&self, handler: Option<InterruptHandler>) {
        *self.interrupt.borrow_mut() = handler;
    }

    fn set_error_reporter(&self, reporter: Option<ErrorReporter>) {
        *self.reporter.borrow_mut() = reporter;
    }
}

struct ScriptBlob {
    text: String,
    origin: ScriptOrigin,
}

/// Literal program texts accepted without a registered program.
fn parse_literal(text: &str) -> Result<JsVal, String> {
    let text = text.trim();
    match text {
        "" => return Err("empty program".to_string()),
        "null" => return Ok(JsVal::Null),
        "undefined" => return Ok(JsVal::Undefined),
        "true" => return Ok(JsVal::Bool(true)),
        "false" => return Ok(JsVal::Bool(false)),
        _ => {}
    }
    if let Ok(i) = text.parse::<i32>() {
        return Ok(JsVal::Int(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Ok(JsVal::Double(f));
    }
    let quoted = (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
        || (text.starts_with('"') && text.ends_with('"') && text.len() >= 2);
    if quoted {
        let inner = text
            .get(1..text.len() - 1)
            .ok_or_else(|| "malformed string literal".to_string())?;
        return Ok(JsVal::String(JsString::from(inner)));
    }
    Err("unrecognized program text".to_string())
}
