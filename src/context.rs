//! Execution contexts.
//!
//! A [`Context`] binds one guest engine context to the host: it owns the
//! root object, the per-context class-descriptor cache, the pinned-object
//! set, the access policy, and the resource governor, and it is the entry
//! point for running and compiling scripts. Contexts sharing a [`Runtime`]
//! share a guest heap, which is what lets a [`CompiledScript`] execute in
//! any sibling context.
//!
//! A context handle is cheap to clone; clones refer to the same context.
//! Nothing here is thread-safe; one context belongs to one thread, and
//! serialization across threads is the caller's problem.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::{
    ClassId, ClassOps, ClassSpec, EngineContext, EngineRuntime, ErrorReport, ErrorReporter,
    JsObject, JsString, JsVal, Request, RootId, RuntimeId, ScriptOrigin,
};
use crate::error::Error;
use crate::governor::{Clock, HeapProbe, ResourceGovernor, SystemClock};
use crate::host::{HostObject, HostOpError, HostRef, HostValue};
use crate::policy::AccessPolicy;
use crate::proxy::ClassDescriptor;
use crate::{marshal, policy};

/// Shared handle to a guest engine runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<dyn EngineRuntime>,
}

impl Runtime {
    pub fn new(engine: Rc<dyn EngineRuntime>) -> Self {
        Runtime { inner: engine }
    }

    pub fn id(&self) -> RuntimeId {
        self.inner.id()
    }
}

/// How the context holds its global delegate.
///
/// The weak form is the default: the guest referencing the delegate never
/// keeps it alive, and a collected delegate silently disables the global
/// hooks. The strong form is for hosts that cannot offer a weak
/// reference; note that a strong delegate reachable from guest objects
/// cannot be reclaimed until the context itself is destroyed.
pub enum GlobalHook {
    Weak(std::rc::Weak<dyn HostObject>),
    Strong(HostRef),
}

impl GlobalHook {
    pub fn weak(delegate: &HostRef) -> Result<Self, Error> {
        require_mapping(delegate)?;
        Ok(GlobalHook::Weak(Rc::downgrade(delegate)))
    }

    pub fn strong(delegate: HostRef) -> Result<Self, Error> {
        require_mapping(&delegate)?;
        Ok(GlobalHook::Strong(delegate))
    }

    fn get(&self) -> Option<HostRef> {
        match self {
            GlobalHook::Weak(weak) => weak.upgrade(),
            GlobalHook::Strong(strong) => Some(strong.clone()),
        }
    }
}

fn require_mapping(delegate: &HostRef) -> Result<(), Error> {
    if delegate.is_mapping() {
        Ok(())
    } else {
        Err(Error::property("global delegate must provide item access"))
    }
}

/// Construction-time configuration for a context.
pub struct ContextConfig {
    pub global: Option<GlobalHook>,
    pub access: Option<Rc<dyn AccessPolicy>>,
    pub strict: bool,
    /// Execution clock; swap in [`crate::governor::ManualClock`] to drive
    /// quota checks deterministically.
    pub clock: Rc<dyn Clock>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            global: None,
            access: None,
            strict: false,
            clock: Rc::new(SystemClock),
        }
    }
}

// ============================================================================
// Context core
// ============================================================================

/// State shared by the context handle, its wrappers, and the traps.
///
/// Field order matters on drop: the engine context goes first, then the
/// class cache and pinned set release their remaining references.
pub(crate) struct ContextCore {
    engine: Box<dyn EngineContext>,
    pub(crate) runtime_id: RuntimeId,
    root: Cell<Option<JsObject>>,
    pub(crate) classes: RefCell<FxHashMap<TypeId, ClassDescriptor>>,
    pub(crate) proxy_classes: RefCell<FxHashSet<ClassId>>,
    pub(crate) iter_class: Cell<Option<ClassId>>,
    pinned: RefCell<FxHashMap<*const (), HostRef>>,
    global: RefCell<Option<GlobalHook>>,
    policy: RefCell<Option<Rc<dyn AccessPolicy>>>,
    reporter: RefCell<Option<ErrorReporter>>,
    governor: ResourceGovernor,
}

impl ContextCore {
    pub(crate) fn engine(&self) -> &dyn EngineContext {
        self.engine.as_ref()
    }

    pub(crate) fn root_object(&self) -> Result<JsObject, Error> {
        self.root
            .get()
            .ok_or_else(|| Error::engine("root object not initialized"))
    }

    pub(crate) fn policy(&self) -> Option<Rc<dyn AccessPolicy>> {
        self.policy.borrow().clone()
    }

    fn global_delegate(&self) -> Option<HostRef> {
        self.global.borrow().as_ref().and_then(GlobalHook::get)
    }

    /// Keep a host object alive in the context's pinned set until the
    /// next forced collection.
    pub(crate) fn pin(&self, obj: &HostRef) {
        let key = Rc::as_ptr(obj) as *const ();
        self.pinned.borrow_mut().insert(key, obj.clone());
    }

    fn forward_report(&self, report: &ErrorReport) {
        log::debug!(
            "engine report ({}): {}",
            if report.warning { "warning" } else { "error" },
            report.message
        );
        let reporter = self.reporter.borrow().clone();
        if let Some(reporter) = reporter {
            reporter(report);
        }
    }
}

/// Adapter giving the governor its narrow view of the engine heap.
struct EngineHeap<'a>(&'a dyn EngineContext);

impl HeapProbe for EngineHeap<'_> {
    fn heap_bytes(&self) -> usize {
        self.0.heap_bytes()
    }

    fn collect(&self) {
        self.0.gc();
    }
}

// ============================================================================
// Global delegate traps
// ============================================================================

/// Trap table for the root object. Get/set/delete forward to the host
/// global delegate; with no live delegate every trap is a pass-through
/// no-op.
struct GlobalOps {
    core: Weak<ContextCore>,
}

impl GlobalOps {
    fn core(&self) -> Result<Rc<ContextCore>, Error> {
        self.core.upgrade().ok_or(Error::ContextDestroyed)
    }
}

impl ClassOps for GlobalOps {
    fn get(&self, _this: &JsObject, key: &JsVal) -> Result<JsVal, Error> {
        let core = self.core()?;
        let Some(delegate) = core.global_delegate() else {
            return Ok(JsVal::Undefined);
        };
        let key_host = marshal::guest_to_host(&core, key)?;
        policy::enforce(core.policy().as_ref(), &delegate, &key_host)?;
        match delegate.get_item(&key_host) {
            Ok(value) => marshal::host_to_guest(&core, &value),
            Err(HostOpError::Missing | HostOpError::Unsupported) => Ok(JsVal::Undefined),
            Err(HostOpError::Failed(message)) => Err(Error::property(message)),
        }
    }

    fn set(&self, _this: &JsObject, key: &JsVal, value: &JsVal) -> Result<(), Error> {
        let core = self.core()?;
        let Some(delegate) = core.global_delegate() else {
            return Ok(());
        };
        let key_host = marshal::guest_to_host(&core, key)?;
        policy::enforce(core.policy().as_ref(), &delegate, &key_host)?;
        let value_host = marshal::guest_to_host(&core, value)?;
        delegate
            .set_item(&key_host, value_host)
            .map_err(|e| Error::property(e.to_string()))
    }

    fn delete(&self, _this: &JsObject, key: &JsVal) -> Result<bool, Error> {
        let core = self.core()?;
        let Some(delegate) = core.global_delegate() else {
            return Ok(true);
        };
        let key_host = marshal::guest_to_host(&core, key)?;
        policy::enforce(core.policy().as_ref(), &delegate, &key_host)?;
        match delegate.del_item(&key_host) {
            Ok(()) => Ok(true),
            // No item-deletion protocol on the delegate: not an error.
            Err(HostOpError::Unsupported) => Ok(true),
            Err(e) => Err(Error::property(e.to_string())),
        }
    }
}

// ============================================================================
// Context
// ============================================================================

/// One bound guest engine context. Cheap to clone; see module docs.
#[derive(Clone)]
pub struct Context {
    pub(crate) core: Rc<ContextCore>,
}

impl Context {
    /// Bind a new context to `runtime`, create its root object, and
    /// install the global delegate hooks if one is configured.
    pub fn new(runtime: &Runtime, config: ContextConfig) -> Result<Context, Error> {
        let engine = runtime.inner.new_context()?;
        engine.set_strict(config.strict);

        let core = Rc::new(ContextCore {
            engine,
            runtime_id: runtime.inner.id(),
            root: Cell::new(None),
            classes: RefCell::new(FxHashMap::default()),
            proxy_classes: RefCell::new(FxHashSet::default()),
            iter_class: Cell::new(None),
            pinned: RefCell::new(FxHashMap::default()),
            global: RefCell::new(config.global),
            policy: RefCell::new(config.access),
            reporter: RefCell::new(None),
            governor: ResourceGovernor::new(config.clock),
        });

        {
            let _request = Request::begin(core.engine());

            let ops: Rc<dyn ClassOps> = Rc::new(GlobalOps {
                core: Rc::downgrade(&core),
            });
            let root = core.engine().init_global(ClassSpec::new("BridgeGlobal", ops))?;
            core.root.set(Some(root));

            let weak = Rc::downgrade(&core);
            core.engine()
                .set_interrupt_handler(Some(Rc::new(move || match weak.upgrade() {
                    Some(core) => core.governor.checkpoint(&EngineHeap(core.engine())),
                    None => Ok(()),
                })));

            let weak = Rc::downgrade(&core);
            core.engine()
                .set_error_reporter(Some(Rc::new(move |report: &ErrorReport| {
                    if let Some(core) = weak.upgrade() {
                        core.forward_report(report);
                    }
                })));
        }

        log::debug!("created context on runtime {:?}", core.runtime_id);
        Ok(Context { core })
    }

    // -- execution -------------------------------------------------------

    /// Run a script and marshal its completion value back to the host.
    pub fn execute(&self, code: &str) -> Result<HostValue, Error> {
        self.execute_with_origin(code, "<anonymous>", 1)
    }

    /// Run a script, attributing errors to `filename` starting at `line`.
    pub fn execute_with_origin(
        &self,
        code: &str,
        filename: &str,
        line: u32,
    ) -> Result<HostValue, Error> {
        let core = &self.core;
        let origin = ScriptOrigin::new(filename, line);
        let _request = Request::begin(core.engine());
        let _stamp = core.governor.begin_execution();

        let source = JsString::from(code);
        let value = core
            .engine()
            .evaluate(&source, &origin)
            .map_err(as_script_error)?;
        let result = marshal::guest_to_host(core, &value);
        core.engine().maybe_gc();
        result
    }

    /// Compile without running. The result can execute later, here or in
    /// any context sharing this runtime.
    pub fn compile(&self, code: &str) -> Result<CompiledScript, Error> {
        self.compile_with_origin(code, "<anonymous>", 1)
    }

    pub fn compile_with_origin(
        &self,
        code: &str,
        filename: &str,
        line: u32,
    ) -> Result<CompiledScript, Error> {
        let core = &self.core;
        let origin = ScriptOrigin::new(filename, line);
        let _request = Request::begin(core.engine());

        let source = JsString::from(code);
        let script = core
            .engine()
            .compile(&source, &origin)
            .map_err(|e| match e {
                Error::Engine { message } => Error::compile(message, filename, line),
                other => other,
            })?;
        let root = core.engine().add_root(&script, "CompiledScript")?;
        core.engine().maybe_gc();
        Ok(CompiledScript {
            core: core.clone(),
            script,
            root,
        })
    }

    // -- global bindings -------------------------------------------------

    /// Define a root property directly, bypassing the delegate traps.
    pub fn add_global(
        &self,
        key: impl Into<HostValue>,
        value: impl Into<HostValue>,
    ) -> Result<(), Error> {
        let core = &self.core;
        let _request = Request::begin(core.engine());
        let root = core.root_object()?;
        let key = marshal::host_to_guest(core, &key.into())?;
        let value = marshal::host_to_guest(core, &value.into())?;
        core.engine().define_property(&root, &key, &value)
    }

    /// Remove a root property, returning its previous value.
    pub fn remove_global(&self, key: impl Into<HostValue>) -> Result<HostValue, Error> {
        let core = &self.core;
        let _request = Request::begin(core.engine());
        let root = core.root_object()?;
        let key = marshal::host_to_guest(core, &key.into())?;
        let previous = core
            .engine()
            .get_own_property(&root, &key)?
            .unwrap_or(JsVal::Undefined);
        let previous = marshal::guest_to_host(core, &previous)?;
        core.engine().delete_own_property(&root, &key)?;
        core.engine().maybe_gc();
        Ok(previous)
    }

    // -- configuration ---------------------------------------------------

    /// Replace the access policy, returning the previous one.
    pub fn set_access_policy(
        &self,
        policy: Option<Rc<dyn AccessPolicy>>,
    ) -> Option<Rc<dyn AccessPolicy>> {
        std::mem::replace(&mut *self.core.policy.borrow_mut(), policy)
    }

    /// Install an observer for engine error/warning reports. Reports
    /// reach it independently of error propagation.
    pub fn set_error_reporter(&self, reporter: Option<ErrorReporter>) {
        *self.core.reporter.borrow_mut() = reporter;
    }

    /// Clear the pinned-object set and force a guest collection cycle.
    pub fn force_collection(&self) {
        let core = &self.core;
        let _request = Request::begin(core.engine());
        core.pinned.borrow_mut().clear();
        core.engine().gc();
    }

    pub fn max_heap(&self) -> usize {
        self.core.governor.max_heap()
    }

    pub fn set_max_heap(&self, bytes: usize) {
        self.core.governor.set_max_heap(bytes);
    }

    pub fn max_time(&self) -> Duration {
        self.core.governor.max_time()
    }

    pub fn set_max_time(&self, limit: Duration) {
        self.core.governor.set_max_time(limit);
    }
}

/// Evaluation failures with no more specific classification surface as
/// script errors.
fn as_script_error(e: Error) -> Error {
    match e {
        Error::Engine { message } => Error::script(message),
        other => other,
    }
}

// ============================================================================
// Compiled scripts
// ============================================================================

/// A compiled script, pinned against collection independently of any
/// later execution. The compiling context's runtime defines where it can
/// run.
pub struct CompiledScript {
    core: Rc<ContextCore>,
    script: JsVal,
    root: RootId,
}

impl CompiledScript {
    /// Execute on the compiling context.
    pub fn execute(&self) -> Result<HostValue, Error> {
        CompiledScript::run(&self.core, &self.script)
    }

    /// Execute on any context sharing the compiling runtime.
    pub fn execute_in(&self, cx: &Context) -> Result<HostValue, Error> {
        if cx.core.runtime_id != self.core.runtime_id {
            return Err(Error::script(
                "compiled script belongs to a different runtime",
            ));
        }
        CompiledScript::run(&cx.core, &self.script)
    }

    fn run(core: &Rc<ContextCore>, script: &JsVal) -> Result<HostValue, Error> {
        let _request = Request::begin(core.engine());
        let _stamp = core.governor.begin_execution();
        let value = core
            .engine()
            .execute_script(script)
            .map_err(as_script_error)?;
        let result = marshal::guest_to_host(core, &value);
        core.engine().maybe_gc();
        result
    }
}

impl Drop for CompiledScript {
    fn drop(&mut self) {
        let _request = Request::begin(self.core.engine());
        self.core.engine().remove_root(self.root);
    }
}
