//! Guest-engine embedding contract.
//!
//! The guest engine (parser, bytecode VM, mark/sweep collector) is an
//! external collaborator. This module pins down exactly what the bridge
//! consumes from it, as object-safe traits over concrete handle types,
//! mirroring the shape of a SpiderMonkey-style C embedding API: contexts
//! bound to a shared runtime, request bracketing around every entry,
//! class descriptors carrying trap tables, private slots, explicit GC
//! roots, and a periodic interrupt hook.
//!
//! [`mock`] provides a deterministic in-memory implementation used by the
//! test suite; embedders binding a real engine implement the same traits.

pub mod mock;

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::Error;

// ============================================================================
// Handles
// ============================================================================

/// Engine-assigned object handle. Valid for the lifetime of the object in
/// the guest heap; a collected object's handle dangles and any use fails
/// with an engine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JsObject {
    raw: u64,
}

impl JsObject {
    pub fn from_raw(raw: u64) -> Self {
        JsObject { raw }
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }
}

/// Identifier of an installed class descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Identifier of a registered GC root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(pub u64);

/// Identity of a shared engine runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeId(pub u64);

// ============================================================================
// Strings and values
// ============================================================================

/// Guest-native string: owned UTF-16 code units.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JsString {
    units: Vec<u16>,
}

impl JsString {
    pub fn from_units(units: Vec<u16>) -> Self {
        JsString { units }
    }

    pub fn units(&self) -> &[u16] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Strict UTF-16 decoding. An unpaired surrogate is a conversion
    /// error, never replaced with U+FFFD.
    pub fn to_string_strict(&self) -> Result<String, Error> {
        String::from_utf16(&self.units)
            .map_err(|_| Error::conversion("invalid UTF-16 sequence in guest string"))
    }

    /// Lossy decoding for diagnostics only.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString {
            units: s.encode_utf16().collect(),
        }
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString::from(s.as_str())
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsString({:?})", self.to_string_lossy())
    }
}

/// A discriminated guest value as exchanged across the embedding API.
#[derive(Debug, Clone, PartialEq)]
pub enum JsVal {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Double(f64),
    String(JsString),
    Object(JsObject),
    Function(JsObject),
}

impl JsVal {
    pub fn is_undefined(&self) -> bool {
        matches!(self, JsVal::Undefined)
    }

    /// Object handle, for both plain objects and functions.
    pub fn as_object(&self) -> Option<JsObject> {
        match self {
            JsVal::Object(obj) | JsVal::Function(obj) => Some(*obj),
            _ => None,
        }
    }

    pub fn as_js_string(&self) -> Option<&JsString> {
        match self {
            JsVal::String(s) => Some(s),
            _ => None,
        }
    }
}

// ============================================================================
// Classes and traps
// ============================================================================

/// Data stored in an object's private slot. The engine owns it for the
/// object's lifetime and releases it exactly once, at finalization.
pub type PrivateData = Rc<dyn Any>;

/// Trap table for a class descriptor.
///
/// The engine routes property access, invocation, and construction on
/// instances of the class through these hooks. A trap `Err` becomes a
/// pending guest exception; if the script does not catch it, `evaluate`
/// returns that same error. [`Error::StopIteration`] is special: the
/// engine's loop constructs recognize it and terminate cleanly.
///
/// Own properties defined directly on an instance shadow the `get`/`set`/
/// `delete` traps; the traps see only keys with no own entry.
pub trait ClassOps {
    fn get(&self, _this: &JsObject, _key: &JsVal) -> Result<JsVal, Error> {
        Ok(JsVal::Undefined)
    }

    fn set(&self, _this: &JsObject, _key: &JsVal, _value: &JsVal) -> Result<(), Error> {
        Ok(())
    }

    /// Returns whether the delete succeeded; `Ok(false)` is "did not
    /// succeed" without raising.
    fn delete(&self, _this: &JsObject, _key: &JsVal) -> Result<bool, Error> {
        Ok(true)
    }

    fn call(&self, _this: &JsObject, _args: &[JsVal]) -> Result<JsVal, Error> {
        Err(Error::call("object is not callable"))
    }

    fn construct(&self, _this: &JsObject, _args: &[JsVal]) -> Result<JsVal, Error> {
        Err(Error::construct("object is not a constructor"))
    }

    /// Invoked once when an instance is collected, before its private
    /// slot is dropped.
    fn finalize(&self, _private: Option<PrivateData>) {}
}

/// A class descriptor to install into the engine: a name for diagnostics
/// plus the trap table shared by every instance.
pub struct ClassSpec {
    pub name: String,
    pub ops: Rc<dyn ClassOps>,
}

impl ClassSpec {
    pub fn new(name: impl Into<String>, ops: Rc<dyn ClassOps>) -> Self {
        ClassSpec {
            name: name.into(),
            ops,
        }
    }
}

// ============================================================================
// Script origins and error reports
// ============================================================================

/// Where a script came from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOrigin {
    pub filename: String,
    pub line: u32,
}

impl ScriptOrigin {
    pub fn new(filename: impl Into<String>, line: u32) -> Self {
        ScriptOrigin {
            filename: filename.into(),
            line,
        }
    }

    pub fn anonymous() -> Self {
        ScriptOrigin::new("<anonymous>", 1)
    }
}

impl Default for ScriptOrigin {
    fn default() -> Self {
        ScriptOrigin::anonymous()
    }
}

/// One error or warning surfaced by the engine's reporting mechanism.
///
/// Reports flow to the installed reporter callback independently of error
/// propagation; a `warning` report never fails the surrounding execution.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub message: String,
    pub filename: Option<String>,
    pub line: u32,
    pub column: u32,
    pub warning: bool,
    /// Offending source line, when the engine has it.
    pub line_excerpt: Option<String>,
    /// Byte offset of the offending token within `line_excerpt`.
    pub token_offset: Option<usize>,
}

impl ErrorReport {
    pub fn error(message: impl Into<String>, origin: &ScriptOrigin) -> Self {
        ErrorReport {
            message: message.into(),
            filename: Some(origin.filename.clone()),
            line: origin.line,
            column: 0,
            warning: false,
            line_excerpt: None,
            token_offset: None,
        }
    }

    pub fn warning(message: impl Into<String>, origin: &ScriptOrigin) -> Self {
        ErrorReport {
            warning: true,
            ..ErrorReport::error(message, origin)
        }
    }
}

/// Periodic cooperative interrupt hook. Returning `Err` aborts the
/// running script with that error.
pub type InterruptHandler = Rc<dyn Fn() -> Result<(), Error>>;

/// Observer for engine error/warning reports.
pub type ErrorReporter = Rc<dyn Fn(&ErrorReport)>;

// ============================================================================
// Runtime and context
// ============================================================================

/// A shared engine runtime. Many contexts may bind to one runtime; the
/// guest heap is runtime-scoped, which is what makes compiled scripts
/// portable between sibling contexts.
pub trait EngineRuntime {
    fn id(&self) -> RuntimeId;

    fn new_context(&self) -> Result<Box<dyn EngineContext>, Error>;
}

/// One engine context: the unit of execution the bridge drives.
///
/// Every entry into the engine must be bracketed by `begin_request` /
/// `end_request`; use [`Request`] so the bracket closes on all exit
/// paths.
pub trait EngineContext {
    fn runtime_id(&self) -> RuntimeId;

    fn begin_request(&self);
    fn end_request(&self);

    fn set_strict(&self, strict: bool);

    // -- global ----------------------------------------------------------

    /// Create the root/global object with the given class and install the
    /// standard library on it. Called exactly once per context.
    fn init_global(&self, spec: ClassSpec) -> Result<JsObject, Error>;

    fn global(&self) -> JsObject;

    // -- scripts ---------------------------------------------------------

    fn evaluate(&self, source: &JsString, origin: &ScriptOrigin) -> Result<JsVal, Error>;

    /// Compile without running; the result is a script object value that
    /// any sibling context (same runtime) can execute.
    fn compile(&self, source: &JsString, origin: &ScriptOrigin) -> Result<JsVal, Error>;

    fn execute_script(&self, script: &JsVal) -> Result<JsVal, Error>;

    // -- classes and objects ---------------------------------------------

    fn define_class(&self, spec: ClassSpec) -> Result<ClassId, Error>;

    fn class_of(&self, obj: &JsObject) -> Option<ClassId>;

    fn new_object(&self, class: ClassId) -> Result<JsObject, Error>;

    fn new_plain_object(&self) -> Result<JsObject, Error>;

    fn set_private(&self, obj: &JsObject, data: PrivateData) -> Result<(), Error>;

    fn private(&self, obj: &JsObject) -> Option<PrivateData>;

    // -- properties ------------------------------------------------------

    fn get_property(&self, obj: &JsObject, key: &JsVal) -> Result<JsVal, Error>;

    fn set_property(&self, obj: &JsObject, key: &JsVal, value: &JsVal) -> Result<(), Error>;

    fn delete_property(&self, obj: &JsObject, key: &JsVal) -> Result<bool, Error>;

    /// Own enumerable keys, in insertion order.
    fn enumerate(&self, obj: &JsObject) -> Result<Vec<JsVal>, Error>;

    /// Define an own property directly, bypassing class traps.
    fn define_property(&self, obj: &JsObject, key: &JsVal, value: &JsVal) -> Result<(), Error>;

    /// Read an own property directly, bypassing class traps.
    fn get_own_property(&self, obj: &JsObject, key: &JsVal) -> Result<Option<JsVal>, Error>;

    /// Delete an own property directly, bypassing class traps.
    fn delete_own_property(&self, obj: &JsObject, key: &JsVal) -> Result<bool, Error>;

    // -- garbage collection ----------------------------------------------

    /// Register `val` as a GC root. `note` names the owner for heap
    /// diagnostics.
    fn add_root(&self, val: &JsVal, note: &'static str) -> Result<RootId, Error>;

    fn remove_root(&self, root: RootId);

    fn heap_bytes(&self) -> usize;

    fn gc(&self);

    fn maybe_gc(&self);

    // -- hooks -----------------------------------------------------------

    fn set_interrupt_handler(&self, handler: Option<InterruptHandler>);

    fn set_error_reporter(&self, reporter: Option<ErrorReporter>);
}

/// RAII request bracket. The engine's per-context invariants require that
/// every entry is paired with an exit on all paths, including errors.
pub struct Request<'cx> {
    cx: &'cx dyn EngineContext,
}

impl<'cx> Request<'cx> {
    pub fn begin(cx: &'cx dyn EngineContext) -> Self {
        cx.begin_request();
        Request { cx }
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        self.cx.end_request();
    }
}
