//! Error types for the bridge.
//!
//! Every failure that can cross the bridge is represented here. The one
//! deliberate oddity is [`Error::StopIteration`]: it is a control-flow
//! signal, not a real error. Loop-driving code inside the guest engine must
//! recognize it (via [`Error::is_stop_iteration`]) and terminate the loop
//! cleanly instead of surfacing it to the caller.

use thiserror::Error;

/// Which resource quota was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Guest heap bytes stayed over the ceiling after a forced collection.
    Heap,
    /// Wall-clock execution time exceeded the ceiling.
    Time,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Heap => write!(f, "heap"),
            ResourceKind::Time => write!(f, "time"),
        }
    }
}

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// Scalar marshaling failure: unsupported type, integer out of range,
    /// invalid string encoding.
    #[error("ConversionError: {message}")]
    Conversion { message: String },

    /// The access policy denied an operation, or the predicate itself failed.
    #[error("AccessDeniedError: access to '{key}' prohibited{}", format_detail(.detail))]
    AccessDenied {
        key: String,
        detail: Option<String>,
    },

    /// A property operation failed on both the item-style and the
    /// attribute-style path.
    #[error("PropertyError: {message}")]
    Property { message: String },

    /// Call target was not callable, or the host callable raised.
    #[error("CallError: {message}")]
    Call { message: String },

    /// Construct target was not a type, or the host constructor raised.
    #[error("ConstructError: {message}")]
    Construct { message: String },

    /// A resource quota was exceeded and the running script was aborted.
    #[error("ResourceExhaustedError: {kind} quota exceeded")]
    ResourceExhausted { kind: ResourceKind },

    /// Guest engine failed to compile a script.
    #[error("CompileError: {message} ({filename}:{line})")]
    Compile {
        message: String,
        filename: String,
        line: u32,
    },

    /// Guest engine evaluation failed with no more specific error.
    #[error("ScriptError: {message}")]
    Script { message: String },

    /// Iteration-exhausted signal. Not a failure; see module docs.
    #[error("StopIteration")]
    StopIteration,

    /// A trap fired after its owning context was torn down.
    #[error("execution context has been destroyed")]
    ContextDestroyed,

    /// Engine-internal failure (slot access, root bookkeeping, etc.).
    #[error("EngineError: {message}")]
    Engine { message: String },
}

fn format_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl Error {
    pub fn conversion(message: impl Into<String>) -> Self {
        Error::Conversion {
            message: message.into(),
        }
    }

    pub fn access_denied(key: impl Into<String>) -> Self {
        Error::AccessDenied {
            key: key.into(),
            detail: None,
        }
    }

    /// Denial caused by a fault inside the policy predicate itself.
    pub fn access_fault(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::AccessDenied {
            key: key.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn property(message: impl Into<String>) -> Self {
        Error::Property {
            message: message.into(),
        }
    }

    pub fn call(message: impl Into<String>) -> Self {
        Error::Call {
            message: message.into(),
        }
    }

    pub fn construct(message: impl Into<String>) -> Self {
        Error::Construct {
            message: message.into(),
        }
    }

    pub fn heap_exhausted() -> Self {
        Error::ResourceExhausted {
            kind: ResourceKind::Heap,
        }
    }

    pub fn time_exhausted() -> Self {
        Error::ResourceExhausted {
            kind: ResourceKind::Time,
        }
    }

    pub fn compile(message: impl Into<String>, filename: impl Into<String>, line: u32) -> Self {
        Error::Compile {
            message: message.into(),
            filename: filename.into(),
            line,
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        Error::Script {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Error::Engine {
            message: message.into(),
        }
    }

    /// True for the iteration-exhausted control signal.
    pub fn is_stop_iteration(&self) -> bool {
        matches!(self, Error::StopIteration)
    }

    /// True for quota aborts.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Error::ResourceExhausted { .. })
    }
}
