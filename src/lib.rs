//! Object-proxy bridge for embedding a JavaScript-style guest engine in
//! a host application.
//!
//! Two memory managers have to cooperate here: the host's objects are
//! reference counted, the guest's are mark/sweep collected. The bridge
//! makes host objects first-class inside the guest (property access,
//! calls, construction, and iteration are trapped and forwarded through
//! the host's duck-typed protocols) and guest values first-class on the
//! host side, without either side leaking or double-freeing. Cross-bridge
//! access runs through an optional allow/deny policy, and runaway scripts
//! are bounded by cooperative heap and time quotas.
//!
//! The guest engine itself is an external collaborator, consumed through
//! the traits in [`engine`]; [`engine::mock`] is a deterministic
//! implementation for tests.
//!
//! # Example
//!
//! ```
//! use hostbridge::engine::mock::MockRuntime;
//! use hostbridge::{Context, ContextConfig, HostValue, Runtime};
//!
//! let runtime = Runtime::new(MockRuntime::new());
//! let context = Context::new(&runtime, ContextConfig::default()).unwrap();
//!
//! let result = context.execute("42").unwrap();
//! assert_eq!(result, HostValue::Int(42));
//! ```

pub mod engine;
pub mod error;
pub mod governor;
pub mod host;
pub mod marshal;
pub mod policy;

mod context;
mod iter;
mod object;
mod proxy;

#[cfg(test)]
mod testutil;

pub use context::{CompiledScript, Context, ContextConfig, GlobalHook, Runtime};
pub use error::{Error, ResourceKind};
pub use host::{HostIterator, HostObject, HostOpError, HostRef, HostValue};
pub use iter::IterStyle;
pub use object::ScriptObject;
pub use policy::AccessPolicy;
pub use proxy::{FOR_EACH_ITERATOR_KEY, ITERATOR_KEY};
