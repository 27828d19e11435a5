//! Typed - the typed task API.
//!
//! - **Typed surface**: `Task` and `Handler<T>`: a handler only ever sees
//!   its own payload type.
//! - **Dyn layer**: `DynHandler`, the object-safe form stored in the
//!   `TaskRegistry` and driven by the scheduler with raw JSON payloads.

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, PayloadCodec, SCHEMA_VERSION, TaskBody};
pub use self::handler::{DynHandler, Handler, RunContext, TaskFailure, TypedHandler};
pub use self::registry::{RegistryError, TaskRegistry, TaskTypeInfo};
pub use self::task::Task;
