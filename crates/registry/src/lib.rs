//! `conveyor-registry` — static task/workflow definitions and the handler
//! contract the runner dispatches through.

pub mod definition;
pub mod handler;
pub mod registry;

pub use definition::{TaskDefinition, WorkflowDefinition, WorkflowStep};
pub use handler::{TaskContext, TaskError, TaskHandler, handler_fn, typed_handler};
pub use registry::{Registry, RegistryBuilder, RegistryError};
