//! Hook system — hook definitions, the priority-ordered table, and dispatch.

pub mod definitions;
pub mod dispatcher;
pub mod registry;

pub use definitions::{Hook, HookCallback, HookValue, downcast_arg, downcast_value, hook_value};
pub use registry::HookTable;
