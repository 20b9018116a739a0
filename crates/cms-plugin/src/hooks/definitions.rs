//! Hook and hook-value definitions.
//!
//! Hook-point names are free-form strings agreed between host call sites and
//! plugin authors. Callbacks take the dispatch arguments as a slice of
//! type-erased values and return at most one value.

use std::any::Any;
use std::sync::Arc;

/// A type-erased argument or result passed through a hook point.
///
/// Host call sites pass shared handles (router, storage, cache, config);
/// callbacks recover the concrete type with [`downcast_arg`].
pub type HookValue = Arc<dyn Any + Send + Sync>;

/// Hook callback: variadic in, single value out. `None` means "no value".
pub type HookCallback = Arc<dyn Fn(&[HookValue]) -> Option<HookValue> + Send + Sync>;

/// Wraps a value for use as a hook argument or result.
pub fn hook_value<T: Any + Send + Sync>(value: T) -> HookValue {
    Arc::new(value)
}

/// Returns the argument at `index` if it exists and has type `T`.
pub fn downcast_arg<T: Any>(args: &[HookValue], index: usize) -> Option<&T> {
    args.get(index).and_then(|value| (**value).downcast_ref::<T>())
}

/// Downcasts a dispatch result to `T`.
pub fn downcast_value<T: Any>(value: &HookValue) -> Option<&T> {
    (**value).downcast_ref::<T>()
}

/// A prioritized callback registered at a hook point.
#[derive(Clone)]
pub struct Hook {
    /// Identifying name, used by `remove_hook`.
    pub name: String,
    /// Higher priority runs earlier.
    pub priority: i32,
    /// The callback.
    pub callback: HookCallback,
}

impl Hook {
    /// Creates a hook from a closure.
    pub fn new<F>(name: impl Into<String>, priority: i32, callback: F) -> Self
    where
        F: Fn(&[HookValue]) -> Option<HookValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            callback: Arc::new(callback),
        }
    }

    /// Invokes the callback.
    pub fn call(&self, args: &[HookValue]) -> Option<HookValue> {
        (self.callback)(args)
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("callback", &"<closure>")
            .finish()
    }
}
