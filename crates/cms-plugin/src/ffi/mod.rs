//! FFI surface for dynamic plugin modules.

pub mod abi;

pub use abi::{API_VERSION_SYMBOL, CREATE_SYMBOL, PLUGIN_API_VERSION};
