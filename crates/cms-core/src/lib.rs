//! # cms-core
//!
//! Core crate for the CMS host. Contains the configuration schema and the
//! unified error system shared by the plugin runtime and the server binary.
//!
//! This crate has **no** internal dependencies on other CMS crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
