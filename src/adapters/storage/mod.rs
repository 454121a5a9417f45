//! Build status persistence.

pub mod json_build_store;

pub use json_build_store::JsonBuildStore;
