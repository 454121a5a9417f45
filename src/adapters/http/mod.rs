//! HTTP surface.

pub mod build_http;

pub use build_http::{BuildHttpConfig, BuildHttpServer};
