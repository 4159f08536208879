//! Configuration loading for dropwatch.
//!
//! Endpoints are declared in TOML or JSON and converted into validated
//! [`dropwatch_core::EndpointDescriptor`]s. Handler, post-processor and extra
//! filter choices are tagged enums naming built-ins; the binary resolves them.

pub mod models;

pub use models::{
    CONFIG_JSON_ENV, CONFIG_PATH_ENV, ConfigFormat, ConfigSource, EndpointConfig, FilterConfig,
    HandlerConfig, IngestConfig, PostProcessorConfig,
};
