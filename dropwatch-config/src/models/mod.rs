pub mod endpoint;
pub mod ingest;

pub use endpoint::{EndpointConfig, FilterConfig, HandlerConfig, PostProcessorConfig};
pub use ingest::{CONFIG_JSON_ENV, CONFIG_PATH_ENV, ConfigFormat, ConfigSource, IngestConfig};
