use std::sync::Arc;

use anyhow::Context;
use dropwatch_config::{EndpointConfig, FilterConfig, HandlerConfig, IngestConfig, PostProcessorConfig};
use dropwatch_core::{
    EndpointDescriptor, ExcludeSegmentsFilter, FileHandler, FileProcessor, IngestHost,
    PipelineEventBus,
};

use crate::handlers::{AcceptHandler, CommandHandler, LogPostProcessor};

/// Build one processor from its configuration entry and validated descriptor.
pub fn build_processor(
    config: &EndpointConfig,
    descriptor: EndpointDescriptor,
    events: &PipelineEventBus,
) -> FileProcessor {
    let handler: Arc<dyn FileHandler> = match &config.handler {
        HandlerConfig::Command { program, args } => {
            Arc::new(CommandHandler::new(program, args.iter()))
        }
        HandlerConfig::Accept => Arc::new(AcceptHandler),
    };

    let drop_root = descriptor.drop_path.clone();
    let mut processor = FileProcessor::new(descriptor, handler).with_event_bus(events.clone());

    if let Some(PostProcessorConfig::Log) = &config.post_processor {
        processor = processor.with_post_processor(Arc::new(LogPostProcessor::new(&config.name)));
    }

    if let Some(FilterConfig::ExcludeSegments {
        segments,
        case_insensitive,
    }) = &config.additional_filter
    {
        processor = processor.with_filter(Arc::new(
            ExcludeSegmentsFilter::new(segments.iter().map(String::as_str), *case_insensitive)
                .below(drop_root),
        ));
    }

    processor
}

/// Build a host with one processor per configured endpoint, sharing one event bus.
pub fn build_host(config: &IngestConfig, events: &PipelineEventBus) -> anyhow::Result<IngestHost> {
    let descriptors = config.descriptors()?;
    let processors = config
        .endpoints
        .iter()
        .zip(descriptors)
        .map(|(endpoint, descriptor)| build_processor(endpoint, descriptor, events))
        .collect();
    IngestHost::new(processors).context("failed to assemble ingestion host")
}
