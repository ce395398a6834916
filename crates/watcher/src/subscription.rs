//! Scoped ownership of one live native stream and its pipeline

use crate::context::ExecutionContext;
use crate::dispatch::DispatchSender;
use crate::native::{BatchHandler, NativeFacility, NativeStream, StreamRequest};
use crate::pipeline::EventPipeline;
use fsstream_core::config::StreamConfig;
use fsstream_core::error::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// A started native stream; closing (or dropping) it stops delivery
pub(crate) struct Subscription {
    stream: Option<Box<dyn NativeStream>>,
    pipeline: Arc<EventPipeline>,
}

impl Subscription {
    pub(crate) fn open(
        facility: &dyn NativeFacility,
        config: &StreamConfig,
        context: &ExecutionContext,
        outlet: DispatchSender,
        generation: u64,
    ) -> Result<Self> {
        let pipeline = Arc::new(EventPipeline::new(config, generation, outlet));
        let handler: Arc<dyn BatchHandler> = pipeline.clone();
        let request = StreamRequest::from_config(config, context.clone());

        let stream = facility.open(request, handler).map_err(|e| match e {
            Error::StreamCreation(_) => e,
            other => Error::stream_creation(other.to_string()),
        })?;

        debug!(
            "Subscription generation {} started on {}",
            generation,
            facility.name()
        );
        Ok(Self {
            stream: Some(stream),
            pipeline,
        })
    }

    pub(crate) fn flush(&self) {
        if let Some(stream) = &self.stream {
            stream.flush();
        }
    }

    /// Stop forwarding, then release the native stream. Idempotent.
    pub(crate) fn close(&mut self) {
        self.pipeline.close();
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!(
                "Subscription generation {} closed",
                self.pipeline.generation()
            );
        }
    }

    pub(crate) fn describe(&self) -> String {
        let native = match &self.stream {
            Some(stream) => stream.describe(),
            None => "closed stream".to_string(),
        };
        let exclusions = self.pipeline.exclusions();
        if exclusions.is_empty() {
            format!("{native}, generation {}", self.pipeline.generation())
        } else {
            let excluded: Vec<String> = exclusions
                .paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            format!(
                "{native}, generation {}, excluding [{}]",
                self.pipeline.generation(),
                excluded.join(", ")
            )
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
