//! Outbound request pipelines for the connection recycler.
//!
//! An [`HttpPipeline`] owns its own HTTP client and therefore its own pool
//! of underlying connections. Replacing the pipeline is how the recycler
//! gets fresh connections without touching requests already in flight on
//! the old one.

use std::time::Duration;

use rollsync_pacing::PipelineFactory;
use rollsync_protocol::{Codec, JsonCodec, RpcRequest, decode_response};
use rollsync_transport::{HttpTransport, TransportError};
use serde_json::Value;

use crate::ClientError;
use crate::multiplexer::next_request_id;

/// Carried over from one pipeline generation to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineContext {
    /// Free-form tag for logs, e.g. the sender's name.
    pub label: String,
}

/// One generation of the outbound path.
#[derive(Debug)]
pub struct HttpPipeline {
    id: u64,
    http: HttpTransport,
    codec: JsonCodec,
    context: PipelineContext,
}

impl HttpPipeline {
    /// Random per-generation id, for telling pipelines apart in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn url(&self) -> &str {
        self.http.url()
    }

    /// Posts one JSON-RPC request and returns its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let request = RpcRequest::new(next_request_id(), method, params);
        let body = self.http.post(self.codec.encode(&request)?).await?;
        tracing::trace!(pipeline = self.id, %method, label = %self.context.label, "pipeline call");
        Ok(decode_response(&body)?.outcome?)
    }
}

/// Builds [`HttpPipeline`]s for one unary endpoint.
#[derive(Debug, Clone)]
pub struct HttpPipelineFactory {
    url: String,
    timeout: Duration,
    context: PipelineContext,
}

impl HttpPipelineFactory {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            context: PipelineContext::default(),
        }
    }

    pub fn with_context(mut self, context: PipelineContext) -> Self {
        self.context = context;
        self
    }

    fn build_now(&self) -> Result<HttpPipeline, TransportError> {
        let pipeline = HttpPipeline {
            id: rand::random(),
            http: HttpTransport::with_timeout(self.url.clone(), self.timeout)?,
            codec: JsonCodec,
            context: self.context.clone(),
        };
        tracing::debug!(pipeline = pipeline.id, url = %self.url, "pipeline built");
        Ok(pipeline)
    }
}

impl PipelineFactory for HttpPipelineFactory {
    type Pipeline = HttpPipeline;
    type Error = TransportError;

    fn build(&self) -> impl Future<Output = Result<HttpPipeline, TransportError>> + Send {
        std::future::ready(self.build_now())
    }
}
