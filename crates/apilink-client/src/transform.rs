//! Ordered request/response transformation around the transport call.
//!
//! Request transformers mutate the outgoing body before credential
//! injection; response transformers mutate the decoded body before it is
//! returned to the caller or written to the cache. A transformer error
//! aborts the whole request — partial transformation is never observable.

use apilink_core::{GatewayError, RequestContext};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Mutates the outgoing request body. May be asynchronous.
#[async_trait]
pub trait RequestTransform: Send + Sync {
    /// Produce the next body from the current one.
    ///
    /// `Value::Null` stands for "no body".
    async fn transform(&self, body: Value, ctx: &RequestContext) -> Result<Value, GatewayError>;
}

/// Mutates the decoded response body. May be asynchronous.
#[async_trait]
pub trait ResponseTransform: Send + Sync {
    /// Produce the next body from the current one.
    async fn transform(&self, body: Value, ctx: &RequestContext) -> Result<Value, GatewayError>;
}

/// Ordered transformer lists for one connection.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    request: Vec<Arc<dyn RequestTransform>>,
    response: Vec<Arc<dyn ResponseTransform>>,
}

impl std::fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .finish()
    }
}

impl TransformPipeline {
    /// Create a pipeline from ordered transformer lists.
    #[must_use]
    pub fn new(
        request: Vec<Arc<dyn RequestTransform>>,
        response: Vec<Arc<dyn ResponseTransform>>,
    ) -> Self {
        Self { request, response }
    }

    /// Append a request transformer.
    #[must_use]
    pub fn with_request(mut self, transform: Arc<dyn RequestTransform>) -> Self {
        self.request.push(transform);
        self
    }

    /// Append a response transformer.
    #[must_use]
    pub fn with_response(mut self, transform: Arc<dyn ResponseTransform>) -> Self {
        self.response.push(transform);
        self
    }

    /// Whether no transformers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }

    /// Run the request transformers, in order, over `ctx.body`.
    ///
    /// # Errors
    /// The first transformer error aborts the pipeline.
    pub async fn apply_request(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        if self.request.is_empty() {
            return Ok(());
        }
        let mut body = ctx.body.take().unwrap_or(Value::Null);
        for transform in &self.request {
            body = transform.transform(body, ctx).await?;
        }
        ctx.body = if body.is_null() { None } else { Some(body) };
        Ok(())
    }

    /// Run the response transformers, in order, over the decoded body.
    ///
    /// # Errors
    /// The first transformer error aborts the pipeline.
    pub async fn apply_response(
        &self,
        mut body: Value,
        ctx: &RequestContext,
    ) -> Result<Value, GatewayError> {
        for transform in &self.response {
            body = transform.transform(body, ctx).await?;
        }
        Ok(body)
    }
}
