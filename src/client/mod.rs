//! Store client capability
//!
//! The collector only needs two calls from the document store; everything
//! about URLs, credentials and TLS lives behind this trait.

pub mod opensearch;

use crate::error::CollectResult;
use async_trait::async_trait;
use serde_json::Value;

pub use opensearch::OpenSearchClient;

#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Run a search request against `index`, returning the raw response body
    async fn search(&self, index: &str, body: &Value) -> CollectResult<Value>;

    /// Raw `GET /<index>/_mapping` response
    async fn field_mapping(&self, index: &str) -> CollectResult<Value>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}
