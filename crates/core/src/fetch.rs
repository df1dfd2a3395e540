//! The HTTP collaborator seam.
//!
//! The core never talks to the network itself. A [`Fetcher`] turns a
//! service's [`HttpOptions`] into a decoded JSON payload; the reqwest-backed
//! implementation lives in `snapcache-client`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::Error;
use crate::config::HttpOptions;

/// A successfully fetched and decoded response.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPayload {
    pub status: u16,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    /// Body parsed as JSON, after any content-encoding was undone.
    pub body: Value,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request described by `options`.
    ///
    /// # Errors
    ///
    /// `Http` for statuses outside 2xx/3xx, `Transport` when no response
    /// arrived, `Decode` when the body is not JSON.
    async fn fetch(&self, options: &HttpOptions) -> Result<FetchedPayload, Error>;
}
