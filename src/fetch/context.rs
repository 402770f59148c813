//! Injected configuration for the fetch pipeline.
//!
//! Every fetch runs against an explicit [`FetchContext`]. The process-wide
//! default is only consulted by the public entry points.

use crate::http::blob::BlobRegistry;
use crate::transport::dispatcher::Dispatcher;
use crate::transport::hyperdispatcher::HyperDispatcher;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = concat!("fetchnet/", env!("CARGO_PKG_VERSION"));

/// Queue size at which the response body stops accepting transport data.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FetchContextConfig {
    /// Sent when the request sets no `User-Agent`.
    pub user_agent: String,
    /// Origin of the environment: request origin, `about:client` referrer.
    pub global_origin: Option<Url>,
    pub high_water_mark: usize,
    pub max_redirects: u32,
}

impl Default for FetchContextConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            global_origin: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_redirects: crate::fetch::request::MAX_REDIRECTS,
        }
    }
}

#[derive(Clone)]
pub struct FetchContext {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub blobs: Arc<BlobRegistry>,
    pub config: FetchContextConfig,
}

impl fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContext")
            .field("blobs", &self.blobs.len())
            .field("config", &self.config)
            .finish()
    }
}

static SHARED: Lazy<FetchContext> =
    Lazy::new(|| FetchContext::new(Arc::new(HyperDispatcher::new())));

impl FetchContext {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            blobs: Arc::new(BlobRegistry::new()),
            config: FetchContextConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FetchContextConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_blobs(mut self, blobs: Arc<BlobRegistry>) -> Self {
        self.blobs = blobs;
        self
    }

    /// The process-wide default, backed by [`HyperDispatcher`].
    pub fn shared_default() -> &'static FetchContext {
        &SHARED
    }
}
