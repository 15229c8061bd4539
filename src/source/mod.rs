//! Seams to the scraping side of the application
//!
//! The download engine never scrapes anything itself. Page lists, per-page request
//! shapes, image interceptors and stream URLs come from [`Source`] implementations that
//! the host application injects through a [`SourceRegistry`]. Video playlists are
//! handled by an [`HlsClient`](hls::HlsClient).

pub mod hls;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Download, NetworkPage, Page};

/// A content source (scraping module) able to list the pages of a chapter
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use media_dl::source::Source;
/// use media_dl::types::{Download, Page};
///
/// struct StaticSource;
///
/// #[async_trait]
/// impl Source for StaticSource {
///     async fn page_list(&self, _download: &Download) -> media_dl::Result<Vec<Page>> {
///         Ok(vec![Page::remote("https://cdn.example.com/1.png")])
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetch the ordered page list of a chapter
    async fn page_list(&self, download: &Download) -> Result<Vec<Page>>;

    /// Build the HTTP request for one network page.
    ///
    /// The default issues a plain GET and forwards the page's context entries as headers.
    fn page_request(&self, client: &reqwest::Client, page: &NetworkPage) -> reqwest::RequestBuilder {
        client.get(&page.url).headers(to_header_map(&page.context))
    }

    /// Image transform applied to every fetched page, if this source declares one
    fn interceptor(&self) -> Option<Arc<dyn PageInterceptor>> {
        None
    }
}

/// Post-download image transform (watermark removal, re-encoding, descrambling)
///
/// Runs on a blocking thread; implementations may be CPU heavy.
pub trait PageInterceptor: Send + Sync {
    /// Transform a decoded page image
    fn process(&self, image: image::DynamicImage) -> Result<image::DynamicImage>;
}

/// Looks up sources by key
pub trait SourceRegistry: Send + Sync {
    /// The source registered under `key`, or `None` if it is not installed
    fn source(&self, key: &str) -> Option<Arc<dyn Source>>;
}

impl SourceRegistry for HashMap<String, Arc<dyn Source>> {
    fn source(&self, key: &str) -> Option<Arc<dyn Source>> {
        self.get(key).cloned()
    }
}

/// Playable stream details produced by a [`StreamResolver`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedStream {
    /// Absolute playlist URL; empty when the module produced nothing
    pub url: String,
    /// Headers the stream host expects
    pub headers: HashMap<String, String>,
    /// Subtitle file URL, if the module found one
    pub subtitle_url: Option<String>,
}

/// Turns an opaque episode identifier into a playable stream
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Resolve the stream for a video download whose URL is not directly playable
    async fn resolve_stream(&self, download: &Download) -> Result<ResolvedStream>;
}

/// Resolver for hosts that only ever enqueue direct http(s) stream URLs
///
/// Every call fails with [`Error::NotSupported`].
pub struct NoOpStreamResolver;

#[async_trait]
impl StreamResolver for NoOpStreamResolver {
    async fn resolve_stream(&self, download: &Download) -> Result<ResolvedStream> {
        Err(Error::NotSupported(format!(
            "no stream resolver configured for {}",
            download.id
        )))
    }
}

/// Add browser-like defaults to a stream header set.
///
/// `User-Agent`, `Accept`, `Accept-Language` and `Referer` are only added when the set
/// has no entry with that name (compared case-insensitively).
pub fn decorate_headers(headers: &mut HashMap<String, String>, user_agent: &str, referer: &str) {
    let defaults = [
        ("User-Agent", user_agent),
        ("Accept", "*/*"),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Referer", referer),
    ];
    for (name, value) in defaults {
        if value.is_empty() || headers.keys().any(|k| k.eq_ignore_ascii_case(name)) {
            continue;
        }
        headers.insert(name.to_string(), value.to_string());
    }
}

/// Convert a loose header map, skipping entries that are not valid HTTP headers
pub fn to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "skipping invalid request header"),
        }
    }
    map
}
