//! HLS playlist access: variant selection and segment listing

use async_trait::async_trait;
use m3u8_rs::Playlist;
use std::collections::HashMap;
use url::Url;

use super::to_header_map;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::VideoSegment;

/// Playlist operations the video pipeline needs
#[async_trait]
pub trait HlsClient: Send + Sync {
    /// Pick the highest-bandwidth variant of a master playlist.
    ///
    /// A media playlist URL is returned unchanged.
    async fn resolve_best_variant(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String>;

    /// Fetch a media playlist and return its segments in playback order
    async fn fetch_segments(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<VideoSegment>>;
}

/// [`HlsClient`] backed by `reqwest` and the `m3u8-rs` parser
#[derive(Clone)]
pub struct M3u8HlsClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl M3u8HlsClient {
    /// Create a client that fetches playlists with `client`
    pub fn new(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    async fn fetch_playlist(&self, url: &Url, headers: &HashMap<String, String>) -> Result<Playlist> {
        let client = &self.client;
        let header_map = &to_header_map(headers);
        let body = with_retry(&self.retry, || async move {
            let response = client
                .get(url.clone())
                .headers(header_map.clone())
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, Error>(response.bytes().await?)
        })
        .await?;

        m3u8_rs::parse_playlist_res(&body)
            .map_err(|e| Error::Playlist(format!("failed to parse playlist {url}: {e}")))
    }
}

#[async_trait]
impl HlsClient for M3u8HlsClient {
    async fn resolve_best_variant(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String> {
        let base = parse_url(url)?;
        match self.fetch_playlist(&base, headers).await? {
            Playlist::MediaPlaylist(_) => Ok(url.to_string()),
            Playlist::MasterPlaylist(master) => {
                let best = master
                    .variants
                    .iter()
                    .filter(|v| !v.is_i_frame)
                    .max_by_key(|v| v.bandwidth)
                    .ok_or_else(|| Error::Playlist(format!("master playlist {url} has no variants")))?;
                let resolved = base.join(&best.uri).map_err(|e| {
                    Error::Playlist(format!("invalid variant URI {:?}: {e}", best.uri))
                })?;
                tracing::debug!(
                    master = %url,
                    variant = %resolved,
                    bandwidth = best.bandwidth,
                    "selected HLS variant"
                );
                Ok(resolved.to_string())
            }
        }
    }

    async fn fetch_segments(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Vec<VideoSegment>> {
        let base = parse_url(url)?;
        let media = match self.fetch_playlist(&base, headers).await? {
            Playlist::MediaPlaylist(media) => media,
            Playlist::MasterPlaylist(_) => {
                return Err(Error::Playlist(format!(
                    "expected a media playlist at {url}, got a master playlist"
                )));
            }
        };

        media
            .segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let segment_url = base.join(&segment.uri).map_err(|e| {
                    Error::Playlist(format!("invalid segment URI {:?}: {e}", segment.uri))
                })?;
                Ok(VideoSegment {
                    index,
                    url: segment_url.to_string(),
                })
            })
            .collect()
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::Playlist(format!("invalid playlist URL {url:?}: {e}")))
}
