//! Sources, resolvers, exporters and media bytes for integration tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use media_dl::media::VideoExporter;
use media_dl::media::ts::PACKET_SIZE;
use media_dl::source::{ResolvedStream, Source, StreamResolver};
use media_dl::types::{ChapterId, ChapterInfo, Download, Page, SeriesInfo, VideoInfo};
use media_dl::{Error, Result};

use super::config::SOURCE_KEY;

/// Source returning a fixed page list
pub struct StaticSource {
    pub pages: Vec<Page>,
    pub calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(pages: Vec<Page>) -> Self {
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for StaticSource {
    async fn page_list(&self, _download: &Download) -> Result<Vec<Page>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.clone())
    }
}

/// Resolver mapping every opaque episode id to one fixed stream
pub struct FixedResolver {
    pub stream: ResolvedStream,
}

#[async_trait]
impl StreamResolver for FixedResolver {
    async fn resolve_stream(&self, _download: &Download) -> Result<ResolvedStream> {
        Ok(self.stream.clone())
    }
}

/// Exporter that leaves a truncated output behind and then fails
pub struct BrokenExporter;

#[async_trait]
impl VideoExporter for BrokenExporter {
    async fn export(&self, _input: &Path, output: &Path) -> Result<()> {
        tokio::fs::write(output, b"half a file").await?;
        Err(Error::ExternalTool("encoder crashed".to_string()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

/// Manga chapter `key` of the test series
pub fn manga_chapter(key: &str) -> Download {
    Download::manga(
        ChapterId::new(SOURCE_KEY, "series", key),
        SeriesInfo {
            title: "Series".to_string(),
            cover_url: None,
        },
        ChapterInfo {
            title: Some(format!("Chapter {key}")),
            number: key.parse().ok(),
            volume: None,
        },
    )
}

/// Video episode `key` of the test show streaming from `stream_url`
pub fn video_episode(key: &str, stream_url: &str) -> Download {
    Download::video(
        ChapterId::new(SOURCE_KEY, "show", key),
        SeriesInfo {
            title: "Show".to_string(),
            cover_url: None,
        },
        ChapterInfo {
            title: Some(format!("Episode {key}")),
            number: key.parse().ok(),
            volume: Some(1.0),
        },
        VideoInfo {
            stream_url: stream_url.to_string(),
            source_name: Some("Test Source".to_string()),
            ..Default::default()
        },
    )
}

const PAT: [u8; 16] = [
    0x00, 0xB0, 13, 0x00, 0x01, 0xC1, 0x00, 0x00, // header
    0x00, 0x01, 0xE1, 0x00, // program 1 -> PMT pid 0x100
    0x00, 0x00, 0x00, 0x00, // crc (unchecked)
];

const PMT: [u8; 21] = [
    0x02, 0xB0, 18, 0x00, 0x01, 0xC1, 0x00, 0x00, // header
    0xE1, 0x01, 0xF0, 0x00, // PCR pid 0x101
    0x0F, 0xE1, 0x01, 0xF0, 0x00, // AAC on pid 0x101
    0x00, 0x00, 0x00, 0x00, // crc (unchecked)
];

fn psi_packet(pid: u16, section: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x47, 0x40 | (pid >> 8) as u8, (pid & 0xff) as u8, 0x10, 0x00];
    packet.extend_from_slice(section);
    packet.resize(PACKET_SIZE, 0xFF);
    packet
}

/// Bytes of segment `index`: the first one carries the program tables, every segment
/// carries one packet filled with its own index so merge order is visible
pub fn segment_bytes(index: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    if index == 0 {
        bytes.extend(psi_packet(0x0000, &PAT));
        bytes.extend(psi_packet(0x0100, &PMT));
    }
    let mut packet = vec![0x47, 0x01, 0x01, 0x10];
    packet.resize(PACKET_SIZE, index as u8);
    bytes.extend(packet);
    bytes
}

/// Expected merge of segments `0..count`
pub fn merged_bytes(count: usize) -> Vec<u8> {
    (0..count).flat_map(segment_bytes).collect()
}

/// Media playlist listing `count` relative segment URLs
pub fn media_playlist(count: usize) -> String {
    let mut playlist = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for i in 0..count {
        playlist.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Bytes recognized as PNG by magic number
pub fn png_stub(marker: u8) -> Vec<u8> {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.push(marker);
    bytes
}
