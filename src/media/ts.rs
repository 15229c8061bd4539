//! Minimal MPEG transport stream probe
//!
//! Reads the PAT and PMT tables of a `.ts` file to list its elementary streams. This is
//! just enough to tell a real merge apart from concatenated error pages.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Transport stream packet size in bytes
pub const PACKET_SIZE: usize = 188;

const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;
const PAT_TABLE_ID: u8 = 0x00;
const PMT_TABLE_ID: u8 = 0x02;
const CRC_LEN: usize = 4;

/// Bytes read from the head of a file when probing
const PROBE_LIMIT: u64 = 4 * 1024 * 1024;

/// Broad category of an elementary stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    /// H.264, HEVC, MPEG-2 video
    Video,
    /// AAC, MPEG audio, AC-3
    Audio,
    /// Anything else (metadata, private data)
    Other,
}

/// One elementary stream declared by a PMT
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementaryStream {
    /// Packet identifier carrying the stream
    pub pid: u16,
    /// ISO/IEC 13818-1 stream type
    pub stream_type: u8,
}

impl ElementaryStream {
    /// Category derived from the stream type
    pub fn kind(&self) -> StreamKind {
        match self.stream_type {
            0x01 | 0x02 | 0x10 | 0x1B | 0x24 => StreamKind::Video,
            0x03 | 0x04 | 0x0F | 0x11 | 0x81 | 0x87 => StreamKind::Audio,
            _ => StreamKind::Other,
        }
    }
}

/// What the probe found
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TsProbe {
    /// Number of sync-aligned packets inspected
    pub packets: usize,
    /// Program map PIDs announced by the PAT
    pub programs: usize,
    /// Elementary streams, ordered by PID
    pub streams: Vec<ElementaryStream>,
}

impl TsProbe {
    /// Whether at least one track was found
    pub fn has_tracks(&self) -> bool {
        !self.streams.is_empty()
    }
}

/// Probe an in-memory transport stream
pub fn probe(data: &[u8]) -> TsProbe {
    let mut pmt_pids = HashSet::new();
    let mut streams = BTreeMap::new();
    let mut packets = 0;
    let mut offset = 0;

    while offset + PACKET_SIZE <= data.len() {
        if data[offset] != SYNC_BYTE {
            offset += 1;
            continue;
        }
        let packet = &data[offset..offset + PACKET_SIZE];
        offset += PACKET_SIZE;
        packets += 1;

        let payload_unit_start = packet[1] & 0x40 != 0;
        if !payload_unit_start {
            continue;
        }
        let pid = (u16::from(packet[1] & 0x1f) << 8) | u16::from(packet[2]);
        let Some(section) = section_payload(packet) else {
            continue;
        };

        if pid == PAT_PID {
            parse_pat(section, &mut pmt_pids);
        } else if pmt_pids.contains(&pid) {
            parse_pmt(section, &mut streams);
        }
    }

    TsProbe {
        packets,
        programs: pmt_pids.len(),
        streams: streams
            .into_iter()
            .map(|(pid, stream_type)| ElementaryStream { pid, stream_type })
            .collect(),
    }
}

/// Probe the head of a file and require at least one elementary stream
pub async fn verify_file(path: &Path) -> Result<TsProbe> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::new();
    file.take(PROBE_LIMIT).read_to_end(&mut head).await?;

    let result = probe(&head);
    if !result.has_tracks() {
        return Err(Error::Other(format!(
            "{} contains no media tracks ({} packets inspected)",
            path.display(),
            result.packets
        )));
    }
    Ok(result)
}

/// PSI section bytes following the pointer field, if the packet carries a payload
fn section_payload(packet: &[u8]) -> Option<&[u8]> {
    let adaptation_field_control = (packet[3] >> 4) & 0x03;
    let start = match adaptation_field_control {
        0b01 => 4,
        0b11 => 5 + usize::from(*packet.get(4)?),
        _ => return None,
    };
    let pointer = usize::from(*packet.get(start)?);
    packet.get(start + 1 + pointer..)
}

fn section_end(section: &[u8]) -> usize {
    let section_length = (usize::from(section[1] & 0x0f) << 8) | usize::from(section[2]);
    (3 + section_length).saturating_sub(CRC_LEN).min(section.len())
}

fn parse_pat(section: &[u8], pmt_pids: &mut HashSet<u16>) {
    if section.len() < 8 || section[0] != PAT_TABLE_ID {
        return;
    }
    let end = section_end(section);
    let mut i = 8;
    while i + 4 <= end {
        let program_number = u16::from_be_bytes([section[i], section[i + 1]]);
        let pid = (u16::from(section[i + 2] & 0x1f) << 8) | u16::from(section[i + 3]);
        // program 0 points at the network information table
        if program_number != 0 {
            pmt_pids.insert(pid);
        }
        i += 4;
    }
}

fn parse_pmt(section: &[u8], streams: &mut BTreeMap<u16, u8>) {
    if section.len() < 12 || section[0] != PMT_TABLE_ID {
        return;
    }
    let end = section_end(section);
    let program_info_length = (usize::from(section[10] & 0x0f) << 8) | usize::from(section[11]);
    let mut i = 12 + program_info_length;
    while i + 5 <= end {
        let stream_type = section[i];
        let pid = (u16::from(section[i + 1] & 0x1f) << 8) | u16::from(section[i + 2]);
        let es_info_length = (usize::from(section[i + 3] & 0x0f) << 8) | usize::from(section[i + 4]);
        streams.insert(pid, stream_type);
        i += 5 + es_info_length;
    }
}


// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::fixtures::{data_packet, program_tables};
    use super::*;

    #[test]
    fn finds_stream_declared_by_pmt() {
        let mut bytes = program_tables();
        bytes.extend(data_packet(0xAA));

        let result = probe(&bytes);

        assert_eq!(result.packets, 3);
        assert_eq!(result.programs, 1);
        assert_eq!(
            result.streams,
            vec![ElementaryStream {
                pid: 0x101,
                stream_type: 0x1B
            }]
        );
        assert_eq!(result.streams[0].kind(), StreamKind::Video);
    }

    #[test]
    fn pmt_before_pat_is_ignored() {
        let tables = program_tables();
        let mut bytes = tables[PACKET_SIZE..].to_vec();
        bytes.extend_from_slice(&tables[..PACKET_SIZE]);

        assert!(!probe(&bytes).has_tracks());
    }

    #[test]
    fn garbage_has_no_tracks() {
        let html = b"<html><body>403 Forbidden</body></html>".repeat(20);
        let result = probe(&html);
        assert_eq!(result.packets, 0);
        assert!(!result.has_tracks());
    }

    #[test]
    fn resyncs_after_leading_junk() {
        let mut bytes = vec![0x00, 0x13, 0x37];
        bytes.extend(program_tables());

        assert!(probe(&bytes).has_tracks());
    }

    #[test]
    fn truncated_packet_is_not_read() {
        let tables = program_tables();
        assert!(!probe(&tables[..PACKET_SIZE + 20]).has_tracks());
    }

    #[tokio::test]
    async fn verify_file_rejects_trackless_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.ts");
        let bad = dir.path().join("bad.ts");
        let mut bytes = program_tables();
        bytes.extend(data_packet(1));
        std::fs::write(&good, &bytes).unwrap();
        std::fs::write(&bad, data_packet(1).repeat(4)).unwrap();

        assert_eq!(verify_file(&good).await.unwrap().streams.len(), 1);
        assert!(verify_file(&bad).await.is_err());
        assert!(matches!(
            verify_file(&dir.path().join("missing.ts")).await,
            Err(Error::Io(_))
        ));
    }
}
