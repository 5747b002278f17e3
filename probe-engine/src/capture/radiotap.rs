use crate::capture::{CapturedFrame, FrameKind};
use thiserror::Error;

const PRESENT_TSFT: u32 = 1 << 0;
const PRESENT_FLAGS: u32 = 1 << 1;
const PRESENT_RATE: u32 = 1 << 2;
const PRESENT_CHANNEL: u32 = 1 << 3;
const PRESENT_FHSS: u32 = 1 << 4;
const PRESENT_DBM_ANTSIGNAL: u32 = 1 << 5;
const PRESENT_EXT: u32 = 1 << 31;

/// Fields preceding the antenna signal, as (present bit, alignment, size)
const LEADING_FIELDS: [(u32, usize, usize); 5] = [
    (PRESENT_TSFT, 8, 8),
    (PRESENT_FLAGS, 1, 1),
    (PRESENT_RATE, 1, 1),
    (PRESENT_CHANNEL, 2, 4),
    (PRESENT_FHSS, 1, 2),
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RadiotapError {
    #[error("radiotap header truncated ({0} bytes available)")]
    Truncated(usize),
    #[error("unsupported radiotap version {0}")]
    UnsupportedVersion(u8),
    #[error("radiotap header claims {header_len} bytes but the packet only has {packet_len}")]
    BadHeaderLength { header_len: usize, packet_len: usize },
}

/// Parses a radiotap-encapsulated 802.11 frame
///
/// `wire_len` is the on-air length of the packet (which may exceed `data` when the capture
/// was truncated by the snapshot length).
pub fn parse_frame(data: &[u8], wire_len: u32) -> Result<CapturedFrame, RadiotapError> {
    if data.len() < 8 {
        return Err(RadiotapError::Truncated(data.len()));
    }

    let version = data[0];
    if version != 0 {
        return Err(RadiotapError::UnsupportedVersion(version));
    }

    let header_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if header_len < 8 || header_len > data.len() {
        return Err(RadiotapError::BadHeaderLength {
            header_len,
            packet_len: data.len(),
        });
    }

    let header = &data[..header_len];
    let present = read_u32(header, 4).ok_or(RadiotapError::Truncated(header_len))?;

    // Skip any extended presence bitmaps, fields start right after the last one
    let mut offset = 8;
    let mut word = present;
    while word & PRESENT_EXT != 0 {
        word = read_u32(header, offset).ok_or(RadiotapError::Truncated(header_len))?;
        offset += 4;
    }

    let rssi_dbm = antenna_signal(header, present, offset)?;

    let frame = &data[header_len..];
    if frame.len() < 2 {
        return Err(RadiotapError::Truncated(data.len()));
    }

    let frame_control = u16::from_le_bytes([frame[0], frame[1]]);
    Ok(CapturedFrame {
        kind: FrameKind::from_frame_control(frame_control),
        rssi_dbm,
        length: wire_len.saturating_sub(header_len as u32),
    })
}

fn antenna_signal(header: &[u8], present: u32, mut offset: usize) -> Result<i8, RadiotapError> {
    if present & PRESENT_DBM_ANTSIGNAL == 0 {
        return Ok(0);
    }

    for (bit, align, size) in LEADING_FIELDS {
        if present & bit != 0 {
            offset = offset.next_multiple_of(align) + size;
        }
    }

    header
        .get(offset)
        .map(|&b| b as i8)
        .ok_or(RadiotapError::Truncated(header.len()))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}
