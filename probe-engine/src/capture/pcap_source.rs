use crate::capture::CaptureAccumulator;
use crate::capture::radiotap;
use anyhow::Context;
use pcap_file::DataLink;
use pcap_file::pcap::PcapReader;
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;
use std::thread;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to read pcap stream")]
    Pcap(#[from] pcap_file::PcapError),
    #[error("unsupported link type {0:?} (expected 802.11 with radiotap headers)")]
    UnsupportedLinkType(DataLink),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub malformed: u64,
}

/// Feeds the frames of a radiotap pcap stream into a [`CaptureAccumulator`]
///
/// The stream is typically a FIFO or stdin written by a capture tool running on a monitor-mode
/// interface, so reads block until the radio produces more frames.
pub struct PcapFrameSource<R: Read> {
    reader: PcapReader<R>,
    accumulator: CaptureAccumulator,
}

impl PcapFrameSource<Box<dyn Read + Send>> {
    /// Opens the pcap stream at `path`, or stdin when the path is `-`
    pub fn open(path: &Path, accumulator: CaptureAccumulator) -> anyhow::Result<Self> {
        let input: Box<dyn Read + Send> = if path.as_os_str() == "-" {
            Box::new(std::io::stdin())
        } else {
            let file = fs::File::open(path)
                .with_context(|| format!("failed to open {} for reading", path.display()))?;
            Box::new(BufReader::new(file))
        };

        Self::new(input, accumulator)
            .with_context(|| format!("failed to start capture from {}", path.display()))
    }
}

impl<R: Read> PcapFrameSource<R> {
    pub fn new(input: R, accumulator: CaptureAccumulator) -> Result<Self, CaptureError> {
        let reader = PcapReader::new(input)?;
        let datalink = reader.header().datalink;
        if datalink != DataLink::IEEE802_11_RADIOTAP {
            return Err(CaptureError::UnsupportedLinkType(datalink));
        }

        Ok(Self {
            reader,
            accumulator,
        })
    }

    /// Consumes frames until the stream ends
    pub fn run(mut self) -> Result<CaptureStats, CaptureError> {
        let mut stats = CaptureStats::default();
        while let Some(packet) = self.reader.next_packet() {
            let packet = packet?;
            match radiotap::parse_frame(&packet.data, packet.orig_len) {
                Ok(frame) => {
                    self.accumulator.on_frame(&frame);
                    stats.frames += 1;
                }
                Err(_) => stats.malformed += 1,
            }
        }

        Ok(stats)
    }
}

impl<R: Read + Send + 'static> PcapFrameSource<R> {
    /// Runs the source on its own thread, so the main loop never waits on the radio
    pub fn spawn(self) -> anyhow::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || match self.run() {
                Ok(stats) => tracing::info!(
                    frames = stats.frames,
                    malformed = stats.malformed,
                    "capture stream ended"
                ),
                Err(e) => tracing::warn!("capture stopped: {e}"),
            })
            .context("failed to spawn capture thread")
    }
}
