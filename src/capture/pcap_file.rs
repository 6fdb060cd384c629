//! The one reference capture adapter the core ships: reads frames back
//! out of a pcap file (§6). Live-capture technologies satisfy the same
//! [`CaptureSource`] contract but are out of scope here.

use std::time::Duration;

use crate::error::CaptureError;
use crate::types::{CaptureStats, Timestamp};

use super::source::{CaptureSource, GetResult, PacketBlock, RawFrame};

pub struct PcapFileCapture {
    capture: pcap::Capture<pcap::Offline>,
    packets_read: u64,
}

impl PcapFileCapture {
    pub fn open(path: &str) -> Result<Self, CaptureError> {
        let capture = pcap::Capture::from_file(path)
            .map_err(|e| CaptureError::OpenFailed(format!("{path}: {e}")))?;
        Ok(Self {
            capture,
            packets_read: 0,
        })
    }
}

impl CaptureSource for PcapFileCapture {
    fn get(&mut self, block: &mut PacketBlock) -> GetResult {
        block.clear();
        loop {
            if block.cnt >= PacketBlock::capacity() {
                return GetResult::Parsed;
            }
            match self.capture.next_packet() {
                Ok(packet) => {
                    self.packets_read += 1;
                    let ts = Timestamp::new(
                        packet.header.ts.tv_sec.max(0) as u32,
                        packet.header.ts.tv_usec.max(0) as u32,
                    );
                    block.push(RawFrame {
                        ts,
                        data: packet.data.to_vec(),
                        wire_len: packet.header.len as usize,
                    });
                }
                Err(pcap::Error::NoMorePackets) => {
                    return if block.cnt > 0 {
                        GetResult::Parsed
                    } else {
                        GetResult::NotParsed
                    };
                }
                Err(pcap::Error::TimeoutExpired) => {
                    return if block.cnt > 0 {
                        GetResult::Parsed
                    } else {
                        GetResult::Timeout
                    };
                }
                Err(e) => return GetResult::Error(e.to_string()),
            }
        }
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            packets_received: self.packets_read,
            packets_dropped: 0,
        }
    }
}

/// Allows polling code to treat "no more frames right now" uniformly
/// whether the underlying reason was a real timeout or end of file.
pub fn poll_interval() -> Duration {
    Duration::from_millis(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_file_is_an_open_failure() {
        let result = PcapFileCapture::open("/nonexistent/path/does-not-exist.pcap");
        assert!(result.is_err());
    }
}
