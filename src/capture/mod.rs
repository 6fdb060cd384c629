//! The capture adapter contract and its one reference implementation (§6).

pub mod source;

#[cfg(feature = "cli")]
pub mod pcap_file;

pub use source::{CaptureSource, GetResult, PacketBlock, RawFrame, BLOCK_SIZE};

#[cfg(feature = "cli")]
pub use pcap_file::PcapFileCapture;
