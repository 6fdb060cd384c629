pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod flow;
pub mod fragmentation;
pub mod indexer;
pub mod packet_parser;
pub mod plugin;
pub mod plugins;
pub mod types;

pub use engine::Engine;
pub use error::{CaptureError, ConfigError, FlowError, ParseError, PluginError};
pub use export::{Exporter, TextExporter};
pub use flow::{FlowCache, FlowCacheStats};
pub use fragmentation::FragmentCache;
pub use indexer::IndexerMesh;
pub use packet_parser::PacketParser;
pub use plugin::{PluginRegistry, PluginRegistryBuilder, ProcessPlugin};
