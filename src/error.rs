use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open capture: {0}")]
    OpenFailed(String),

    #[error("failed to read packet: {0}")]
    ReadFailed(String),

    #[error("no more packets")]
    NoMorePackets,

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("packet too short for protocol")]
    PacketTooShort,

    #[error("invalid protocol format: {0}")]
    InvalidFormat(String),

    #[error("extension header chain too deep")]
    ExtensionHeaderTooDeep,
}

/// Startup-time configuration problems. Always fatal: the process exits
/// before any capture source is opened.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A plugin callback must never panic across the boundary; internal
/// failures are rendered as this error, logged, and treated as
/// "do not attach extension".
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("plugin '{plugin}' failed to parse payload: {reason}")]
    ParseFailed { plugin: &'static str, reason: String },

    #[error("plugin '{plugin}' received invalid configuration: {reason}")]
    BadConfig { plugin: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),
}
