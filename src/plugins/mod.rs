//! Worked-example protocol plugins (§4.5, §8): concrete `ProcessPlugin`
//! implementations built on the framework in [`crate::plugin`].

mod tls_parser;

pub mod tls;
pub mod wireguard;

pub use tls::TlsPlugin;
pub use wireguard::WireGuardPlugin;
