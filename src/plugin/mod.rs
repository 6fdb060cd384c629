//! The protocol-enrichment plugin framework (§4.5).

mod registry;

pub use registry::{PluginRegistry, PluginRegistryBuilder};

use crate::types::{Flow, Packet};

/// What `pre_create` decides about the packet that is about to create or
/// look up a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketAction {
    Continue,
    Drop,
}

/// What a flow-lifecycle callback decides should happen to the flow it
/// was just handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    Continue,
    /// Export the flow now and remove it from the cache.
    Flush,
    /// Export the flow, then build a fresh one from the same packet and
    /// apply it (used for mid-conversation re-handshakes, e.g. WireGuard).
    FlushWithReinsert,
}

/// A protocol-specific analyzer. Every callback is optional — the default
/// implementation is a no-op that continues — so a plugin only overrides
/// the stages it cares about.
///
/// A plugin must never panic across this boundary (§7): an internal
/// failure is reported through `log` and treated as "do not attach an
/// extension", never propagated.
pub trait ProcessPlugin: Send {
    fn name(&self) -> &'static str;

    fn pre_create(&mut self, _pkt: &Packet) -> PacketAction {
        PacketAction::Continue
    }

    fn post_create(&mut self, _flow: &mut Flow, _pkt: &Packet) -> FlowAction {
        FlowAction::Continue
    }

    fn pre_update(&mut self, _flow: &mut Flow, _pkt: &mut Packet) -> FlowAction {
        FlowAction::Continue
    }

    fn post_update(&mut self, _flow: &mut Flow, _pkt: &Packet) -> FlowAction {
        FlowAction::Continue
    }

    fn pre_export(&mut self, _flow: &mut Flow) {}

    fn finish(&mut self, _print_stats: bool) {}
}
