//! WireGuard detection plugin (§4.5, end-to-end scenario #3): identifies
//! handshake and transport-data messages on a UDP flow and tracks the
//! peer ids exchanged during the handshake.

use crate::plugin::{FlowAction, ProcessPlugin};
use crate::types::{Extension, Flow, Packet};
use std::fmt;

const PACKET_TYPE_INIT_TO_RESP: u8 = 0x01;
const PACKET_TYPE_RESP_TO_INIT: u8 = 0x02;
const PACKET_TYPE_COOKIE_REPLY: u8 = 0x03;
const PACKET_TYPE_TRANSPORT_DATA: u8 = 0x04;

const LEN_INIT_TO_RESP: usize = 148;
const LEN_RESP_TO_INIT: usize = 92;
const LEN_COOKIE_REPLY: usize = 64;
const LEN_MIN_TRANSPORT_DATA: usize = 32;

/// Bytes 4..8 of a DNS query header with a small, non-recursive
/// transaction id — the handshake message layout this can be confused
/// with (§4.5's worked example).
const DNS_QUERY_MASK: [u8; 4] = [0x00, 0x01, 0x00, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Looks exactly like a DNS query too; downgraded accordingly.
    Low,
    High,
}

#[derive(Clone)]
pub struct WireGuardExtension {
    extension_id: u16,
    pub confidence: Confidence,
    pub src_peer: u32,
    pub dst_peer: u32,
}

impl fmt::Debug for WireGuardExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireGuardExtension")
            .field("confidence", &self.confidence)
            .field("src_peer", &self.src_peer)
            .field("dst_peer", &self.dst_peer)
            .finish()
    }
}

impl Extension for WireGuardExtension {
    fn extension_id(&self) -> u16 {
        self.extension_id
    }

    fn get_text(&self) -> String {
        format!(
            "wgconf={},wgsrcpeer={},wgdstpeer={}",
            match self.confidence {
                Confidence::Low => 1,
                Confidence::High => 100,
            },
            self.src_peer,
            self.dst_peer,
        )
    }

    fn fill_ipfix(&self, buf: &mut [u8]) -> Option<usize> {
        if buf.len() < 9 {
            return None;
        }
        buf[0] = match self.confidence {
            Confidence::Low => 1,
            Confidence::High => 100,
        };
        buf[1..5].copy_from_slice(&self.src_peer.to_be_bytes());
        buf[5..9].copy_from_slice(&self.dst_peer.to_be_bytes());
        Some(9)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Default)]
pub struct WireGuardPlugin {
    extension_id: u16,
    total: u64,
    identified: u64,
}

impl WireGuardPlugin {
    pub fn new(extension_id: u16) -> Self {
        Self {
            extension_id,
            total: 0,
            identified: 0,
        }
    }
}

impl ProcessPlugin for WireGuardPlugin {
    fn name(&self) -> &'static str {
        "wireguard"
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> FlowAction {
        if pkt.l4_proto != 17 {
            return FlowAction::Continue;
        }
        let source_pkt = !pkt.reverse_direction;
        let mut ext = WireGuardExtension::new(self.extension_id);
        if self.parse(&pkt.payload, source_pkt, &mut ext).0 {
            flow.attach_extension(Box::new(ext));
        }
        FlowAction::Continue
    }

    fn pre_update(&mut self, flow: &mut Flow, pkt: &mut Packet) -> FlowAction {
        if pkt.l4_proto != 17 {
            return FlowAction::Continue;
        }
        let source_pkt = !pkt.reverse_direction;
        let Some(existing) = flow.find_extension_mut(self.extension_id) else {
            return FlowAction::Continue;
        };
        let Some(wg) = existing.as_any_mut().downcast_mut::<WireGuardExtension>() else {
            return FlowAction::Continue;
        };

        let (matched, needs_flush) = self.parse(&pkt.payload, source_pkt, wg);
        if needs_flush {
            return FlowAction::FlushWithReinsert;
        }
        if !matched {
            // No longer looks like WireGuard; drop the extension rather
            // than keep reporting a stale guess.
            flow.remove_extension(self.extension_id);
        }
        FlowAction::Continue
    }

    fn finish(&mut self, print_stats: bool) {
        if print_stats {
            log::info!(
                "wireguard plugin: identified {}/{} packets",
                self.identified,
                self.total
            );
        }
    }
}

impl WireGuardPlugin {
    /// Returns `(matched, needs_flush)`. `needs_flush` signals a new
    /// handshake initiation whose peer id doesn't match the flow's
    /// existing record — the caller must flush and reinsert.
    fn parse(
        &mut self,
        data: &[u8],
        source_pkt: bool,
        ext: &mut WireGuardExtension,
    ) -> (bool, bool) {
        self.total += 1;

        if data.len() < LEN_MIN_TRANSPORT_DATA {
            return (false, false);
        }
        let pkt_type = data[0];
        if !(PACKET_TYPE_INIT_TO_RESP..=PACKET_TYPE_TRANSPORT_DATA).contains(&pkt_type) {
            return (false, false);
        }
        if data[1] != 0 || data[2] != 0 || data[3] != 0 {
            return (false, false);
        }

        let mut needs_flush = false;
        match pkt_type {
            PACKET_TYPE_INIT_TO_RESP => {
                if data.len() != LEN_INIT_TO_RESP {
                    return (false, false);
                }
                let new_peer = u32::from_ne_bytes(data[4..8].try_into().unwrap());
                let cmp_peer = if source_pkt { ext.src_peer } else { ext.dst_peer };
                if cmp_peer != 0 && cmp_peer != new_peer {
                    return (false, true);
                }
                if source_pkt {
                    ext.src_peer = new_peer;
                } else {
                    ext.dst_peer = new_peer;
                }
            }
            PACKET_TYPE_RESP_TO_INIT => {
                if data.len() != LEN_RESP_TO_INIT {
                    return (false, false);
                }
                let mut src = u32::from_ne_bytes(data[4..8].try_into().unwrap());
                let mut dst = u32::from_ne_bytes(data[8..12].try_into().unwrap());
                if !source_pkt {
                    std::mem::swap(&mut src, &mut dst);
                }
                ext.src_peer = src;
                ext.dst_peer = dst;
            }
            PACKET_TYPE_COOKIE_REPLY => {
                if data.len() != LEN_COOKIE_REPLY {
                    return (false, false);
                }
                let peer = u32::from_ne_bytes(data[4..8].try_into().unwrap());
                if source_pkt {
                    ext.dst_peer = peer;
                } else {
                    ext.src_peer = peer;
                }
            }
            PACKET_TYPE_TRANSPORT_DATA => {
                if data.len() % 16 != 0 {
                    return (false, false);
                }
                let peer = u32::from_ne_bytes(data[4..8].try_into().unwrap());
                if source_pkt {
                    ext.dst_peer = peer;
                } else {
                    ext.src_peer = peer;
                }
            }
            _ => unreachable!(),
        }

        ext.confidence = if data[4..8] == DNS_QUERY_MASK {
            Confidence::Low
        } else {
            Confidence::High
        };
        self.identified += 1;
        (true, needs_flush)
    }
}

impl WireGuardExtension {
    fn new(extension_id: u16) -> Self {
        Self {
            extension_id,
            confidence: Confidence::High,
            src_peer: 0,
            dst_peer: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpAddr, L3Family, Timestamp};

    fn udp_packet(payload: Vec<u8>, reverse: bool) -> Packet {
        Packet {
            ts: Timestamp::new(0, 0),
            vlan_id: 0,
            l3_family: L3Family::V4,
            src_ip: IpAddr::V4([10, 0, 0, 1]),
            dst_ip: IpAddr::V4([10, 0, 0, 2]),
            l4_proto: 17,
            src_port: 51820,
            dst_port: 51820,
            tcp_flags: 0,
            ip_ttl: 64,
            ip_flags: 0,
            tcp_window: 0,
            tcp_mss: 0,
            tcp_option_flags: 0,
            frag_id: 0,
            frag_offset: 0,
            more_fragments: false,
            reverse_direction: reverse,
            payload,
            wire_len: 200,
            truncated: false,
            input_index: 0,
            ordinal: 0,
        }
    }

    fn init_to_resp(sender_index: u32) -> Vec<u8> {
        let mut data = vec![0u8; LEN_INIT_TO_RESP];
        data[0] = PACKET_TYPE_INIT_TO_RESP;
        data[4..8].copy_from_slice(&sender_index.to_ne_bytes());
        data
    }

    #[test]
    fn identifies_handshake_initiation_and_attaches_extension() {
        let mut plugin = WireGuardPlugin::new(5);
        let pkt = udp_packet(init_to_resp(0x1234), false);
        let mut flow = Flow::new(&pkt);
        plugin.post_create(&mut flow, &pkt);

        let ext = flow.find_extension(5).expect("wg extension attached");
        assert!(ext.get_text().contains("wgsrcpeer=4660")); // 0x1234
    }

    #[test]
    fn mismatched_reinit_peer_triggers_flush_with_reinsert() {
        let mut plugin = WireGuardPlugin::new(5);
        let first = udp_packet(init_to_resp(0x1111), false);
        let mut flow = Flow::new(&first);
        plugin.post_create(&mut flow, &first);

        let mut second = udp_packet(init_to_resp(0x2222), false);
        let action = plugin.pre_update(&mut flow, &mut second);
        assert_eq!(action, FlowAction::FlushWithReinsert);
    }

    #[test]
    fn too_short_payload_is_not_identified() {
        let mut plugin = WireGuardPlugin::new(5);
        let pkt = udp_packet(vec![1, 2, 3], false);
        let mut flow = Flow::new(&pkt);
        plugin.post_create(&mut flow, &pkt);
        assert!(flow.find_extension(5).is_none());
    }
}
