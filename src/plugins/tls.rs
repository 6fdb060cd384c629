//! TLS enrichment plugin (§4.5, end-to-end scenario #2): extracts SNI,
//! negotiated ALPN, and a JA3 client fingerprint from the handshake.

use super::tls_parser::{parse_hello, ParsedHello};
use crate::plugin::{FlowAction, ProcessPlugin};
use crate::types::{Extension, Flow, Packet};
use std::fmt;

#[derive(Clone)]
pub struct TlsExtension {
    extension_id: u16,
    pub client_version: u16,
    pub sni: String,
    pub alpn: String,
    pub ja3_hash: [u8; 16],
}

impl fmt::Debug for TlsExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsExtension")
            .field("sni", &self.sni)
            .field("ja3", &hex(&self.ja3_hash))
            .finish()
    }
}

impl Extension for TlsExtension {
    fn extension_id(&self) -> u16 {
        self.extension_id
    }

    fn get_text(&self) -> String {
        format!(
            "tls,sni={},alpn={},ja3={}",
            self.sni,
            self.alpn,
            hex(&self.ja3_hash)
        )
    }

    fn fill_ipfix(&self, buf: &mut [u8]) -> Option<usize> {
        let sni = self.sni.as_bytes();
        let alpn = self.alpn.as_bytes();
        let needed = 2 + 1 + sni.len() + 1 + alpn.len() + 16;
        if buf.len() < needed {
            return None;
        }
        let mut off = 0;
        buf[off..off + 2].copy_from_slice(&self.client_version.to_be_bytes());
        off += 2;
        buf[off] = sni.len() as u8;
        off += 1;
        buf[off..off + sni.len()].copy_from_slice(sni);
        off += sni.len();
        buf[off] = alpn.len() as u8;
        off += 1;
        buf[off..off + alpn.len()].copy_from_slice(alpn);
        off += alpn.len();
        buf[off..off + 16].copy_from_slice(&self.ja3_hash);
        off += 16;
        Some(off)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn hex(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Accumulates handshake bytes from both directions of a TCP flow and
/// attaches a [`TlsExtension`] as soon as a ClientHello is seen; a later
/// ServerHello only fills in the negotiated ALPN on the existing extension.
pub struct TlsPlugin {
    extension_id: u16,
}

impl TlsPlugin {
    pub fn new(extension_id: u16) -> Self {
        Self { extension_id }
    }
}

impl ProcessPlugin for TlsPlugin {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn post_create(&mut self, flow: &mut Flow, pkt: &Packet) -> FlowAction {
        self.inspect(flow, pkt);
        FlowAction::Continue
    }

    fn pre_update(&mut self, flow: &mut Flow, pkt: &mut Packet) -> FlowAction {
        self.inspect(flow, pkt);
        FlowAction::Continue
    }

    fn post_update(&mut self, _flow: &mut Flow, _pkt: &Packet) -> FlowAction {
        FlowAction::Continue
    }
}

impl TlsPlugin {
    fn inspect(&self, flow: &mut Flow, pkt: &Packet) {
        if !pkt.is_tcp() || pkt.payload.is_empty() {
            return;
        }
        match parse_hello(&pkt.payload) {
            Some(ParsedHello::Client(info)) => {
                let ja3_hash = *md5::compute(info.ja3.as_bytes());
                let ext = TlsExtension {
                    extension_id: self.extension_id,
                    client_version: info.version,
                    sni: info.sni.unwrap_or_default(),
                    alpn: info.alpn.unwrap_or_default(),
                    ja3_hash,
                };
                if flow.find_extension(self.extension_id).is_none() {
                    flow.attach_extension(Box::new(ext));
                }
            }
            Some(ParsedHello::Server(info)) => {
                if let Some(alpn) = info.alpn {
                    if let Some(existing) = flow.find_extension_mut(self.extension_id) {
                        if let Some(tls) = existing.as_any_mut().downcast_mut::<TlsExtension>() {
                            tls.alpn = alpn;
                        }
                    }
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpAddr, L3Family, Timestamp};

    fn packet_with_payload(payload: Vec<u8>) -> Packet {
        Packet {
            ts: Timestamp::new(0, 0),
            vlan_id: 0,
            l3_family: L3Family::V4,
            src_ip: IpAddr::V4([10, 0, 0, 1]),
            dst_ip: IpAddr::V4([10, 0, 0, 2]),
            l4_proto: 6,
            src_port: 5555,
            dst_port: 443,
            tcp_flags: 0,
            ip_ttl: 64,
            ip_flags: 0,
            tcp_window: 0,
            tcp_mss: 0,
            tcp_option_flags: 0,
            frag_id: 0,
            frag_offset: 0,
            more_fragments: false,
            reverse_direction: false,
            payload,
            wire_len: 100,
            truncated: false,
            input_index: 0,
            ordinal: 0,
        }
    }

    fn client_hello_record() -> Vec<u8> {
        // A minimal, hand-built ClientHello with an SNI extension for
        // "example.com", mirroring the builder in tls_parser's own tests.
        let sni = b"example.com";
        let mut sni_ext = Vec::new();
        sni_ext.extend_from_slice(&((sni.len() + 3) as u16).to_be_bytes());
        sni_ext.push(0);
        sni_ext.extend_from_slice(&(sni.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(sni);

        let mut extensions = Vec::new();
        extensions.extend_from_slice(&0x0000u16.to_be_bytes());
        extensions.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&sni_ext);

        let mut hs = Vec::new();
        hs.extend_from_slice(&0x0303u16.to_be_bytes());
        hs.extend_from_slice(&[0u8; 32]);
        hs.push(0);
        hs.extend_from_slice(&2u16.to_be_bytes());
        hs.extend_from_slice(&0x1301u16.to_be_bytes());
        hs.push(1);
        hs.push(0);
        hs.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hs.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(1); // ClientHello
        let len = hs.len() as u32;
        handshake.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
        handshake.extend_from_slice(&hs);

        let mut record = Vec::new();
        record.push(22);
        record.extend_from_slice(&0x0303u16.to_be_bytes());
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn attaches_extension_with_sni_and_ja3_hash_on_client_hello() {
        let mut plugin = TlsPlugin::new(3);
        let pkt = packet_with_payload(client_hello_record());
        let mut flow = Flow::new(&pkt);
        flow.merge_packet(&pkt);
        plugin.post_create(&mut flow, &pkt);

        let ext = flow.find_extension(3).expect("tls extension attached");
        assert!(ext.get_text().contains("sni=example.com"));
    }

    #[test]
    fn non_tls_payload_attaches_nothing() {
        let mut plugin = TlsPlugin::new(3);
        let pkt = packet_with_payload(vec![1, 2, 3, 4]);
        let mut flow = Flow::new(&pkt);
        plugin.post_create(&mut flow, &pkt);
        assert!(flow.find_extension(3).is_none());
    }
}
