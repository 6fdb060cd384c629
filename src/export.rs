//! The exporter contract (§6) and a minimal textual exporter used for
//! testing and manual inspection. Wire-format exporters (IPFIX, UniRec)
//! are out of scope; only the contract they must satisfy lives here.

use crate::types::{tcp_flags, Flow};
use std::fmt::Write as _;

/// `export_flow` must never block indefinitely; it runs synchronously on
/// the flow-cache thread that is evicting the flow.
pub trait Exporter: Send {
    /// Returns `0` on success, matching the original's C-style contract;
    /// any other value signals the core should log and move on.
    fn export_flow(&mut self, flow: &Flow) -> i32;
}

/// One line per flow: five-tuple, counters, TCP flags, elapsed time, then
/// each extension's `get_text()` joined by spaces.
#[derive(Default)]
pub struct TextExporter {
    lines: Vec<String>,
}

impl TextExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render_flow(flow: &Flow) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "{} {}:{} -> {}:{} proto={} pkts={}/{} bytes={}/{} flags={}/{} elapsed={:.3}",
            flow.vlan_id,
            flow.src_ip,
            flow.src_port,
            flow.dst_ip,
            flow.dst_port,
            flow.l4_proto,
            flow.src_packets,
            flow.dst_packets,
            flow.src_bytes,
            flow.dst_bytes,
            format_tcp_flags(flow.src_tcp_flags),
            format_tcp_flags(flow.dst_tcp_flags),
            flow.active_span(),
        );
        for ext in flow.extensions() {
            out.push(' ');
            out.push_str(&ext.get_text());
        }
        out
    }
}

impl Exporter for TextExporter {
    fn export_flow(&mut self, flow: &Flow) -> i32 {
        self.lines.push(Self::render_flow(flow));
        0
    }
}

fn format_tcp_flags(flags: u8) -> String {
    let mut s = String::new();
    let bits: [(u8, char); 8] = [
        (tcp_flags::FIN, 'F'),
        (tcp_flags::SYN, 'S'),
        (tcp_flags::RST, 'R'),
        (tcp_flags::PSH, 'P'),
        (tcp_flags::ACK, 'A'),
        (tcp_flags::URG, 'U'),
        (tcp_flags::ECE, 'E'),
        (tcp_flags::CWR, 'C'),
    ];
    for (bit, ch) in bits {
        if flags & bit != 0 {
            s.push(ch);
        }
    }
    if s.is_empty() {
        s.push('.');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpAddr, L3Family, Packet, Timestamp};

    fn packet() -> Packet {
        Packet {
            ts: Timestamp::new(0, 0),
            vlan_id: 0,
            l3_family: L3Family::V4,
            src_ip: IpAddr::V4([10, 0, 0, 1]),
            dst_ip: IpAddr::V4([10, 0, 0, 2]),
            l4_proto: 6,
            src_port: 1234,
            dst_port: 80,
            tcp_flags: tcp_flags::SYN,
            ip_ttl: 64,
            ip_flags: 0,
            tcp_window: 0,
            tcp_mss: 0,
            tcp_option_flags: 0,
            frag_id: 0,
            frag_offset: 0,
            more_fragments: false,
            reverse_direction: false,
            payload: Vec::new(),
            wire_len: 60,
            truncated: false,
            input_index: 0,
            ordinal: 0,
        }
    }

    #[test]
    fn text_output_is_idempotent_on_an_unchanged_flow() {
        let pkt = packet();
        let mut flow = Flow::new(&pkt);
        flow.merge_packet(&pkt);

        let first = TextExporter::render_flow(&flow);
        let second = TextExporter::render_flow(&flow);
        assert_eq!(first, second);
        assert!(first.contains("10.0.0.1"));
    }

    #[test]
    fn exporter_accumulates_one_line_per_flow() {
        let pkt = packet();
        let mut flow = Flow::new(&pkt);
        flow.merge_packet(&pkt);
        let mut exporter = TextExporter::new();
        assert_eq!(exporter.export_flow(&flow), 0);
        assert_eq!(exporter.export_flow(&flow), 0);
        assert_eq!(exporter.lines().len(), 2);
    }
}
