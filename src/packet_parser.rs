//! The packet parser (§4.1): decodes one raw captured frame into a
//! [`Packet`], using `etherparse` for the well-understood wire formats
//! rather than hand-rolled byte slicing.

use crate::error::ParseError;
use crate::types::{tcp_flags, IpAddr, L3Family, Packet, Timestamp};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_VLAN_QINQ: u16 = 0x88A8;

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
const PROTO_ICMPV6: u8 = 58;
const PROTO_HOP_BY_HOP: u8 = 0;
const PROTO_ROUTING: u8 = 43;
const PROTO_FRAGMENT: u8 = 44;
const PROTO_DEST_OPTS: u8 = 60;

/// Bounded so a crafted chain of IPv6 extension headers cannot spin the
/// parser forever.
const MAX_IPV6_EXT_HEADERS: usize = 8;
/// At most one level of VLAN tag is stored; deeper (QinQ) tags are
/// unwrapped and discarded per §4.1.
const MAX_VLAN_UNWRAP: usize = 4;

pub struct PacketParser {
    pub parse_failures: u64,
}

impl Default for PacketParser {
    fn default() -> Self {
        Self { parse_failures: 0 }
    }
}

impl PacketParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one raw frame. Malformed headers are reported as a
    /// `ParseError` but never propagate past the caller: the dispatcher is
    /// expected to count the failure and drop the frame (§4.1, §7).
    pub fn parse(
        &mut self,
        raw: &[u8],
        ts: Timestamp,
        wire_len: usize,
        input_index: usize,
    ) -> Result<Packet, ParseError> {
        match self.parse_inner(raw, ts, wire_len, input_index) {
            Ok(pkt) => Ok(pkt),
            Err(e) => {
                self.parse_failures += 1;
                Err(e)
            }
        }
    }

    fn parse_inner(
        &self,
        raw: &[u8],
        ts: Timestamp,
        wire_len: usize,
        input_index: usize,
    ) -> Result<Packet, ParseError> {
        let eth = etherparse::Ethernet2HeaderSlice::from_slice(raw)
            .map_err(|_| ParseError::PacketTooShort)?;
        let mut rest = &raw[eth.slice().len()..];
        let mut ether_type = u16::from(eth.ether_type());
        let mut vlan_id: u16 = 0;
        let mut vlan_seen = false;

        for _ in 0..MAX_VLAN_UNWRAP {
            if ether_type != ETHERTYPE_VLAN && ether_type != ETHERTYPE_VLAN_QINQ {
                break;
            }
            let vlan = etherparse::SingleVlanHeaderSlice::from_slice(rest)
                .map_err(|_| ParseError::PacketTooShort)?;
            if !vlan_seen {
                vlan_id = vlan.vlan_identifier();
                vlan_seen = true;
            }
            ether_type = u16::from(vlan.ether_type());
            rest = &rest[vlan.slice().len()..];
        }

        let mut pkt = Packet {
            ts,
            vlan_id,
            l3_family: L3Family::V4,
            src_ip: IpAddr::V4([0; 4]),
            dst_ip: IpAddr::V4([0; 4]),
            l4_proto: 0,
            src_port: 0,
            dst_port: 0,
            tcp_flags: 0,
            ip_ttl: 0,
            ip_flags: 0,
            tcp_window: 0,
            tcp_mss: 0,
            tcp_option_flags: 0,
            frag_id: 0,
            frag_offset: 0,
            more_fragments: false,
            reverse_direction: false,
            payload: Vec::new(),
            wire_len,
            truncated: wire_len > raw.len(),
            input_index,
            ordinal: 0,
        };

        match ether_type {
            ETHERTYPE_IPV4 => self.parse_ipv4(rest, &mut pkt)?,
            ETHERTYPE_IPV6 => self.parse_ipv6(rest, &mut pkt)?,
            _ => return Err(ParseError::InvalidFormat("unsupported ethertype".into())),
        }

        Ok(pkt)
    }

    fn parse_ipv4(&self, data: &[u8], pkt: &mut Packet) -> Result<(), ParseError> {
        let ip = etherparse::Ipv4HeaderSlice::from_slice(data)
            .map_err(|_| ParseError::PacketTooShort)?;
        pkt.l3_family = L3Family::V4;
        pkt.src_ip = IpAddr::V4(ip.source());
        pkt.dst_ip = IpAddr::V4(ip.destination());
        pkt.ip_ttl = ip.ttl();
        pkt.ip_flags = (ip.dont_fragment() as u8) | ((ip.more_fragments() as u8) << 1);
        pkt.frag_id = ip.identification();
        pkt.frag_offset = ip.fragments_offset();
        pkt.more_fragments = ip.more_fragments();
        pkt.l4_proto = u8::from(ip.protocol());

        let header_end = ip.slice().len();
        let rest = &data[header_end..];
        self.parse_l4(pkt.l4_proto, rest, pkt)
    }

    fn parse_ipv6(&self, data: &[u8], pkt: &mut Packet) -> Result<(), ParseError> {
        let ip = etherparse::Ipv6HeaderSlice::from_slice(data)
            .map_err(|_| ParseError::PacketTooShort)?;
        pkt.l3_family = L3Family::V6;
        pkt.src_ip = IpAddr::V6(ip.source());
        pkt.dst_ip = IpAddr::V6(ip.destination());
        pkt.ip_ttl = ip.hop_limit();

        let mut next_header = u8::from(ip.next_header());
        let mut offset = ip.slice().len();
        let mut hops = 0usize;

        loop {
            match next_header {
                PROTO_HOP_BY_HOP | PROTO_ROUTING | PROTO_DEST_OPTS | PROTO_FRAGMENT => {
                    hops += 1;
                    if hops > MAX_IPV6_EXT_HEADERS {
                        return Err(ParseError::ExtensionHeaderTooDeep);
                    }
                    if data.len() < offset + 2 {
                        return Err(ParseError::PacketTooShort);
                    }
                    let this_next_header = data[offset];
                    let ext_len_units = data[offset + 1] as usize;
                    let ext_bytes = if next_header == PROTO_FRAGMENT {
                        // Fixed 8-byte fragment header; also means this
                        // datagram is itself fragmented.
                        pkt.frag_offset = (u16::from_be_bytes([data[offset + 2], data[offset + 3]]) >> 3) & 0x1FFF;
                        pkt.more_fragments = data[offset + 3] & 0x1 != 0;
                        pkt.frag_id = u16::from_be_bytes([data[offset + 4], data[offset + 5]]);
                        8
                    } else {
                        (ext_len_units + 1) * 8
                    };
                    if data.len() < offset + ext_bytes {
                        return Err(ParseError::PacketTooShort);
                    }
                    next_header = this_next_header;
                    offset += ext_bytes;
                }
                _ => break,
            }
        }

        pkt.l4_proto = next_header;
        let rest = &data[offset..];
        self.parse_l4(next_header, rest, pkt)
    }

    fn parse_l4(&self, proto: u8, data: &[u8], pkt: &mut Packet) -> Result<(), ParseError> {
        match proto {
            PROTO_TCP => {
                let tcp = etherparse::TcpHeaderSlice::from_slice(data)
                    .map_err(|_| ParseError::PacketTooShort)?;
                pkt.src_port = tcp.source_port();
                pkt.dst_port = tcp.destination_port();
                pkt.tcp_window = tcp.window_size();
                pkt.tcp_flags = encode_tcp_flags(&tcp);
                let (mss, opt_flags) = scan_tcp_options(tcp.options());
                pkt.tcp_mss = mss;
                pkt.tcp_option_flags = opt_flags;
                let payload = &data[tcp.slice().len()..];
                set_payload(pkt, payload);
            }
            PROTO_UDP => {
                let udp = etherparse::UdpHeaderSlice::from_slice(data)
                    .map_err(|_| ParseError::PacketTooShort)?;
                pkt.src_port = udp.source_port();
                pkt.dst_port = udp.destination_port();
                let payload = &data[udp.slice().len()..];
                set_payload(pkt, payload);
            }
            PROTO_ICMP | PROTO_ICMPV6 => {
                // Ports stay zero; the rest of the frame after the 8-byte
                // common ICMP header is handed over as payload.
                let payload = if data.len() >= 8 { &data[8..] } else { &[] };
                set_payload(pkt, payload);
            }
            _ => {
                // Unknown L4 protocol: ports stay zero, whole remainder
                // treated as payload (§4.1).
                set_payload(pkt, data);
            }
        }
        Ok(())
    }
}

fn set_payload(pkt: &mut Packet, payload: &[u8]) {
    pkt.payload = payload.to_vec();
}

fn encode_tcp_flags(tcp: &etherparse::TcpHeaderSlice) -> u8 {
    let mut flags = 0u8;
    if tcp.fin() {
        flags |= tcp_flags::FIN;
    }
    if tcp.syn() {
        flags |= tcp_flags::SYN;
    }
    if tcp.rst() {
        flags |= tcp_flags::RST;
    }
    if tcp.psh() {
        flags |= tcp_flags::PSH;
    }
    if tcp.ack() {
        flags |= tcp_flags::ACK;
    }
    if tcp.urg() {
        flags |= tcp_flags::URG;
    }
    if tcp.ece() {
        flags |= tcp_flags::ECE;
    }
    if tcp.cwr() {
        flags |= tcp_flags::CWR;
    }
    flags
}

/// Walks TCP options looking for MSS (kind 2); returns the MSS value (0 if
/// absent) and a small bitmask of which option kinds were observed for
/// diagnostics.
fn scan_tcp_options(options: &[u8]) -> (u16, u8) {
    let mut mss = 0u16;
    let mut seen = 0u8;
    let mut i = 0;
    while i < options.len() {
        let kind = options[i];
        match kind {
            0 => break, // end of options list
            1 => {
                i += 1;
                continue;
            } // NOP
            2 => {
                if i + 4 <= options.len() {
                    mss = u16::from_be_bytes([options[i + 2], options[i + 3]]);
                }
                seen |= 0x01;
                i += options.get(i + 1).copied().unwrap_or(2).max(2) as usize;
            }
            3 => {
                seen |= 0x02;
                i += options.get(i + 1).copied().unwrap_or(2).max(2) as usize;
            }
            _ => {
                let len = options.get(i + 1).copied().unwrap_or(2).max(2) as usize;
                i += len;
            }
        }
    }
    (mss, seen)
}
