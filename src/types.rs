use std::fmt;

/// Seconds + microseconds since the Unix epoch, as handed to us by the
/// capture adapter. Kept as two integers (rather than `SystemTime`) so
/// arithmetic on it is cheap and deterministic on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub secs: u32,
    pub micros: u32,
}

impl Timestamp {
    pub fn new(secs: u32, micros: u32) -> Self {
        Self { secs, micros }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.micros as f64 / 1_000_000.0
    }

    /// `self - earlier`, in seconds. Negative results saturate to 0.0 since
    /// the cache only ever uses this for elapsed-time comparisons.
    pub fn elapsed_since(&self, earlier: Timestamp) -> f64 {
        (self.as_secs_f64() - earlier.as_secs_f64()).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum L3Family {
    V4,
    V6,
}

/// An IP address. The `V4` variant carries exactly 4 bytes, which is what
/// gives the fragmentation cache key its "compare only the first 4 bytes
/// for v4 entries" equality for free: there simply aren't any more bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpAddr {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl IpAddr {
    pub fn family(&self) -> L3Family {
        match self {
            IpAddr::V4(_) => L3Family::V4,
            IpAddr::V6(_) => L3Family::V6,
        }
    }
}

impl fmt::Display for IpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddr::V4(b) => write!(f, "{}.{}.{}.{}", b[0], b[1], b[2], b[3]),
            IpAddr::V6(b) => {
                let seg: Vec<String> = b
                    .chunks(2)
                    .map(|c| format!("{:02x}{:02x}", c[0], c[1]))
                    .collect();
                write!(f, "{}", seg.join(":"))
            }
        }
    }
}

/// TCP control-bit masks, matching the on-wire order of the TCP flags byte.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;
}

/// A single decoded capture event. Produced by the packet parser from one
/// raw frame and consumed, at the latest, by the flow cache that merges it
/// into a `Flow`. Payload is owned (not borrowed) so that a `Packet` can
/// cross the thread boundaries of the indexer mesh and flow cache shards
/// without lifetime gymnastics.
#[derive(Debug, Clone)]
pub struct Packet {
    pub ts: Timestamp,
    pub vlan_id: u16,
    pub l3_family: L3Family,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub l4_proto: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    pub ip_ttl: u8,
    pub ip_flags: u8,
    pub tcp_window: u16,
    pub tcp_mss: u16,
    pub tcp_option_flags: u8,
    pub frag_id: u16,
    pub frag_offset: u16,
    pub more_fragments: bool,
    /// Set once the flow cache resolves a hit via the reverse key form;
    /// downstream counter updates route to the correct side using this bit.
    pub reverse_direction: bool,
    pub payload: Vec<u8>,
    pub wire_len: usize,
    pub truncated: bool,
    /// Which capture source / indexer input this packet entered on.
    pub input_index: usize,
    /// Assigned by the root indexer node; 0 until then.
    pub ordinal: u64,
}

impl Packet {
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_tcp(&self) -> bool {
        self.l4_proto == 6
    }

    pub fn is_fragmented(&self) -> bool {
        self.frag_offset != 0 || self.more_fragments
    }
}

/// The bidirectional flow key. Constructed from a packet in "packet order"
/// (src/dst as the parser saw them); the flow cache itself tries this form
/// first and the endpoint-swapped form second, which is what makes lookup
/// direction-agnostic without needing a canonical ordering baked into the
/// key's `Hash`/`Eq` impl (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub vlan_id: u16,
    pub l3_family: L3Family,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4_proto: u8,
}

impl FlowKey {
    pub fn from_packet(pkt: &Packet) -> Self {
        Self {
            vlan_id: pkt.vlan_id,
            l3_family: pkt.l3_family,
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            src_port: pkt.src_port,
            dst_port: pkt.dst_port,
            l4_proto: pkt.l4_proto,
        }
    }

    /// Endpoints swapped: the form under which the same conversation
    /// hashes if it was first observed from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            vlan_id: self.vlan_id,
            l3_family: self.l3_family,
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            l4_proto: self.l4_proto,
        }
    }
}

/// Key for the IP fragmentation-reassembly cache (see §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentCacheKey {
    pub l3_family: L3Family,
    pub vlan_id: u16,
    pub frag_id: u16,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
}

/// Ports cached from the first fragment of a datagram, plus the timestamp
/// used to drive FIFO eviction.
#[derive(Debug, Clone, Copy)]
pub struct FragmentCacheValue {
    pub src_port: u16,
    pub dst_port: u16,
    pub timestamp: Timestamp,
}

/// A plugin-owned record attached to a flow. The chain (`Flow::extensions`)
/// holds at most one of these per registered plugin id.
pub trait Extension: fmt::Debug + Send {
    fn extension_id(&self) -> u16;

    /// Single-line textual rendering, used by the text exporter.
    fn get_text(&self) -> String;

    /// Encodes this extension's IPFIX template fields into `buf`, returning
    /// the number of bytes written, or `None` if `buf` is too small.
    fn fill_ipfix(&self, buf: &mut [u8]) -> Option<usize>;

    /// Lets a plugin recover its concrete type from a flow's extension
    /// chain to update a field in place (e.g. filling in a negotiated
    /// ALPN once a ServerHello arrives after the ClientHello).
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// The long-lived record the flow cache maintains per conversation.
pub struct Flow {
    pub key: FlowKey,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    /// "Observation order": the side that sent the first packet is `src`.
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4_proto: u8,
    pub vlan_id: u16,
    pub src_packets: u64,
    pub dst_packets: u64,
    pub src_bytes: u64,
    pub dst_bytes: u64,
    pub src_tcp_flags: u8,
    pub dst_tcp_flags: u8,
    pub link_bitmap: u64,
    extensions: Vec<Box<dyn Extension>>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("key", &self.key)
            .field("src", &(self.src_ip, self.src_port))
            .field("dst", &(self.dst_ip, self.dst_port))
            .field("src_packets", &self.src_packets)
            .field("dst_packets", &self.dst_packets)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

impl Flow {
    pub fn new(pkt: &Packet) -> Self {
        Self {
            key: FlowKey::from_packet(pkt),
            first_seen: pkt.ts,
            last_seen: pkt.ts,
            src_ip: pkt.src_ip,
            dst_ip: pkt.dst_ip,
            src_port: pkt.src_port,
            dst_port: pkt.dst_port,
            l4_proto: pkt.l4_proto,
            vlan_id: pkt.vlan_id,
            src_packets: 0,
            dst_packets: 0,
            src_bytes: 0,
            dst_bytes: 0,
            src_tcp_flags: 0,
            dst_tcp_flags: 0,
            link_bitmap: 0,
            extensions: Vec::new(),
        }
    }

    /// Merge one packet's counters into the flow. Does not move the owning
    /// row entry; that is the cache's responsibility.
    pub fn merge_packet(&mut self, pkt: &Packet) {
        self.last_seen = pkt.ts;
        self.link_bitmap |= 1u64 << (pkt.input_index.min(63));
        if pkt.reverse_direction {
            self.dst_packets += 1;
            self.dst_bytes += pkt.wire_len as u64;
            self.dst_tcp_flags |= pkt.tcp_flags;
        } else {
            self.src_packets += 1;
            self.src_bytes += pkt.wire_len as u64;
            self.src_tcp_flags |= pkt.tcp_flags;
        }
    }

    pub fn active_span(&self) -> f64 {
        self.last_seen.elapsed_since(self.first_seen)
    }

    pub fn find_extension(&self, id: u16) -> Option<&dyn Extension> {
        self.extensions
            .iter()
            .find(|e| e.extension_id() == id)
            .map(|e| e.as_ref())
    }

    pub fn find_extension_mut(&mut self, id: u16) -> Option<&mut Box<dyn Extension>> {
        self.extensions.iter_mut().find(|e| e.extension_id() == id)
    }

    /// Appends `ext` to the chain. Panics (in debug builds) if the flow
    /// already carries an extension with the same id — invariant #3 in §8.
    pub fn attach_extension(&mut self, ext: Box<dyn Extension>) {
        debug_assert!(
            self.find_extension(ext.extension_id()).is_none(),
            "duplicate extension id {} attached to flow",
            ext.extension_id()
        );
        self.extensions.push(ext);
    }

    pub fn remove_extension(&mut self, id: u16) -> Option<Box<dyn Extension>> {
        let pos = self.extensions.iter().position(|e| e.extension_id() == id)?;
        Some(self.extensions.remove(pos))
    }

    pub fn extensions(&self) -> &[Box<dyn Extension>] {
        &self.extensions
    }
}

/// A packet plus the indexer input it arrived on, carried through the
/// sorter mesh.
#[derive(Debug)]
pub struct IndexerItem {
    pub packet: Packet,
    pub input_index: usize,
}

/// Statistics reported by a capture adapter (§6).
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub packets_received: u64,
    pub packets_dropped: u64,
}
