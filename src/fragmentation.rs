//! The IP fragmentation-reassembly cache (§4.2). Fragments after the first
//! lack L4 ports; this cache remembers the first fragment's ports, keyed
//! by (L3 family, VLAN, fragment id, address pair), so later fragments
//! hash to the same flow.
//!
//! The FIFO eviction queue is a plain `VecDeque`: its amortized-doubling
//! growth already gives the power-of-two-capacity-that-doubles-on-full
//! behavior the design calls for, so there is no need for a hand-rolled
//! ring buffer here.

use crate::types::{FragmentCacheKey, FragmentCacheValue, Packet, Timestamp};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

pub struct FragmentCache {
    map: FxHashMap<FragmentCacheKey, FragmentCacheValue>,
    fifo: VecDeque<(FragmentCacheKey, Timestamp)>,
    timeout_secs: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl FragmentCache {
    pub fn new(timeout_secs: f64) -> Self {
        Self {
            map: FxHashMap::default(),
            fifo: VecDeque::new(),
            timeout_secs,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` iff `pkt` is (or claims to be) a fragment. As a side
    /// effect, fills in `pkt.src_port`/`pkt.dst_port` from a cached first
    /// fragment when one is found.
    pub fn cache_packet(&mut self, pkt: &mut Packet, now: Timestamp) -> bool {
        if pkt.frag_offset == 0 {
            if !pkt.more_fragments {
                // Offset 0 and no more-fragments bit: not actually split.
                return false;
            }
            self.evict_expired(now);
            let key = key_of(pkt);
            let value = FragmentCacheValue {
                src_port: pkt.src_port,
                dst_port: pkt.dst_port,
                timestamp: now,
            };
            self.map.insert(key, value);
            self.fifo.push_back((key, now));
            true
        } else {
            let key = key_of(pkt);
            match self.map.get(&key) {
                Some(v) => {
                    pkt.src_port = v.src_port;
                    pkt.dst_port = v.dst_port;
                    self.hits += 1;
                }
                None => {
                    // Out-of-order fragment arriving before the first one:
                    // leave ports untouched and report it as fragmented
                    // anyway, per the resolved open question in DESIGN.md.
                    self.misses += 1;
                }
            }
            true
        }
    }

    /// Drops FIFO-expired entries, removing the map entry only when its
    /// timestamp still matches the FIFO entry (guards against a later
    /// insert that reused the same key colliding with a stale FIFO slot).
    fn evict_expired(&mut self, now: Timestamp) {
        while let Some(&(key, ts)) = self.fifo.front() {
            if now.elapsed_since(ts) <= self.timeout_secs {
                break;
            }
            self.fifo.pop_front();
            if let Some(v) = self.map.get(&key) {
                if v.timestamp == ts {
                    self.map.remove(&key);
                    self.evictions += 1;
                }
            }
        }
    }
}

fn key_of(pkt: &Packet) -> FragmentCacheKey {
    FragmentCacheKey {
        l3_family: pkt.l3_family,
        vlan_id: pkt.vlan_id,
        frag_id: pkt.frag_id,
        src_ip: pkt.src_ip,
        dst_ip: pkt.dst_ip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpAddr, L3Family};

    fn base_packet() -> Packet {
        Packet {
            ts: Timestamp::new(0, 0),
            vlan_id: 0,
            l3_family: L3Family::V4,
            src_ip: IpAddr::V4([10, 0, 0, 1]),
            dst_ip: IpAddr::V4([10, 0, 0, 2]),
            l4_proto: 17,
            src_port: 0,
            dst_port: 0,
            tcp_flags: 0,
            ip_ttl: 64,
            ip_flags: 0,
            tcp_window: 0,
            tcp_mss: 0,
            tcp_option_flags: 0,
            frag_id: 42,
            frag_offset: 0,
            more_fragments: true,
            reverse_direction: false,
            payload: Vec::new(),
            wire_len: 100,
            truncated: false,
            input_index: 0,
            ordinal: 0,
        }
    }

    #[test]
    fn first_fragment_is_cached_and_second_inherits_ports() {
        let mut cache = FragmentCache::new(2.0);
        let mut first = base_packet();
        first.src_port = 5000;
        first.dst_port = 6000;
        assert!(cache.cache_packet(&mut first, Timestamp::new(0, 0)));

        let mut second = base_packet();
        second.frag_offset = 100;
        second.more_fragments = false;
        assert!(cache.cache_packet(&mut second, Timestamp::new(0, 500_000)));
        assert_eq!(second.src_port, 5000);
        assert_eq!(second.dst_port, 6000);
        assert_eq!(cache.hits, 1);
    }

    #[test]
    fn out_of_order_fragment_leaves_ports_untouched() {
        let mut cache = FragmentCache::new(2.0);
        let mut second = base_packet();
        second.frag_offset = 100;
        second.more_fragments = false;
        second.src_port = 1234;
        second.dst_port = 4321;
        assert!(cache.cache_packet(&mut second, Timestamp::new(0, 0)));
        assert_eq!(second.src_port, 1234);
        assert_eq!(second.dst_port, 4321);
        assert_eq!(cache.misses, 1);
    }

    #[test]
    fn non_fragmented_packet_is_reported_as_such() {
        let mut cache = FragmentCache::new(2.0);
        let mut pkt = base_packet();
        pkt.more_fragments = false;
        assert!(!cache.cache_packet(&mut pkt, Timestamp::new(0, 0)));
        assert!(cache.is_empty());
    }

    #[test]
    fn entries_expire_after_timeout() {
        let mut cache = FragmentCache::new(2.0);
        let mut first = base_packet();
        cache.cache_packet(&mut first, Timestamp::new(0, 0));
        assert_eq!(cache.len(), 1);

        // A later, unrelated first-fragment insert triggers eviction.
        let mut other = base_packet();
        other.frag_id = 99;
        cache.cache_packet(&mut other, Timestamp::new(3, 0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.evictions, 1);
    }
}
