//! The sharded, multi-threaded wrapper around [`FlowCache`] (§5): one
//! worker thread owns one shard exclusively, fed by a dedicated
//! `crossbeam` channel off the indexer mesh's single ordered output.
//!
//! Sharding is by the low bits of a *direction-canonical* hash of the
//! flow's five-tuple — deliberately disjoint from the bits `FlowCache`
//! itself uses to pick a row, and deliberately canonicalized (unlike
//! `FlowKey`'s hash) so that both directions of one conversation always
//! land on the same shard, regardless of which side the dispatcher saw
//! first.

use crate::config::FlowCacheConfig;
use crate::export::Exporter;
use crate::flow::{FlowCache, FlowCacheStats};
use crate::indexer::IndexerMesh;
use crate::plugin::PluginRegistry;
use crate::types::{IndexerItem, Packet};
use crossbeam::channel::{bounded, Sender};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::thread::{self, JoinHandle};

/// Per-shard inbound channel depth. Bounded so a slow shard applies
/// back-pressure to the dispatcher rather than letting memory grow
/// without limit.
const SHARD_CHANNEL_DEPTH: usize = 4096;

fn shard_of(pkt: &Packet, num_shards: usize) -> usize {
    let (a_ip, a_port, b_ip, b_port) = if (pkt.src_ip, pkt.src_port) <= (pkt.dst_ip, pkt.dst_port) {
        (pkt.src_ip, pkt.src_port, pkt.dst_ip, pkt.dst_port)
    } else {
        (pkt.dst_ip, pkt.dst_port, pkt.src_ip, pkt.src_port)
    };
    let mut hasher = FxHasher::default();
    pkt.vlan_id.hash(&mut hasher);
    pkt.l4_proto.hash(&mut hasher);
    a_ip.hash(&mut hasher);
    a_port.hash(&mut hasher);
    b_ip.hash(&mut hasher);
    b_port.hash(&mut hasher);
    (hasher.finish() as usize) % num_shards
}

/// Runs the indexer mesh's output through `num_shards` independent
/// `FlowCache`s, each processed on its own worker thread.
pub struct Engine {
    mesh: IndexerMesh,
    dispatcher: JoinHandle<()>,
    shards: Vec<JoinHandle<FlowCacheStats>>,
}

impl Engine {
    /// `exporter_factory` is called once per shard so each shard gets an
    /// independently-owned exporter instance (mirroring the per-shard
    /// plugin instantiation in [`PluginRegistry::instantiate_for_shard`]).
    pub fn new(
        num_inputs: usize,
        fan_in: usize,
        num_shards: usize,
        flow_cache_config: &FlowCacheConfig,
        registry: &PluginRegistry,
        mut exporter_factory: impl FnMut() -> Box<dyn Exporter>,
    ) -> Self {
        assert!(num_shards >= 1);
        let mesh = IndexerMesh::new(num_inputs, fan_in.max(2));

        let mut senders: Vec<Sender<IndexerItem>> = Vec::with_capacity(num_shards);
        let mut shards = Vec::with_capacity(num_shards);

        for _ in 0..num_shards {
            let (tx, rx) = bounded::<IndexerItem>(SHARD_CHANNEL_DEPTH);
            senders.push(tx);
            let mut cache = FlowCache::new(
                flow_cache_config,
                registry.instantiate_for_shard(),
                exporter_factory(),
            );
            shards.push(thread::spawn(move || {
                while let Ok(item) = rx.recv() {
                    let now = item.packet.ts;
                    cache.process_packet(item.packet, now);
                }
                cache.flush_all();
                cache.finish_plugins(true);
                cache.stats.clone()
            }));
        }

        let dispatch_senders = senders;
        let dispatcher = {
            let output = mesh.output_handle();
            thread::spawn(move || loop {
                match output.pop() {
                    Some(item) => {
                        let shard = shard_of(&item.packet, dispatch_senders.len());
                        if dispatch_senders[shard].send(item).is_err() {
                            log::warn!("flow cache shard {shard} closed its channel early");
                        }
                    }
                    None => break,
                }
            })
        };

        Self {
            mesh,
            dispatcher,
            shards,
        }
    }

    pub fn submit(&self, input_index: usize, packet: Packet) {
        self.mesh.submit(input_index, packet);
    }

    /// Stops the mesh, waits for the dispatcher to drain it and the
    /// shards to flush, and returns each shard's final stats.
    pub fn shutdown(self) -> Vec<FlowCacheStats> {
        self.mesh.stop();
        let _ = self.dispatcher.join();
        self.mesh.join();
        self.shards
            .into_iter()
            .filter_map(|h| h.join().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowCacheConfig;
    use crate::export::TextExporter;
    use crate::plugin::PluginRegistryBuilder;
    use crate::types::{tcp_flags, IpAddr, L3Family, Timestamp};

    fn packet(src_port: u16, dst_port: u16, ts: u32) -> Packet {
        Packet {
            ts: Timestamp::new(ts, 0),
            vlan_id: 0,
            l3_family: L3Family::V4,
            src_ip: IpAddr::V4([10, 0, 0, 1]),
            dst_ip: IpAddr::V4([10, 0, 0, 2]),
            l4_proto: 6,
            src_port,
            dst_port,
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
    fn both_directions_of_one_conversation_hash_to_the_same_shard() {
        let forward = packet(5555, 80, 0);
        let mut reverse = packet(80, 5555, 1);
        reverse.src_ip = IpAddr::V4([10, 0, 0, 2]);
        reverse.dst_ip = IpAddr::V4([10, 0, 0, 1]);
        assert_eq!(shard_of(&forward, 8), shard_of(&reverse, 8));
    }

    #[test]
    fn engine_flushes_all_shards_on_shutdown() {
        let registry = PluginRegistryBuilder::new().build();
        let engine = Engine::new(
            1,
            2,
            2,
            &FlowCacheConfig::default(),
            &registry,
            || Box::new(TextExporter::new()) as Box<dyn Exporter>,
        );
        engine.submit(0, packet(5555, 80, 0));
        let stats = engine.shutdown();
        let total_exports: u64 = stats.iter().map(|s| s.exports).sum();
        assert_eq!(total_exports, 1);
    }
}
