//! The multi-source ordering mesh (§4.3): a tree of fan-in-`P` sorter
//! nodes feeding a single indexer node that assigns dense monotonic
//! ordinals in global timestamp order.

use super::queue::{ConcurrentQueue, Timestamped};
use crate::types::{IndexerItem, Packet, Timestamp};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

impl Timestamped for IndexerItem {
    fn timestamp(&self) -> Timestamp {
        self.packet.ts
    }
}

type Queue = Arc<ConcurrentQueue<IndexerItem>>;

struct SorterNode {
    inputs: Vec<Queue>,
    output: Queue,
    running: Arc<AtomicBool>,
}

impl SorterNode {
    fn run(self) {
        'outer: loop {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            for input in &self.inputs {
                if !input.wait_for_element() {
                    // One input drained and stopped: the mesh can no
                    // longer guarantee a total order across all P inputs,
                    // so this sorter winds down.
                    break 'outer;
                }
            }
            // Deterministic tie-break: strict '<' keeps the lowest index
            // on equal timestamps, per §4.3.
            let mut min_idx = 0;
            let mut min_ts = match self.inputs[0].front_timestamp() {
                Some(ts) => ts,
                None => continue,
            };
            for (idx, input) in self.inputs.iter().enumerate().skip(1) {
                if let Some(ts) = input.front_timestamp() {
                    if ts < min_ts {
                        min_ts = ts;
                        min_idx = idx;
                    }
                }
            }
            if let Some(item) = self.inputs[min_idx].pop() {
                self.output.push(item);
            }
        }
        self.output.stop();
    }
}

struct IndexerNode {
    input: Queue,
    output: Queue,
    next_ordinal: AtomicU64,
}

impl IndexerNode {
    fn run(self) {
        while let Some(mut item) = self.input.pop() {
            item.packet.ordinal = self.next_ordinal.fetch_add(1, Ordering::SeqCst);
            self.output.push(item);
        }
        self.output.stop();
    }
}

/// Owns the whole sorter tree plus the root indexer, and the worker
/// threads that drive them.
pub struct IndexerMesh {
    inputs: Vec<Queue>,
    output: Queue,
    threads: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl IndexerMesh {
    /// `num_inputs` capture sources feed the mesh; no merge step fans in
    /// more than `fan_in` inputs at once (§4.3).
    pub fn new(num_inputs: usize, fan_in: usize) -> Self {
        assert!(num_inputs >= 1, "mesh needs at least one input");
        assert!(fan_in >= 2, "fan-in must be at least 2");

        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::new();

        let leaf_inputs: Vec<Queue> = (0..num_inputs).map(|_| Arc::new(ConcurrentQueue::new())).collect();
        let mut current_level = leaf_inputs.clone();

        while current_level.len() > 1 {
            let mut next_level = Vec::new();
            for chunk in current_level.chunks(fan_in) {
                let out: Queue = Arc::new(ConcurrentQueue::new());
                let sorter = SorterNode {
                    inputs: chunk.to_vec(),
                    output: out.clone(),
                    running: running.clone(),
                };
                threads.push(thread::spawn(move || sorter.run()));
                next_level.push(out);
            }
            current_level = next_level;
        }
        let root_output = current_level
            .into_iter()
            .next()
            .expect("at least one input guarantees a root");

        let indexer_output: Queue = Arc::new(ConcurrentQueue::new());
        let indexer = IndexerNode {
            input: root_output,
            output: indexer_output.clone(),
            next_ordinal: AtomicU64::new(0),
        };
        threads.push(thread::spawn(move || indexer.run()));

        Self {
            inputs: leaf_inputs,
            output: indexer_output,
            threads,
            running,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn submit(&self, input_index: usize, packet: Packet) {
        self.inputs[input_index].push(IndexerItem { packet, input_index });
    }

    /// The single globally-ordered output queue, consumed by the flow
    /// cache layer.
    pub fn output(&self) -> &ConcurrentQueue<IndexerItem> {
        &self.output
    }

    /// A cloned, independently-owned handle to the output queue, for a
    /// dispatcher that must outlive a borrow of `self` (e.g. running on
    /// its own thread while the mesh itself is joined later).
    pub fn output_handle(&self) -> Arc<ConcurrentQueue<IndexerItem>> {
        self.output.clone()
    }

    /// Stops every input queue, which unwinds the whole tree: each
    /// sorter's blocked `wait_for_element` wakes, observes a stopped
    /// input, and stops its own output — which cascades up to the root
    /// and finally to `output`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        for input in &self.inputs {
            input.stop();
        }
    }

    pub fn join(self) {
        for t in self.threads {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IpAddr, L3Family};

    fn packet_at(secs: u32) -> Packet {
        Packet {
            ts: Timestamp::new(secs, 0),
            vlan_id: 0,
            l3_family: L3Family::V4,
            src_ip: IpAddr::V4([0, 0, 0, 0]),
            dst_ip: IpAddr::V4([0, 0, 0, 0]),
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
            wire_len: 0,
            truncated: false,
            input_index: 0,
            ordinal: 0,
        }
    }

    #[test]
    fn orders_two_sources_by_timestamp_and_assigns_dense_ordinals() {
        let mesh = IndexerMesh::new(2, 2);
        mesh.submit(0, packet_at(1));
        mesh.submit(1, packet_at(2));
        mesh.submit(0, packet_at(3));
        mesh.submit(1, packet_at(4));
        mesh.submit(0, packet_at(5));
        mesh.submit(1, packet_at(6));
        mesh.stop();

        let mut seen = Vec::new();
        while let Some(item) = mesh.output().pop() {
            seen.push((item.packet.ts.secs, item.packet.ordinal));
        }
        mesh.join();

        assert_eq!(seen.len(), 6);
        let secs: Vec<u32> = seen.iter().map(|(s, _)| *s).collect();
        assert_eq!(secs, vec![1, 2, 3, 4, 5, 6]);
        let ordinals: Vec<u64> = seen.iter().map(|(_, o)| *o).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn single_input_bypasses_sorter_tree() {
        let mesh = IndexerMesh::new(1, 4);
        mesh.submit(0, packet_at(10));
        mesh.submit(0, packet_at(11));
        mesh.stop();
        let first = mesh.output().pop().unwrap();
        let second = mesh.output().pop().unwrap();
        assert_eq!(first.packet.ordinal, 0);
        assert_eq!(second.packet.ordinal, 1);
        mesh.join();
    }
}
