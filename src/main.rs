#![cfg_attr(not(feature = "cli"), allow(dead_code))]

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use flowprobe::capture::{CaptureSource, GetResult, PacketBlock, PcapFileCapture};
    use flowprobe::config::PipelineConfig;
    use flowprobe::export::{Exporter, TextExporter};
    use flowprobe::fragmentation::FragmentCache;
    use flowprobe::plugin::PluginRegistryBuilder;
    use flowprobe::plugins::{TlsPlugin, WireGuardPlugin};
    use flowprobe::types::Flow;
    use flowprobe::Engine;
    use flowprobe::PacketParser;

    env_logger::init();

    let mut args = std::env::args().skip(1);
    let pcap_file = args
        .next()
        .unwrap_or_else(|| "capture.pcap".to_string());
    let config_path = args.next();

    let config = match config_path {
        Some(path) => PipelineConfig::from_file(&path)?,
        None => PipelineConfig::default(),
    };

    let mut builder = PluginRegistryBuilder::new();
    builder.register("tls", |id| Box::new(TlsPlugin::new(id)));
    builder.register("wireguard", |id| Box::new(WireGuardPlugin::new(id)));
    let registry = builder.build();

    struct StdoutExporter;
    impl Exporter for StdoutExporter {
        fn export_flow(&mut self, flow: &Flow) -> i32 {
            println!("{}", TextExporter::render_flow(flow));
            0
        }
    }

    const NUM_SHARDS: usize = 4;
    let engine = Engine::new(
        1,
        4,
        NUM_SHARDS,
        &config.flow_cache,
        &registry,
        || Box::new(StdoutExporter) as Box<dyn Exporter>,
    );

    let mut capture = PcapFileCapture::open(&pcap_file)?;
    let mut parser = PacketParser::new();
    let mut frag_cache = FragmentCache::new(config.frag_cache.timeout_secs);
    let mut block = PacketBlock::new();

    loop {
        match capture.get(&mut block) {
            GetResult::Parsed => {
                for slot in block.filled() {
                    let Some(frame) = slot else { continue };
                    match parser.parse(&frame.data, frame.ts, frame.wire_len, 0) {
                        Ok(mut pkt) => {
                            frag_cache.cache_packet(&mut pkt, frame.ts);
                            engine.submit(0, pkt);
                        }
                        Err(e) => log::debug!("dropping unparsable frame: {e}"),
                    }
                }
            }
            GetResult::Timeout => continue,
            GetResult::NotParsed => break,
            GetResult::Error(message) => {
                log::error!("capture source failed: {message}");
                break;
            }
        }
    }

    let capture_stats = capture.stats();
    let shard_stats = engine.shutdown();

    log::info!(
        "capture: {} packets received, {} dropped",
        capture_stats.packets_received,
        capture_stats.packets_dropped,
    );
    for (idx, stats) in shard_stats.iter().enumerate() {
        log::info!(
            "shard {idx}: {} packets, {} exports, {} fin/rst flushes, {} dropped by plugin",
            stats.packets_processed,
            stats.exports,
            stats.fin_rst_flushes,
            stats.dropped_by_plugin,
        );
    }

    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("This binary requires the 'cli' feature to be enabled.");
    eprintln!("Please build with: cargo build --features cli");
    std::process::exit(1);
}
