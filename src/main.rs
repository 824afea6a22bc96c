//! Entry point: parses CLI flags, loads layered configuration, wires up
//! the engine and its worker threads, and serves the HTTP/WebSocket
//! transport until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use slog::{error, info, o};

use jittertrap::capture::SyntheticPacketSource;
use jittertrap::config::Settings;
use jittertrap::engine::Engine;
use jittertrap::link::SyntheticLink;
use jittertrap::logging;
use jittertrap::pcap::PcapConfig;
use jittertrap::sampler::SamplerConfig;
use jittertrap::{cli, http};

fn main() {
    let overrides = cli::parse();
    let _log_guard = logging::init_logger();
    let log = slog_scope::logger().new(o!("component" => "main"));

    let mut settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            error!(log, "failed to load configuration"; "error" => %e);
            std::process::exit(1);
        }
    };
    settings.apply_cli_overrides(&overrides);

    if overrides.daemonize {
        info!(log, "daemonize requested but running in foreground";
            "reason" => "daemonization is environment-specific and out of scope for this engine");
    }

    let link = Arc::new(SyntheticLink::new(settings.allowed_ifaces.clone()));
    let netem = Arc::clone(&link) as Arc<dyn jittertrap::link::NetemControl>;
    let link_stats = Arc::clone(&link) as Arc<dyn jittertrap::link::LinkStats>;
    let capture_source = Arc::new(SyntheticPacketSource::new(0xdead_beef));

    let initial_iface = settings
        .allowed_ifaces
        .first()
        .cloned()
        .unwrap_or_else(|| "eth0".into());

    let sampler_config = SamplerConfig {
        sample_period_us: settings.sample_period_us,
        messages_per_second: settings.messages_per_second,
    };

    if let Err(e) = std::fs::create_dir_all(&settings.pcap_output_dir) {
        error!(log, "failed to create pcap output directory"; "error" => %e);
        std::process::exit(1);
    }

    let engine = Engine::new(
        log.clone(),
        link_stats,
        netem,
        capture_source,
        initial_iface,
        sampler_config,
        PathBuf::from(&settings.pcap_output_dir),
        PcapConfig::default(),
    );

    let system = actix::System::new("jittertrap");
    let resource_path = PathBuf::from(&settings.resource_path);
    let pcap_output_dir = PathBuf::from(&settings.pcap_output_dir);
    let port = settings.web_server_port;
    let http_log = log.clone();
    let engine_for_http = Arc::clone(&engine);

    actix::spawn(async move {
        if let Err(e) = http::run(engine_for_http, resource_path, pcap_output_dir, port).await {
            error!(http_log, "HTTP server exited with error"; "error" => %e);
        }
    });

    info!(log, "jittertrap listening"; "port" => port);
    match system.run() {
        Ok(()) => {
            engine.shutdown();
            info!(log, "shutdown complete");
        }
        Err(e) => {
            error!(log, "actix system exited with error"; "error" => %e);
            engine.shutdown();
            std::process::exit(1);
        }
    }
}
