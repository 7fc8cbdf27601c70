//! smart-proxy: rule-based connection router
//!
//! This is the main entry point for the proxy daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./smart-proxy
//!
//! # Run with custom configuration
//! ./smart-proxy -c /path/to/config.json
//!
//! # Run with environment overrides
//! SMART_PROXY_LOG_LEVEL=debug ./smart-proxy
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use smart_proxy::config::{load_config_with_env, Config};
use smart_proxy::ingress::{
    HttpProxyServer, HttpServerConfig, Socks5ProxyServer, Socks5ServerConfig,
};
use smart_proxy::ipc::{IpcHandler, IpcServer};
use smart_proxy::router::{ConnectionRouter, RouterConfig};
use smart_proxy::rules::RuleStore;
use smart_proxy::speedtest::{SpeedTester, SpeedTesterConfig};
use smart_proxy::stats::StatsCollector;
use smart_proxy::tunnel::UpstreamTunnelManager;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/smart-proxy/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("smart-proxy v{}", smart_proxy::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"smart-proxy v{}

Rule-based connection router: local HTTP CONNECT and SOCKS5 proxies that
send selected domains through an upstream SOCKS5 tunnel and everything
else directly.

USAGE:
    smart-proxy [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/smart-proxy/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    SMART_PROXY_HTTP_LISTEN      Override HTTP CONNECT listener address
    SMART_PROXY_SOCKS5_LISTEN    Override SOCKS5 listener address
    SMART_PROXY_TUNNEL_ADDR      Override upstream tunnel entry address
    SMART_PROXY_IPC_SOCKET       Override IPC socket path
    SMART_PROXY_LOG_LEVEL        Override log level (trace, debug, info, warn, error)

EXAMPLE:
    # Route Telegram through the tunnel, keep everything else local
    smart-proxy -g -c proxy.json
    # edit proxy.json: add {{"pattern": "*.telegram.org", "action": "proxy"}}
    smart-proxy -c proxy.json
"#,
        smart_proxy::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse().unwrap());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Seed the rule store from configuration
fn seed_rules(config: &Config, rules: &RuleStore) -> Result<()> {
    for seed in &config.rules {
        rules
            .upsert(&seed.pattern, seed.action)
            .map_err(|e| anyhow::anyhow!("Invalid rule '{}': {}", seed.pattern, e))?;
    }

    if !config.rules.is_empty() {
        info!(count = config.rules.len(), "Seeded rules from configuration");
    }

    Ok(())
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        smart_proxy::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // Load configuration
    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config);

    info!("smart-proxy v{}", smart_proxy::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    // Shared state
    let rules = Arc::new(RuleStore::new());
    seed_rules(&config, &rules)?;

    let stats = Arc::new(StatsCollector::new());
    let tunnel = Arc::new(UpstreamTunnelManager::new(config.tunnel.to_tunnel_config()));

    if config.tunnel.autostart {
        info!("Starting upstream tunnel (autostart enabled)");
        tunnel.start().await;
    }

    // Router shared by both listeners
    let router = Arc::new(ConnectionRouter::new(
        Arc::clone(&rules),
        Arc::clone(&tunnel),
        Arc::clone(&stats),
        RouterConfig {
            direct_timeout: config.timeouts.direct_connect(),
            proxy_timeout: config.timeouts.proxy_connect(),
            probe_timeout: config.timeouts.probe_connect(),
            idle_timeout: config.timeouts.idle(),
        },
    ));

    // Listeners
    let http_server = Arc::new(HttpProxyServer::new(
        HttpServerConfig {
            listen_addr: config.http_listen,
            handshake_timeout: config.timeouts.handshake(),
            max_header_bytes: config.max_header_bytes,
        },
        Arc::clone(&router),
    ));
    let socks5_server = Arc::new(Socks5ProxyServer::new(
        Socks5ServerConfig {
            listen_addr: config.socks5_listen,
            handshake_timeout: config.timeouts.handshake(),
        },
        Arc::clone(&router),
    ));

    // IPC server
    let speedtest = Arc::new(SpeedTester::new(
        SpeedTesterConfig {
            probe_timeout: config.tunnel.to_tunnel_config().connect_timeout,
            ..SpeedTesterConfig::default()
        },
        Arc::clone(&tunnel),
        Arc::clone(&stats),
    ));
    let ipc_handler = Arc::new(IpcHandler::new(
        Arc::clone(&rules),
        Arc::clone(&tunnel),
        Arc::clone(&stats),
        speedtest,
    ));
    let ipc_server = IpcServer::new(config.ipc.clone(), ipc_handler);
    let ipc_shutdown = ipc_server.shutdown_sender();

    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            error!("IPC server error: {}", e);
        }
    });

    let http_run = {
        let server = Arc::clone(&http_server);
        tokio::spawn(async move { server.run().await })
    };
    let socks5_run = {
        let server = Arc::clone(&socks5_server);
        tokio::spawn(async move { server.run().await })
    };

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    // Wait for a listener to fail or a shutdown signal
    let run_result: Result<()> = tokio::select! {
        result = http_run => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::anyhow!("HTTP listener error: {}", e)),
                Err(e) => Err(anyhow::anyhow!("HTTP listener panicked: {}", e)),
            }
        }
        result = socks5_run => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(anyhow::anyhow!("SOCKS5 listener error: {}", e)),
                Err(e) => Err(anyhow::anyhow!("SOCKS5 listener panicked: {}", e)),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            Ok(())
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            Ok(())
        }
    };

    // Graceful shutdown
    info!("Shutting down...");

    http_server.shutdown();
    socks5_server.shutdown();

    let _ = ipc_shutdown.send(());
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), ipc_handle).await;

    if let Err(e) = tunnel.stop().await {
        error!("Tunnel stop failed during shutdown: {}", e);
    }

    // Log final stats
    let totals = stats.totals();
    info!(
        "Final stats: {} total connections ({} direct, {} proxied, {} fallback, {} failed)",
        totals.total_connections,
        totals.direct_connections,
        totals.proxy_connections,
        totals.fallback_connections,
        totals.failed_connections
    );
    info!(
        "Transferred: {} bytes up, {} bytes down",
        totals.bytes_up, totals.bytes_down
    );

    info!("Shutdown complete");

    run_result
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await
}
