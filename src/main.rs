use orderflow_provider::config::Settings;
use orderflow_provider::supervisor::{AppContext, Supervisor};
use orderflow_provider::transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting orderflow provider...");

    let args: Vec<String> = std::env::args().collect();
    let port_override = parse_args(&args);

    let mut settings = Settings::from_env().map_err(|e| {
        tracing::error!(error = %e, "Configuration error");
        e
    })?;
    if let Some(port) = port_override {
        settings.http_port = port;
    }

    tracing::info!(
        symbols = ?settings.symbols,
        port = settings.http_port,
        db = %settings.cache_db_path,
        "Configuration loaded"
    );

    let ctx = AppContext::initialize(settings)?;
    let supervisor = Supervisor::start(ctx.clone());

    // Serve HTTP until Ctrl+C, then unwind the supervisor
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal (Ctrl+C)");
                let _ = shutdown_tx.send(());
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
        }
    });

    transport::start_http_server(ctx, async {
        shutdown_rx.await.ok();
        tracing::info!("Shutting down HTTP server...");
    })
    .await?;

    supervisor.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

/// Parse command-line arguments; only `--port` overrides the environment
fn parse_args(args: &[String]) -> Option<u16> {
    let mut port = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    port
}

fn print_usage() {
    println!("orderflow-provider - MCP server for Binance futures orderflow data");
    println!();
    println!("USAGE:");
    println!("    orderflow-provider [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       HTTP port to listen on (default: 8022)");
    println!("    --help, -h          Print this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    SYMBOLS                     Comma-separated symbols (default: BTCUSDT,ETHUSDT)");
    println!("    MCP_HOST / MCP_PORT         Bind address (default: 0.0.0.0:8022)");
    println!("    BINANCE_REST_URL            REST base URL (default: https://fapi.binance.com)");
    println!("    BINANCE_WS_URL              WebSocket base URL (default: wss://fstream.binance.com)");
    println!("    CACHE_DB_PATH               SQLite path (default: ./data/orderflow_cache.db)");
    println!("    DATA_RETENTION_DAYS         Retention window (default: 7)");
    println!("    VALUE_AREA_PERCENT          Value area share (default: 70)");
    println!("    IMBALANCE_RATIO_THRESHOLD   Imbalance ratio (default: 3.0)");
    println!("    RUST_LOG                    Logging level (default: info)");
}
