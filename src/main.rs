//! Brook Server
//!
//! Run with: cargo run [serve|<command>|help] [--force]
//!
//! Environment variables:
//! - BROOK_HOST: Bind address (default: 0.0.0.0)
//! - BROOK_PORT: Port number (default: 8080)
//! - BROOK_DATA_DIR: Data directory (default: unset, keep everything in memory)
//! - BROOK_SYNC_INTERVAL_SECS: Seconds between fsyncs of the stream logs (default: 10)
//! - BROOK_SYNC_ON_APPEND: Fsync every insert before acknowledging it (default: false)
//! - BROOK_TRANSFORM_CACHE_SIZE: Parsed transforms kept in memory (default: 1000)
//! - BROOK_ADMIN_KEY: API key registered as the `admin` user on startup
//! - BROOK_FORCE_START: Start even if another instance holds the pid lock
//! - RUST_LOG: Log level (default: info)

use brook::api::{run_server, ServerConfig};
use brook::plugins::default_registry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brook=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = ServerConfig::from_env();
    if let Some(pos) = args.iter().position(|a| a == "--force") {
        args.remove(pos);
        config.force_start = true;
    }

    let command = if args.is_empty() {
        "serve".to_string()
    } else {
        args.remove(0)
    };
    let plugins = default_registry();

    match command.as_str() {
        "serve" => {
            println!(
                r#"
 ~~~ Brook ~~~
 Authorized Time-Series Stream Store
 Version: {}
"#,
                env!("CARGO_PKG_VERSION")
            );

            run_server(config).await
        }
        "help" | "--help" | "-h" => {
            println!("Usage: brook [serve|<command>|help] [--force]\n\nCommands:");
            println!("  {:<12}Run the HTTP server (default)", "serve");
            println!("{}", plugins.usage());
            Ok(())
        }
        name => {
            let db = config.open_database()?;
            let outcome = plugins.run(name, &db, &args)?;
            if !outcome.message.is_empty() {
                println!("{}", outcome.message);
            }
            std::process::exit(outcome.status.exit_code());
        }
    }
}
