//! mwhost example — runs a client session against an in-process demo server
//! or, with `--tcp`, a real one.
//!
//! Run with:
//!   cargo run -p mwhost-example
//!   cargo run -p mwhost-example -- --background --redirect-to backup.example.com
//!   RUST_LOG=debug cargo run -p mwhost-example -- --tcp --host 127.0.0.1

use clap::Parser;
use tracing_subscriber::EnvFilter;

// ---

mod config;
mod handlers;
mod sim_demo;
mod tcp_demo;

// ---

use config::Config;

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        user = %cfg.user,
        endpoint = %cfg.endpoint(),
        background = cfg.background(),
        "mwhost-example starting",
    );

    if cfg.tcp {
        println!("=== TCP session: {} ===", cfg.endpoint());
        tcp_demo::run(&cfg).await?;
    } else {
        println!("=== Link simulator session ===");
        sim_demo::run(&cfg).await?;
    }

    Ok(())
}
