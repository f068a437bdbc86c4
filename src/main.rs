//! CLI entrypoint: loads settings, brings up a local identity, and reports
//! readiness. Wiring a concrete `Transport`/`DhtHandle` pair is left to the
//! embedding application; this binary exercises the core crate's config and
//! identity bootstrap.

use clap::Parser;
use kiyeovo_core::config::Settings;
use kiyeovo_core::crypto::Identity;

#[derive(Parser, Debug)]
#[command(name = "kiyeovo", version, about = "Secure-messaging core")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long)]
    config: Option<String>,

    /// Username to register, overriding the config file.
    #[arg(long)]
    username: Option<String>,
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(username) = cli.username {
        settings.username = username;
    }

    init_tracing(&settings.log_level);

    let identity = Identity::generate();
    tracing::info!(
        peer_id = %identity.peer_id(),
        username = %settings.username,
        contact_mode = ?settings.contact_mode,
        "kiyeovo core initialized"
    );

    Ok(())
}
