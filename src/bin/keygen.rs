//! mixnode-keygen — run `createKeysAsNeeded()` once and exit. Used to
//! pre-seed keys before first start, or to force early rotation. See
//! SPEC_FULL.md 10.7.

use clap::Parser;
use mixnode::config::Config;
use mixnode::keyring::Keyring;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mixnode-keygen", version, about = "Mixnode key generation tool")]
struct Args {
    #[arg(short, long, default_value = "mixnode.toml")]
    config: PathBuf,

    #[arg(long)]
    home_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("mixnode=info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config, args.home_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let incoming = config.incoming.clone();
    let keyring = match Keyring::open(
        config.keys_dir(),
        config.hashlogs_dir(),
        config.keyring.clone(),
        config.server.nickname.clone(),
        config.server.contact.clone(),
        config.server.comments.clone(),
        incoming.as_ref().and_then(|i| i.hostname.clone()),
        incoming.as_ref().and_then(|i| i.ip.clone()),
        incoming.as_ref().map(|i| i.port).unwrap_or(48099),
    ) {
        Ok(k) => Arc::new(k),
        Err(e) => {
            eprintln!("failed to open keyring: {}", e);
            std::process::exit(1);
        }
    };

    match keyring.create_keys_as_needed(chrono::Utc::now()).await {
        Ok(generated) => {
            println!("generated {} new key set(s)", generated);
        }
        Err(e) => {
            eprintln!("key generation failed: {}", e);
            std::process::exit(1);
        }
    }
}
