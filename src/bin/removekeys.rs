//! mixnode-removekeys — mirrors the original `removeKeys`: remove a named
//! KeySet's directory and replay log after confirming it is not currently
//! live. See SPEC_FULL.md 10.7.

use clap::Parser;
use mixnode::config::Config;
use mixnode::keyring::Keyring;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mixnode-removekeys", version, about = "Remove an expired mixnode key set")]
struct Args {
    #[arg(short, long, default_value = "mixnode.toml")]
    config: PathBuf,

    #[arg(long)]
    home_dir: Option<PathBuf>,

    /// Key set number to remove, e.g. 3
    #[arg(long, conflicts_with = "all")]
    key: Option<u32>,

    /// Remove every non-live key set
    #[arg(long)]
    all: bool,

    /// Remove even if the key set is currently live
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("mixnode=info".parse().unwrap()))
        .init();

    let args = Args::parse();
    if args.key.is_none() && !args.all {
        eprintln!("specify --key <N> or --all");
        std::process::exit(1);
    }

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

    let now = chrono::Utc::now();
    let targets = if args.all { keyring.all_keyset_numbers().await } else { vec![args.key.unwrap()] };

    let mut failures = 0;
    for number in targets {
        match keyring.remove_keyset(number, args.force, now).await {
            Ok(()) => println!("removed key set {:04}", number),
            Err(e) => {
                eprintln!("key set {:04}: {}", number, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
}
