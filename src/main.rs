//! mixnode — Mixminion-style anonymous remailer node.

use clap::Parser;
use mixnode::config::Config;
use mixnode::packet::AlwaysInvalidUnwrap;
use mixnode::queue::ExitDispatcher;
use mixnode::transport::NullTransport;
use mixnode::Server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "mixnode", version, about = "Mixminion-style anonymous remailer node")]
struct Args {
    /// Path to mixnode.toml
    #[arg(short, long, default_value = "mixnode.toml")]
    config: PathBuf,

    /// Override the home directory from the config file
    #[arg(long)]
    home_dir: Option<PathBuf>,

    /// Log filter directive (overrides RUST_LOG)
    #[arg(long)]
    log_filter: Option<String>,

    /// Fork, detach, and redirect stdio; default is foreground under a
    /// process supervisor.
    #[arg(long)]
    daemon: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = args
        .log_filter
        .clone()
        .map(tracing_subscriber::EnvFilter::new)
        .unwrap_or_else(|| {
            tracing_subscriber::EnvFilter::from_default_env().add_directive("mixnode=info".parse().unwrap())
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("════════════════════════════════════════════════════════════");
    info!("  mixnode v{} — anonymous remailer node", VERSION);
    info!("════════════════════════════════════════════════════════════");

    let config = match Config::load(&args.config, args.home_dir.clone()) {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if args.daemon {
        if let Err(e) = daemonize() {
            error!("failed to daemonize: {}", e);
            std::process::exit(1);
        }
    }

    info!(nickname = %config.server.nickname, home = %config.home_dir.display(), "starting server");

    let transport = Arc::new(NullTransport);
    let unwrap_primitive = Arc::new(AlwaysInvalidUnwrap);
    let exit_dispatcher = ExitDispatcher::new();

    let server = match Server::start(config, transport, unwrap_primitive, exit_dispatcher).await {
        Ok(s) => s,
        Err(e) => {
            error!("failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    info!("mixnode running in {}", server.home_dir().display());

    if let Err(e) = server.run().await {
        error!("server exited with error: {}", e);
        std::process::exit(1);
    }

    info!("mixnode stopped");
}

/// Fork, detach from the controlling terminal, and redirect stdio to
/// `/dev/null`, mirroring the original `daemonize()` entry point named in
/// SPEC_FULL.md 10.7.
fn daemonize() -> std::io::Result<()> {
    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if pid > 0 {
            std::process::exit(0);
        }
        if libc::setsid() < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let dev_null = std::ffi::CString::new("/dev/null").unwrap();
        let fd = libc::open(dev_null.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, libc::STDIN_FILENO);
            libc::dup2(fd, libc::STDOUT_FILENO);
            libc::dup2(fd, libc::STDERR_FILENO);
            if fd > 2 {
                libc::close(fd);
            }
        }
    }
    Ok(())
}
