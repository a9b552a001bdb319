//! ashd server binary entry point.
//!
//! Binds the trusted socket and runs audited shell sessions until
//! interrupted.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use ashd_core::sink::DirSinkFactory;
use ashd_server::{Cli, PasswdResolver, ServerConfig, SshServer, TcpSessionSource};

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let log_format = cli.log_format.into();
    if let Err(e) = ashd_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let config = ServerConfig {
        version: cli.server_version(),
        require_root: true,
    };

    let server = match SshServer::new(config, DirSinkFactory::new(&cli.log_dir)) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start server");
            std::process::exit(1);
        }
    };

    let source = match TcpSessionSource::bind(
        cli.socket_addr(),
        Arc::new(PasswdResolver),
        cli.hello_timeout(),
    )
    .await
    {
        Ok(source) => source,
        Err(e) => {
            error!(addr = %cli.socket_addr(), error = %e, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    info!(
        addr = %source.local_addr(),
        log_dir = %cli.log_dir.display(),
        "Listening for sessions"
    );

    // Ctrl-C triggers the same shutdown path as internal fail-fast errors.
    let shutdown = server.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.trigger();
        }
    });

    if let Err(e) = server.serve(source).await {
        error!(error = %e, "Server terminated with error");
        std::process::exit(1);
    }
}
