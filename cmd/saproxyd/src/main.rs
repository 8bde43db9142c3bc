//! saproxyd
//!
//! Inherits one listening socket from its supervisor and relays every
//! client it accepts to a fixed destination, bytes unmodified both ways.
//!
//! Usage:
//!     saproxyd [--ignore-env] hostname-or-ip port-or-service
//!     saproxyd [--ignore-env] /path/to/unix-domain-socket
//!
//! Try it without a supervisor:
//!     systemd-socket-activate -l 8080 ./target/release/saproxyd localhost 80
//!
//! Log level comes from `SAPROXY_LOG` (default `info`).

use saproxy::activation;
use saproxy::{Listener, Proxy, ProxyConfig, SocketConnector};
use saproxy_core::AddressSpec;
use saproxy_reactor::PlatformReactor;

use clap::Parser;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

static STOP: AtomicBool = AtomicBool::new(false);

const USAGE: &str = "saproxyd [OPTIONS] <hostname-or-ip> <port-or-service>
       saproxyd [OPTIONS] <unix-domain-socket-path>";

/// Inherit a socket. Bidirectionally proxy.
#[derive(Debug, Parser)]
#[command(name = "saproxyd", version, about, override_usage = USAGE)]
struct Cli {
    /// IP address, hostname, or absolute path of a Unix domain socket
    #[arg(value_name = "DESTINATION")]
    destination: String,

    /// Port number or service name (IP destinations only)
    #[arg(value_name = "PORT_OR_SERVICE")]
    service: Option<String>,

    /// Don't check the LISTEN_PID/LISTEN_FDS environment; use fd 3 as is
    #[arg(long)]
    ignore_env: bool,
}

extern "C" fn handle_stop(_: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() -> saproxy_core::Result<()> {
    // No SA_RESTART: the reactor wait must return so the loop sees STOP.
    let action = SigAction::new(SigHandler::Handler(handle_stop), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { sigaction(sig, &action) }?;
    }
    Ok(())
}

fn run(cli: Cli) -> saproxy_core::Result<()> {
    let destination = AddressSpec::parse(&cli.destination, cli.service.as_deref())?;
    let config = ProxyConfig::from_env(destination).ignore_env(cli.ignore_env);
    config.validate()?;

    let listener = activation::inherit_listener(config.ignore_env)?;
    info!(
        fd = listener.fd(),
        destination = %config.destination,
        buffer_size = config.buffer_size,
        "starting the socket activation proxy"
    );

    install_signal_handlers()?;

    let mut reactor = PlatformReactor::new(config.max_events)?;
    let mut proxy = Proxy::new(&config, listener, SocketConnector);
    proxy.start(&mut reactor)?;

    let result = saproxy_core::run(&mut reactor, &mut proxy, &STOP);
    proxy.shutdown(&mut reactor);
    result
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("SAPROXY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli) {
        Ok(()) => {
            info!("shutting down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "saproxyd failed");
            ExitCode::FAILURE
        }
    }
}
