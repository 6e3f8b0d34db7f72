/*!
 * Restune Daemon - Main Entry Point
 *
 * Boot order: logging, config directory, registries, server context,
 * then block until SIGINT/SIGTERM and shut down in reverse.
 */

use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use restune::config;
use restune::Server;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signum: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action);
        let _ = sigaction(Signal::SIGTERM, &action);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_dir =
        std::env::var("RESTUNE_CONFIG_DIR").unwrap_or_else(|_| "/etc/restune".to_string());
    let socket_path =
        std::env::var("RESTUNE_SOCKET").unwrap_or_else(|_| "/run/restune.sock".to_string());

    info!("restune starting, config dir {}", config_dir);
    let loaded = match config::load_dir(&config_dir) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("config load failed: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = Server::builder()
        .targets(loaded.targets)
        .resources(loaded.resources)
        .signals(loaded.signals)
        .apps(loaded.apps)
        .properties(loaded.properties)
        .socket_path(socket_path)
        .build();

    if let Err(e) = server.start() {
        error!("server start failed: {}", e);
        std::process::exit(1);
    }

    install_signal_handlers();
    info!("running; send SIGINT or SIGTERM to stop");
    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    server.shutdown();
    info!("bye");
}
