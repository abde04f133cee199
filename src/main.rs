use std::env;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info};

use floodgate::config;
use floodgate::server::Reactor;

const DEFAULT_CONFIG: &str = "floodgate.conf";

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
        // A client vanishing mid-write must not kill the process.
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

fn main() {
    env_logger::init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}: {}", config_path, e);
            exit(1);
        }
    };

    install_signal_handlers();

    let mut reactor = match Reactor::new(config) {
        Ok(reactor) => reactor,
        Err(e) => {
            error!("startup failed: {}", e);
            exit(1);
        }
    };
    if let Err(e) = reactor.run(&SHUTDOWN) {
        error!("reactor failed: {}", e);
        exit(1);
    }
    info!("bye");
}
