use std::process::exit;

use duskmud::config::{ConfigRegistry, Settings};
use duskmud::game::DemoGame;
use duskmud::server::Server;
use duskmud::{MudError, copyover};

const DEFAULT_PORT: u16 = 8888;

/// Duskhaven entry point
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    // Port from argv, same contract as every Diku descendant
    let port = match args.get(1) {
        None => DEFAULT_PORT,
        Some(arg) => match arg.parse::<u16>() {
            Ok(port) if port > 1024 => port,
            Ok(_) => {
                eprintln!("Port number must be above 1024.");
                exit(1);
            }
            Err(_) => {
                eprintln!("Usage: {} [port #]", args[0]);
                exit(1);
            }
        },
    };

    // Hot-restart recovery: argv = {exe, port, "copyover", listener_fd}
    let recovered_listener = match (args.get(2).map(String::as_str), args.get(3)) {
        (Some("copyover"), Some(fd)) => match fd.parse::<i32>() {
            Ok(fd) if fd >= 0 => Some(fd),
            _ => {
                eprintln!("Bad listener descriptor for copyover recovery.");
                exit(1);
            }
        },
        _ => None,
    };

    let settings = match Settings::load_from_file("duskmud.conf") {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "config error, using defaults");
            Settings::default()
        }
    };

    let mut config = ConfigRegistry::new();
    if let Err(e) = config.load(&settings.cfg_path()) {
        tracing::warn!(error = %e, "config registry load failed, using defaults");
    }
    let data_dir = settings.data_dir.clone();

    let mut server = match recovered_listener {
        Some(fd) => match Server::from_inherited(fd, port, settings, config) {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(error = %e, "could not adopt inherited listener");
                exit(1);
            }
        },
        None => match Server::new(port, settings, config) {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(error = %e, "could not open listening socket");
                exit(1);
            }
        },
    };

    let mut game = DemoGame::load(&data_dir);

    if recovered_listener.is_some() {
        tracing::info!("copyover recovery: re-attaching sessions");
        server.recover_sessions(&mut game);
    }

    copyover::install_crash_handler();

    match server.run(&mut game) {
        Ok(()) => exit(0),
        Err(MudError::Restart(msg)) => {
            tracing::error!(%msg, "hot restart failed");
            exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal server error");
            exit(1);
        }
    }
}
