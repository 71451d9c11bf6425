#[macro_use]
extern crate log;
extern crate clap;
extern crate common;
extern crate server;
extern crate signal_hook;

use clap::Parser;
use common::settings::Settings;
use server::{capture, utils, StreamServer};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::thread;
use std::time;

/// Camera frame server for embedded boards.
#[derive(Parser, Debug)]
#[command(name = "camlink-server", version)]
struct Args {
    /// Settings file, with or without the `.toml` extension.
    #[arg(short, long, default_value = "Settings")]
    config: String,

    /// Port to listen on, overrides `connection.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    println!("Starting...");
    let args = Args::parse();

    let mut signals = match signal_hook::iterator::Signals::new(&[SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            println!("Unable to register signal handler: {}", e);
            std::process::exit(1);
        }
    };

    let mut settings = match Settings::from_file(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            println!("Failed to load settings: {}", e);
            println!("Exiting...");
            std::process::exit(2);
        }
    };
    if let Some(port) = args.port {
        settings.connection.port = port;
    }

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if let Err(e) = utils::init_logger(settings.server.log_file.as_deref(), level) {
        println!("Unable to initialize logger: {}", e);
        println!("Exiting...");
        std::process::exit(1);
    }

    info!("Initializing {:?} capture source...", settings.video.source);
    let source = match capture::from_settings(&settings.video) {
        Ok(source) => source,
        Err(e) => {
            error!("{}", e);
            error!("Exiting...");
            std::process::exit(3);
        }
    };

    let mut server = StreamServer::new(settings);
    if let Err(e) = server.start(source) {
        error!("Failed to start the server: {}", e);
        error!("Exiting...");
        std::process::exit(3);
    }

    info!("Starting event loop...");
    loop {
        if let Some(sig) = signals.pending().next() {
            info!("Received signal {:?}, exiting...", sig);
            break;
        }
        thread::sleep(time::Duration::from_millis(200));
    }
    server.stop();
}
