#[macro_use]
extern crate log;
extern crate clap;
extern crate client;
extern crate common;
extern crate env_logger;
extern crate signal_hook;

use clap::Parser;
use client::{CameraClient, Event};
use common::settings::Settings;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

/// Polls a camera server and prints per-camera frame rates.
#[derive(Parser, Debug)]
#[command(name = "camlink-client", version)]
struct Args {
    /// Server host, overrides `connection.host`.
    host: Option<String>,

    /// Server port, overrides `connection.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Settings file, with or without the `.toml` extension.
    #[arg(short, long, default_value = "Settings")]
    config: String,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut signals = match signal_hook::iterator::Signals::new(&[SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            error!("Unable to register signal handler: {}", e);
            std::process::exit(1);
        }
    };

    info!("Initializing a settings...");
    let settings = match Settings::from_file(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {}", e);
            std::process::exit(2);
        }
    };
    let host = args.host.unwrap_or(settings.connection.host);
    let port = args.port.unwrap_or(settings.connection.port);

    let (mut client, events) = CameraClient::new(settings.client);
    if let Err(e) = client.connect(&host, port) {
        error!("{}", e);
        std::process::exit(3);
    }

    let second = Duration::from_secs(1);
    let mut last_report = Instant::now();
    loop {
        if let Some(sig) = signals.pending().next() {
            info!("Received signal {:?}, disconnecting...", sig);
            break;
        }

        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(Event::Connected { cameras, server_info, .. }) => {
                info!("Connected: cameras {:?}, {}", cameras, server_info)
            }
            Ok(Event::Error { message, .. }) => warn!("{}", message),
            Ok(Event::ConnectionLost { reason }) => warn!("Connection lost: {}", reason),
            Ok(Event::Disconnected { reason }) => warn!("Disconnected: {}", reason),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_report.elapsed() < second {
            continue;
        }
        last_report = Instant::now();

        if client.is_connected() {
            let mut stats: Vec<_> = client.stats().into_iter().collect();
            stats.sort_by(|a, b| a.0.cmp(&b.0));
            for (camera, stats) in stats {
                println!(
                    "camera {}: {:.1} fps, {} frames, {} errors",
                    camera, stats.fps, stats.frames_received, stats.errors
                );
            }
        } else {
            info!("Reconnecting to {}:{}...", host, port);
            if let Err(e) = client.reconnect() {
                warn!("{}", e);
            }
        }
    }
    client.disconnect();
}
