use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use lumistrip::infrastructure::bluetooth::{SAMPLE_WINDOW, SCAN_WINDOW};
use lumistrip::infrastructure::logging;
use lumistrip::{
    AppEvent, BtleplugTransport, ConnectionState, MessageSeverity, PreferencesService, StripService,
};

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  lumistrip scan");
    eprintln!("  lumistrip connect <ADDRESS> [--power on|off] [--color RRGGBB]");
    eprintln!("                    [--brightness 0-255] [--rename NAME]");
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut prefs = PreferencesService::new()?;
    let _logging = logging::init_logger(&prefs.get().log_settings)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return Ok(());
    }

    // Side-channel reports (scan errors, rejected writes) go to the log.
    let (app_tx, mut app_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(AppEvent::LogMessage(msg)) = app_rx.recv().await {
            match msg.severity {
                MessageSeverity::Error => error!("{}", msg.message),
                MessageSeverity::Warning => warn!("{}", msg.message),
                _ => info!("{}", msg.message),
            }
        }
    });

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = BtleplugTransport::new(transport_tx).await?;
    let service = StripService::spawn(Arc::new(transport), transport_rx, app_tx);

    match args[0].as_str() {
        "scan" => run_scan(&service, &prefs).await,
        "connect" if args.len() >= 2 => run_connect(&service, &mut prefs, &args).await,
        _ => {
            print_usage();
            Ok(())
        }
    }
}

async fn run_scan(service: &StripService, prefs: &PreferencesService) -> Result<()> {
    let mut scanning = service.observe_scanning();
    let mut results = service.observe_scan_results();
    service.start_scan();

    tokio::time::sleep(Duration::from_millis(200)).await;
    if !*scanning.borrow() {
        anyhow::bail!("scan did not start (see log for the transport error)");
    }
    println!(
        "Scanning for {}s, press Ctrl-C to abort...",
        SCAN_WINDOW.as_secs()
    );

    let mut printed = 0usize;
    loop {
        tokio::select! {
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                let devices = results.borrow_and_update().clone();
                for device in &devices[printed..] {
                    let marker = if prefs.is_favorite(&device.address) { "*" } else { " " };
                    println!(
                        "{marker} {}  {}",
                        device.address,
                        device.name.as_deref().unwrap_or("(unnamed)")
                    );
                }
                printed = devices.len();
            }
            changed = scanning.changed() => {
                if changed.is_err() || !*scanning.borrow_and_update() {
                    break;
                }
            }
        }
    }

    println!("{printed} device(s) found.");
    Ok(())
}

async fn run_connect(
    service: &StripService,
    prefs: &mut PreferencesService,
    args: &[String],
) -> Result<()> {
    let address = args[1].clone();

    let mut power: Option<bool> = None;
    let mut color: Option<String> = None;
    let mut brightness: Option<i32> = None;
    let mut rename: Option<String> = None;

    let mut iter = args[2..].iter();
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{name} requires a value"))
        };
        match flag.as_str() {
            "--power" => power = Some(value("--power")? == "on"),
            "--color" => color = Some(value("--color")?),
            "--brightness" => brightness = Some(value("--brightness")?.parse()?),
            "--rename" => rename = Some(value("--rename")?),
            other => anyhow::bail!("unknown flag {other:?}"),
        }
    }

    let mut connection = service.observe_connection_state();
    println!("Connecting to {address}...");
    service.connect(address.clone());

    let state = wait_for_session(&mut connection).await;
    if state != ConnectionState::Connected {
        anyhow::bail!("could not connect to {address} (ended in {state:?})");
    }
    prefs.set_last_connected(Some(address.clone()))?;

    if let Some(ds) = service.observe_device_state().borrow().clone() {
        println!("Power:  {}", if ds.is_on { "on" } else { "off" });
        println!(
            "Color:  #{}{}{}  brightness {}  white {}",
            ds.red, ds.green, ds.blue, ds.brightness, ds.white_brightness
        );
        println!(
            "Pixels: {} (IC model {}, channel {})",
            ds.pixel_count, ds.ic_model, ds.channel
        );
    }

    if let Some(on) = power {
        service.set_power(on);
    }
    if let Some(hex) = &color {
        service.set_color(hex)?;
    }
    if let Some(name) = &rename {
        service.rename(name)?;
    }
    if let Some(value) = brightness {
        service.set_brightness(value);
        // Let the sampling window forward the conflated value.
        tokio::time::sleep(SAMPLE_WINDOW * 2).await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    service.disconnect();
    loop {
        if *connection.borrow_and_update() == ConnectionState::Disconnected {
            break;
        }
        if connection.changed().await.is_err() {
            break;
        }
    }
    println!("Done.");
    Ok(())
}

/// Wait until the session either comes up or fails for good.
async fn wait_for_session(rx: &mut watch::Receiver<ConnectionState>) -> ConnectionState {
    loop {
        let state = *rx.borrow_and_update();
        match state {
            ConnectionState::Connected | ConnectionState::InvalidDevice => return state,
            _ => {}
        }
        if rx.changed().await.is_err() {
            return state;
        }
    }
}
