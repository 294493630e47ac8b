use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use connectionless_telemetry::bluetooth::spawn_adapter_driver;
use connectionless_telemetry::utils::format_device_row;
use connectionless_telemetry::{
    AdvertisementFilter, Device, Radio, RadioEvent, ScanConfig, ScanSession, SessionOptions,
    SessionState,
};

fn print_summary<R: Radio>(session: &ScanSession<R>) {
    let stats = session.stats();
    let devices = session.registry().snapshot();

    info!(
        "Session {:?}: {} devices, {} advertisements ({} accepted, {} ignored, {} undecodable)",
        session.state(),
        devices.len(),
        stats.received,
        stats.accepted,
        stats.rejected + stats.dropped,
        stats.decode_failures
    );
    for device in devices.iter() {
        info!("  {}", format_device_row(device));
    }

    // Warning if nothing has been heard yet
    if devices.is_empty() && session.state() == SessionState::Scanning {
        warn!("No devices discovered yet!");
    }
}

async fn run(config: ScanConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting connectionless telemetry scanner");

    let (radio, mut events, driver) = spawn_adapter_driver(&config);
    let mut session = ScanSession::new(
        radio,
        SessionOptions {
            filter: AdvertisementFilter::new(config.service_uuid),
            allow_duplicates: config.allow_duplicates,
        },
    );

    // Presentation runs on its own task so the advertisement path never waits on it
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<Arc<Device>>();
    session.subscribe(Box::new(updates_tx));
    let presenter = tokio::spawn(async move {
        while let Some(device) = updates_rx.recv().await {
            debug!("{}", device);
        }
    });

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        let _ = tx.send(());
    });

    let mut summary = interval(Duration::from_secs(config.summary_interval_secs));
    summary.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    session.handle_event(event);
                    if session.state() == SessionState::Terminal {
                        error!("Bluetooth adapter unsupported, giving up");
                        break;
                    }
                }
                None => {
                    warn!("Bluetooth driver exited");
                    break;
                }
            },
            _ = summary.tick() => print_summary(&session),
            _ = &mut rx => {
                info!("Program terminated by user. Exiting gracefully.");
                break;
            }
        }
    }

    session.stop();
    print_summary(&session);

    // Dropping the session closes the command and update channels
    drop(session);
    drop(events);
    let _ = presenter.await;
    driver.abort();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match ScanConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match run(config).await {
        Ok(_) => info!("Program completed successfully"),
        Err(e) => error!("Fatal error: {}", e),
    }

    Ok(())
}
