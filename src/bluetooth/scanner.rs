/// BlueZ-backed radio driver feeding advertisements into a scan session
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport, Uuid,
};
use futures_util::stream::{Stream, StreamExt};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Sleep};

use crate::config::ScanConfig;
use crate::models::{DeviceId, RawAdvertisement};
use crate::session::{AdapterState, Radio, RadioError, RadioEvent};

// Bluetooth base UUID 00000000-0000-1000-8000-00805F9B34FB
const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
const SHORT_UUID_MASK: u128 = 0xFFFF << 96;
const START_RETRY_SECS: u64 = 5; // Delay before re-reporting adapter power after a failed start

type EventStream<'a> = Pin<Box<dyn Stream<Item = AdapterEvent> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanCommand {
    Start { service: u16, allow_duplicates: bool },
    Stop,
}

/// Handle the session uses to control the driver task
///
/// Commands are queued, never awaited, so calls return immediately.
#[derive(Debug, Clone)]
pub struct BluerRadio {
    commands: mpsc::UnboundedSender<ScanCommand>,
}

impl Radio for BluerRadio {
    fn start_scan(
        &mut self,
        service_filter: u16,
        allow_duplicates: bool,
    ) -> Result<(), RadioError> {
        self.commands
            .send(ScanCommand::Start {
                service: service_filter,
                allow_duplicates,
            })
            .map_err(|_| RadioError::DriverStopped)
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.commands
            .send(ScanCommand::Stop)
            .map_err(|_| RadioError::DriverStopped)
    }
}

/// Start the driver task for the configured adapter
///
/// All adapter state changes and advertisements are delivered, in order,
/// on the returned receiver. An adapter that cannot be opened is reported
/// as [`AdapterState::Unsupported`].
pub fn spawn_adapter_driver(
    config: &ScanConfig,
) -> (BluerRadio, mpsc::UnboundedReceiver<RadioEvent>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let adapter_name = config.adapter_name.clone();

    let handle = tokio::spawn(async move {
        // The session must outlive the adapter handle
        let (_session, adapter) = match open_adapter(adapter_name.as_deref()).await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Failed to open Bluetooth adapter: {}", e);
                let _ = event_tx.send(RadioEvent::StateChanged(AdapterState::Unsupported));
                return;
            }
        };

        if let Err(e) = drive(&adapter, command_rx, &event_tx).await {
            error!("Bluetooth driver stopped: {}", e);
            let _ = event_tx.send(RadioEvent::StateChanged(AdapterState::PoweredOff));
        }
    });

    (
        BluerRadio {
            commands: command_tx,
        },
        event_rx,
        handle,
    )
}

async fn open_adapter(name: Option<&str>) -> bluer::Result<(bluer::Session, Adapter)> {
    let session = bluer::Session::new().await?;
    let adapter = match name {
        Some(name) => session.adapter(name)?,
        None => session.default_adapter().await?,
    };
    info!("Using Bluetooth adapter {}", adapter.name());
    Ok((session, adapter))
}

async fn drive<'a>(
    adapter: &'a Adapter,
    mut commands: mpsc::UnboundedReceiver<ScanCommand>,
    events: &mpsc::UnboundedSender<RadioEvent>,
) -> bluer::Result<()> {
    let mut adapter_events: EventStream<'a> = Box::pin(adapter.events().await?);

    let initial = powered_state(adapter.is_powered().await?);
    if events.send(RadioEvent::StateChanged(initial)).is_err() {
        return Ok(());
    }

    let mut discovery: Option<EventStream<'a>> = None;
    // Devices BlueZ already knew before discovery started; their first report is a replay
    let mut cached: HashSet<Address> = HashSet::new();
    let mut retry: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ScanCommand::Start { service, allow_duplicates }) => {
                    // Restarting replaces any running discovery
                    discovery = None;
                    retry = None;
                    cached = match adapter.device_addresses().await {
                        Ok(addresses) => addresses.into_iter().collect(),
                        Err(e) => {
                            debug!("Failed to list cached devices: {}", e);
                            HashSet::new()
                        }
                    };
                    match start_discovery(adapter, service, allow_duplicates).await {
                        Ok(stream) => discovery = Some(stream),
                        Err(e) => {
                            error!("Failed to start device discovery: {}", e);
                            let resetting = RadioEvent::StateChanged(AdapterState::Resetting);
                            if events.send(resetting).is_err() {
                                break;
                            }
                            // The adapter stays powered, so no property change will resume us
                            let delay = Duration::from_secs(START_RETRY_SECS);
                            retry = Some(Box::pin(sleep(delay)));
                        }
                    }
                }
                Some(ScanCommand::Stop) => {
                    retry = None;
                    if discovery.take().is_some() {
                        info!("Device discovery stopped");
                    }
                }
                None => break,
            },
            Some(event) = adapter_events.next() => {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    debug!("Adapter powered: {}", powered);
                    if events.send(RadioEvent::StateChanged(powered_state(powered))).is_err() {
                        break;
                    }
                }
            },
            _ = wait_for(&mut retry) => {
                retry = None;
                match adapter.is_powered().await {
                    Ok(powered) => {
                        info!("Re-reporting adapter state after failed scan start");
                        if events.send(RadioEvent::StateChanged(powered_state(powered))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read adapter power state: {}", e);
                        retry = Some(Box::pin(sleep(Duration::from_secs(START_RETRY_SECS))));
                    }
                }
            },
            Some(event) = next_event(&mut discovery) => {
                if let AdapterEvent::DeviceAdded(address) = event {
                    if cached.remove(&address) {
                        debug!("Skipping cached report for {}", address);
                        continue;
                    }
                    if let Some(raw) = read_advertisement(adapter, address).await {
                        if events.send(RadioEvent::Advertisement(raw)).is_err() {
                            break;
                        }
                    }
                }
            },
        }
    }

    Ok(())
}

async fn start_discovery<'a>(
    adapter: &'a Adapter,
    service: u16,
    allow_duplicates: bool,
) -> bluer::Result<EventStream<'a>> {
    // Configure discovery filter for Low Energy devices advertising our service
    let filter = DiscoveryFilter {
        uuids: HashSet::from([service_uuid(service)]),
        transport: DiscoveryTransport::Le,
        duplicate_data: allow_duplicates,
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    // Property changes are reported as repeated DeviceAdded events
    let stream = adapter.discover_devices_with_changes().await?;
    info!("Device discovery started for service {:04X}", service);
    Ok(Box::pin(stream))
}

async fn next_event(stream: &mut Option<EventStream<'_>>) -> Option<AdapterEvent> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Snapshot the device's current advertisement properties
///
/// Service data and manufacturer data are two separate property reads, so
/// under heavy traffic they may come from consecutive advertisements.
async fn read_advertisement(adapter: &Adapter, address: Address) -> Option<RawAdvertisement> {
    let device = match adapter.device(address) {
        Ok(device) => device,
        Err(e) => {
            debug!("Device {} vanished: {}", address, e);
            return None;
        }
    };

    let service_data = match device.service_data().await {
        Ok(data) => data.unwrap_or_default(),
        Err(e) => {
            debug!("Failed to get service data for {}: {}", address, e);
            return None;
        }
    };

    let manufacturer_data = match device.manufacturer_data().await {
        Ok(data) => data.and_then(rebuild_manufacturer_data),
        Err(e) => {
            debug!("Failed to get manufacturer data for {}: {}", address, e);
            None
        }
    };

    Some(RawAdvertisement {
        device_id: DeviceId::from_address(address.0),
        service_data: short_service_data(service_data),
        manufacturer_data,
    })
}

fn powered_state(powered: bool) -> AdapterState {
    if powered {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

/// Expand a 16-bit service identifier to its 128-bit form
pub fn service_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | (u128::from(short) << 96))
}

/// The 16-bit alias of `uuid`, if it is derived from the base UUID
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & !SHORT_UUID_MASK == BASE_UUID {
        Some((value >> 96) as u16)
    } else {
        None
    }
}

/// Keep only service data keyed by 16-bit service identifiers
pub fn short_service_data(data: HashMap<Uuid, Vec<u8>>) -> HashMap<u16, Vec<u8>> {
    data.into_iter()
        .filter_map(|(uuid, bytes)| short_uuid(&uuid).map(|short| (short, bytes)))
        .collect()
}

/// Restore the manufacturer data blob as it was on the air
///
/// BlueZ splits the first two bytes off as a little-endian company
/// identifier, but in this payload they are accel_x, so the key is put
/// back in front of the value. With duplicate reporting BlueZ clears the
/// map on every report and it holds a single entry; several entries cannot
/// be ordered and are skipped.
pub fn rebuild_manufacturer_data(data: HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    if data.len() != 1 {
        debug!("Ignoring {} manufacturer data entries", data.len());
        return None;
    }

    data.into_iter().next().map(|(company_id, value)| {
        let mut blob = Vec::with_capacity(value.len() + 2);
        blob.extend_from_slice(&company_id.to_le_bytes());
        blob.extend_from_slice(&value);
        blob
    })
}
