/// Scan lifecycle and advertisement routing
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::bluetooth::decoder::decode_payload;
use crate::bluetooth::filter::AdvertisementFilter;
use crate::models::{Device, RawAdvertisement};
use crate::registry::DeviceRegistry;
use crate::utils::hex_string;

/// State reported by the radio adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    /// Radio off, unauthorized or resetting
    Suspended,
    /// Unsupported hardware; no further transitions
    Terminal,
}

/// Events delivered by the radio layer, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    StateChanged(AdapterState),
    Advertisement(RawAdvertisement),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio driver is no longer running")]
    DriverStopped,
    #[error("bluetooth error: {0}")]
    Bluetooth(String),
}

/// Commands the session issues to the radio layer
///
/// Implementations must not block: the call is made from the
/// advertisement-processing path.
pub trait Radio {
    fn start_scan(&mut self, service_filter: u16, allow_duplicates: bool)
        -> Result<(), RadioError>;
    fn stop_scan(&mut self) -> Result<(), RadioError>;
}

/// Receives every successful upsert
pub trait DeviceObserver: Send {
    fn on_device_updated(&self, device: &Arc<Device>);
}

// Hands the device to whichever task owns presentation
impl DeviceObserver for mpsc::UnboundedSender<Arc<Device>> {
    fn on_device_updated(&self, device: &Arc<Device>) {
        if self.send(Arc::clone(device)).is_err() {
            trace!("Observer channel closed, dropping update for {}", device.id());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub filter: AdvertisementFilter,
    pub allow_duplicates: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            filter: AdvertisementFilter::default(),
            allow_duplicates: true,
        }
    }
}

/// Advertisement counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub decode_failures: u64,
    /// Advertisements delivered while not scanning
    pub dropped: u64,
}

/// Owns the radio scan lifecycle and routes advertisements through
/// filter, decoder and registry
pub struct ScanSession<R: Radio> {
    radio: R,
    options: SessionOptions,
    state: SessionState,
    registry: DeviceRegistry,
    observers: Vec<Box<dyn DeviceObserver>>,
    stats: SessionStats,
}

impl<R: Radio> ScanSession<R> {
    pub fn new(radio: R, options: SessionOptions) -> Self {
        Self {
            radio,
            options,
            state: SessionState::Idle,
            registry: DeviceRegistry::new(),
            observers: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn DeviceObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateChanged(state) => self.on_adapter_state(state),
            RadioEvent::Advertisement(raw) => {
                self.on_advertisement(&raw);
            }
        }
    }

    pub fn on_adapter_state(&mut self, adapter: AdapterState) {
        if self.state == SessionState::Terminal {
            debug!("Ignoring adapter state {:?} in terminal session", adapter);
            return;
        }

        match adapter {
            AdapterState::PoweredOn => match self.state {
                SessionState::Idle | SessionState::Suspended => self.start_scanning(),
                _ => debug!("Adapter ready, already scanning"),
            },
            AdapterState::PoweredOff | AdapterState::Unauthorized | AdapterState::Resetting => {
                if self.state == SessionState::Scanning {
                    self.halt_scan();
                }
                self.transition(SessionState::Suspended);
            }
            AdapterState::Unsupported => {
                if self.state == SessionState::Scanning {
                    self.halt_scan();
                }
                error!("Bluetooth LE is not supported on this adapter");
                self.transition(SessionState::Terminal);
            }
            AdapterState::Unknown => debug!("Adapter state unknown, waiting"),
        }
    }

    /// Run one advertisement through the pipeline
    ///
    /// Returns the updated device, or `None` when the advertisement was
    /// dropped.
    pub fn on_advertisement(&mut self, raw: &RawAdvertisement) -> Option<Arc<Device>> {
        self.stats.received += 1;

        if self.state != SessionState::Scanning {
            self.stats.dropped += 1;
            trace!("Dropping advertisement from {} while {:?}", raw.device_id, self.state);
            return None;
        }

        let payload = match self.options.filter.classify(raw) {
            Ok(payload) => payload,
            Err(rejection) => {
                self.stats.rejected += 1;
                trace!("Ignoring {}: {}", raw.device_id, rejection);
                return None;
            }
        };

        let sample = match decode_payload(payload) {
            Ok(sample) => sample,
            Err(e) => {
                self.stats.decode_failures += 1;
                trace!(
                    "Undecodable payload {} from {}: {}",
                    hex_string(payload, false),
                    raw.device_id,
                    e
                );
                return None;
            }
        };

        debug!(
            "Accel x: {:.4} y: {:.4} z: {:.4} from {}",
            sample.x, sample.y, sample.z, raw.device_id
        );

        let (device, is_new) = self.registry.upsert(raw.device_id, sample);
        self.stats.accepted += 1;
        if is_new {
            info!("Discovered device {}", device.id());
        }

        for observer in &self.observers {
            observer.on_device_updated(&device);
        }

        Some(device)
    }

    /// Stop scanning on request of the host application
    pub fn stop(&mut self) {
        match self.state {
            SessionState::Scanning => {
                self.halt_scan();
                self.transition(SessionState::Idle);
            }
            SessionState::Suspended => self.transition(SessionState::Idle),
            SessionState::Idle | SessionState::Terminal => {}
        }
    }

    fn start_scanning(&mut self) {
        let service = self.options.filter.service();
        match self.radio.start_scan(service, self.options.allow_duplicates) {
            Ok(()) => self.transition(SessionState::Scanning),
            Err(e) => {
                error!("Failed to start scan for service {:04X}: {}", service, e);
                self.transition(SessionState::Suspended);
            }
        }
    }

    fn halt_scan(&mut self) {
        if let Err(e) = self.radio.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!("Session state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccelerometerSample, DeviceId};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingRadio {
        starts: Vec<(u16, bool)>,
        stops: usize,
        fail_start: bool,
    }

    impl Radio for RecordingRadio {
        fn start_scan(
            &mut self,
            service_filter: u16,
            allow_duplicates: bool,
        ) -> Result<(), RadioError> {
            if self.fail_start {
                return Err(RadioError::Bluetooth("busy".to_string()));
            }
            self.starts.push((service_filter, allow_duplicates));
            Ok(())
        }

        fn stop_scan(&mut self) -> Result<(), RadioError> {
            self.stops += 1;
            Ok(())
        }
    }

    struct Collect(Arc<Mutex<Vec<Arc<Device>>>>);

    impl DeviceObserver for Collect {
        fn on_device_updated(&self, device: &Arc<Device>) {
            self.0.lock().unwrap().push(Arc::clone(device));
        }
    }

    fn session() -> ScanSession<RecordingRadio> {
        ScanSession::new(RecordingRadio::default(), SessionOptions::default())
    }

    fn ours(id: u128, manufacturer: &[u8]) -> RawAdvertisement {
        RawAdvertisement::new(DeviceId::from_u128(id))
            .with_service_data(0x9AEF, vec![0, 0, 0, 0, 0, 0, 0, 0])
            .with_manufacturer_data(manufacturer.to_vec())
    }

    #[test]
    fn ready_starts_scan_without_duplicate_suppression() {
        let mut session = session();
        assert_eq!(session.state(), SessionState::Idle);

        session.on_adapter_state(AdapterState::PoweredOn);

        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(session.radio().starts, vec![(0x9AEF, true)]);
    }

    #[test]
    fn repeated_ready_while_scanning_is_a_no_op() {
        let mut session = session();
        session.on_adapter_state(AdapterState::PoweredOn);
        session.on_adapter_state(AdapterState::PoweredOn);
        session.on_adapter_state(AdapterState::PoweredOn);

        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(session.radio().starts.len(), 1);
    }

    #[test]
    fn unavailable_adapter_suspends_and_ready_resumes() {
        for unavailable in [
            AdapterState::PoweredOff,
            AdapterState::Unauthorized,
            AdapterState::Resetting,
        ] {
            let mut session = session();
            session.on_adapter_state(AdapterState::PoweredOn);
            session.on_adapter_state(unavailable);
            assert_eq!(session.state(), SessionState::Suspended);
            assert_eq!(session.radio().stops, 1);

            session.on_adapter_state(AdapterState::PoweredOn);
            assert_eq!(session.state(), SessionState::Scanning);
            assert_eq!(session.radio().starts.len(), 2);
        }
    }

    #[test]
    fn idle_goes_to_suspended_when_adapter_off() {
        let mut session = session();
        session.on_adapter_state(AdapterState::PoweredOff);
        assert_eq!(session.state(), SessionState::Suspended);
        assert_eq!(session.radio().stops, 0);
    }

    #[test]
    fn unsupported_is_terminal() {
        let mut session = session();
        session.on_adapter_state(AdapterState::PoweredOn);
        session.on_adapter_state(AdapterState::Unsupported);
        assert_eq!(session.state(), SessionState::Terminal);

        session.on_adapter_state(AdapterState::PoweredOn);
        session.stop();
        assert_eq!(session.state(), SessionState::Terminal);
        assert_eq!(session.radio().starts.len(), 1);
    }

    #[test]
    fn unknown_state_changes_nothing() {
        let mut session = session();
        session.on_adapter_state(AdapterState::Unknown);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn failed_start_leaves_session_suspended() {
        let radio = RecordingRadio {
            fail_start: true,
            ..Default::default()
        };
        let mut session = ScanSession::new(radio, SessionOptions::default());
        session.on_adapter_state(AdapterState::PoweredOn);
        assert_eq!(session.state(), SessionState::Suspended);
    }

    #[test]
    fn rereported_ready_after_failed_start_resumes_scanning() {
        let radio = RecordingRadio {
            fail_start: true,
            ..Default::default()
        };
        let mut session = ScanSession::new(radio, SessionOptions::default());
        session.on_adapter_state(AdapterState::PoweredOn);
        assert_eq!(session.state(), SessionState::Suspended);

        // Driver reports Resetting, then the adapter's power state again
        session.radio.fail_start = false;
        session.on_adapter_state(AdapterState::Resetting);
        session.on_adapter_state(AdapterState::PoweredOn);

        assert_eq!(session.state(), SessionState::Scanning);
        assert_eq!(session.radio().starts, vec![(0x9AEF, true)]);
    }

    #[test]
    fn stop_returns_to_idle() {
        let mut session = session();
        session.on_adapter_state(AdapterState::PoweredOn);
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.radio().stops, 1);

        session.on_adapter_state(AdapterState::PoweredOn);
        assert_eq!(session.state(), SessionState::Scanning);
    }

    #[test]
    fn advertisements_before_scanning_are_dropped() {
        let mut session = session();
        let result = session.on_advertisement(&ours(1, &[0x00, 0x40, 0, 0, 0, 0]));

        assert!(result.is_none());
        assert!(session.registry().is_empty());
        assert_eq!(session.stats().dropped, 1);
    }

    #[test]
    fn pipeline_notifies_observers_on_every_upsert() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut session = session();
        session.subscribe(Box::new(Collect(Arc::clone(&seen))));
        session.on_adapter_state(AdapterState::PoweredOn);

        session.handle_event(RadioEvent::Advertisement(ours(1, &[0x00, 0x40, 0, 0, 0, 0])));
        session.handle_event(RadioEvent::Advertisement(ours(1, &[0, 0, 0x00, 0x40, 0, 0])));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(Arc::ptr_eq(&seen[0], &seen[1]));
        assert_eq!(
            seen[0].latest_sample(),
            Some(AccelerometerSample::new(0.0, 1.0, 0.0))
        );
        assert_eq!(session.registry().len(), 1);
    }

    #[test]
    fn rejected_and_undecodable_advertisements_are_silent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut session = session();
        session.subscribe(Box::new(Collect(Arc::clone(&seen))));
        session.on_adapter_state(AdapterState::PoweredOn);

        let foreign = RawAdvertisement::new(DeviceId::from_u128(2))
            .with_service_data(0x180F, vec![0; 8])
            .with_manufacturer_data(vec![0; 6]);
        session.on_advertisement(&foreign);
        session.on_advertisement(&ours(3, &[0x00, 0x40, 0x00, 0xC0, 0x00]));

        assert!(seen.lock().unwrap().is_empty());
        assert!(session.registry().is_empty());
        let stats = session.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn channel_observer_hands_off_without_blocking() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = session();
        session.subscribe(Box::new(tx));
        session.on_adapter_state(AdapterState::PoweredOn);

        session.on_advertisement(&ours(5, &[0x00, 0x40, 0, 0, 0, 0]));

        let device = rx.try_recv().unwrap();
        assert_eq!(device.id(), DeviceId::from_u128(5));
        drop(rx);

        // A closed channel must not disturb the pipeline
        assert!(session.on_advertisement(&ours(5, &[0, 0, 0, 0, 0, 0])).is_some());
    }
}
