use std::sync::Arc;
use tokio::sync::mpsc;

use connectionless_telemetry::{
    AccelerometerSample, AdapterState, Device, DeviceId, Radio, RadioError, RadioEvent,
    RawAdvertisement, ScanSession, SessionOptions, SessionState,
};

#[derive(Debug, Default)]
struct MemoryRadio {
    starts: usize,
    stops: usize,
}

impl Radio for MemoryRadio {
    fn start_scan(
        &mut self,
        _service_filter: u16,
        allow_duplicates: bool,
    ) -> Result<(), RadioError> {
        assert!(allow_duplicates);
        self.starts += 1;
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.stops += 1;
        Ok(())
    }
}

fn advertisement(id: u128, manufacturer: [u8; 6]) -> RawAdvertisement {
    RawAdvertisement::new(DeviceId::from_u128(id))
        .with_service_data(0x9AEF, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x00, 0x00])
        .with_manufacturer_data(manufacturer)
}

fn scanning_session() -> (ScanSession<MemoryRadio>, mpsc::UnboundedReceiver<Arc<Device>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = ScanSession::new(MemoryRadio::default(), SessionOptions::default());
    session.subscribe(Box::new(tx));
    session.handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn));
    (session, rx)
}

#[test]
fn new_device_produces_one_notification() {
    let (mut session, mut updates) = scanning_session();

    session.handle_event(RadioEvent::Advertisement(advertisement(
        0xFEED,
        [0x00, 0x40, 0x00, 0x00, 0x00, 0x00],
    )));

    let device = updates.try_recv().expect("one notification");
    assert!(updates.try_recv().is_err());
    assert_eq!(device.id(), DeviceId::from_u128(0xFEED));
    assert_eq!(
        device.latest_sample(),
        Some(AccelerometerSample::new(1.0, 0.0, 0.0))
    );
}

#[test]
fn registry_tracks_distinct_devices_across_duplicates() {
    let (mut session, mut updates) = scanning_session();

    let stream = [
        advertisement(1, [0x00, 0x40, 0x00, 0x00, 0x00, 0x00]),
        advertisement(2, [0x00, 0x00, 0x00, 0x40, 0x00, 0x00]),
        advertisement(1, [0x00, 0x40, 0x00, 0x00, 0x00, 0x00]),
        advertisement(1, [0x00, 0x00, 0x00, 0x00, 0x00, 0x40]),
        advertisement(2, [0x00, 0xC0, 0x00, 0x00, 0x00, 0x00]),
    ];
    for raw in stream {
        session.handle_event(RadioEvent::Advertisement(raw));
    }

    let mut notified = Vec::new();
    while let Ok(device) = updates.try_recv() {
        notified.push(device);
    }
    assert_eq!(notified.len(), 5);
    assert_eq!(session.registry().len(), 2);

    let first = session.registry().get(&DeviceId::from_u128(1)).unwrap();
    assert!(Arc::ptr_eq(&first, &notified[0]));
    assert_eq!(
        first.latest_sample(),
        Some(AccelerometerSample::new(0.0, 0.0, 1.0))
    );
    assert_eq!(first.samples(), 3);

    let second = session.registry().get(&DeviceId::from_u128(2)).unwrap();
    assert_eq!(
        second.latest_sample(),
        Some(AccelerometerSample::new(-1.0, 0.0, 0.0))
    );
}

#[test]
fn state_sequence_with_repeated_ready() {
    let mut session = ScanSession::new(MemoryRadio::default(), SessionOptions::default());
    assert_eq!(session.state(), SessionState::Idle);

    let mut states = Vec::new();
    for adapter in [
        AdapterState::PoweredOn,
        AdapterState::PoweredOn,
        AdapterState::PoweredOff,
        AdapterState::PoweredOn,
        AdapterState::PoweredOn,
    ] {
        session.handle_event(RadioEvent::StateChanged(adapter));
        states.push(session.state());
    }

    assert_eq!(
        states,
        vec![
            SessionState::Scanning,
            SessionState::Scanning,
            SessionState::Suspended,
            SessionState::Scanning,
            SessionState::Scanning,
        ]
    );
    assert_eq!(session.radio().starts, 2);
    assert_eq!(session.radio().stops, 1);
}

#[test]
fn suspended_session_ignores_advertisements() {
    let (mut session, mut updates) = scanning_session();
    session.handle_event(RadioEvent::StateChanged(AdapterState::Unauthorized));

    session.handle_event(RadioEvent::Advertisement(advertisement(
        3,
        [0x00, 0x40, 0x00, 0x00, 0x00, 0x00],
    )));

    assert!(updates.try_recv().is_err());
    assert!(session.registry().is_empty());
    assert_eq!(session.stats().dropped, 1);
}

#[tokio::test]
async fn observer_receives_updates_on_another_task() {
    let (mut session, mut updates) = scanning_session();

    let consumer = tokio::spawn(async move {
        let mut ids = Vec::new();
        while let Some(device) = updates.recv().await {
            ids.push(device.id());
        }
        ids
    });

    session.handle_event(RadioEvent::Advertisement(advertisement(
        7,
        [0x00, 0x20, 0x00, 0x20, 0x00, 0x20],
    )));
    session.handle_event(RadioEvent::Advertisement(advertisement(
        8,
        [0x00, 0x20, 0x00, 0x20, 0x00, 0x20],
    )));
    drop(session);

    let ids = consumer.await.unwrap();
    assert_eq!(ids, vec![DeviceId::from_u128(7), DeviceId::from_u128(8)]);
}
