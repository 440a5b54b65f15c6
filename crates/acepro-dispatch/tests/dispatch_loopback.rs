use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acepro_dispatch::{
    dispatcher, DispatchConfig, DispatchError, DispatchEvent, DispatcherHandle, EventStream,
    Request,
};
use acepro_frame::{encode_message, FrameDecoder};
use acepro_transport::{Connector, TransportError};
use bytes::BytesMut;
use serde_json::{json, Value};

type Behaviour = dyn Fn(&Value) -> Vec<Value> + Send + Sync;

#[derive(Default)]
struct Wire {
    inbound: VecDeque<u8>,
    decoder: FrameDecoder,
    seen: Vec<Value>,
    refuse_writes: usize,
}

#[derive(Clone)]
struct Device {
    wire: Arc<Mutex<Wire>>,
    behaviour: Arc<Behaviour>,
}

impl Device {
    fn new(behaviour: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static) -> Self {
        Self {
            wire: Arc::new(Mutex::new(Wire::default())),
            behaviour: Arc::new(behaviour),
        }
    }

    fn seen_methods(&self) -> Vec<String> {
        self.wire
            .lock()
            .unwrap()
            .seen
            .iter()
            .map(|v| v["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// The next `count` writes fail with `WouldBlock`.
    fn refuse_writes(&self, count: usize) {
        self.wire.lock().unwrap().refuse_writes = count;
    }

    fn push(&self, value: &Value) {
        let mut buf = BytesMut::new();
        encode_message(value, &mut buf).unwrap();
        self.wire.lock().unwrap().inbound.extend(buf.iter().copied());
    }
}

impl Read for Device {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut wire = self.wire.lock().unwrap();
        if wire.inbound.is_empty() {
            return Err(io::Error::from(ErrorKind::WouldBlock));
        }
        let n = buf.len().min(wire.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for Device {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let requests = {
            let mut wire = self.wire.lock().unwrap();
            if wire.refuse_writes > 0 {
                wire.refuse_writes -= 1;
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            let requests = wire.decoder.feed(buf);
            wire.seen.extend(requests.iter().cloned());
            requests
        };
        for request in requests {
            for reply in (self.behaviour)(&request) {
                self.push(&reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Loopback {
    device: Device,
    failures_before_connect: usize,
    attempts: Arc<Mutex<usize>>,
}

impl Connector for Loopback {
    type Link = Device;

    fn connect(&mut self) -> acepro_transport::Result<Device> {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        if *attempts <= self.failures_before_connect {
            return Err(TransportError::NoDevice {
                unit: 0,
                found: 0,
            });
        }
        Ok(self.device.clone())
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

fn echo_success(request: &Value) -> Vec<Value> {
    vec![json!({"id": request["id"], "code": 0, "msg": "success", "result": {"method": request["method"]}})]
}

fn start(device: Device, failures: usize) -> (DispatcherHandle, EventStream, Arc<Mutex<usize>>) {
    let attempts = Arc::new(Mutex::new(0));
    let connector = Loopback {
        device,
        failures_before_connect: failures,
        attempts: Arc::clone(&attempts),
    };
    let config = DispatchConfig {
        query_info_on_connect: false,
        idle_status_interval: Duration::from_secs(3600),
        ..DispatchConfig::default()
    };
    let (dispatcher, handle, events) = dispatcher(connector, config);
    tokio::spawn(dispatcher.run());
    (handle, events, attempts)
}

#[tokio::test(start_paused = true)]
async fn request_resolves_with_device_reply() {
    let device = Device::new(echo_success);
    let (handle, _events, _) = start(device.clone(), 0);
    handle.wait_connected(Duration::from_secs(1)).await.unwrap();

    let response = handle.request(Request::get_status()).await.unwrap();
    assert_eq!(response.code, Some(0));
    assert_eq!(response.result.unwrap()["method"], "get_status");
    assert_eq!(device.seen_methods(), vec!["get_status"]);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn silent_device_gives_no_response_after_timeout() {
    let device = Device::new(|_| Vec::new());
    let (handle, _events, _) = start(device, 0);
    handle.wait_connected(Duration::from_secs(1)).await.unwrap();

    let started = tokio::time::Instant::now();
    let reply = handle.send(Request::get_info()).unwrap().await.unwrap();
    assert!(reply.is_none());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(3));

    let err = handle.request(Request::get_info()).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoResponse { ref method } if method == "get_info"));
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn high_priority_overtakes_queued_normal_requests() {
    let device = Device::new(echo_success);
    let (handle, _events, _) = start(device.clone(), 0);
    handle.wait_connected(Duration::from_secs(1)).await.unwrap();

    let normal: Vec<_> = (0..3)
        .map(|slot| handle.send(Request::stop_feed_filament(slot)).unwrap())
        .collect();
    let urgent = handle.send_high_priority(Request::get_status()).unwrap();

    assert!(urgent.await.unwrap().is_some());
    for pending in normal {
        assert!(pending.await.unwrap().is_some());
    }
    assert_eq!(device.seen_methods()[0], "get_status");
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn unsolicited_objects_are_published() {
    let device = Device::new(echo_success);
    let (handle, mut events, _) = start(device.clone(), 0);
    handle.wait_connected(Duration::from_secs(1)).await.unwrap();
    assert_eq!(events.recv().await, Some(DispatchEvent::Connected));

    device.push(&json!({"type": "notice", "status": "drying"}));
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(DispatchEvent::Unsolicited(json!({"type": "notice", "status": "drying"})))
    );
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_failed_attempts() {
    let device = Device::new(echo_success);
    let (handle, _events, attempts) = start(device, 3);

    handle.wait_connected(Duration::from_secs(10)).await.unwrap();
    assert_eq!(*attempts.lock().unwrap(), 4);
    assert!(handle.request(Request::get_info()).await.is_ok());
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn busy_link_delays_requests_without_dropping_them() {
    let device = Device::new(echo_success);
    let (handle, _events, _) = start(device.clone(), 0);
    handle.wait_connected(Duration::from_secs(1)).await.unwrap();

    device.refuse_writes(3);
    let first = handle.send(Request::get_status()).unwrap();
    let second = handle.send(Request::get_info()).unwrap();

    assert!(first.await.unwrap().is_some());
    assert!(second.await.unwrap().is_some());
    assert_eq!(device.seen_methods(), vec!["get_status", "get_info"]);
    assert!(handle.is_connected());
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn flapping_link_is_reported_unstable() {
    let device = Device::new(echo_success);
    let (handle, _events, attempts) = start(device, 7);

    handle.wait_connected(Duration::from_secs(30)).await.unwrap();
    assert_eq!(*attempts.lock().unwrap(), 8);

    let status = handle.connection_status();
    assert!(status.is_connected());
    assert_eq!(status.recent_reconnects, 7);
    assert!(status.is_flapping());
    assert!(!status.stable);

    tokio::time::sleep(Duration::from_secs(61)).await;
    let status = handle.connection_status();
    assert_eq!(status.recent_reconnects, 0);
    assert!(status.stable);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn fresh_link_is_stable_after_grace_period() {
    let device = Device::new(echo_success);
    let (handle, _events, _) = start(device, 0);
    handle.wait_connected(Duration::from_secs(1)).await.unwrap();

    let status = handle.connection_status();
    assert_eq!(status.recent_reconnects, 0);
    assert!(!status.stable);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(handle.connection_status().stable);
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn info_is_queried_on_connect() {
    let device = Device::new(|request| {
        vec![json!({"id": request["id"], "code": 0, "result": {"model": "Anycubic Color Engine Pro", "firmware": "V1.3.84"}})]
    });
    let connector = Loopback {
        device,
        failures_before_connect: 0,
        attempts: Arc::new(Mutex::new(0)),
    };
    let (dispatcher, handle, mut events) = dispatcher(connector, DispatchConfig::default());
    tokio::spawn(dispatcher.run());

    assert_eq!(events.recv().await, Some(DispatchEvent::Connected));
    match events.recv().await {
        Some(DispatchEvent::Info(response)) => {
            assert_eq!(response.result.unwrap()["firmware"], "V1.3.84");
        }
        other => panic!("expected info event, got {other:?}"),
    }
    handle.shutdown();
}
