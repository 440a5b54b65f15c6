//! Simulated ACE Pro rig: fake units speaking the real frame codec, a
//! filament path with two sensors, a recording print host and console.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acepro_dispatch::{dispatcher, DispatchConfig, DispatcherHandle, EventStream};
use acepro_engine::{
    Console, Coordination, EngineConfig, FilamentPosition, FilamentSensor, HostError, Machine,
    MemoryStore, PrintHost, PrintState, Prompt, SensorHub, Store, ToolChanger, TokioScheduler,
    Unit, UnitRegistry, SLOTS_PER_UNIT,
};
use acepro_frame::{encode_message, FrameDecoder};
use acepro_transport::{Connector, TransportError};
use bytes::BytesMut;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Distance from a slot to the splitter sensor, mm.
pub const SPLITTER_AT: f64 = 300.0;
/// Distance from a slot to the nozzle sensor, mm.
pub const NOZZLE_AT: f64 = 900.0;
/// Where a fully loaded tool sits.
pub const LOADED_AT: f64 = NOZZLE_AT + 28.0;

// ---------------------------------------------------------------------------
// Filament path
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Motion {
    start: Instant,
    from: f64,
    distance: f64,
    speed: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Track {
    base: f64,
    motion: Option<Motion>,
}

impl Track {
    fn position(&self, now: Instant) -> f64 {
        match self.motion {
            Some(m) => {
                let travelled = (m.speed * now.saturating_duration_since(m.start).as_secs_f64()).min(m.distance.abs());
                (m.from + travelled * m.distance.signum()).max(0.0)
            }
            None => self.base,
        }
    }

    fn freeze(&mut self, now: Instant) {
        self.base = self.position(now);
        self.motion = None;
    }
}

/// Every tool's filament tip, measured from its slot.
pub struct World {
    tracks: Mutex<Vec<Track>>,
    jammed: Mutex<BTreeSet<usize>>,
    feeds: Mutex<Vec<usize>>,
    encoder: AtomicU64,
}

impl World {
    pub fn new(tools: usize) -> Self {
        Self {
            tracks: Mutex::new(vec![Track::default(); tools]),
            jammed: Mutex::new(BTreeSet::new()),
            feeds: Mutex::new(Vec::new()),
            encoder: AtomicU64::new(0),
        }
    }

    pub fn position(&self, tool: usize) -> f64 {
        self.tracks.lock().unwrap()[tool].position(Instant::now())
    }

    pub fn furthest(&self) -> f64 {
        let now = Instant::now();
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.position(now))
            .fold(0.0, f64::max)
    }

    pub fn place(&self, tool: usize, position: f64) {
        self.tracks.lock().unwrap()[tool] = Track {
            base: position,
            motion: None,
        };
    }

    /// The slot accepts feed commands but nothing moves.
    pub fn jam(&self, tool: usize) {
        self.jammed.lock().unwrap().insert(tool);
    }

    /// Tools that received a feed command, in order, consecutive repeats collapsed.
    pub fn feeds(&self) -> Vec<usize> {
        self.feeds.lock().unwrap().clone()
    }

    fn start(&self, tool: usize, distance: f64, speed: f64) {
        if distance > 0.0 {
            let mut feeds = self.feeds.lock().unwrap();
            if feeds.last() != Some(&tool) {
                feeds.push(tool);
            }
        }
        if self.jammed.lock().unwrap().contains(&tool) {
            return;
        }
        let now = Instant::now();
        let mut tracks = self.tracks.lock().unwrap();
        let track = &mut tracks[tool];
        track.freeze(now);
        track.motion = Some(Motion {
            start: now,
            from: track.base,
            distance,
            speed,
        });
    }

    fn stop(&self, tool: usize) {
        self.tracks.lock().unwrap()[tool].freeze(Instant::now());
    }

    /// Extruder pushes whatever reached the nozzle.
    fn extrude(&self, length: f64) {
        let now = Instant::now();
        for track in self.tracks.lock().unwrap().iter_mut() {
            if track.position(now) >= NOZZLE_AT {
                track.freeze(now);
                track.base += length;
            }
        }
    }

    pub fn bump_encoder(&self, pulses: u64) {
        self.encoder.fetch_add(pulses, Ordering::SeqCst);
    }
}

pub struct PathSensor {
    world: Arc<World>,
    at: f64,
    encoder: bool,
}

impl FilamentSensor for PathSensor {
    fn present(&self) -> bool {
        self.world.furthest() >= self.at
    }

    fn encoder_pulses(&self) -> Option<u64> {
        self.encoder.then(|| self.world.encoder.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Fake unit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimSlot {
    pub status: String,
    pub material: String,
    pub color: [u8; 3],
    pub rfid: u8,
}

impl SimSlot {
    pub fn ready(material: &str, color: [u8; 3]) -> Self {
        Self {
            status: "ready".to_string(),
            material: material.to_string(),
            color,
            rfid: 2,
        }
    }

    pub fn empty() -> Self {
        Self {
            status: "empty".to_string(),
            material: String::new(),
            color: [0, 0, 0],
            rfid: 0,
        }
    }
}

pub struct SimDevice {
    unit: usize,
    world: Arc<World>,
    pub slots: Mutex<Vec<SimSlot>>,
    forbidden: Mutex<BTreeMap<String, u32>>,
    silent: Mutex<BTreeMap<String, u32>>,
    errors: Mutex<BTreeMap<String, (i64, String)>>,
    seen: Mutex<Vec<Value>>,
    unplugged: AtomicBool,
}

impl SimDevice {
    fn new(unit: usize, world: Arc<World>, slots: Vec<SimSlot>) -> Self {
        Self {
            unit,
            world,
            slots: Mutex::new(slots),
            forbidden: Mutex::new(BTreeMap::new()),
            silent: Mutex::new(BTreeMap::new()),
            errors: Mutex::new(BTreeMap::new()),
            seen: Mutex::new(Vec::new()),
            unplugged: AtomicBool::new(false),
        }
    }

    /// Answer the next `count` `method` requests with FORBIDDEN.
    pub fn forbid(&self, method: &str, count: u32) {
        self.forbidden.lock().unwrap().insert(method.to_string(), count);
    }

    /// Ignore the next `count` `method` requests.
    pub fn mute(&self, method: &str, count: u32) {
        self.silent.lock().unwrap().insert(method.to_string(), count);
    }

    /// Fail every `method` request with `code`.
    pub fn fail(&self, method: &str, code: i64, msg: &str) {
        self.errors
            .lock()
            .unwrap()
            .insert(method.to_string(), (code, msg.to_string()));
    }

    /// Drop the link and refuse reconnects until [`SimDevice::plug`].
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    pub fn plug(&self) {
        self.unplugged.store(false, Ordering::SeqCst);
    }

    fn is_unplugged(&self) -> bool {
        self.unplugged.load(Ordering::SeqCst)
    }

    pub fn set_slot(&self, slot: usize, value: SimSlot) {
        self.slots.lock().unwrap()[slot] = value;
    }

    pub fn count(&self, method: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v["method"] == method)
            .count()
    }

    fn take(map: &Mutex<BTreeMap<String, u32>>, method: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(method) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn respond(&self, request: &Value) -> Option<Value> {
        self.seen.lock().unwrap().push(request.clone());
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default();
        let params = &request["params"];
        let index = params["index"].as_u64().unwrap_or(0) as usize;
        let tool = self.unit * SLOTS_PER_UNIT + index;

        if Self::take(&self.silent, method) {
            return None;
        }
        if Self::take(&self.forbidden, method) {
            return Some(json!({"id": id, "code": 0, "msg": "FORBIDDEN"}));
        }
        if let Some((code, msg)) = self.errors.lock().unwrap().get(method) {
            return Some(json!({"id": id, "code": code, "msg": msg}));
        }

        let length = params["length"].as_f64().unwrap_or(0.0);
        let speed = params["speed"].as_f64().unwrap_or(1.0);
        let result = match method {
            "get_info" => json!({"model": "Anycubic Color Engine Pro", "firmware": "V1.3.84"}),
            "get_status" => {
                let slots: Vec<Value> = self
                    .slots
                    .lock()
                    .unwrap()
                    .iter()
                    .enumerate()
                    .map(|(i, s)| {
                        json!({
                            "index": i,
                            "status": s.status,
                            "rfid": s.rfid,
                            "type": s.material,
                            "color": s.color,
                            "sku": "",
                            "brand": "",
                        })
                    })
                    .collect();
                json!({"status": "ready", "action": "", "temp": 25, "slots": slots})
            }
            "feed_filament" => {
                self.world.start(tool, length, speed);
                json!({})
            }
            "unwind_filament" => {
                self.world.start(tool, -length, speed);
                json!({})
            }
            "stop_feed_filament" | "stop_unwind_filament" => {
                self.world.stop(tool);
                json!({})
            }
            "get_filament_info" => {
                let slot = self.slots.lock().unwrap()[index].clone();
                json!({
                    "sku": "AHPLBK-101",
                    "brand": "Anycubic",
                    "type": slot.material,
                    "colors": [[slot.color[0], slot.color[1], slot.color[2], 255]],
                    "extruder_temp": {"min": 190, "max": 230},
                    "hotbed_temp": {"min": 50, "max": 60},
                    "diameter": 1.75,
                    "total": 330,
                    "current": 0
                })
            }
            _ => json!({}),
        };
        Some(json!({"id": id, "code": 0, "msg": "success", "result": result}))
    }
}

#[derive(Default)]
struct Wire {
    inbound: VecDeque<u8>,
    decoder: FrameDecoder,
}

#[derive(Clone)]
pub struct SimLink {
    wire: Arc<Mutex<Wire>>,
    device: Arc<SimDevice>,
}

impl Read for SimLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.device.is_unplugged() {
            return Err(io::Error::from(ErrorKind::BrokenPipe));
        }
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

impl Write for SimLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.device.is_unplugged() {
            return Err(io::Error::from(ErrorKind::BrokenPipe));
        }
        let requests = self.wire.lock().unwrap().decoder.feed(buf);
        for request in requests {
            if let Some(reply) = self.device.respond(&request) {
                let mut out = BytesMut::new();
                encode_message(&reply, &mut out).unwrap();
                self.wire.lock().unwrap().inbound.extend(out.iter().copied());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct SimConnector {
    link: SimLink,
}

impl Connector for SimConnector {
    type Link = SimLink;

    fn connect(&mut self) -> acepro_transport::Result<SimLink> {
        if self.link.device.is_unplugged() || self.link.device.slots.lock().unwrap().is_empty() {
            return Err(TransportError::NoDevice { unit: 0, found: 0 });
        }
        Ok(self.link.clone())
    }

    fn describe(&self) -> String {
        format!("sim unit {}", self.link.device.unit)
    }
}

// ---------------------------------------------------------------------------
// Host and console
// ---------------------------------------------------------------------------

pub struct SimHost {
    world: Arc<World>,
    state: Mutex<PrintState>,
    extruder: Mutex<f64>,
    scripts: Mutex<Vec<String>>,
    fatal: AtomicBool,
}

impl SimHost {
    fn new(world: Arc<World>) -> Self {
        Self {
            world,
            state: Mutex::new(PrintState::Standby),
            extruder: Mutex::new(0.0),
            scripts: Mutex::new(Vec::new()),
            fatal: AtomicBool::new(false),
        }
    }

    pub fn set_state(&self, state: PrintState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn state(&self) -> PrintState {
        self.state.lock().unwrap().clone()
    }

    /// Print moves that do not pull filament through the splitter.
    pub fn advance_extruder(&self, length: f64) {
        *self.extruder.lock().unwrap() += length;
    }

    pub fn shut_down(&self) {
        self.fatal.store(true, Ordering::SeqCst);
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.scripts().iter().any(|s| s.starts_with(prefix))
    }

    fn check(&self) -> Result<(), HostError> {
        if self.fatal.load(Ordering::SeqCst) {
            Err(HostError::fatal("printer is shutdown"))
        } else {
            Ok(())
        }
    }
}

impl PrintHost for SimHost {
    fn print_state(&self) -> Result<PrintState, HostError> {
        self.check()?;
        Ok(self.state())
    }

    fn extruder_position(&self) -> Result<f64, HostError> {
        self.check()?;
        Ok(*self.extruder.lock().unwrap())
    }

    fn extrude(&self, length: f64, _speed: f64) -> Result<(), HostError> {
        self.check()?;
        *self.extruder.lock().unwrap() += length;
        if length > 0.0 {
            self.world.extrude(length);
        }
        Ok(())
    }

    fn run_gcode(&self, script: &str) -> Result<(), HostError> {
        self.check()?;
        self.scripts.lock().unwrap().push(script.to_string());
        if script == "PAUSE" {
            self.set_state(PrintState::Paused);
        } else if script.starts_with("RESUME") {
            self.set_state(PrintState::Printing);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingConsole {
    pub messages: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<Prompt>>,
    pub closed: Mutex<usize>,
}

impl RecordingConsole {
    pub fn prompt_titles(&self) -> Vec<String> {
        self.prompts.lock().unwrap().iter().map(|p| p.title.clone()).collect()
    }

    pub fn said(&self, needle: &str) -> bool {
        self.messages.lock().unwrap().iter().any(|m| m.contains(needle))
    }
}

impl Console for RecordingConsole {
    fn info(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn show_prompt(&self, prompt: &Prompt) {
        self.prompts.lock().unwrap().push(prompt.clone());
    }

    fn close_prompt(&self) {
        *self.closed.lock().unwrap() += 1;
    }
}

// ---------------------------------------------------------------------------
// Rig
// ---------------------------------------------------------------------------

pub struct Rig {
    pub world: Arc<World>,
    pub devices: Vec<Arc<SimDevice>>,
    pub handles: Vec<DispatcherHandle>,
    events: Mutex<Vec<EventStream>>,
    pub host: Arc<SimHost>,
    pub console: Arc<RecordingConsole>,
    pub store: Arc<MemoryStore>,
    pub machine: Arc<Machine>,
    pub changer: ToolChanger,
}

impl Rig {
    pub async fn new(units: Vec<Vec<SimSlot>>) -> Self {
        Self::build(units, EngineConfig::default(), true).await
    }

    /// Build the rig and wait until every unit reported its status once.
    pub async fn build(units: Vec<Vec<SimSlot>>, config: EngineConfig, splitter: bool) -> Self {
        let world = Arc::new(World::new(units.len() * SLOTS_PER_UNIT));
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(TokioScheduler::new());
        let host = Arc::new(SimHost::new(Arc::clone(&world)));
        let console = Arc::new(RecordingConsole::default());

        let mut devices = Vec::new();
        let mut handles = Vec::new();
        let mut events = Vec::new();
        let mut unit_list = Vec::new();
        for (index, slots) in units.into_iter().enumerate() {
            let device = Arc::new(SimDevice::new(index, Arc::clone(&world), slots));
            let link = SimLink {
                wire: Arc::new(Mutex::new(Wire::default())),
                device: Arc::clone(&device),
            };
            let dispatch_config = DispatchConfig {
                idle_status_interval: Duration::from_secs(3600),
                ..DispatchConfig::default()
            };
            let (dispatcher, handle, stream) = dispatcher(SimConnector { link }, dispatch_config);
            tokio::spawn(dispatcher.run());
            handle.wait_connected(Duration::from_secs(5)).await.unwrap();

            let unit = Arc::new(Unit::new(
                index,
                config.unit_config(index).unwrap(),
                config.retry.clone(),
                handle.clone(),
                Arc::clone(&store) as Arc<dyn Store>,
                Arc::clone(&scheduler) as _,
            ));
            unit.refresh_status().await.unwrap();
            devices.push(device);
            handles.push(handle);
            events.push(stream);
            unit_list.push(unit);
        }

        let nozzle = Arc::new(PathSensor {
            world: Arc::clone(&world),
            at: NOZZLE_AT,
            encoder: false,
        });
        let splitter_sensor: Option<Arc<dyn FilamentSensor>> = splitter.then(|| {
            Arc::new(PathSensor {
                world: Arc::clone(&world),
                at: SPLITTER_AT,
                encoder: true,
            }) as Arc<dyn FilamentSensor>
        });

        let machine = Arc::new(Machine {
            registry: UnitRegistry::new(unit_list),
            sensors: SensorHub::new(nozzle, splitter_sensor),
            host: Arc::clone(&host) as Arc<dyn PrintHost>,
            console: Arc::clone(&console) as Arc<dyn Console>,
            store: Arc::clone(&store) as Arc<dyn Store>,
            scheduler,
            coordination: Coordination::new(),
            config,
        });
        let changer = ToolChanger::new(Arc::clone(&machine));

        Self {
            world,
            devices,
            handles,
            events: Mutex::new(events),
            host,
            console,
            store,
            machine,
            changer,
        }
    }

    pub fn unit(&self, index: usize) -> Arc<Unit> {
        Arc::clone(self.machine.registry.unit(index).unwrap())
    }

    /// Put `tool` at the nozzle as if an earlier change loaded it.
    pub fn preload(&self, tool: usize) {
        self.world.place(tool, LOADED_AT);
        self.machine.set_current_tool(Some(tool)).unwrap();
        self.machine
            .set_filament_position(FilamentPosition::Nozzle)
            .unwrap();
    }

    /// The device reports `tool`'s slot empty and its filament is gone.
    pub fn run_out(&self, tool: usize) {
        self.world.place(tool, 0.0);
        self.devices[tool / SLOTS_PER_UNIT].set_slot(tool % SLOTS_PER_UNIT, SimSlot::empty());
    }

    /// Spawn every unit's event loop.
    pub fn start_units(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let streams: Vec<EventStream> = self.events.lock().unwrap().drain(..).collect();
        for (unit, stream) in self.machine.registry.iter().zip(streams) {
            tokio::spawn(Arc::clone(unit).run(stream, cancel.clone()));
        }
        cancel
    }

    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.shutdown();
        }
    }
}

/// Four PLA slots: red, green, red, blue.
pub fn pla_unit() -> Vec<SimSlot> {
    vec![
        SimSlot::ready("PLA", [255, 0, 0]),
        SimSlot::ready("PLA", [0, 255, 0]),
        SimSlot::ready("PLA", [255, 0, 0]),
        SimSlot::ready("PLA", [0, 0, 255]),
    ]
}
