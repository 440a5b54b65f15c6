//! One physical ACE Pro unit.
//!
//! A [`Unit`] wraps the dispatcher handle for its serial link, keeps the
//! last device status and the local slot inventory, and exposes the device
//! operations the orchestration layers need. Every request goes through the
//! retry policy: FORBIDDEN replies are retried after a back-off, silent
//! devices are retried up to the attempt limit, and any other non-zero code
//! fails at once.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use acepro_dispatch::{DispatchEvent, DispatcherHandle, EventStream, Priority, Request, Response};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{RetryPolicy, UnitConfig};
use crate::error::{Result, UnitError};
use crate::scheduler::Scheduler;
use crate::slot::{
    material_temperature, rfid_temperature, FilamentInfo, Slot, SlotStatus, UnitStatus,
    DEFAULT_COLOR, DEFAULT_MATERIAL, DEFAULT_TEMP,
};
use crate::store::{feed_assist_key, inventory_key, Store, StoreExt};

/// Slots on every unit.
pub const SLOTS_PER_UNIT: usize = 4;

/// RFID state reported for a fully identified tag.
const RFID_IDENTIFIED: u8 = 2;

const RETRACT_POLL: Duration = Duration::from_millis(200);

/// How a retract ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractOutcome {
    /// The full length was pulled.
    Completed,
    /// The device reported the slot empty before the retract started.
    SlotEmpty,
    /// The slot went empty mid-retract and the unwind was stopped.
    StoppedEarly,
}

/// Follow-up work produced by a status update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatusEffects {
    /// Slots whose tag should be queried with `get_filament_info`.
    pub rfid_queries: Vec<usize>,
    /// Feed assist to re-enable after the device dropped it during auto-load.
    pub restore_assist: Option<usize>,
    /// The inventory changed and was persisted.
    pub inventory_changed: bool,
}

impl StatusEffects {
    fn merge(&mut self, other: StatusEffects) {
        for slot in other.rfid_queries {
            if !self.rfid_queries.contains(&slot) {
                self.rfid_queries.push(slot);
            }
        }
        self.restore_assist = other.restore_assist.or(self.restore_assist);
        self.inventory_changed |= other.inventory_changed;
    }

    fn is_empty(&self) -> bool {
        self.rfid_queries.is_empty() && self.restore_assist.is_none()
    }
}

struct UnitState {
    info: UnitStatus,
    firmware: Option<Value>,
    inventory: Vec<Slot>,
    feed_assist: Option<usize>,
    rfid_pending: BTreeSet<usize>,
    rfid_attempted: BTreeSet<usize>,
    rfid_sync: bool,
    effects: StatusEffects,
}

pub struct Unit {
    index: usize,
    config: UnitConfig,
    retry: RetryPolicy,
    handle: DispatcherHandle,
    store: Arc<dyn Store>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<UnitState>,
    effects_ready: Notify,
}

impl Unit {
    /// Create unit `index`, restoring its inventory and feed-assist slot from `store`.
    pub fn new(
        index: usize,
        config: UnitConfig,
        retry: RetryPolicy,
        handle: DispatcherHandle,
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let mut inventory: Vec<Slot> = store.get_or(&inventory_key(index), Vec::new());
        inventory.resize_with(SLOTS_PER_UNIT, Slot::default);
        let feed_assist = usize::try_from(store.get_or(&feed_assist_key(index), -1i64))
            .ok()
            .filter(|slot| *slot < SLOTS_PER_UNIT);
        let rfid_sync = config.rfid_inventory_sync;

        debug!(unit = index, ?feed_assist, "unit restored");
        Self {
            index,
            config,
            retry,
            handle,
            store,
            scheduler,
            state: Mutex::new(UnitState {
                info: UnitStatus::default(),
                firmware: None,
                inventory,
                feed_assist,
                rfid_pending: BTreeSet::new(),
                rfid_attempted: BTreeSet::new(),
                rfid_sync,
                effects: StatusEffects::default(),
            }),
            effects_ready: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub fn handle(&self) -> &DispatcherHandle {
        &self.handle
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot < SLOTS_PER_UNIT {
            Ok(())
        } else {
            Err(UnitError::SlotOutOfRange {
                unit: self.index,
                slot,
            })
        }
    }

    // ---------------------------------------------------------------
    // Local state
    // ---------------------------------------------------------------

    /// Last status reported by the device.
    pub fn status(&self) -> UnitStatus {
        self.state().info.clone()
    }

    /// `get_info` reply from the last connect.
    pub fn firmware(&self) -> Option<Value> {
        self.state().firmware.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state().info.is_ready()
    }

    /// Slot status as the device last reported it.
    pub fn device_slot_status(&self, slot: usize) -> SlotStatus {
        self.state().info.slot_status(slot)
    }

    pub fn slot(&self, slot: usize) -> Option<Slot> {
        self.state().inventory.get(slot).cloned()
    }

    pub fn inventory(&self) -> Vec<Slot> {
        self.state().inventory.clone()
    }

    /// Replace one slot's metadata and persist the inventory.
    pub fn set_slot(&self, slot: usize, value: Slot) -> Result<()> {
        self.check_slot(slot)?;
        self.state().inventory[slot] = value;
        self.persist_inventory();
        Ok(())
    }

    pub fn set_slot_status(&self, slot: usize, status: SlotStatus) -> Result<()> {
        self.check_slot(slot)?;
        {
            let mut state = self.state();
            debug!(unit = self.index, slot, from = %state.inventory[slot].status, to = %status, "slot status set");
            state.inventory[slot].status = status;
        }
        self.persist_inventory();
        Ok(())
    }

    /// Clear every slot.
    pub fn reset_inventory(&self) {
        self.state().inventory = vec![Slot::default(); SLOTS_PER_UNIT];
        self.persist_inventory();
        info!(unit = self.index, "inventory reset");
    }

    pub fn persist_inventory(&self) {
        let inventory = self.state().inventory.clone();
        if let Err(err) = self.store.save(&inventory_key(self.index), &inventory) {
            warn!(unit = self.index, %err, "failed to persist inventory");
        }
    }

    /// Slot with feed assist active, if any.
    pub fn feed_assist(&self) -> Option<usize> {
        self.state().feed_assist
    }

    /// Forget the feed-assist slot without talking to the device.
    pub fn reset_feed_assist(&self) {
        self.state().feed_assist = None;
        self.persist_feed_assist(None);
    }

    fn persist_feed_assist(&self, slot: Option<usize>) {
        let value = slot.map_or(-1, |s| s as i64);
        if let Err(err) = self.store.save(&feed_assist_key(self.index), &value) {
            warn!(unit = self.index, %err, "failed to persist feed assist slot");
        }
    }

    pub fn rfid_sync_enabled(&self) -> bool {
        self.state().rfid_sync
    }

    pub fn set_rfid_sync(&self, enabled: bool) {
        self.state().rfid_sync = enabled;
        info!(unit = self.index, enabled, "RFID inventory sync toggled");
    }

    // ---------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------

    /// Send `request` under the retry policy.
    pub async fn execute(&self, request: Request, priority: Priority) -> Result<Response> {
        let method = request.method.clone();
        let mut forbidden = 0u32;
        let mut silent = 0u32;

        loop {
            let pending = match priority {
                Priority::High => self.handle.send_high_priority(request.clone())?,
                Priority::Normal => self.handle.send(request.clone())?,
            };

            match pending.await? {
                None => {
                    silent += 1;
                    if silent >= self.retry.no_response_attempts.max(1) {
                        return Err(UnitError::NoResponse {
                            unit: self.index,
                            method,
                            attempts: silent,
                        });
                    }
                    warn!(unit = self.index, %method, attempt = silent, "no response, retrying");
                }
                Some(response) if response.is_forbidden() => {
                    if forbidden >= self.retry.forbidden_retries {
                        return Err(UnitError::Forbidden {
                            unit: self.index,
                            method,
                            attempts: forbidden + 1,
                        });
                    }
                    forbidden += 1;
                    debug!(unit = self.index, %method, retry = forbidden, "device busy, backing off");
                    self.scheduler.sleep(self.retry.forbidden_backoff).await;
                }
                Some(response) if !response.is_success() => {
                    return Err(UnitError::Device {
                        unit: self.index,
                        method,
                        code: response.code.unwrap_or(-1),
                        msg: response.message().to_string(),
                    });
                }
                Some(response) => return Ok(response),
            }
        }
    }

    /// Firmware model and version.
    pub async fn get_info(&self) -> Result<Value> {
        let response = self.execute(Request::get_info(), Priority::Normal).await?;
        let info = response.result.unwrap_or(Value::Null);
        self.state().firmware = Some(info.clone());
        Ok(info)
    }

    /// Query and apply the device status.
    pub async fn refresh_status(&self) -> Result<UnitStatus> {
        let response = self
            .execute(Request::get_status(), Priority::High)
            .await?;
        let status = parse_status(&response).ok_or_else(|| UnitError::Device {
            unit: self.index,
            method: Request::get_status().method,
            code: -1,
            msg: "status reply carried no result".to_string(),
        })?;
        self.apply_status(status.clone());
        Ok(status)
    }

    /// Wait until the device reports `ready`.
    ///
    /// Status is refreshed right away and then every `ready_refresh_interval`
    /// while waiting.
    pub async fn wait_ready(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let start = self.scheduler.now();
        let mut last_refresh = None;
        loop {
            let now = self.scheduler.now();
            let due = last_refresh.is_none_or(|at| now.saturating_duration_since(at) >= self.config.ready_refresh_interval);
            if due {
                last_refresh = Some(now);
                if let Err(err) = self.refresh_status().await {
                    debug!(unit = self.index, %err, "status refresh failed while waiting for ready");
                }
            }
            if self.is_ready() {
                return Ok(());
            }

            let waited = self.scheduler.now().saturating_duration_since(start);
            if waited >= self.config.ready_timeout {
                return Err(UnitError::NotReady {
                    unit: self.index,
                    waited_secs: waited.as_secs_f64(),
                });
            }
            self.scheduler.sleep(self.config.ready_poll_interval).await;
        }
    }

    pub async fn feed(&self, slot: usize, length: u32, speed: u32) -> Result<()> {
        self.check_slot(slot)?;
        self.wait_ready().await?;
        info!(unit = self.index, slot, length, speed, "feed");
        self.execute(Request::feed_filament(slot, length, speed), Priority::Normal)
            .await?;
        Ok(())
    }

    pub async fn stop_feed(&self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        self.execute(Request::stop_feed_filament(slot), Priority::High)
            .await?;
        debug!(unit = self.index, slot, "feed stopped");
        Ok(())
    }

    /// Unwind `length` mm and wait for the motion to finish.
    ///
    /// Skipped when the device already reports the slot empty; stopped early
    /// if the slot goes empty while unwinding.
    pub async fn retract(&self, slot: usize, length: u32, speed: u32) -> Result<RetractOutcome> {
        self.check_slot(slot)?;
        self.wait_ready().await?;

        if self.device_slot_status(slot).is_empty() {
            info!(unit = self.index, slot, "retract skipped, slot empty");
            return Ok(RetractOutcome::SlotEmpty);
        }

        info!(unit = self.index, slot, length, speed, "retract");
        self.execute(Request::unwind_filament(slot, length, speed), Priority::Normal)
            .await?;

        let dwell = Duration::from_secs_f64(length as f64 / speed.max(1) as f64);
        let start = self.scheduler.now();
        loop {
            let elapsed = self.scheduler.now().saturating_duration_since(start);
            if elapsed >= dwell {
                break;
            }
            if self.device_slot_status(slot).is_empty() {
                info!(unit = self.index, slot, elapsed = ?elapsed, "slot went empty, stopping retract");
                self.stop_retract(slot).await?;
                self.wait_ready().await?;
                return Ok(RetractOutcome::StoppedEarly);
            }
            self.scheduler.sleep(RETRACT_POLL.min(dwell - elapsed)).await;
        }

        self.wait_ready().await?;
        Ok(RetractOutcome::Completed)
    }

    pub async fn stop_retract(&self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        self.execute(Request::stop_unwind_filament(slot), Priority::Normal)
            .await?;
        debug!(unit = self.index, slot, "retract stopped");
        Ok(())
    }

    /// Change the speed of a running feed.
    pub async fn update_feeding_speed(&self, slot: usize, speed: u32) -> Result<()> {
        self.check_slot(slot)?;
        self.execute(Request::update_feeding_speed(slot, speed), Priority::Normal)
            .await?;
        Ok(())
    }

    /// Change the speed of a running unwind.
    pub async fn update_unwinding_speed(&self, slot: usize, speed: u32) -> Result<()> {
        self.check_slot(slot)?;
        self.execute(Request::update_unwinding_speed(slot, speed), Priority::Normal)
            .await?;
        Ok(())
    }

    pub async fn enable_feed_assist(&self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        self.execute(Request::start_feed_assist(slot), Priority::Normal)
            .await?;
        self.state().feed_assist = Some(slot);
        self.persist_feed_assist(Some(slot));
        info!(unit = self.index, slot, "feed assist enabled");
        self.wait_ready().await
    }

    /// Disable feed assist on `slot`. Returns `false` when it was not active there.
    pub async fn disable_feed_assist(&self, slot: usize) -> Result<bool> {
        self.check_slot(slot)?;
        if self.feed_assist() != Some(slot) {
            warn!(unit = self.index, slot, "feed assist not active on slot");
            return Ok(false);
        }

        self.wait_ready().await?;
        self.execute(Request::stop_feed_assist(slot), Priority::Normal)
            .await?;
        self.state().feed_assist = None;
        self.persist_feed_assist(None);
        info!(unit = self.index, slot, "feed assist disabled");
        self.wait_ready().await?;
        Ok(true)
    }

    /// Start the dryer at `temp` C for `minutes`.
    pub async fn start_drying(&self, temp: u32, minutes: u32) -> Result<()> {
        if temp > self.config.max_dryer_temperature {
            return Err(UnitError::DryerTemperature {
                requested: temp,
                max: self.config.max_dryer_temperature,
            });
        }
        self.execute(Request::drying(temp, minutes), Priority::Normal)
            .await?;
        info!(unit = self.index, temp, minutes, "drying started");
        Ok(())
    }

    pub async fn stop_drying(&self) -> Result<()> {
        self.execute(Request::drying_stop(), Priority::Normal).await?;
        info!(unit = self.index, "drying stopped");
        Ok(())
    }

    /// Read a slot's full tag and fold it into the inventory.
    pub async fn query_filament_info(&self, slot: usize) -> Result<FilamentInfo> {
        self.check_slot(slot)?;
        let result = self
            .execute(Request::get_filament_info(slot), Priority::Normal)
            .await;
        self.state().rfid_pending.remove(&slot);

        let response = result?;
        let info: FilamentInfo = response
            .result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| UnitError::Device {
                unit: self.index,
                method: Request::get_filament_info(slot).method,
                code: -1,
                msg: err.to_string(),
            })?
            .unwrap_or_default();

        let temp = rfid_temperature(
            info.extruder_temp.unwrap_or_default(),
            self.config.rfid_temp_mode,
            &info.material,
        );
        {
            let mut state = self.state();
            let entry = &mut state.inventory[slot];
            entry.temp = temp;
            if !info.sku.is_empty() {
                entry.sku = Some(info.sku.clone());
            }
            if !info.brand.is_empty() {
                entry.brand = Some(info.brand.clone());
            }
            if info.icon_type.is_some() {
                entry.icon_type = info.icon_type;
            }
            if info.colors.is_some() {
                entry.rgba = info.colors.clone();
            }
            if info.extruder_temp.is_some() {
                entry.extruder_temp = info.extruder_temp;
            }
            if info.hotbed_temp.is_some() {
                entry.hotbed_temp = info.hotbed_temp;
            }
            if info.diameter.is_some() {
                entry.diameter = info.diameter;
            }
            if info.total.is_some() {
                entry.total = info.total;
            }
            if info.current.is_some() {
                entry.current = info.current;
            }
        }
        self.persist_inventory();
        info!(unit = self.index, slot, sku = %info.sku, temp, "RFID data stored");
        Ok(info)
    }

    // ---------------------------------------------------------------
    // Status handling
    // ---------------------------------------------------------------

    /// Fold a device status into the local inventory.
    ///
    /// Follow-up requests are queued and run by [`Unit::run`] or
    /// [`Unit::process_effects`].
    pub fn apply_status(&self, status: UnitStatus) -> StatusEffects {
        let mut guard = self.state();
        let state = &mut *guard;
        let changed = status.changed_fields(&state.info);
        if !changed.is_empty() {
            debug!(unit = self.index, fields = ?changed, status = %status.status, "device status changed");
        }

        let mut effects = StatusEffects::default();
        let mut auto_loaded = false;
        let rfid_sync = state.rfid_sync;

        for device in &status.slots {
            let idx = device.index;
            if idx >= SLOTS_PER_UNIT {
                continue;
            }
            let new_status = SlotStatus::from(device.status.as_str());
            let pending = state.rfid_pending.contains(&idx);
            let attempted = state.rfid_attempted.contains(&idx);
            let entry = &mut state.inventory[idx];

            if entry.status != new_status {
                effects.inventory_changed = true;
                if entry.status.is_empty() && new_status.is_ready() {
                    info!(unit = self.index, slot = idx, material = %entry.material, "slot auto-loaded");
                    auto_loaded = true;
                } else if entry.status.is_ready() && new_status.is_empty() {
                    info!(unit = self.index, slot = idx, material = %entry.material, "slot went empty");
                }
            }

            match new_status {
                SlotStatus::Empty => {
                    if entry.rfid || entry.sku.is_some() || entry.extruder_temp.is_some() {
                        effects.inventory_changed = true;
                    }
                    entry.clear_rfid_metadata();
                    state.rfid_attempted.remove(&idx);
                    state.rfid_pending.remove(&idx);
                }
                SlotStatus::Ready => {
                    let material = device.material.trim();
                    let incoming = device
                        .color
                        .as_deref()
                        .filter(|c| c.len() >= 3)
                        .map(|c| [c[0], c[1], c[2]]);

                    let mut query = false;
                    if rfid_sync && device.rfid == Some(RFID_IDENTIFIED) && !material.is_empty() {
                        if let Some(color) = incoming {
                            let missing_data = entry.extruder_temp.is_none() || entry.hotbed_temp.is_none();
                            let differs = material != entry.material
                                || color != entry.color
                                || !entry.rfid
                                || (missing_data && !pending && !attempted);
                            if differs {
                                entry.material = material.to_string();
                                entry.color = color;
                                entry.rfid = true;
                                entry.temp = material_temperature(material);
                                if !device.sku.is_empty() {
                                    entry.sku = Some(device.sku.clone());
                                }
                                if !device.brand.is_empty() {
                                    entry.brand = Some(device.brand.clone());
                                }
                                info!(unit = self.index, slot = idx, material, ?color, "RFID tag detected");
                                effects.inventory_changed = true;
                                query = !pending && !attempted;
                            }
                        }
                    }

                    let tagged = !matches!(device.rfid, None | Some(0));
                    let may_default = rfid_sync || !tagged;
                    let missing_material = entry.material.trim().is_empty();
                    let missing_temp = entry.temp == 0;
                    if may_default && (missing_material || missing_temp) {
                        if missing_material {
                            entry.material = DEFAULT_MATERIAL.to_string();
                        }
                        if missing_temp {
                            entry.temp = DEFAULT_TEMP;
                        }
                        if entry.color == [0, 0, 0] {
                            entry.color = DEFAULT_COLOR;
                        }
                        info!(unit = self.index, slot = idx, material = %entry.material, temp = entry.temp, "ready slot has no metadata, using defaults");
                        effects.inventory_changed = true;
                    }

                    if query {
                        state.rfid_pending.insert(idx);
                        state.rfid_attempted.insert(idx);
                        effects.rfid_queries.push(idx);
                    }
                }
                SlotStatus::Other(_) => {}
            }

            state.inventory[idx].status = new_status;
        }

        if auto_loaded {
            // The device drops feed assist when it pulls in a new spool.
            effects.restore_assist = state.feed_assist;
        }

        state.info = status;
        if !effects.is_empty() {
            state.effects.merge(effects.clone());
        }
        drop(guard);

        if effects.inventory_changed {
            self.persist_inventory();
        }
        if !effects.is_empty() {
            self.effects_ready.notify_one();
        }
        effects
    }

    fn take_effects(&self) -> StatusEffects {
        std::mem::take(&mut self.state().effects)
    }

    /// Run queued follow-ups: RFID queries and feed-assist restore.
    pub async fn process_effects(&self) {
        let effects = self.take_effects();
        for slot in effects.rfid_queries {
            if let Err(err) = self.query_filament_info(slot).await {
                warn!(unit = self.index, slot, %err, "get_filament_info failed");
            }
        }
        if let Some(slot) = effects.restore_assist {
            info!(unit = self.index, slot, "re-enabling feed assist after auto-load");
            if let Err(err) = self.enable_feed_assist(slot).await {
                warn!(unit = self.index, slot, %err, "failed to restore feed assist");
            }
        }
    }

    async fn heartbeat(&self) {
        if !self.handle.is_connected() {
            trace!(unit = self.index, "heartbeat skipped, not connected");
            return;
        }
        match self.handle.request_high_priority(Request::get_status()).await {
            Ok(response) if response.is_success() => {
                if let Some(status) = parse_status(&response) {
                    self.apply_status(status);
                }
            }
            Ok(response) => {
                warn!(unit = self.index, msg = response.message(), "heartbeat error reply");
            }
            Err(err) => debug!(unit = self.index, %err, "heartbeat failed"),
        }
    }

    async fn on_connected(&self) {
        if let Some(slot) = self.feed_assist() {
            info!(unit = self.index, slot, "restoring feed assist after connect");
            if let Err(err) = self.enable_feed_assist(slot).await {
                warn!(unit = self.index, slot, %err, "failed to restore feed assist");
            }
        }
        if let Err(err) = self.refresh_status().await {
            warn!(unit = self.index, %err, "status refresh after connect failed");
        }
    }

    fn on_event(&self, event: DispatchEvent) -> bool {
        match event {
            DispatchEvent::Connected => return true,
            DispatchEvent::Disconnected => {
                warn!(unit = self.index, "link lost");
                self.state().info = UnitStatus::default();
            }
            DispatchEvent::Info(response) => {
                self.state().firmware = response.result;
            }
            DispatchEvent::Status(response) => {
                if let Some(status) = parse_status(&response) {
                    self.apply_status(status);
                }
            }
            DispatchEvent::Unsolicited(value) => {
                debug!(unit = self.index, %value, "unsolicited message");
            }
        }
        false
    }

    /// Drive heartbeats, dispatcher events and status follow-ups until cancelled.
    pub async fn run(self: Arc<Self>, mut events: EventStream, cancel: CancellationToken) {
        info!(unit = self.index, interval = ?self.config.heartbeat_interval, "unit started");
        loop {
            let heartbeat = self.scheduler.sleep(self.config.heartbeat_interval);
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if self.on_event(event) {
                            self.on_connected().await;
                        }
                    }
                    None => break,
                },
                _ = self.effects_ready.notified() => {
                    let effects = self.take_effects();
                    for slot in effects.rfid_queries {
                        let unit = Arc::clone(&self);
                        self.scheduler.spawn(Box::pin(async move {
                            if let Err(err) = unit.query_filament_info(slot).await {
                                warn!(unit = unit.index, slot, %err, "get_filament_info failed");
                            }
                        }));
                    }
                    if let Some(slot) = effects.restore_assist {
                        if let Err(err) = self.enable_feed_assist(slot).await {
                            warn!(unit = self.index, slot, %err, "failed to restore feed assist");
                        }
                    }
                }
                _ = heartbeat => self.heartbeat().await,
            }
        }
        info!(unit = self.index, "unit stopped");
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Unit")
            .field("index", &self.index)
            .field("status", &state.info.status)
            .field("feed_assist", &state.feed_assist)
            .finish()
    }
}

fn parse_status(response: &Response) -> Option<UnitStatus> {
    let result = response.result.clone()?;
    match serde_json::from_value(result) {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(%err, "malformed status payload");
            None
        }
    }
}
