use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use acepro_frame::{FrameReader, FrameWriter};
use acepro_transport::Connector;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use crate::events::{DispatchEvent, EventStream};
use crate::health::{ConnectionStatus, LinkHealth, StabilityConfig};
use crate::protocol::{response_id, Request, Response, GET_STATUS};

/// What a request resolves to. `None` is the "no response" sentinel.
pub type Reply = Option<Response>;

/// Queue tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("high-priority"),
            Priority::Normal => f.write_str("normal-priority"),
        }
    }
}

/// Link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub(crate) enum Responder {
    Caller(oneshot::Sender<Reply>),
    StatusPoll,
    Info,
}

struct Queued {
    request: Request,
    responder: Responder,
}

struct InFlight {
    method: String,
    sent_at: Instant,
    responder: Responder,
}

pub(crate) enum Routed {
    Reply(Responder, Response),
    Unsolicited(Value),
}

/// Queues and in-flight table for one connection.
///
/// Every method is synchronous; the dispatcher task drives it once per tick.
pub(crate) struct DispatchState {
    connection: ConnectionState,
    next_id: u64,
    high: VecDeque<Queued>,
    normal: VecDeque<Queued>,
    in_flight: HashMap<u64, InFlight>,
    last_status_poll: Instant,
    capacity: usize,
    health: LinkHealth,
}

impl DispatchState {
    pub(crate) fn new(capacity: usize, now: Instant) -> Self {
        Self {
            connection: ConnectionState::Connecting,
            next_id: 0,
            high: VecDeque::new(),
            normal: VecDeque::new(),
            in_flight: HashMap::new(),
            last_status_poll: now,
            capacity,
            health: LinkHealth::default(),
        }
    }

    pub(crate) fn enqueue(
        &mut self,
        priority: Priority,
        request: Request,
        responder: Responder,
    ) -> Result<()> {
        if self.connection == ConnectionState::Disconnected {
            return Err(DispatchError::NotConnected);
        }
        let queue = match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
        };
        if queue.len() >= self.capacity {
            return Err(DispatchError::QueueFull {
                priority,
                capacity: self.capacity,
            });
        }
        queue.push_back(Queued { request, responder });
        Ok(())
    }

    /// Remove every in-flight entry older than `timeout`.
    pub(crate) fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<(u64, String, Responder)> {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.sent_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                self.in_flight
                    .remove(&id)
                    .map(|entry| (id, entry.method, entry.responder))
            })
            .collect()
    }

    /// Pop the next request allowed by the window, stamping its id.
    pub(crate) fn next_to_send(
        &mut self,
        now: Instant,
        window: usize,
        idle_status_interval: Duration,
    ) -> Option<Request> {
        if self.in_flight.len() >= window {
            return None;
        }

        let queued = match self.high.pop_front().or_else(|| self.normal.pop_front()) {
            Some(queued) => queued,
            None => {
                let idle = self.in_flight.is_empty()
                    && now.saturating_duration_since(self.last_status_poll) >= idle_status_interval;
                if !idle {
                    return None;
                }
                trace!("idle, polling status");
                Queued {
                    request: Request::get_status(),
                    responder: Responder::StatusPoll,
                }
            }
        };

        let Queued {
            mut request,
            responder,
        } = queued;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        request.id = Some(id);
        if request.method == GET_STATUS {
            self.last_status_poll = now;
        }
        self.in_flight.insert(
            id,
            InFlight {
                method: request.method.clone(),
                sent_at: now,
                responder,
            },
        );
        Some(request)
    }

    /// Match an inbound object against the in-flight table.
    pub(crate) fn route(&mut self, value: Value) -> Routed {
        let Some(id) = response_id(&value) else {
            return Routed::Unsolicited(value);
        };
        if value.get("method").is_some() || !self.in_flight.contains_key(&id) {
            return Routed::Unsolicited(value);
        }
        let response: Response = match serde_json::from_value(value.clone()) {
            Ok(response) => response,
            Err(err) => {
                warn!(id, %err, "response with unexpected shape");
                return Routed::Unsolicited(value);
            }
        };
        match self.in_flight.remove(&id) {
            Some(entry) => Routed::Reply(entry.responder, response),
            None => Routed::Unsolicited(value),
        }
    }

    /// New link: ids restart, idle timer restarts.
    pub(crate) fn connected(&mut self, now: Instant) {
        self.connection = ConnectionState::Connected;
        self.next_id = 0;
        self.last_status_poll = now;
        self.health.connected(now);
    }

    /// Drop everything without replying. Waiting callers see their sender dropped.
    pub(crate) fn flush(&mut self, next: ConnectionState) {
        self.high.clear();
        self.normal.clear();
        self.in_flight.clear();
        self.connection = next;
        self.health.disconnected();
    }

    pub(crate) fn record_reconnect(&mut self, now: Instant, window: Duration) {
        self.health.record_reconnect(now, window);
    }

    pub(crate) fn connection_status(&mut self, now: Instant, config: &StabilityConfig) -> ConnectionStatus {
        self.health.status(self.connection, now, config)
    }

    pub(crate) fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn queued_len(&self) -> (usize, usize) {
        (self.high.len(), self.normal.len())
    }
}

struct Shared {
    state: Mutex<DispatchState>,
    wake: Notify,
    cancel: CancellationToken,
    stability: StabilityConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a dispatcher for `connector`.
///
/// The returned [`Dispatcher`] must be driven with [`Dispatcher::run`]
/// (usually on its own task). The handle is cheap to clone.
pub fn dispatcher<C: Connector>(
    connector: C,
    config: DispatchConfig,
) -> (Dispatcher<C>, DispatcherHandle, EventStream) {
    let shared = Arc::new(Shared {
        state: Mutex::new(DispatchState::new(config.queue_capacity, Instant::now())),
        wake: Notify::new(),
        cancel: CancellationToken::new(),
        stability: config.stability.clone(),
    });
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let dispatcher = Dispatcher {
        connector,
        config,
        shared: Arc::clone(&shared),
        events: events_tx,
    };
    (
        dispatcher,
        DispatcherHandle { shared },
        EventStream::new(events_rx),
    )
}

/// Owns the link and drives the queues.
pub struct Dispatcher<C: Connector> {
    connector: C,
    config: DispatchConfig,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<DispatchEvent>,
}

impl<C: Connector> Dispatcher<C> {
    /// Connect, serve, and reconnect until shut down.
    pub async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        let target = self.connector.describe();
        let mut attempted = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            {
                let mut state = self.shared.lock();
                if attempted {
                    state.record_reconnect(Instant::now(), self.config.stability.window);
                }
                state.set_connection(ConnectionState::Connecting);
            }
            attempted = true;
            match self.connector.connect() {
                Ok(link) => {
                    info!(%target, "connected");
                    self.on_connected();
                    match self.serve(link, &cancel).await {
                        Ok(()) => break,
                        Err(err) => {
                            warn!(%target, %err, "link lost");
                            self.on_disconnected();
                        }
                    }
                }
                Err(err) => {
                    let status = {
                        let mut state = self.shared.lock();
                        state.set_connection(ConnectionState::Disconnected);
                        state.connection_status(Instant::now(), &self.config.stability)
                    };
                    warn!(
                        %target,
                        %err,
                        recent_reconnects = status.recent_reconnects,
                        "connect failed"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
            }
        }

        self.shared.lock().flush(ConnectionState::Disconnected);
        debug!(%target, "dispatcher stopped");
    }

    fn on_connected(&mut self) {
        let mut state = self.shared.lock();
        state.connected(Instant::now());
        if self.config.query_info_on_connect {
            if let Err(err) = state.enqueue(Priority::High, Request::get_info(), Responder::Info) {
                warn!(%err, "could not queue get_info");
            }
        }
        drop(state);
        self.publish(DispatchEvent::Connected);
    }

    fn on_disconnected(&mut self) {
        self.shared.lock().flush(ConnectionState::Disconnected);
        self.publish(DispatchEvent::Disconnected);
    }

    async fn serve(&mut self, link: C::Link, cancel: &CancellationToken) -> Result<()> {
        let mut link = FrameWriter::new(FrameReader::new(link));
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
                _ = self.shared.wake.notified() => {}
            }

            for value in link.get_mut().poll()? {
                let routed = self.shared.lock().route(value);
                self.deliver_routed(routed);
            }

            // Whatever the link refused last tick goes out before anything new.
            if !link.write_pending()? {
                trace!(pending = link.pending(), "link still busy");
            }

            let now = Instant::now();
            let (expired, outgoing) = {
                let mut state = self.shared.lock();
                let expired = state.expire(now, self.config.response_timeout);
                let mut outgoing = Vec::new();
                while let Some(request) = state.next_to_send(
                    now,
                    self.config.window,
                    self.config.idle_status_interval,
                ) {
                    outgoing.push(request);
                }
                (expired, outgoing)
            };

            for (id, method, responder) in expired {
                debug!(id, %method, "request timed out");
                self.deliver(responder, None);
            }

            for request in &outgoing {
                trace!(id = ?request.id, method = %request.method, "sending");
                link.send(request)?;
            }
        }
    }

    fn deliver_routed(&self, routed: Routed) {
        match routed {
            Routed::Reply(responder, response) => self.deliver(responder, Some(response)),
            Routed::Unsolicited(value) => {
                debug!(?value, "unsolicited message");
                self.publish(DispatchEvent::Unsolicited(value));
            }
        }
    }

    fn deliver(&self, responder: Responder, reply: Reply) {
        match responder {
            Responder::Caller(tx) => {
                if tx.send(reply).is_err() {
                    trace!("caller dropped before reply");
                }
            }
            Responder::StatusPoll => {
                if let Some(response) = reply {
                    self.publish(DispatchEvent::Status(response));
                }
            }
            Responder::Info => match reply {
                Some(response) => {
                    info!(result = ?response.result, "unit info");
                    self.publish(DispatchEvent::Info(response));
                }
                None => warn!("no response to get_info"),
            },
        }
    }

    fn publish(&self, event: DispatchEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

/// Caller side of a dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Queue at normal priority. Fails fast when the queue is full.
    pub fn send(&self, request: Request) -> Result<ResponseFuture> {
        self.enqueue(Priority::Normal, request)
    }

    /// Queue ahead of every normal-priority request.
    pub fn send_high_priority(&self, request: Request) -> Result<ResponseFuture> {
        self.enqueue(Priority::High, request)
    }

    fn enqueue(&self, priority: Priority, request: Request) -> Result<ResponseFuture> {
        if self.shared.cancel.is_cancelled() {
            return Err(DispatchError::Shutdown);
        }
        let method = request.method.clone();
        let (tx, rx) = oneshot::channel();
        self.shared
            .lock()
            .enqueue(priority, request, Responder::Caller(tx))?;
        self.shared.wake.notify_one();
        Ok(ResponseFuture { method, rx })
    }

    /// Send and wait; "no response" becomes [`DispatchError::NoResponse`].
    pub async fn request(&self, request: Request) -> Result<Response> {
        let method = request.method.clone();
        self.send(request)?
            .await?
            .ok_or(DispatchError::NoResponse { method })
    }

    /// High-priority variant of [`DispatcherHandle::request`].
    pub async fn request_high_priority(&self, request: Request) -> Result<Response> {
        let method = request.method.clone();
        self.send_high_priority(request)?
            .await?
            .ok_or(DispatchError::NoResponse { method })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Link state plus recent reconnect history.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared
            .lock()
            .connection_status(Instant::now(), &self.shared.stability)
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight_len()
    }

    /// `(high, normal)` queue depths.
    pub fn queued(&self) -> (usize, usize) {
        self.shared.lock().queued_len()
    }

    /// Wait until a link is up.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.is_connected() {
            if self.shared.cancel.is_cancelled() {
                return Err(DispatchError::Shutdown);
            }
            if Instant::now() >= deadline {
                return Err(DispatchError::NotConnected);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Stop the dispatcher task and drop all pending requests.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

impl fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("state", &self.connection_state())
            .finish()
    }
}

/// Resolves with the reply to one request.
#[derive(Debug)]
pub struct ResponseFuture {
    method: String,
    rx: oneshot::Receiver<Reply>,
}

impl ResponseFuture {
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for ResponseFuture {
    type Output = Result<Reply>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(Ok(reply)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::Disconnected {
                method: this.method.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}
