//! Public device handle and its background event loop.
//!
//! A [`Device`] is a cheap, cloneable handle. The work happens in one task per
//! device that owns the socket, the [`Engine`] and the timers; handles talk to
//! it through a command channel and read its state from a `watch` snapshot.

use crate::config::DeviceBuilder;
use crate::engine::{ConnectionState, DeviceIdentity, Engine, Reaction};
use crate::error::{GreeError, Result};
use crate::event::{DeviceEvent, DeviceListener, DeviceSnapshot};
use crate::params::{
    self, FanSpeed, Mode, ParameterTable, TemperatureUnit, VerticalSwing,
};
use crate::scheduler::{HandshakeTimer, PollScheduler, PollTick, RetryPolicy};
use crate::transport::{MAX_DATAGRAM_SIZE, UdpTransport};
use futures_core::stream::Stream;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const COMMAND_QUEUE_SIZE: usize = 32;
const EVENT_QUEUE_SIZE: usize = 64;

/// Target temperatures the unit accepts when the unit is Fahrenheit.
const FAHRENHEIT_RANGE: RangeInclusive<i64> = 61..=86;

/// Internal commands for the background task.
enum DeviceCommand {
    SetParameters {
        codes: Vec<String>,
        values: Vec<i64>,
        resp_tx: oneshot::Sender<Result<()>>,
    },
}

impl DeviceCommand {
    fn respond(self, result: Result<()>) {
        match self {
            DeviceCommand::SetParameters { resp_tx, .. } => {
                let _ = resp_tx.send(result);
            }
        }
    }
}

/// Handle to one air conditioner.
#[derive(Clone)]
pub struct Device {
    host: IpAddr,
    params: Arc<ParameterTable>,
    tx: mpsc::Sender<DeviceCommand>,
    snapshot_rx: watch::Receiver<DeviceSnapshot>,
    events: broadcast::Sender<DeviceEvent>,
    cancel_token: CancellationToken,
    // Holds the task until `start` hands it to the runtime
    pending: Arc<Mutex<Option<DeviceTask>>>,
}

impl Device {
    pub(crate) fn new(builder: DeviceBuilder) -> Self {
        let params = Arc::new(builder.params);
        let target = SocketAddr::new(builder.host, builder.device_port);
        let engine = Engine::new(target, builder.default_key, params.clone());

        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
        let (events, _) = broadcast::channel(EVENT_QUEUE_SIZE);
        let cancel_token = CancellationToken::new();

        let task = DeviceTask {
            host: builder.host,
            local_port: builder.local_port,
            poll_interval: builder.poll_interval,
            retry: builder.retry,
            engine,
            rx,
            snapshot_tx,
            events: events.clone(),
            cancel_token: cancel_token.clone(),
        };

        Self {
            host: builder.host,
            params,
            tx,
            snapshot_rx,
            events,
            cancel_token,
            pending: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn parameters(&self) -> &ParameterTable {
        &self.params
    }

    /// Spawn the background task and begin discovery.
    ///
    /// Must be called from within a tokio runtime. Calling it again is a no-op;
    /// calling it after [`stop`](Self::stop) fails with [`GreeError::Stopped`].
    pub fn start(&self) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(GreeError::Stopped);
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| GreeError::Transport(format!("no tokio runtime: {}", e)))?;
        let Some(task) = self.pending.lock().take() else {
            return Ok(());
        };
        info!("Starting device {}", self.host);
        handle.spawn(task.run());
        Ok(())
    }

    /// Stop the background task, cancel polling and release the socket.
    pub fn stop(&self) {
        info!("Stopping device {}", self.host);
        self.cancel_token.cancel();
        // Never started: nothing else will announce the shutdown
        if let Some(task) = self.pending.lock().take() {
            let _ = self
                .events
                .send(DeviceEvent::Disconnected(task.engine.snapshot()));
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Wait until the device is bound.
    pub async fn connected(&self) -> Result<()> {
        let mut rx = self.snapshot_rx.clone();
        rx.wait_for(DeviceSnapshot::is_bound)
            .await
            .map(|_| ())
            .map_err(|_| GreeError::Stopped)
    }

    // -------------------------------------------------------------------------
    // State accessors
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot_rx.borrow().state
    }

    pub fn is_bound(&self) -> bool {
        self.state().is_bound()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.snapshot_rx.borrow().identity.clone()
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.snapshot_rx.borrow().endpoint
    }

    /// Last value the unit reported for `code`. `None` means no report yet,
    /// which is different from a reported zero.
    pub fn get(&self, code: &str) -> Option<i64> {
        self.snapshot_rx.borrow().get(code)
    }

    pub fn power(&self) -> Option<bool> {
        self.get(params::POWER).map(|v| v != 0)
    }

    pub fn target_temperature(&self) -> Option<i64> {
        self.get(params::TARGET_TEMPERATURE)
    }

    pub fn room_temperature(&self) -> Option<i64> {
        self.get(params::ROOM_TEMPERATURE)
    }

    pub fn mode(&self) -> Option<Mode> {
        self.get(params::MODE).and_then(Mode::from_code)
    }

    pub fn fan_speed(&self) -> Option<FanSpeed> {
        self.get(params::FAN_SPEED).and_then(FanSpeed::from_code)
    }

    pub fn vertical_swing(&self) -> Option<VerticalSwing> {
        self.get(params::VERTICAL_SWING)
            .and_then(VerticalSwing::from_code)
    }

    pub fn temperature_unit(&self) -> Option<TemperatureUnit> {
        self.get(params::TEMPERATURE_UNIT)
            .and_then(TemperatureUnit::from_code)
    }
}

// -------------------------------------------------------------------------
// Device Control API
// -------------------------------------------------------------------------
impl Device {
    /// Send a `cmd` setting `codes[i]` to `values[i]`.
    ///
    /// Fails with [`GreeError::NotConnected`] unless bound; nothing is sent in
    /// that case. Success means the datagram left the socket. The effect shows
    /// up through the next `res` or status reply.
    pub async fn set_parameters(&self, codes: &[&str], values: &[i64]) -> Result<()> {
        if self.cancel_token.is_cancelled() {
            return Err(GreeError::Stopped);
        }
        if !self.is_bound() {
            return Err(GreeError::NotConnected);
        }
        debug!("set_parameters: {:?} = {:?} on {}", codes, values, self.host);

        let (resp_tx, resp_rx) = oneshot::channel();
        let command = DeviceCommand::SetParameters {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            values: values.to_vec(),
            resp_tx,
        };
        if self.tx.send(command).await.is_err() {
            error!("Cannot send command for device {}: task not running", self.host);
            return Err(GreeError::Stopped);
        }
        resp_rx.await.map_err(|_| GreeError::Stopped)?
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.set_parameters(&[params::POWER], &[i64::from(on)])
            .await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        self.set_parameters(&[params::MODE], &[mode.code()]).await
    }

    pub async fn set_fan_speed(&self, speed: FanSpeed) -> Result<()> {
        self.set_parameters(&[params::FAN_SPEED], &[speed.code()])
            .await
    }

    pub async fn set_vertical_swing(&self, swing: VerticalSwing) -> Result<()> {
        self.set_parameters(&[params::VERTICAL_SWING], &[swing.code()])
            .await
    }

    /// Set the target temperature. The unit always takes `SetTem` in Celsius;
    /// `unit` only selects what its display shows, so Fahrenheit values are
    /// converted and sent together with `TemUn`.
    pub async fn set_target_temperature(&self, value: i64, unit: TemperatureUnit) -> Result<()> {
        let celsius = match unit {
            TemperatureUnit::Celsius => value,
            TemperatureUnit::Fahrenheit => fahrenheit_to_celsius(value)?,
        };
        self.set_parameters(
            &[params::TEMPERATURE_UNIT, params::TARGET_TEMPERATURE],
            &[unit.code(), celsius],
        )
        .await
    }
}

fn fahrenheit_to_celsius(value: i64) -> Result<i64> {
    if !FAHRENHEIT_RANGE.contains(&value) {
        return Err(GreeError::InvalidArgument(format!(
            "{}°F is outside {}..={}",
            value,
            FAHRENHEIT_RANGE.start(),
            FAHRENHEIT_RANGE.end()
        )));
    }
    Ok(((value - 32) as f64 * 5.0 / 9.0).round() as i64)
}

// -------------------------------------------------------------------------
// Events
// -------------------------------------------------------------------------
impl Device {
    /// Returns a Stream of lifecycle events. Events missed by a slow consumer
    /// are skipped.
    pub fn stream(&self) -> impl Stream<Item = DeviceEvent> + Send + 'static {
        let mut rx = self.events.subscribe();
        let host = self.host;
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event consumer for {} lagged, {} events skipped", host, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Forward every event to `listener` from a spawned task. The task ends
    /// after the final `Disconnected` of a stopped device.
    pub fn listen(&self, listener: Arc<dyn DeviceListener>) -> JoinHandle<()> {
        let stream = self.stream();
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            while let Some(event) = stream.next().await {
                event.dispatch(listener.as_ref());
                if matches!(event, DeviceEvent::Disconnected(_)) && cancel_token.is_cancelled() {
                    break;
                }
            }
        })
    }
}

// -------------------------------------------------------------------------
// Background task
// -------------------------------------------------------------------------

/// Why a session on one socket ended.
enum SessionEnd {
    Stopped,
    Failed(GreeError),
}

struct DeviceTask {
    host: IpAddr,
    local_port: u16,
    poll_interval: Duration,
    retry: RetryPolicy,
    engine: Engine,
    rx: mpsc::Receiver<DeviceCommand>,
    snapshot_tx: watch::Sender<DeviceSnapshot>,
    events: broadcast::Sender<DeviceEvent>,
    cancel_token: CancellationToken,
}

impl DeviceTask {
    async fn run(mut self) {
        debug!("Starting background task for device {}", self.host);

        while let Some(mut transport) = self.bind_with_retry().await {
            match self.run_session(&mut transport).await {
                SessionEnd::Stopped => break,
                SessionEnd::Failed(e) => {
                    warn!("Connection to {} lost: {}", self.host, e);
                    self.engine.reset();
                    self.publish();
                    self.emit_disconnected();
                }
            }
            drop(transport);
            if !self.wait_for_backoff().await {
                break;
            }
        }

        self.engine.reset();
        self.publish();
        self.emit_disconnected();
        self.drain_rx(GreeError::Stopped);
        self.cancel_token.cancel();
        debug!("Background task for device {} exited", self.host);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.engine.snapshot());
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    fn emit_disconnected(&self) {
        self.emit(DeviceEvent::Disconnected(self.engine.snapshot()));
    }

    fn emit_error(&self, error: GreeError) {
        self.emit(DeviceEvent::Error {
            error,
            snapshot: self.engine.snapshot(),
        });
    }

    fn drain_rx(&mut self, error: GreeError) {
        self.rx.close();
        while let Ok(cmd) = self.rx.try_recv() {
            cmd.respond(Err(error.clone()));
        }
    }

    async fn bind_with_retry(&mut self) -> Option<UdpTransport> {
        loop {
            if self.cancel_token.is_cancelled() {
                return None;
            }
            match UdpTransport::bind(self.local_port, self.host) {
                Ok(transport) => return Some(transport),
                Err(e) => {
                    warn!(
                        "Failed to bind socket for {}: {}, retrying in {}s",
                        self.host,
                        e,
                        self.retry.bind_retry.as_secs_f32()
                    );
                    self.emit_disconnected();
                    if !self.wait_for_backoff().await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the bind-retry delay, rejecting commands meanwhile.
    /// Returns false when the device is stopping.
    async fn wait_for_backoff(&mut self) -> bool {
        let sleep_fut = sleep(self.retry.bind_retry);
        tokio::pin!(sleep_fut);

        loop {
            tokio::select! {
                _ = &mut sleep_fut => return true,
                _ = self.cancel_token.cancelled() => return false,
                cmd_opt = self.rx.recv() => match cmd_opt {
                    Some(cmd) => {
                        debug!("Rejecting command during backoff for device {}", self.host);
                        cmd.respond(Err(GreeError::NotConnected));
                    }
                    None => return false,
                },
            }
        }
    }

    async fn run_session(&mut self, transport: &mut UdpTransport) -> SessionEnd {
        let mut poller = PollScheduler::new(self.poll_interval, self.retry.max_missed_polls);
        let mut handshake = HandshakeTimer::new(self.retry.handshake_timeout);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        if let Err(e) = self.discover(transport, &mut handshake).await {
            return SessionEnd::Failed(e);
        }

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Background task for {} received stop signal", self.host);
                    return SessionEnd::Stopped;
                }
                res = transport.recv(&mut buf) => match res {
                    Ok((len, from)) => {
                        let data = &buf[..len];
                        if let Err(e) = self
                            .on_datagram(transport, data, from, &mut poller, &mut handshake)
                            .await
                        {
                            return SessionEnd::Failed(e);
                        }
                    }
                    Err(e) => return SessionEnd::Failed(e),
                },
                tick = poller.tick() => match tick {
                    PollTick::Poll => self.poll(transport).await,
                    PollTick::Lost => {
                        warn!(
                            "Device {} missed {} status polls, rediscovering",
                            self.host, self.retry.max_missed_polls
                        );
                        poller.cancel();
                        self.engine.reset();
                        self.publish();
                        self.emit_disconnected();
                        if let Err(e) = self.discover(transport, &mut handshake).await {
                            return SessionEnd::Failed(e);
                        }
                    }
                },
                _ = handshake.expired() => {
                    warn!(
                        "No bind confirmation from {} within {}s ({}), rescanning",
                        self.host,
                        self.retry.handshake_timeout.as_secs_f32(),
                        self.engine.state()
                    );
                    self.emit_error(GreeError::Transport(format!(
                        "handshake with {} timed out",
                        self.host
                    )));
                    poller.cancel();
                    if let Err(e) = self.discover(transport, &mut handshake).await {
                        return SessionEnd::Failed(e);
                    }
                }
                cmd_opt = self.rx.recv() => match cmd_opt {
                    Some(cmd) => self.on_command(transport, cmd).await,
                    None => {
                        debug!("All handles for device {} dropped, stopping task", self.host);
                        return SessionEnd::Stopped;
                    }
                },
            }
        }
    }

    /// Reset to `Idle` and send a fresh scan. The only place a scan is sent.
    ///
    /// A broadcast filter is released first: the unit may answer from a new
    /// address, or a different unit may answer.
    async fn discover(
        &mut self,
        transport: &mut UdpTransport,
        handshake: &mut HandshakeTimer,
    ) -> Result<()> {
        transport.unpin_sender();
        self.engine.reset();
        let datagram = self.engine.start()?;
        self.publish();
        info!("Scanning for device at {}", datagram.target);
        transport.send(&datagram).await?;
        handshake.arm();
        Ok(())
    }

    /// Feed one datagram to the engine and act on the outcome. Only transport
    /// failures are returned; everything else becomes an event.
    async fn on_datagram(
        &mut self,
        transport: &mut UdpTransport,
        data: &[u8],
        from: SocketAddr,
        poller: &mut PollScheduler,
        handshake: &mut HandshakeTimer,
    ) -> Result<()> {
        let reaction = match self.engine.handle_datagram(data, from) {
            Ok(reaction) => reaction,
            Err(e) => {
                debug!(
                    "Dropped datagram from {}: {} [{}]",
                    from,
                    e,
                    hex::encode(data)
                );
                self.emit_error(e);
                return Ok(());
            }
        };
        debug!("Datagram from {} handled: {:?}", from, reaction);

        match reaction {
            Reaction::Identified => {
                transport.pin_sender(from.ip());
                poller.cancel();
                self.publish();
                let datagram = self.engine.bind_request()?;
                transport.send(&datagram).await?;
                handshake.arm();
                self.publish();
            }
            Reaction::Bound => {
                handshake.disarm();
                poller.start();
                self.publish();
                self.emit(DeviceEvent::Connected {
                    success: true,
                    snapshot: self.engine.snapshot(),
                });
            }
            Reaction::BindRejected => {
                self.emit(DeviceEvent::Connected {
                    success: false,
                    snapshot: self.engine.snapshot(),
                });
            }
            Reaction::Status => {
                poller.record_reply();
                self.publish();
                self.emit(DeviceEvent::Status(self.engine.snapshot()));
            }
            Reaction::Update => {
                self.publish();
                self.emit(DeviceEvent::Update(self.engine.snapshot()));
            }
        }
        Ok(())
    }

    async fn poll(&mut self, transport: &UdpTransport) {
        let result = match self.engine.status_request() {
            Ok(datagram) => transport.send(&datagram).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Status poll for {} failed: {}", self.host, e);
            self.emit_error(e);
        }
    }

    async fn on_command(&mut self, transport: &UdpTransport, cmd: DeviceCommand) {
        let DeviceCommand::SetParameters {
            codes,
            values,
            resp_tx,
        } = cmd;
        let result = match self.engine.command_request(&codes, &values) {
            Ok(datagram) => transport.send(&datagram).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!("Command for {} rejected: {}", self.host, e);
        }
        let _ = resp_tx.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        DeviceBuilder::new([127, 0, 0, 1]).build().unwrap()
    }

    #[test]
    fn fahrenheit_conversion() {
        assert_eq!(fahrenheit_to_celsius(61).unwrap(), 16);
        assert_eq!(fahrenheit_to_celsius(72).unwrap(), 22);
        assert_eq!(fahrenheit_to_celsius(86).unwrap(), 30);
        assert!(matches!(
            fahrenheit_to_celsius(90),
            Err(GreeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn fresh_device_has_no_values() {
        let device = device();
        assert_eq!(device.state(), ConnectionState::Idle);
        assert_eq!(device.identity(), None);
        assert_eq!(device.power(), None);
        assert_eq!(device.mode(), None);
        assert_eq!(device.get(params::POWER), None);
    }

    #[tokio::test]
    async fn commands_before_binding_are_refused() {
        let device = device();
        assert_eq!(device.set_power(true).await, Err(GreeError::NotConnected));
        assert_eq!(
            device
                .set_target_temperature(22, TemperatureUnit::Celsius)
                .await,
            Err(GreeError::NotConnected)
        );
    }

    #[tokio::test]
    async fn start_after_stop_fails() {
        let device = device();
        let mut events = device.events.subscribe();
        device.stop();
        assert!(device.is_stopped());
        assert!(matches!(
            events.recv().await,
            Ok(DeviceEvent::Disconnected(_))
        ));
        assert_eq!(device.start(), Err(GreeError::Stopped));
        assert_eq!(device.set_power(true).await, Err(GreeError::Stopped));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let device = device();
        assert!(matches!(device.start(), Err(GreeError::Transport(_))));
        // task is kept for a later start
        assert!(device.pending.lock().is_some());
    }
}
