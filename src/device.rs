//! Individual Kasa device session and state management.
//! Owns the per-device poll/command state machine and emits reading batches.
//!
//! All protocol I/O for one device runs on a single background task, so
//! polls and commands never execute concurrently; a command's follow-up
//! poll completes before the next scheduled poll begins. Separate devices
//! are fully independent.

use crate::error::{KasaError, Result};
use crate::protocol::{Command, DEFAULT_PORT, DeviceResponse};
use crate::readings::{self, ReadingBatch};
use crate::scheduler::PollTimer;
use crate::transport;
use futures_core::stream::Stream;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// First poll after device creation.
const STARTUP_POLL_DELAY: Duration = Duration::from_secs(2);
/// Floor for the configurable poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2500);
/// Night-mode toggles are fire-and-forget and get a short read timeout.
const NIGHT_MODE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Night-mode LED setting. `On` darkens the device's status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NightMode {
    On,
    #[default]
    Off,
}

/// What woke the background task: an externally issued command, or the
/// poll timer reaching its deadline.
enum TaskEvent {
    Command(DeviceCommand),
    PollDue,
}

/// Internal commands for the background poll task.
enum DeviceCommand {
    Poll {
        resp_tx: oneshot::Sender<Result<()>>,
    },
    SetRelay {
        on: bool,
        resp_tx: oneshot::Sender<Result<()>>,
    },
    SetNightLed {
        off: bool,
        resp_tx: oneshot::Sender<Result<()>>,
    },
    PollEnergy {
        resp_tx: oneshot::Sender<Result<()>>,
    },
}

/// Internal state of a device session that is shared and mutable.
struct DeviceState {
    poll_interval: Duration,
    read_timeout: Duration,
    connect_timeout: Duration,
    disabled: bool,
    night_mode: NightMode,
    /// Hardware version reported by the last successful poll; keys the
    /// profile remap for energy readings.
    hw_ver: String,
    last_poll: Option<Instant>,
}

/// Represents a Kasa device session and handles communication.
#[derive(Clone)]
pub struct Device {
    host: String,
    port: u16,

    // Shared mutable state
    state: Arc<RwLock<DeviceState>>,

    // Channel to send commands to the background task
    tx: Option<mpsc::Sender<DeviceCommand>>,

    // Broadcaster for emitted reading batches
    broadcast_tx: broadcast::Sender<ReadingBatch>,

    // Token for stopping the device and its background task
    cancel_token: CancellationToken,
}

/// Builder for [`Device`] sessions.
pub struct DeviceBuilder {
    host: String,
    port: u16,
    poll_interval: Duration,
    read_timeout: Duration,
    connect_timeout: Duration,
    disabled: bool,
    night_mode: NightMode,
}

impl DeviceBuilder {
    pub fn new<H: Into<String>>(host: H) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            disabled: false,
            night_mode: NightMode::Off,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Seconds between scheduled polls, floored at 1.
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval = Duration::from_secs(secs).max(MIN_POLL_INTERVAL);
        self
    }

    /// Read timeout in seconds for polls and relay commands.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.read_timeout = Duration::from_secs_f64(secs.max(0.0));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn night_mode(mut self, mode: NightMode) -> Self {
        self.night_mode = mode;
        self
    }

    /// Build the session and spawn its background poll task.
    ///
    /// Must be called within a tokio runtime. The first poll runs 2 seconds
    /// after creation.
    pub fn build(self) -> Device {
        let (broadcast_tx, _) = broadcast::channel(16);
        let (tx, rx) = mpsc::channel(32);

        let night_mode = self.night_mode;
        let state = DeviceState {
            poll_interval: self.poll_interval,
            read_timeout: self.read_timeout,
            connect_timeout: self.connect_timeout,
            disabled: self.disabled,
            night_mode,
            hw_ver: String::new(),
            last_poll: None,
        };

        let device = Device {
            host: self.host,
            port: self.port,
            state: Arc::new(RwLock::new(state)),
            tx: Some(tx.clone()),
            broadcast_tx,
            cancel_token: CancellationToken::new(),
        };

        // A configured night mode fires its one-shot toggle at startup,
        // ahead of the initial poll on the same task.
        if night_mode == NightMode::On {
            let (resp_tx, _resp_rx) = oneshot::channel();
            let _ = tx.try_send(DeviceCommand::SetNightLed { off: true, resp_tx });
        }

        let d_clone = device.clone();
        tokio::spawn(async move { d_clone.run_poll_task(rx).await });
        device
    }
}

impl Device {
    // -------------------------------------------------------------------------
    // Public API
    // -------------------------------------------------------------------------

    /// Initialize a session with default configuration.
    pub fn new<H: Into<String>>(host: H) -> Self {
        DeviceBuilder::new(host).build()
    }

    pub fn builder<H: Into<String>>(host: H) -> DeviceBuilder {
        DeviceBuilder::new(host)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_disabled(&self) -> bool {
        self.with_state(|s| s.disabled)
    }

    /// Disable or re-enable the session. A disabled session performs no
    /// network I/O; scheduled polls keep firing as silent no-ops.
    pub fn set_disabled(&self, disabled: bool) {
        self.with_state_mut(|s| s.disabled = disabled);
    }

    pub fn poll_interval(&self) -> Duration {
        self.with_state(|s| s.poll_interval)
    }

    /// Change the poll interval (seconds, floored at 1). Takes effect at the
    /// next re-arm, after the currently scheduled poll.
    pub fn set_poll_interval(&self, secs: u64) {
        let interval = Duration::from_secs(secs).max(MIN_POLL_INTERVAL);
        self.with_state_mut(|s| s.poll_interval = interval);
    }

    /// Change the read timeout (seconds, floored at 0) for polls and relay
    /// commands. Night-mode toggles keep their fixed short timeout.
    pub fn set_timeout(&self, secs: f64) {
        let timeout = Duration::from_secs_f64(secs.max(0.0));
        self.with_state_mut(|s| s.read_timeout = timeout);
    }

    pub fn night_mode(&self) -> NightMode {
        self.with_state(|s| s.night_mode)
    }

    /// When the last poll attempt ran, if any.
    pub fn last_poll(&self) -> Option<Instant> {
        self.with_state(|s| s.last_poll)
    }

    /// Read the full device status and emit one atomic batch of normalized
    /// readings.
    ///
    /// This is an out-of-band poll; it does not reschedule the periodic
    /// timer. A disabled session returns success without any I/O.
    pub async fn poll(&self) -> Result<()> {
        self.send_command(|resp_tx| DeviceCommand::Poll { resp_tx })
            .await
    }

    /// Switch the relay on or off.
    ///
    /// An acknowledged command triggers exactly one immediate poll to
    /// refresh all readings before returning. A rejected command returns
    /// [`KasaError::DeviceRejected`] and triggers no poll.
    pub async fn set_relay(&self, on: bool) -> Result<()> {
        self.send_command(|resp_tx| DeviceCommand::SetRelay { on, resp_tx })
            .await
    }

    /// Set the night-mode attribute and fire the one-shot LED toggle.
    ///
    /// The attribute change itself always succeeds; the wire attempt is best
    /// effort with a short read timeout, and failures are only logged. A
    /// removed attribute is equivalent to [`NightMode::Off`].
    pub async fn set_night_mode(&self, mode: NightMode) {
        self.with_state_mut(|s| s.night_mode = mode);
        let off = mode == NightMode::On;
        if let Err(e) = self
            .send_command(|resp_tx| DeviceCommand::SetNightLed { off, resp_tx })
            .await
        {
            debug!("Night-mode toggle for {} not dispatched: {}", self.host, e);
        }
    }

    /// Read the realtime energy counters and emit one atomic batch of
    /// profile-normalized readings.
    pub async fn poll_energy(&self) -> Result<()> {
        self.send_command(|resp_tx| DeviceCommand::PollEnergy { resp_tx })
            .await
    }

    /// Returns a Stream of reading batches emitted by this session.
    pub fn stream(&self) -> impl Stream<Item = ReadingBatch> + Send + 'static {
        let mut rx = self.broadcast_tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(batch) => yield batch,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }

    /// Receives a single reading batch from this session.
    pub async fn receive(&self) -> Result<ReadingBatch> {
        let mut rx = self.broadcast_tx.subscribe();
        rx.recv().await.map_err(|e| KasaError::Io(e.to_string()))
    }

    /// Stops the session and its background task permanently.
    pub fn stop(&self) {
        info!("Stopping device {}", self.host);
        self.cancel_token.cancel();
    }

    // -------------------------------------------------------------------------
    // Internal State Helpers
    // -------------------------------------------------------------------------

    fn with_state<R>(&self, f: impl FnOnce(&DeviceState) -> R) -> R {
        f(&self.state.read())
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.write())
    }

    fn emit(&self, batch: ReadingBatch) {
        if batch.is_empty() {
            return;
        }
        let _ = self.broadcast_tx.send(batch);
    }

    async fn send_command(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> DeviceCommand,
    ) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| KasaError::Io("device task not running".into()))?;

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(make(resp_tx))
            .await
            .map_err(|_| KasaError::Io("device task not running".into()))?;
        resp_rx
            .await
            .map_err(|_| KasaError::Io("device task dropped the command".into()))?
    }

    // -------------------------------------------------------------------------
    // Background Poll Task
    // -------------------------------------------------------------------------

    async fn run_poll_task(mut self, mut rx: mpsc::Receiver<DeviceCommand>) {
        // Drop the internal sender so rx closes when all external handles
        // are dropped.
        self.tx = None;

        let mut timer = PollTimer::idle();
        timer.arm(STARTUP_POLL_DELAY);
        debug!("Starting poll task for device {}", self.host);

        loop {
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Poll task for {} received stop signal", self.host);
                    break;
                }
                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => TaskEvent::Command(cmd),
                        None => {
                            debug!("All handles for device {} dropped, stopping task", self.host);
                            break;
                        }
                    }
                }
                _ = timer.fired() => TaskEvent::PollDue,
            };

            match event {
                TaskEvent::Command(cmd) => self.process_command(cmd).await,
                TaskEvent::PollDue => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Scheduled poll for {} failed: {}", self.host, e);
                    }
                    // Success or failure, the next poll is one interval out.
                    // This is the only re-arm path.
                    timer.arm(self.with_state(|s| s.poll_interval));
                }
            }
        }

        debug!("Poll task for {} exited", self.host);
    }

    async fn process_command(&self, cmd: DeviceCommand) {
        match cmd {
            DeviceCommand::Poll { resp_tx } => {
                let _ = resp_tx.send(self.poll_once().await);
            }
            DeviceCommand::SetRelay { on, resp_tx } => {
                let _ = resp_tx.send(self.set_relay_once(on).await);
            }
            DeviceCommand::SetNightLed { off, resp_tx } => {
                self.set_night_led_once(off).await;
                let _ = resp_tx.send(Ok(()));
            }
            DeviceCommand::PollEnergy { resp_tx } => {
                let _ = resp_tx.send(self.poll_energy_once().await);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Protocol Operations (task-side, serialized)
    // -------------------------------------------------------------------------

    async fn poll_once(&self) -> Result<()> {
        if self.is_disabled() {
            debug!("Device {} is disabled, skipping poll", self.host);
            return Ok(());
        }
        self.with_state_mut(|s| s.last_poll = Some(Instant::now()));

        let read_timeout = self.with_state(|s| s.read_timeout);
        let payload = match self.exchange(Command::GetStatus, read_timeout).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Poll transport failure for {}: {}", self.host, e);
                return Err(e);
            }
        };

        let resp = match DeviceResponse::parse(&payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("Poll decode failure for {}: {}", self.host, e);
                self.emit(readings::decode_failure(&e));
                return Err(e);
            }
        };

        if let Some(hw_ver) = resp
            .sysinfo()
            .and_then(|s| s.get("hw_ver"))
            .and_then(Value::as_str)
        {
            self.with_state_mut(|s| s.hw_ver = hw_ver.to_string());
        }

        let batch = readings::status_readings(&resp);
        debug!("Poll of {} produced {} readings", self.host, batch.len());
        self.emit(batch);
        Ok(())
    }

    async fn set_relay_once(&self, on: bool) -> Result<()> {
        if self.is_disabled() {
            return Err(KasaError::Disabled);
        }

        let read_timeout = self.with_state(|s| s.read_timeout);
        let payload = self.exchange(Command::SetRelay { on }, read_timeout).await?;
        let resp = DeviceResponse::parse(&payload)?;

        let ack = resp.relay_ack().ok_or_else(|| {
            KasaError::Json("response carried no set_relay_state acknowledgement".into())
        })?;
        if !ack.acknowledged() {
            return Err(KasaError::DeviceRejected(ack.code()));
        }

        info!(
            "Device {} relay switched {}",
            self.host,
            if on { "on" } else { "off" }
        );

        // Refresh all readings right away. This extra poll is out-of-band
        // and does not touch the periodic schedule; its outcome does not
        // undo the acknowledged command.
        if let Err(e) = self.poll_once().await {
            warn!("Post-command poll for {} failed: {}", self.host, e);
        }
        Ok(())
    }

    async fn set_night_led_once(&self, off: bool) {
        if self.is_disabled() {
            debug!("Device {} is disabled, skipping night-mode toggle", self.host);
            return;
        }

        match self
            .exchange(Command::SetNightLed { off }, NIGHT_MODE_READ_TIMEOUT)
            .await
        {
            Ok(payload) => match DeviceResponse::parse(&payload) {
                Ok(resp) => {
                    if resp.led_ack().is_some_and(|ack| ack.acknowledged()) {
                        debug!("Device {} night-mode LED set to off={}", self.host, off);
                    } else {
                        warn!("Device {} did not acknowledge night-mode toggle", self.host);
                    }
                }
                Err(e) => warn!("Night-mode decode failure for {}: {}", self.host, e),
            },
            Err(e) => warn!("Night-mode transport failure for {}: {}", self.host, e),
        }
    }

    async fn poll_energy_once(&self) -> Result<()> {
        if self.is_disabled() {
            return Ok(());
        }

        let read_timeout = self.with_state(|s| s.read_timeout);
        let payload = self.exchange(Command::GetEnergy, read_timeout).await?;
        let resp = match DeviceResponse::parse(&payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("Energy poll decode failure for {}: {}", self.host, e);
                self.emit(readings::decode_failure(&e));
                return Err(e);
            }
        };

        let realtime = resp.emeter_realtime().ok_or_else(|| {
            KasaError::Json("response carried no emeter.get_realtime section".into())
        })?;
        let hw_ver = self.with_state(|s| s.hw_ver.clone());
        self.emit(readings::energy_readings(realtime, &hw_ver));
        Ok(())
    }

    async fn exchange(&self, command: Command, read_timeout: Duration) -> Result<Vec<u8>> {
        let connect_timeout = self.with_state(|s| s.connect_timeout);
        transport::exchange(
            &self.host,
            self.port,
            &command.payload(),
            connect_timeout,
            read_timeout,
        )
        .await
    }
}
