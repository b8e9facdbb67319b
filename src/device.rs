//! Connection management and typed commands for a single radar.
//!
//! [`LD2410`] is a cheap-to-clone handle. Behind it sits one connection
//! state machine: commands connect on demand, an idle timer drops the link
//! once traffic stops, and unexpected disconnects trigger background
//! reconnects that replay the profile's setup sequence. Decoded reports are
//! merged into a [`SensorSnapshot`] and fan out to subscribers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, Semaphore, TryAcquireError, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::advertisement::Advertisement;
use crate::command::{
    self, AutoThresholdStatus, AuxiliaryControl, BaudRate, Command, ConfigSessionInfo,
    DistanceResolution, FirmwareVersion, GateSelector, MacAddress, RadarParams,
};
use crate::constants::{
    DEFAULT_IDLE_DISCONNECT_DELAY, DEFAULT_RECONNECT_BACKOFF, DEFAULT_RESPONSE_TIMEOUT,
    DEFAULT_RETRY_COUNT, MAX_GATE, MAX_SENSITIVITY,
};
use crate::error::{Error, ProtocolError};
use crate::frame::{self, FrameKind};
use crate::profile::{Ld2410Profile, ProtocolProfile, SetupStep};
use crate::report::SensorReading;
use crate::retry::with_retries;
use crate::state::{SensorSnapshot, StateCache, SubscriptionToken};
use crate::transport::{Transport, TransportSession};
use crate::util::lock;

/// Connection behavior of one device handle.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Bluetooth address of the radar.
    pub address: String,
    /// Advertised name, if known. Only used for logging.
    pub name: Option<String>,
    /// Bluetooth password. Sent before anything else when set.
    pub password: Option<String>,
    /// Extra attempts for commands failing on link errors.
    pub retry_count: u32,
    /// Idle time after the last frame before the link is dropped.
    pub idle_disconnect_delay: Duration,
    /// How long a command waits for its ACK.
    pub response_timeout: Duration,
    /// Pause between reconnect attempts.
    pub reconnect_backoff: Duration,
    /// Whether an idle disconnect schedules a background reconnect.
    pub reconnect_after_idle: bool,
}

impl DeviceConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            password: None,
            retry_count: DEFAULT_RETRY_COUNT,
            idle_disconnect_delay: DEFAULT_IDLE_DISCONNECT_DELAY,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            reconnect_after_idle: true,
        }
    }
}

/// Handle to one HLK-LD2410 radar.
#[derive(Clone)]
pub struct LD2410 {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    config: DeviceConfig,
    transport: Arc<dyn Transport>,
    profile: Arc<dyn ProtocolProfile>,
    state: StateCache,
    /// Serializes connection attempts.
    connect_lock: Mutex<()>,
    /// One command in flight at a time. Swapped out and closed on
    /// disconnect so queued commands fail instead of running against a dead
    /// link.
    operation_gate: StdMutex<Arc<Semaphore>>,
    session: StdMutex<Option<Arc<dyn TransportSession>>>,
    /// Waiter for the ACK of the in-flight command.
    response_slot: StdMutex<Option<oneshot::Sender<Bytes>>>,
    expected_disconnect: AtomicBool,
    /// Monotonic stamp telling a fired idle timer whether it is stale.
    timer_generation: AtomicU64,
    disconnect_timer: StdMutex<Option<(u64, JoinHandle<()>)>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    advertisement: StdMutex<Option<Advertisement>>,
}

impl LD2410 {
    /// Creates a handle using the standard LD2410 protocol profile.
    pub fn new(config: DeviceConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_profile(config, transport, Arc::new(Ld2410Profile::new()))
    }

    /// Creates a handle with a custom protocol profile.
    pub fn with_profile(
        config: DeviceConfig,
        transport: Arc<dyn Transport>,
        profile: Arc<dyn ProtocolProfile>,
    ) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                config,
                transport,
                profile,
                state: StateCache::new(),
                connect_lock: Mutex::new(()),
                operation_gate: StdMutex::new(Arc::new(Semaphore::new(1))),
                session: StdMutex::new(None),
                response_slot: StdMutex::new(None),
                expected_disconnect: AtomicBool::new(false),
                timer_generation: AtomicU64::new(0),
                disconnect_timer: StdMutex::new(None),
                reconnect_task: Mutex::new(None),
                advertisement: StdMutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<DeviceInner>) -> Self {
        Self { inner }
    }

    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.config.name.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.current_session()
            .map(|session| session.is_connected())
            .unwrap_or(false)
    }

    /// Everything the radar has reported so far.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.inner.state.snapshot()
    }

    pub fn rssi(&self) -> Option<i16> {
        self.inner.state.snapshot().rssi
    }

    /// Registers a callback invoked after every snapshot change.
    pub fn subscribe(
        &self,
        callback: impl Fn(&SensorSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.inner.state.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.inner.state.unsubscribe(token);
    }

    /// Latest advertisement recorded via [`LD2410::update_from_advertisement`].
    pub fn advertisement(&self) -> Option<Advertisement> {
        lock(&self.inner.advertisement).clone()
    }

    /// Folds a passively received advertisement into the snapshot.
    pub fn update_from_advertisement(&self, advertisement: &Advertisement) {
        *lock(&self.inner.advertisement) = Some(advertisement.clone());
        let advertisement = advertisement.clone();
        self.inner.state.update(|snapshot| {
            if let Some(rssi) = advertisement.rssi {
                snapshot.rssi = Some(rssi);
            }
            if let Some(firmware) = &advertisement.firmware {
                snapshot.firmware_version = Some(firmware.version.clone());
                snapshot.firmware_build_date = Some(firmware.build_date);
            }
        });
    }

    /// Connects and, when a fresh link came up, replays the profile's setup
    /// sequence so the radar ends up authenticated and in engineering mode.
    ///
    /// On an already-established connection this only refreshes the idle
    /// timer: the radar rejects a second authentication on a live link.
    pub async fn connect_and_subscribe(&self) -> Result<(), Error> {
        if self.ensure_connected().await? {
            self.run_connect_sequence().await?;
        }
        Ok(())
    }

    /// Drops the connection and stops any background reconnect.
    pub async fn disconnect(&self) {
        debug!(address = %self.address(), "disconnecting");
        self.cancel_reconnect().await;
        self.cancel_disconnect_timer();
        if let Some(session) = self.current_session() {
            let _ = session.stop_notifications().await;
        }
        self.execute_disconnect().await;
    }

    // Typed commands

    /// Opens a configuration session.
    ///
    /// Rarely needed directly: every command wrapper that requires a
    /// session opens and closes its own.
    pub async fn enable_config(&self) -> Result<ConfigSessionInfo, Error> {
        let payload = self.command(&Command::EnableConfig).await?;
        ConfigSessionInfo::parse(&payload)
    }

    /// Closes the configuration session.
    pub async fn end_config(&self) -> Result<(), Error> {
        let payload = self.command(&Command::EndConfig).await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Reads gate sensitivities and detection limits, folding them into the
    /// snapshot.
    pub async fn read_parameters(&self) -> Result<RadarParams, Error> {
        let payload = self.config_command(Command::ReadParameters).await?;
        let params = RadarParams::parse(&payload)?;
        let merged = params.clone();
        self.inner.state.update(move |snapshot| {
            snapshot.max_gate = Some(merged.max_gate);
            snapshot.max_moving_gate = Some(merged.max_moving_gate);
            snapshot.max_stationary_gate = Some(merged.max_stationary_gate);
            snapshot.no_one_duration = Some(merged.no_one_duration);
            for (index, sensitivity) in merged.moving_sensitivity.iter().enumerate() {
                snapshot.gate_mut(index as u8).moving_sensitivity = Some(*sensitivity);
            }
            for (index, sensitivity) in merged.stationary_sensitivity.iter().enumerate() {
                snapshot.gate_mut(index as u8).stationary_sensitivity = Some(*sensitivity);
            }
        });
        Ok(params)
    }

    /// Switches the radar to engineering reports with per-gate energies.
    pub async fn enable_engineering_mode(&self) -> Result<(), Error> {
        let payload = self.config_command(Command::EnableEngineeringMode).await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Switches the radar back to basic reports.
    pub async fn disable_engineering_mode(&self) -> Result<(), Error> {
        let payload = self.config_command(Command::DisableEngineeringMode).await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Sets motion and static sensitivity for one gate, or every gate at
    /// once. Sensitivities are percentages.
    pub async fn set_gate_sensitivity(
        &self,
        gate: GateSelector,
        moving: u8,
        stationary: u8,
    ) -> Result<(), Error> {
        if let GateSelector::Gate(index) = gate {
            if index > MAX_GATE {
                return Err(Error::Operation(format!(
                    "gate {index} out of range 0-{MAX_GATE}"
                )));
            }
        }
        if moving > MAX_SENSITIVITY || stationary > MAX_SENSITIVITY {
            return Err(Error::Operation(format!(
                "sensitivity out of range 0-{MAX_SENSITIVITY}"
            )));
        }
        let payload = self
            .config_command(Command::SetGateSensitivity {
                gate,
                moving,
                stationary,
            })
            .await?;
        frame::ack_status(&payload)?;
        self.inner.state.update(|snapshot| match gate {
            GateSelector::All => {
                for index in 0..=MAX_GATE {
                    let data = snapshot.gate_mut(index);
                    data.moving_sensitivity = Some(moving);
                    data.stationary_sensitivity = Some(stationary);
                }
            }
            GateSelector::Gate(index) => {
                let data = snapshot.gate_mut(index);
                data.moving_sensitivity = Some(moving);
                data.stationary_sensitivity = Some(stationary);
            }
        });
        Ok(())
    }

    /// Restricts detection to the given gates and sets how long presence is
    /// held after the last detection, in seconds. Effective immediately and
    /// persistent.
    pub async fn set_detection_limits(
        &self,
        max_moving_gate: u8,
        max_stationary_gate: u8,
        no_one_duration: u16,
    ) -> Result<(), Error> {
        for gate in [max_moving_gate, max_stationary_gate] {
            if !(2..=MAX_GATE).contains(&gate) {
                return Err(Error::Operation(format!(
                    "maximum gate {gate} out of range 2-{MAX_GATE}"
                )));
            }
        }
        let payload = self
            .config_command(Command::SetDetectionLimits {
                max_moving_gate,
                max_stationary_gate,
                no_one_duration,
            })
            .await?;
        frame::ack_status(&payload)?;
        self.inner.state.update(|snapshot| {
            snapshot.max_moving_gate = Some(max_moving_gate);
            snapshot.max_stationary_gate = Some(max_stationary_gate);
            snapshot.no_one_duration = Some(no_one_duration);
        });
        Ok(())
    }

    /// Reads the firmware version, folding it into the snapshot.
    pub async fn read_firmware_version(&self) -> Result<FirmwareVersion, Error> {
        let payload = self.command(&Command::ReadFirmwareVersion).await?;
        let version = FirmwareVersion::parse(&payload)?;
        self.inner.state.update(|snapshot| {
            snapshot.firmware_version = Some(version.to_string());
        });
        Ok(version)
    }

    /// Selects the UART baud rate. Takes effect after a reboot.
    pub async fn set_baud_rate(&self, rate: BaudRate) -> Result<(), Error> {
        let payload = self.config_command(Command::SetBaudRate(rate)).await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Restores factory settings. Takes effect after a reboot.
    pub async fn factory_reset(&self) -> Result<(), Error> {
        let payload = self.config_command(Command::FactoryReset).await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Reboots the radar. The configuration session opened for this command
    /// dies with the link, so no end-config is sent.
    pub async fn reboot(&self) -> Result<(), Error> {
        self.enable_config().await?;
        let payload = self.command(&Command::Reboot).await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Turns the Bluetooth radio on or off. Takes effect after a reboot.
    pub async fn set_bluetooth(&self, enabled: bool) -> Result<(), Error> {
        let payload = self.config_command(Command::SetBluetooth(enabled)).await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Reads the radio MAC address.
    pub async fn read_mac_address(&self) -> Result<MacAddress, Error> {
        let payload = self.config_command(Command::ReadMacAddress).await?;
        MacAddress::parse(&payload)
    }

    /// Sends the configured password. No-op when none is set.
    ///
    /// The radar only accepts this right after connecting, outside any
    /// configuration session.
    pub async fn authenticate(&self) -> Result<(), Error> {
        let Some(password) = self.inner.config.password.clone() else {
            return Ok(());
        };
        command::validate_password(&password)?;
        let payload = self.command(&Command::SendPassword { password }).await?;
        match frame::ack_status(&payload) {
            Ok(_) => Ok(()),
            Err(Error::Operation(_)) => {
                Err(Error::Authentication("wrong bluetooth password".into()))
            }
            Err(err) => Err(err),
        }
    }

    /// Stores a new Bluetooth password on the radar. Existing connections
    /// keep working; the new password applies from the next connect.
    pub async fn set_password(&self, password: &str) -> Result<(), Error> {
        command::validate_password(password)?;
        let payload = self
            .config_command(Command::SetPassword {
                password: password.to_owned(),
            })
            .await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Selects the gate width. Persistent, takes effect after a reboot.
    pub async fn set_distance_resolution(
        &self,
        resolution: DistanceResolution,
    ) -> Result<(), Error> {
        let payload = self
            .config_command(Command::SetDistanceResolution(resolution))
            .await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Reads the configured gate width, folding it into the snapshot.
    pub async fn read_distance_resolution(&self) -> Result<DistanceResolution, Error> {
        let payload = self.config_command(Command::ReadDistanceResolution).await?;
        let rest = frame::ack_status(&payload)?;
        if rest.len() < 2 {
            return Err(ProtocolError::ShortResponse {
                expected: 2,
                actual: rest.len(),
            }
            .into());
        }
        let raw = u16::from_le_bytes([rest[0], rest[1]]);
        let resolution = DistanceResolution::try_from(raw).map_err(|_| {
            ProtocolError::Malformed(format!("unknown distance resolution {raw:#06x}"))
        })?;
        self.inner.state.update(|snapshot| {
            snapshot.distance_resolution = Some(resolution);
        });
        Ok(resolution)
    }

    /// Couples the OUT pin to the light sensor.
    pub async fn set_auxiliary_control(&self, control: AuxiliaryControl) -> Result<(), Error> {
        let payload = self
            .config_command(Command::SetAuxiliaryControl(control))
            .await?;
        frame::ack_status(&payload)?;
        self.inner.state.update(|snapshot| {
            snapshot.auxiliary_control = Some(control);
        });
        Ok(())
    }

    /// Reads the OUT pin light coupling, folding it into the snapshot.
    pub async fn read_auxiliary_control(&self) -> Result<AuxiliaryControl, Error> {
        let payload = self.config_command(Command::GetAuxiliaryControl).await?;
        let control = AuxiliaryControl::parse(&payload)?;
        self.inner.state.update(|snapshot| {
            snapshot.auxiliary_control = Some(control);
        });
        Ok(control)
    }

    /// Starts background noise calibration running for `duration` seconds.
    /// The room must be empty while it runs.
    pub async fn start_auto_threshold(&self, duration: u16) -> Result<(), Error> {
        let payload = self
            .config_command(Command::StartAutoThreshold { duration })
            .await?;
        frame::ack_status(&payload)?;
        Ok(())
    }

    /// Polls the state of a background noise calibration.
    pub async fn query_auto_threshold(&self) -> Result<AutoThresholdStatus, Error> {
        let payload = self.command(&Command::QueryAutoThreshold).await?;
        AutoThresholdStatus::parse(&payload)
    }

    // Connection plumbing

    async fn run_connect_sequence(&self) -> Result<(), Error> {
        let sequence: Vec<SetupStep> = self.inner.profile.connect_sequence().to_vec();
        for step in sequence {
            match step {
                SetupStep::Authenticate => self.authenticate().await?,
                SetupStep::EnableEngineeringMode => self.enable_engineering_mode().await?,
                SetupStep::ReadParameters => {
                    self.read_parameters().await?;
                }
                SetupStep::ReadFirmwareVersion => {
                    self.read_firmware_version().await?;
                }
                SetupStep::ReadDistanceResolution => {
                    self.read_distance_resolution().await?;
                }
                SetupStep::ReadAuxiliaryControl => {
                    self.read_auxiliary_control().await?;
                }
            }
        }
        Ok(())
    }

    /// Runs one command inside its own enable/end configuration session.
    ///
    /// End-config is always attempted, but an error from the command itself
    /// wins over one from closing the session.
    async fn config_command(&self, command: Command) -> Result<Bytes, Error> {
        self.enable_config().await?;
        let result = self.command(&command).await;
        let closed = self.end_config().await;
        let payload = result?;
        closed?;
        Ok(payload)
    }

    /// Sends one command: takes the operation gate, then retries link
    /// failures per the configured policy.
    async fn command(&self, command: &Command) -> Result<Bytes, Error> {
        let gate = lock(&self.inner.operation_gate).clone();
        let _permit = match gate.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                debug!("operation already in progress, waiting");
                gate.acquire()
                    .await
                    .map_err(|_| Error::Operation("device is disconnecting".into()))?
            }
            Err(TryAcquireError::Closed) => {
                return Err(Error::Operation("device is disconnecting".into()));
            }
        };
        let retries = self.inner.config.retry_count;
        with_retries(retries, |attempt| {
            let device = self.clone();
            let command = command.clone();
            async move { device.command_attempt(&command, attempt).await }
        })
        .await
    }

    async fn command_attempt(&self, command: &Command, attempt: u32) -> Result<Bytes, Error> {
        self.ensure_connected().await?;
        match self.execute_command(command).await {
            Ok(payload) => Ok(payload),
            Err(err @ (Error::Transport(_) | Error::ResponseTimeout)) => {
                debug!(attempt, error = %err, "link failed during command, dropping connection");
                self.execute_forced_disconnect().await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Writes the command and waits for its ACK on the current session.
    async fn execute_command(&self, command: &Command) -> Result<Bytes, Error> {
        let session = self
            .current_session()
            .ok_or_else(|| Error::Transport("not connected".into()))?;
        let (sender, receiver) = oneshot::channel();
        *lock(&self.inner.response_slot) = Some(sender);
        let frame = frame::wrap_command(&command.encode());
        debug!(command = ?command, frame = %hex::encode(&frame), "sending command");
        let result = async {
            session.write(&frame).await?;
            match timeout(self.inner.config.response_timeout, receiver).await {
                Ok(Ok(response)) => Ok(response),
                // sender dropped: the disconnect path failed this command;
                // its permit is from the replaced gate, so it must not retry
                Ok(Err(_)) => Err(Error::Operation("device is disconnecting".into())),
                Err(_) => Err(Error::ResponseTimeout),
            }
        }
        .await;
        lock(&self.inner.response_slot).take();
        let raw = result?;
        Ok(frame::parse_ack(command.code(), &raw)?)
    }

    /// Connects if there is no live session yet. Returns whether a new
    /// connection was made, so callers know when to replay the setup
    /// sequence.
    async fn ensure_connected(&self) -> Result<bool, Error> {
        if let Some(session) = self.current_session() {
            if session.is_connected() {
                self.reset_disconnect_timer();
                return Ok(false);
            }
        }
        let _guard = match self.inner.connect_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(address = %self.address(), "connection already in progress, waiting");
                self.inner.connect_lock.lock().await
            }
        };
        // someone else may have finished connecting while we waited
        if let Some(session) = self.current_session() {
            if session.is_connected() {
                self.reset_disconnect_timer();
                return Ok(false);
            }
        }
        info!(address = %self.address(), "connecting");
        let session = self.inner.transport.connect(&self.inner.config.address).await?;
        *lock(&self.inner.session) = Some(Arc::clone(&session));
        let write = self.inner.profile.write_characteristic();
        let notify = self.inner.profile.notify_characteristic();
        if let Err(err) = session.resolve_characteristics(write, notify).await {
            if let Error::CharacteristicMissing(uuid) = &err {
                warn!(address = %self.address(), %uuid, "characteristic missing, clearing gatt cache");
                self.inner.transport.clear_cache(&self.inner.config.address).await;
                self.cancel_disconnect_timer();
                // already inside connect_lock, tear down without retaking it
                self.execute_disconnect_locked().await;
            }
            return Err(err);
        }
        self.reset_disconnect_timer();
        let notifications = session.start_notifications().await?;
        self.spawn_router(Arc::clone(&session), notifications);
        info!(address = %self.address(), "connected");
        Ok(true)
    }

    /// Forwards notifications to the handler until the link closes, then
    /// reports the closed session.
    fn spawn_router(&self, session: Arc<dyn TransportSession>, mut rx: mpsc::Receiver<Bytes>) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { return };
                LD2410::from_inner(inner).handle_notification(frame);
            }
            if let Some(inner) = weak.upgrade() {
                LD2410::from_inner(inner).on_session_closed(session).await;
            }
        });
    }

    fn handle_notification(&self, frame: Bytes) {
        // any traffic proves the link is alive
        self.reset_disconnect_timer();
        match self.inner.profile.classify(&frame) {
            FrameKind::Ack => {
                if let Some(sender) = lock(&self.inner.response_slot).take() {
                    let _ = sender.send(frame);
                } else {
                    debug!("unexpected command response");
                }
            }
            FrameKind::Report => match self.inner.profile.decode_report(&frame) {
                Ok(Some(reading)) => self.apply_reading(reading),
                Ok(None) => debug!("report frame without data marker"),
                Err(err) => error!(error = %err, "failed to parse report frame"),
            },
            FrameKind::Unknown => {
                debug!(frame = %hex::encode(&frame), "unknown frame");
            }
        }
    }

    fn apply_reading(&self, reading: SensorReading) {
        self.inner.state.update(move |snapshot| {
            snapshot.status = Some(reading.status);
            snapshot.moving = Some(reading.moving);
            snapshot.stationary = Some(reading.stationary);
            snapshot.presence = Some(reading.presence);
            snapshot.moving_target_distance = Some(reading.moving_target_distance);
            snapshot.moving_target_energy = Some(reading.moving_target_energy);
            snapshot.stationary_target_distance = Some(reading.stationary_target_distance);
            snapshot.stationary_target_energy = Some(reading.stationary_target_energy);
            snapshot.detection_distance = Some(reading.detection_distance);
            if let Some(engineering) = &reading.engineering {
                snapshot.max_moving_gate = Some(engineering.max_moving_gate);
                snapshot.max_stationary_gate = Some(engineering.max_stationary_gate);
                snapshot.photo_sensor = Some(engineering.photo_sensor);
                snapshot.out_pin = Some(engineering.out_pin);
                for (index, energy) in engineering.moving_gate_energy.iter().enumerate() {
                    snapshot.gate_mut(index as u8).moving_energy = Some(*energy);
                }
                for (index, energy) in engineering.stationary_gate_energy.iter().enumerate() {
                    snapshot.gate_mut(index as u8).stationary_energy = Some(*energy);
                }
            }
        });
    }

    // Idle timer

    /// (Re)arms the idle disconnect timer and clears the expected-disconnect
    /// flag.
    fn reset_disconnect_timer(&self) {
        self.inner.expected_disconnect.store(false, Ordering::SeqCst);
        let generation = self.inner.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.config.idle_disconnect_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                LD2410::from_inner(inner).disconnect_from_timer(generation).await;
            }
        });
        if let Some((_, old)) = lock(&self.inner.disconnect_timer).replace((generation, handle)) {
            old.abort();
        }
    }

    fn cancel_disconnect_timer(&self) {
        if let Some((_, handle)) = lock(&self.inner.disconnect_timer).take() {
            handle.abort();
        }
    }

    async fn disconnect_from_timer(&self, generation: u64) {
        // only the generation that armed the timer may act on it
        {
            let mut timer = lock(&self.inner.disconnect_timer);
            let owns_timer = matches!(timer.as_ref(), Some((current, _)) if *current == generation);
            if !owns_timer {
                return;
            }
            timer.take();
        }
        if self.operation_in_flight() && self.is_connected() {
            debug!(address = %self.address(), "operation in progress, delaying disconnect");
            self.reset_disconnect_timer();
            return;
        }
        self.execute_timed_disconnect().await;
    }

    async fn execute_timed_disconnect(&self) {
        debug!(address = %self.address(), "disconnecting after idle timeout");
        self.execute_disconnect().await;
        if self.inner.config.reconnect_after_idle {
            self.schedule_reconnect().await;
        }
    }

    // Teardown

    async fn execute_forced_disconnect(&self) {
        self.cancel_disconnect_timer();
        self.execute_disconnect().await;
    }

    async fn execute_disconnect(&self) {
        let _guard = self.inner.connect_lock.lock().await;
        self.execute_disconnect_locked().await;
    }

    async fn execute_disconnect_locked(&self) {
        // a timer armed while we waited for the lock means fresh traffic,
        // keep the link
        if lock(&self.inner.disconnect_timer).is_some() {
            debug!(address = %self.address(), "disconnect timer reset, staying connected");
            return;
        }
        self.inner.expected_disconnect.store(true, Ordering::SeqCst);
        let session = lock(&self.inner.session).take();
        self.fail_pending_operations();
        if let Some(session) = session {
            if let Err(err) = session.disconnect().await {
                warn!(address = %self.address(), error = %err, "error disconnecting");
            }
        }
    }

    /// Fails the in-flight command and everything queued behind it.
    fn fail_pending_operations(&self) {
        lock(&self.inner.response_slot).take();
        let fresh = Arc::new(Semaphore::new(1));
        let old = std::mem::replace(&mut *lock(&self.inner.operation_gate), fresh);
        old.close();
    }

    // Reconnect handling

    /// Runs when the notification channel of `session` closes.
    async fn on_session_closed(&self, session: Arc<dyn TransportSession>) {
        if self.inner.expected_disconnect.load(Ordering::SeqCst) {
            debug!(address = %self.address(), "disconnected");
            return;
        }
        warn!(address = %self.address(), "device disconnected unexpectedly");
        self.cancel_disconnect_timer();
        // only tear down state if this session is still the current one; a
        // newer link may already be up
        {
            let mut current = lock(&self.inner.session);
            let is_current =
                matches!(current.as_ref(), Some(active) if Arc::ptr_eq(active, &session));
            if !is_current {
                return;
            }
            current.take();
        }
        self.fail_pending_operations();
        self.schedule_reconnect().await;
    }

    /// Spawns the background reconnect loop, replacing any previous one.
    ///
    /// Any loop still running is stopped, and confirmed stopped, before its
    /// replacement starts, so two loops never dial at the same time.
    async fn schedule_reconnect(&self) {
        let mut slot = self.inner.reconnect_task.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
            let _ = old.await;
        }
        let weak = Arc::downgrade(&self.inner);
        let backoff = self.inner.config.reconnect_backoff;
        *slot = Some(tokio::spawn(async move {
            loop {
                let Some(inner) = weak.upgrade() else { return };
                let device = LD2410::from_inner(inner);
                match device.connect_and_subscribe().await {
                    Ok(()) => {
                        info!(address = %device.address(), "reconnected");
                        return;
                    }
                    Err(err) => {
                        debug!(address = %device.address(), error = %err, "reconnect attempt failed");
                    }
                }
                drop(device);
                tokio::time::sleep(backoff).await;
            }
        }));
    }

    /// Stops the background reconnect loop. Only called from an explicit
    /// disconnect; forced disconnects may run on the reconnect task itself.
    async fn cancel_reconnect(&self) {
        let handle = self.inner.reconnect_task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    // Small helpers

    fn current_session(&self) -> Option<Arc<dyn TransportSession>> {
        lock(&self.inner.session).clone()
    }

    fn operation_in_flight(&self) -> bool {
        lock(&self.inner.operation_gate).available_permits() == 0
    }
}
