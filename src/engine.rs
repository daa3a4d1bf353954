//! The command engine: the dedicated thread that owns the serial device,
//! pops queued AT commands, classifies replies, and dispatches them. This
//! is the sole mutator of [`ModemState`] — every
//! other thread talks to it only through [`Intent`]s and reads only a
//! [`PublishedProperties`] snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{error, info, warn};

use crate::error::ModemError;
use crate::framer::LineFramer;
use crate::lifecycle::{self, init_sequence_commands};
use crate::ppp::{self, PppConfig};
use crate::protocol::{classify, Classified};
use crate::response::{self, DispatchEffect};
use crate::serial::{CancelToken, SerialPort};
use crate::state::{CommandQueue, ModemState, PublishedProperties, RunState, Settings};

const BOOT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const STEADY_TIMEOUT: Duration = Duration::from_secs(5);
const ECHO_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine tunables sourced from [`crate::config::Config`]. Carried as a
/// single struct so `spawn` and `bus::serve` share one source of truth
/// instead of each hardcoding their own constant.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub cmdq_max: usize,
    pub wdog_gpio: i32,
    pub tick_interval: Duration,
}

/// Intent sent from the bus/main-loop side into the engine thread. The
/// engine is the only writer of shared state; everyone else only asks it
/// to do something.
pub enum Intent {
    SettingChanged(SettingKey),
    SetDebug(bool),
    Tick,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    Connect,
    Roaming,
    Pin,
    Apn,
    User,
    Passwd,
}

/// A value the engine needs the external settings service to persist —
/// e.g. clearing a rejected PIN. The settings service itself is a boundary
/// collaborator; the engine only emits the intent to write back.
pub enum SettingsWriteBack {
    ClearPin,
}

/// Signaled by the engine thread on any fatal condition so the async main
/// loop (which never blocks on serial I/O) can tear down and exit.
#[derive(Clone)]
pub struct ShutdownHandle {
    notify: Arc<tokio::sync::Notify>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(tokio::sync::Notify::new()),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle the bus/main-loop side keeps: send intents, read the published
/// property snapshot, wait for boot to finish.
#[derive(Clone)]
pub struct EngineHandle {
    intent_tx: mpsc::Sender<Intent>,
    cancel: CancelToken,
    pub snapshot: Arc<RwLock<PublishedProperties>>,
    pub shutdown: ShutdownHandle,
    pub tick_interval: Duration,
}

impl EngineHandle {
    pub fn send(&self, intent: Intent) {
        if self.intent_tx.send(intent).is_ok() {
            self.cancel.cancel();
        }
    }

    pub fn read_snapshot(&self) -> PublishedProperties {
        self.snapshot
            .read()
            .expect("snapshot lock poisoned")
            .clone()
    }
}

pub struct Engine {
    serial: SerialPort,
    framer: LineFramer,
    state: ModemState,
    queue: CommandQueue,
    settings: Settings,
    ppp_config: PppConfig,
    wdog_gpio: i32,
    intent_rx: mpsc::Receiver<Intent>,
    snapshot: Arc<RwLock<PublishedProperties>>,
    ready_tx: Option<oneshot::Sender<()>>,
    writeback_tx: tokio_mpsc::Sender<SettingsWriteBack>,
    shutdown: ShutdownHandle,
}

/// Spawn the engine thread. Returns the handle the rest of the daemon uses
/// plus a future that resolves once the init sequence has drained and
/// `running` transitions to `Running`.
pub fn spawn(
    device: &str,
    settings: Settings,
    ppp_config: PppConfig,
    engine_config: EngineConfig,
    writeback_tx: tokio_mpsc::Sender<SettingsWriteBack>,
) -> Result<(EngineHandle, oneshot::Receiver<()>, std::thread::JoinHandle<()>), ModemError> {
    let serial = SerialPort::open(device)?;
    let cancel = serial.cancel_token();
    let (intent_tx, intent_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let snapshot = Arc::new(RwLock::new(ModemState::new().snapshot()));
    let shutdown = ShutdownHandle::new();

    let engine = Engine {
        serial,
        framer: LineFramer::new(),
        state: ModemState::new(),
        queue: CommandQueue::new(engine_config.cmdq_max),
        settings,
        ppp_config,
        wdog_gpio: engine_config.wdog_gpio,
        intent_rx,
        snapshot: snapshot.clone(),
        ready_tx: Some(ready_tx),
        writeback_tx,
        shutdown: shutdown.clone(),
    };

    let join = std::thread::Builder::new()
        .name(format!("modem-engine-{device}"))
        .spawn(move || engine.run())
        .map_err(|e| ModemError::Transport(format!("spawn engine thread: {e}")))?;

    let handle = EngineHandle {
        intent_tx,
        cancel,
        snapshot,
        shutdown,
        tick_interval: engine_config.tick_interval,
    };

    Ok((handle, ready_rx, join))
}

impl Engine {
    fn run(mut self) {
        if let Err(e) = self.boot_wait() {
            error!("boot-wait failed: {e}");
            ppp::disconnect(&mut self.state, &self.ppp_config, true);
            self.shutdown.trigger();
            return;
        }
        self.queue.enqueue(init_sequence_commands(self.wdog_gpio), false);
        self.publish();

        loop {
            if self.shutdown.is_triggered() {
                return;
            }
            match self.step() {
                Ok(ShouldContinue::Continue) => {}
                Ok(ShouldContinue::Stop) => return,
                Err(e) => {
                    error!("engine fatal: {e}");
                    ppp::disconnect(&mut self.state, &self.ppp_config, true);
                    self.shutdown.trigger();
                    return;
                }
            }
        }
    }

    /// Send bare `AT` until the first `OK`, then wait for a quiet line to
    /// conclude startup chatter.
    fn boot_wait(&mut self) -> Result<(), ModemError> {
        let mut timeout = BOOT_WAIT_TIMEOUT;
        loop {
            if !self.state.ready {
                self.serial.write(b"\rAT\r")?;
            }
            match self.serial.read_byte(Some(timeout))? {
                Some(byte) => {
                    if let Some(line) = self.framer.push_byte(byte) {
                        if line == "OK" {
                            self.state.ready = true;
                            timeout = STEADY_TIMEOUT;
                        }
                    }
                }
                None => {
                    if self.state.ready {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn step(&mut self) -> Result<ShouldContinue, ModemError> {
        if self.state.ready {
            if let Some(cmd) = self.queue.pop() {
                self.send_command(&cmd)?;
            }
        }

        match self.serial.read_byte(Some(STEADY_TIMEOUT))? {
            Some(byte) => {
                if let Some(line) = self.framer.push_byte(byte) {
                    self.handle_line(&line)?;
                    self.maybe_mark_running();
                    self.publish();
                }
                Ok(ShouldContinue::Continue)
            }
            None => self.drain_intents(),
        }
    }

    fn send_command(&mut self, cmd: &str) -> Result<(), ModemError> {
        let wire = format!("\r{cmd}\r");
        self.serial.write(wire.as_bytes())?;
        self.state.ready = false;
        self.state.last_cmd = Some(cmd.to_string());
        self.state.stats.commands_sent += 1;
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<(), ModemError> {
        let last_cmd = self.state.last_cmd.clone();
        match classify(line) {
            Classified::Echo(echoed) => {
                if Some(&echoed) == last_cmd.as_ref() {
                    response::on_echo_prehook(&echoed, &mut self.state);
                } else {
                    self.state.stats.anomalies += 1;
                    warn!("unexpected echo {echoed:?}, expected {last_cmd:?}");
                    self.drain_echo_confusion()?;
                    self.state.ready = true;
                }
            }
            Classified::TerminalError(err_line) => {
                let effect = response::dispatch_error(&err_line, last_cmd.as_deref(), &mut self.state);
                self.state.ready = true;
                self.apply_effect(effect)?;
            }
            Classified::Informational => {}
            Classified::Solicited(key, body) => {
                let effect = response::dispatch(&key, &body, &mut self.state, &mut self.queue, &self.settings);
                self.apply_effect(effect)?;
            }
            Classified::Unlabeled(body) => {
                let cmd = last_cmd.as_deref().map(strip_at_prefix).unwrap_or_default();
                let effect = response::dispatch(&cmd, &body, &mut self.state, &mut self.queue, &self.settings);
                self.apply_effect(effect)?;
            }
            Classified::Ok => {
                let effect = last_cmd.as_deref().map(response::on_ok_posthook).unwrap_or(DispatchEffect::None);
                self.state.ready = true;
                self.apply_effect(effect)?;
            }
        }
        Ok(())
    }

    /// Read for up to 1 s more, discarding whatever arrives — used after an
    /// unexpected echo to resynchronize with the modem.
    fn drain_echo_confusion(&mut self) -> Result<(), ModemError> {
        let deadline = std::time::Instant::now() + ECHO_DRAIN_TIMEOUT;
        while std::time::Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.serial.read_byte(Some(remaining))? {
                Some(byte) => {
                    let _ = self.framer.push_byte(byte);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn apply_effect(&mut self, effect: DispatchEffect) -> Result<(), ModemError> {
        match effect {
            DispatchEffect::None => Ok(()),
            DispatchEffect::TriggerPdpSelection => self.select_pdp(),
            DispatchEffect::ApplyPdpSelection => self.update_pdp(),
            DispatchEffect::UpdateConnection => {
                ppp::update_connection(&mut self.state, &self.settings, &self.ppp_config)
            }
            DispatchEffect::ClearPinSetting => {
                self.settings.pin.clear();
                let _ = self.writeback_tx.blocking_send(SettingsWriteBack::ClearPin);
                Ok(())
            }
        }
    }

    /// Disconnect ppp, clear the chosen context, and re-enumerate PDP
    /// contexts on the modem.
    fn select_pdp(&mut self) -> Result<(), ModemError> {
        ppp::disconnect(&mut self.state, &self.ppp_config, false);
        self.state.pdp_cid = None;
        self.queue.enqueue(lifecycle::select_pdp_commands(), false);
        Ok(())
    }

    /// Called once the full `+CGDCONT?` listing has resolved: choose a
    /// context, define it if necessary, and attach.
    fn update_pdp(&mut self) -> Result<(), ModemError> {
        let selection = lifecycle::update_pdp(&self.state.pdp_list, &self.state.pdp_active, &self.settings);
        if selection.needs_define {
            self.queue
                .enqueue([format!("AT+CGDCONT={}", selection.context.to_define_args())], false);
        }
        self.state.pdp_cid = Some(selection.context.cid);
        self.queue.enqueue(["AT+CGATT=1".to_string()], false);
        Ok(())
    }

    fn drain_intents(&mut self) -> Result<ShouldContinue, ModemError> {
        loop {
            match self.intent_rx.try_recv() {
                Ok(Intent::Tick) => self.handle_tick()?,
                Ok(Intent::SettingChanged(key)) => self.handle_setting_changed(key)?,
                Ok(Intent::SetDebug(value)) => {
                    self.state.debug = value;
                    self.publish();
                }
                Ok(Intent::Shutdown) => {
                    ppp::disconnect(&mut self.state, &self.ppp_config, true);
                    return Ok(ShouldContinue::Stop);
                }
                Err(mpsc::TryRecvError::Empty) => return Ok(ShouldContinue::Continue),
                Err(mpsc::TryRecvError::Disconnected) => return Ok(ShouldContinue::Stop),
            }
        }
    }

    fn handle_tick(&mut self) -> Result<(), ModemError> {
        self.queue.enqueue(lifecycle::tick_commands(self.state.sim_status), true);
        self.state.wdog_level ^= 1;
        self.queue.enqueue(
            [lifecycle::watchdog_command(
                self.wdog_gpio,
                self.state.wdog_level,
                &self.state.gpio_save_suffix,
            )],
            true,
        );

        self.state.ppp_status = ppp::probe_status(&self.state, &self.ppp_config);
        if ppp::is_stalled(&self.state, &self.ppp_config) {
            return Err(ModemError::Timeout("waiting for ppp".to_string()));
        }
        self.publish();
        Ok(())
    }

    fn handle_setting_changed(&mut self, key: SettingKey) -> Result<(), ModemError> {
        match key {
            SettingKey::Connect | SettingKey::Roaming => {
                ppp::update_connection(&mut self.state, &self.settings, &self.ppp_config)?;
            }
            SettingKey::Pin => {
                self.queue.enqueue(["AT+CPIN?".to_string()], false);
            }
            SettingKey::Apn => {
                self.select_pdp()?;
            }
            SettingKey::User | SettingKey::Passwd => {
                ppp::disconnect(&mut self.state, &self.ppp_config, false);
                ppp::update_connection(&mut self.state, &self.settings, &self.ppp_config)?;
            }
        }
        Ok(())
    }

    fn maybe_mark_running(&mut self) {
        // `apply_effect` above has already enqueued any PDP follow-up
        // commands for this line, so an empty queue here means the init
        // sequence (and any selection it triggered) has fully drained.
        if self.state.running == RunState::Unstarted && self.queue.is_empty() && self.state.ready {
            self.state.running = RunState::Running;
            info!("modem ready, running");
            if let Some(tx) = self.ready_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    fn publish(&self) {
        *self.snapshot.write().expect("snapshot lock poisoned") = self.state.snapshot();
    }
}

enum ShouldContinue {
    Continue,
    Stop,
}

fn strip_at_prefix(cmd: &str) -> String {
    cmd.strip_prefix("AT").unwrap_or(cmd).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_at_prefix_removes_leading_at() {
        assert_eq!(strip_at_prefix("AT+CSQ"), "+CSQ");
    }

    #[test]
    fn strip_at_prefix_leaves_non_at_unchanged() {
        assert_eq!(strip_at_prefix("+CSQ"), "+CSQ");
    }
}
