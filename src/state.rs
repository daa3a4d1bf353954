//! Modem state owned exclusively by the engine thread, plus the bounded
//! command FIFO and the read-only snapshot published for the bus surface.
//!
//! Nothing outside the engine thread ever mutates [`ModemState`]. The bus and main-loop
//! sides only read a cloned [`PublishedProperties`] snapshot and send
//! [`crate::bus::Intent`] values.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use crate::protocol::{PdpContext, RegStatus, SimCode};

/// `running` tri-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Unstarted,
    Running,
    Stopped,
}

/// PPP link status as published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PppStatus {
    Down,
    Init,
    Up,
}

impl PppStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Down => "DOWN",
            Self::Init => "INIT",
            Self::Up => "UP",
        }
    }
}

/// Bounded FIFO of pending AT command strings. The in-flight command is
/// popped out of this queue, so its capacity bound is `max` pending
/// entries (the invariant `max+1` in flight counts the popped one).
pub struct CommandQueue {
    queue: VecDeque<String>,
    max: usize,
}

impl CommandQueue {
    pub fn new(max: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max,
        }
    }

    /// Append `cmds`. When `limit` is true and the queue is already at
    /// `max`, this is a silent no-op (best-effort telemetry paths).
    pub fn enqueue(&mut self, cmds: impl IntoIterator<Item = String>, limit: bool) {
        if limit && self.queue.len() >= self.max {
            return;
        }
        for c in cmds {
            if limit && self.queue.len() >= self.max {
                break;
            }
            self.queue.push_back(c);
        }
    }

    pub fn pop(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Counters for anomalies that are logged but never fatal.
#[derive(Default, Debug, Clone, Copy)]
pub struct EngineStats {
    pub anomalies: u64,
    pub commands_sent: u64,
    pub terminal_errors: u64,
}

/// The full modem state, mutated only by the engine thread.
pub struct ModemState {
    pub ready: bool,
    pub last_cmd: Option<String>,
    pub running: RunState,
    pub registered: bool,
    pub roaming: bool,
    pub sim_status: SimCode,
    pub reg_status: Option<RegStatus>,
    pub ppp_active: bool,
    pub ppp_start_time: Option<Instant>,
    pub wdog_level: u8,
    pub gpio_save_suffix: String,
    pub pdp_list: Vec<PdpContext>,
    pub pdp_active: HashSet<i32>,
    pub pdp_cid: Option<i32>,
    pub debug: bool,

    pub model: Option<String>,
    pub imei: Option<String>,
    pub network_name: Option<String>,
    pub network_type: Option<String>,
    pub signal_strength: Option<i32>,
    pub ip: Option<String>,
    pub ppp_status: PppStatus,

    pub stats: EngineStats,
}

impl ModemState {
    pub fn new() -> Self {
        Self {
            ready: false,
            last_cmd: None,
            running: RunState::Unstarted,
            registered: false,
            roaming: false,
            sim_status: SimCode::Error,
            reg_status: None,
            ppp_active: false,
            ppp_start_time: None,
            wdog_level: 0,
            gpio_save_suffix: String::new(),
            pdp_list: Vec::new(),
            pdp_active: HashSet::new(),
            pdp_cid: None,
            debug: false,
            model: None,
            imei: None,
            network_name: None,
            network_type: None,
            signal_strength: None,
            ip: None,
            ppp_status: PppStatus::Down,
            stats: EngineStats::default(),
        }
    }

    /// `registered ⇒ roaming ∈ {true,false}`; `¬registered ⇒ roaming=false`.
    /// `pppActive ⇒ pppStartTime ≠ ∅`; `¬pppActive ⇒ pppStartTime = ∅`.
    pub fn check_invariants(&self) -> bool {
        let roaming_ok = self.registered || !self.roaming;
        let ppp_ok = self.ppp_active == self.ppp_start_time.is_some();
        let pdp_ok = self
            .pdp_cid
            .map(|cid| self.pdp_list.iter().any(|c| c.cid == cid))
            .unwrap_or(true);
        roaming_ok && ppp_ok && pdp_ok
    }

    /// A read-only snapshot of the exported property tree.
    pub fn snapshot(&self) -> PublishedProperties {
        let connected = matches!(self.ppp_status, PppStatus::Up);
        PublishedProperties {
            model: self.model.clone(),
            imei: self.imei.clone(),
            network_name: self.network_name.clone(),
            network_type: self.network_type.clone(),
            signal_strength: self.signal_strength,
            roaming: self.roaming,
            connected,
            ip: self.ip.clone(),
            sim_status: self.sim_status.to_string(),
            reg_status: self.reg_status.map(|s| s.to_string()),
            ppp_status: self.ppp_status.as_str().to_string(),
            debug: self.debug,
        }
    }
}

impl Default for ModemState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only clone of the exported property tree (§3), for the bus surface
/// to publish without touching [`ModemState`] directly.
#[derive(Debug, Clone)]
pub struct PublishedProperties {
    pub model: Option<String>,
    pub imei: Option<String>,
    pub network_name: Option<String>,
    pub network_type: Option<String>,
    pub signal_strength: Option<i32>,
    pub roaming: bool,
    pub connected: bool,
    pub ip: Option<String>,
    pub sim_status: String,
    pub reg_status: Option<String>,
    pub ppp_status: String,
    pub debug: bool,
}

/// Cached settings, owned by the external settings service; mirrored here
/// read-only for the engine/PPP logic to consult.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub connect: bool,
    pub roaming: bool,
    pub pin: String,
    pub apn: String,
    pub user: String,
    pub passwd: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_overflow_under_limit_drops_silently() {
        let mut q = CommandQueue::new(15);
        for i in 0..20 {
            q.enqueue([format!("AT+CMD{i}")], true);
        }
        assert_eq!(q.len(), 15);
    }

    #[test]
    fn queue_without_limit_accepts_all() {
        let mut q = CommandQueue::new(15);
        q.enqueue((0..20).map(|i| format!("AT+CMD{i}")), false);
        assert_eq!(q.len(), 20);
    }

    #[test]
    fn invariant_roaming_requires_registered() {
        let mut s = ModemState::new();
        s.roaming = true;
        assert!(!s.check_invariants());
        s.registered = true;
        assert!(s.check_invariants());
    }

    #[test]
    fn invariant_ppp_active_requires_start_time() {
        let mut s = ModemState::new();
        s.ppp_active = true;
        assert!(!s.check_invariants());
        s.ppp_start_time = Some(Instant::now());
        assert!(s.check_invariants());
    }

    #[test]
    fn invariant_pdp_cid_must_exist_in_list() {
        let mut s = ModemState::new();
        s.pdp_cid = Some(1);
        assert!(!s.check_invariants());
        s.pdp_list.push(PdpContext::synthesize(1, "internet"));
        assert!(s.check_invariants());
    }

    #[test]
    fn snapshot_connected_iff_ppp_up() {
        let mut s = ModemState::new();
        assert!(!s.snapshot().connected);
        s.ppp_status = PppStatus::Up;
        assert!(s.snapshot().connected);
    }
}
