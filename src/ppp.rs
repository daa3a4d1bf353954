//! PPP supervisor: auth-file/chat-script generation, `svc` invocation,
//! default-route probing, and the 60 s stall timeout.
//!
//! Starting and stopping `pppd` itself, and reading its exit status, are
//! out of scope — this module only asks the external service supervisor
//! (`svc`) to bring the `ppp` service up or down and then watches the
//! kernel routing table for evidence it came up.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::ModemError;
use crate::state::{ModemState, PppStatus, Settings};

/// Path configuration for the files and external invocations this module
/// touches. Overridable via `Config` so the daemon can be exercised
/// without root-owned `/run/ppp`.
#[derive(Debug, Clone)]
pub struct PppConfig {
    pub auth_file: String,
    pub chat_file: String,
    pub svc_binary: String,
    pub service_dir: String,
    pub log_dir: String,
    pub iface: String,
    pub stall_timeout: Duration,
}

impl Default for PppConfig {
    fn default() -> Self {
        Self {
            auth_file: "/run/ppp/auth".to_string(),
            chat_file: "/run/ppp/chat".to_string(),
            svc_binary: "svc".to_string(),
            service_dir: "/service/ppp".to_string(),
            log_dir: "/service/ppp/log".to_string(),
            iface: "ppp0".to_string(),
            stall_timeout: Duration::from_secs(60),
        }
    }
}

fn write_file_creating_parent(path: &str, contents: &str) -> Result<(), ModemError> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).map_err(ModemError::from)?;
    }
    fs::write(path, contents).map_err(ModemError::from)
}

/// `user <u>\npassword <p>\n`, or empty when either is blank.
pub fn auth_file_contents(user: &str, password: &str) -> String {
    if user.is_empty() || password.is_empty() {
        String::new()
    } else {
        format!("user {user}\npassword {password}\n")
    }
}

/// Fixed three-rule chat script ending with the `AT+CGDATA=` dial command
/// for the chosen PDP context.
pub fn chat_script_contents(cid: i32) -> String {
    format!(
        "ABORT   ERROR\nABORT   'NO CARRIER'\n''      ATZ\nOK      AT+CGDATA=\"PPP\",{cid}\nCONNECT ''\n"
    )
}

/// Invoke `svc -u <service_dir> <log_dir>` or `svc -d <service_dir>
/// <log_dir>`, fire-and-forget — the child's exit status is not observed.
fn invoke_svc(config: &PppConfig, up: bool) {
    let flag = if up { "-u" } else { "-d" };
    match Command::new(&config.svc_binary)
        .arg(flag)
        .arg(&config.service_dir)
        .arg(&config.log_dir)
        .spawn()
    {
        Ok(_) => info!("svc {flag} {} {}", config.service_dir, config.log_dir),
        Err(e) => warn!("failed to invoke svc {flag}: {e}"),
    }
}

/// Bring ppp up if not already active: write auth/chat files, invoke `svc
/// -u`, mark active.
pub fn connect(state: &mut ModemState, settings: &Settings, config: &PppConfig) -> Result<(), ModemError> {
    if state.ppp_active {
        return Ok(());
    }
    let Some(cid) = state.pdp_cid else {
        return Ok(());
    };

    write_file_creating_parent(&config.auth_file, &auth_file_contents(&settings.user, &settings.passwd))?;
    write_file_creating_parent(&config.chat_file, &chat_script_contents(cid))?;
    invoke_svc(config, true);

    state.ppp_active = true;
    state.ppp_start_time = Some(Instant::now());
    Ok(())
}

/// Bring ppp down if active, or unconditionally when `force` is set (used
/// on fatal shutdown paths).
pub fn disconnect(state: &mut ModemState, config: &PppConfig, force: bool) {
    if state.ppp_active || force {
        invoke_svc(config, false);
    }
    state.ppp_active = false;
    state.ppp_start_time = None;
}

pub fn connect_allowed(state: &ModemState, settings: &Settings) -> bool {
    settings.connect && (!state.roaming || settings.roaming)
}

pub fn update_connection(
    state: &mut ModemState,
    settings: &Settings,
    config: &PppConfig,
) -> Result<(), ModemError> {
    if state.registered && connect_allowed(state, settings) {
        connect(state, settings, config)
    } else {
        disconnect(state, config, false);
        Ok(())
    }
}

/// `DOWN` when not active, `UP` when a default route exists via the ppp
/// interface, `INIT` otherwise.
pub fn probe_status(state: &ModemState, config: &PppConfig) -> PppStatus {
    if !state.ppp_active {
        return PppStatus::Down;
    }
    if default_route_via(&config.iface) {
        PppStatus::Up
    } else {
        PppStatus::Init
    }
}

/// `true` when `pppStartTime` is set and the link has not reached `UP`
/// within the stall timeout.
pub fn is_stalled(state: &ModemState, config: &PppConfig) -> bool {
    match state.ppp_start_time {
        Some(started) if state.ppp_status != PppStatus::Up => {
            started.elapsed() >= config.stall_timeout
        }
        _ => false,
    }
}

fn default_route_via(iface: &str) -> bool {
    route_v4_has_default(iface) || route_v6_has_default(iface)
}

/// `/proc/net/route`: field 0 = iface, field 1 = destination (hex), a
/// default route has destination `00000000`.
fn route_v4_has_default(iface: &str) -> bool {
    let Ok(contents) = fs::read_to_string("/proc/net/route") else {
        return false;
    };
    parse_route_v4(&contents, iface)
}

pub fn parse_route_v4(contents: &str, iface: &str) -> bool {
    contents.lines().skip(1).any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        fields.len() > 1
            && fields[0] == iface
            && i64::from_str_radix(fields[1], 16).unwrap_or(-1) == 0
    })
}

/// `/proc/net/ipv6_route`: field 9 = iface, field 0 = destination (hex).
fn route_v6_has_default(iface: &str) -> bool {
    let Ok(contents) = fs::read_to_string("/proc/net/ipv6_route") else {
        return false;
    };
    parse_route_v6(&contents, iface)
}

pub fn parse_route_v6(contents: &str, iface: &str) -> bool {
    contents.lines().any(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        fields.len() > 9
            && fields[9] == iface
            && fields[0].chars().all(|c| c == '0')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_file_contents_with_both_set() {
        assert_eq!(
            auth_file_contents("alice", "secret"),
            "user alice\npassword secret\n"
        );
    }

    #[test]
    fn auth_file_contents_empty_user_is_zero_byte() {
        assert_eq!(auth_file_contents("", "secret"), "");
    }

    #[test]
    fn auth_file_contents_empty_password_is_zero_byte() {
        assert_eq!(auth_file_contents("alice", ""), "");
    }

    #[test]
    fn chat_script_ends_with_cgdata_for_cid() {
        let script = chat_script_contents(3);
        assert!(script.contains("AT+CGDATA=\"PPP\",3"));
        assert!(script.starts_with("ABORT   ERROR"));
    }

    #[test]
    fn connect_allowed_true_when_connect_and_home() {
        let mut state = ModemState::new();
        state.registered = true;
        let settings = Settings {
            connect: true,
            roaming: false,
            ..Default::default()
        };
        assert!(connect_allowed(&state, &settings));
    }

    #[test]
    fn connect_allowed_false_when_roaming_and_roaming_disallowed() {
        let mut state = ModemState::new();
        state.registered = true;
        state.roaming = true;
        let settings = Settings {
            connect: true,
            roaming: false,
            ..Default::default()
        };
        assert!(!connect_allowed(&state, &settings));
    }

    #[test]
    fn parse_route_v4_finds_default_route() {
        let table = "Iface\tDestination\tGateway\nppp0\t00000000\t00000000\n";
        assert!(parse_route_v4(table, "ppp0"));
    }

    #[test]
    fn parse_route_v4_ignores_non_default_route() {
        let table = "Iface\tDestination\tGateway\nppp0\t0100A8C0\t00000000\n";
        assert!(!parse_route_v4(table, "ppp0"));
    }

    #[test]
    fn parse_route_v6_finds_default_route() {
        let table = "00000000000000000000000000000000 00 00000000000000000000000000000000 00 00000000000000000000000000000000 00000000 00000000 00000000 00000000 ppp0\n";
        assert!(parse_route_v6(table, "ppp0"));
    }

    #[test]
    fn stall_detected_after_timeout_when_not_up() {
        let mut state = ModemState::new();
        state.ppp_start_time = Some(Instant::now() - Duration::from_secs(61));
        state.ppp_status = PppStatus::Init;
        let config = PppConfig {
            stall_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(is_stalled(&state, &config));
    }

    #[test]
    fn no_stall_when_already_up() {
        let mut state = ModemState::new();
        state.ppp_start_time = Some(Instant::now() - Duration::from_secs(61));
        state.ppp_status = PppStatus::Up;
        let config = PppConfig {
            stall_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(!is_stalled(&state, &config));
    }

    #[test]
    fn update_connection_is_idempotent() {
        let mut state = ModemState::new();
        state.registered = true;
        state.pdp_cid = Some(1);
        let settings = Settings {
            connect: false,
            ..Default::default()
        };
        let config = PppConfig::default();
        // Not connect-allowed: both calls should leave ppp_active false.
        update_connection(&mut state, &settings, &config).unwrap();
        let after_first = state.ppp_active;
        update_connection(&mut state, &settings, &config).unwrap();
        assert_eq!(after_first, state.ppp_active);
        assert!(!state.ppp_active);
    }
}
