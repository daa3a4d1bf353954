//! Response dispatcher: maps a solicited reply's key to its effect on
//! [`ModemState`].

use tracing::{debug, error, info, warn};

use crate::protocol::{self, PdpContext, RegStatus, SimCode};
use crate::state::{CommandQueue, ModemState, Settings};

/// Modems known to require the watchdog GPIO-save quirk (`,0` suffix on
/// `AT+CGSETV=`).
const GPIO_SAVE_QUIRK_MODELS: &[&str] = &["SIMCOM_SIM5360E"];

/// Side effect the engine must carry out after a dispatch call, since the
/// dispatcher itself only touches [`ModemState`] and the command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEffect {
    None,
    /// Registration just transitioned to registered: disconnect ppp, drop
    /// the current context, and re-enumerate.
    TriggerPdpSelection,
    /// The `+CGDCONT?` enumeration just completed: choose a context from
    /// `state.pdp_list`, defining/attaching it if needed.
    ApplyPdpSelection,
    UpdateConnection,
    ClearPinSetting,
}

/// Echo pre-hooks: run when an echoed line matches `last_cmd`, before it is
/// discarded.
pub fn on_echo_prehook(last_cmd: &str, state: &mut ModemState) {
    if last_cmd.starts_with("AT+CGACT?") {
        state.pdp_active.clear();
    } else if last_cmd.starts_with("AT+CGDCONT?") {
        state.pdp_list.clear();
    }
}

/// OK post-hook: run when the terminal `OK` resolves `last_cmd`.
pub fn on_ok_posthook(last_cmd: &str) -> DispatchEffect {
    if last_cmd.starts_with("AT+CGDCONT?") {
        DispatchEffect::ApplyPdpSelection
    } else {
        DispatchEffect::None
    }
}

/// Dispatch a solicited `key: body` or unlabeled reply (already attributed
/// to `cmd` by the caller).
pub fn dispatch(
    cmd: &str,
    body: &str,
    state: &mut ModemState,
    queue: &mut CommandQueue,
    settings: &Settings,
) -> DispatchEffect {
    let fields = protocol::split_fields(body);

    match cmd {
        "+CGMM" => {
            let model = body.trim().to_string();
            if GPIO_SAVE_QUIRK_MODELS.contains(&model.as_str()) {
                state.gpio_save_suffix = ",0".to_string();
            }
            state.model = Some(model);
            DispatchEffect::None
        }
        "+CGSN" => {
            state.imei = Some(body.trim().to_string());
            DispatchEffect::None
        }
        "+CPIN" => {
            dispatch_cpin(body, state, queue, settings);
            DispatchEffect::None
        }
        "+CNSMOD" => {
            if let Some(code) = fields.last().and_then(|f| f.parse::<i32>().ok()) {
                state.network_type = Some(network_type_name(code).to_string());
            }
            DispatchEffect::None
        }
        "+CREG" => dispatch_creg(&fields, state),
        "+COPS" => {
            if fields.len() >= 3 {
                state.network_name = Some(fields[2].clone());
            }
            DispatchEffect::None
        }
        "+CSQ" => {
            if let Some(v) = fields.first().and_then(|f| f.parse::<i32>().ok()) {
                state.signal_strength = Some(v);
            }
            DispatchEffect::None
        }
        "+CGACT" => dispatch_cgact(&fields, state, queue),
        "+CGATT" => dispatch_cgatt(&fields, state, queue),
        "+CGDCONT" => {
            if let Some(ctx) = PdpContext::parse(body) {
                state.pdp_list.push(ctx);
            } else {
                state.stats.anomalies += 1;
                warn!("malformed +CGDCONT line: {body}");
            }
            DispatchEffect::None
        }
        "+CGPADDR" => {
            dispatch_cgpaddr(&fields, state);
            DispatchEffect::None
        }
        "+CGPS" => {
            if fields.first().map(String::as_str) != Some("1") {
                queue.enqueue(["AT+CGPS=1".to_string()], false);
            }
            DispatchEffect::None
        }
        other => {
            debug!("unhandled response key {other}: {body}");
            DispatchEffect::None
        }
    }
}

fn dispatch_cpin(body: &str, state: &mut ModemState, queue: &mut CommandQueue, settings: &Settings) {
    let value = body.trim();
    let was_ready = state.sim_status == SimCode::Ready;
    let status = SimCode::from_cpin_value(value);
    state.sim_status = status;

    match status {
        SimCode::SimPin => {
            if settings.pin.is_empty() {
                error!("SIM requires PIN but no PIN configured");
            } else {
                queue.enqueue([format!("AT+CPIN={}", settings.pin)], false);
            }
        }
        SimCode::Ready => {
            if !was_ready {
                info!("SIM ready");
            }
        }
        SimCode::Error => {
            state.stats.anomalies += 1;
            error!("unrecognized +CPIN value: {value}");
        }
        _ => {}
    }
}

fn dispatch_creg(fields: &[String], state: &mut ModemState) -> DispatchEffect {
    let Some(code) = fields.last().and_then(|f| f.parse::<i32>().ok()) else {
        state.stats.anomalies += 1;
        return DispatchEffect::None;
    };
    let reg = RegStatus::from_code(code);
    let (registered, roaming) = reg.derive();
    let was_registered = state.registered;
    state.reg_status = Some(reg);
    state.registered = registered;
    state.roaming = roaming;

    if registered && !was_registered {
        DispatchEffect::TriggerPdpSelection
    } else {
        DispatchEffect::None
    }
}

fn dispatch_cgact(fields: &[String], state: &mut ModemState, queue: &mut CommandQueue) -> DispatchEffect {
    // Unlabeled form: "cid,state"
    if fields.len() >= 2 {
        if let (Ok(cid), Ok(active)) = (fields[0].parse::<i32>(), fields[1].parse::<i32>()) {
            if active == 1 {
                state.pdp_active.insert(cid);
                if let Some(our_cid) = state.pdp_cid {
                    if cid != our_cid {
                        queue.enqueue([format!("AT+CGACT=0,{cid}")], false);
                    }
                }
            } else {
                state.pdp_active.remove(&cid);
            }
        }
    }
    DispatchEffect::None
}

fn dispatch_cgatt(fields: &[String], state: &mut ModemState, queue: &mut CommandQueue) -> DispatchEffect {
    let Some(value) = fields.first().and_then(|f| f.parse::<i32>().ok()) else {
        return DispatchEffect::None;
    };
    if value == 1 {
        if let Some(cid) = state.pdp_cid {
            if !state.pdp_active.contains(&cid) {
                queue.enqueue([format!("AT+CGACT=1,{cid}")], false);
            }
            return DispatchEffect::UpdateConnection;
        }
    }
    DispatchEffect::None
}

fn dispatch_cgpaddr(fields: &[String], state: &mut ModemState) {
    let Some(cid) = state.pdp_cid else { return };
    if fields.first().and_then(|f| f.parse::<i32>().ok()) != Some(cid) {
        return;
    }
    let addr = fields.get(1).cloned().unwrap_or_default();
    state.ip = if addr.is_empty() || addr == "0.0.0.0" {
        None
    } else {
        Some(addr)
    };
}

/// Handle a terminal error line (`ERROR` or `+CME/+CMS ERROR:`).
pub fn dispatch_error(
    line: &str,
    last_cmd: Option<&str>,
    state: &mut ModemState,
) -> DispatchEffect {
    state.stats.terminal_errors += 1;
    let (text, code) = protocol::parse_terminal_error(line);
    warn!("modem error for {:?}: {text}", last_cmd);

    let is_cpin_cmd = last_cmd.is_some_and(|c| c.starts_with("AT+CPIN"));
    if is_cpin_cmd {
        if let Some(code) = code {
            if let Some(status) = SimCode::from_cme_error_code(code) {
                state.sim_status = status;
                if status == SimCode::BadPasswd {
                    return DispatchEffect::ClearPinSetting;
                }
            }
        }
    }
    DispatchEffect::None
}

fn network_type_name(code: i32) -> &'static str {
    match code {
        0 => "NONE",
        1 => "GSM",
        2 => "GPRS",
        3 => "EDGE",
        4 => "UMTS",
        5 => "HSDPA",
        6 => "HSUPA",
        7 => "HSPA",
        8 => "LTE",
        9 => "TDS-CDMA",
        10 => "TDS-HSDPA",
        11 => "TDS-HSUPA",
        12 => "TDS-HSPA",
        13 => "CDMA",
        14 => "EVDO",
        15 => "CDMA/EVDO",
        16 => "CDMA/LTE",
        23 => "eHRPD",
        24 => "CDMA/eHRPD",
        30 => "HSPA+",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ModemState {
        ModemState::new()
    }

    #[test]
    fn cgmm_sets_model_and_quirk_suffix() {
        let mut s = state();
        let mut q = CommandQueue::new(15);
        dispatch("+CGMM", "SIMCOM_SIM5360E", &mut s, &mut q, &Settings::default());
        assert_eq!(s.model.as_deref(), Some("SIMCOM_SIM5360E"));
        assert_eq!(s.gpio_save_suffix, ",0");
    }

    #[test]
    fn cgmm_unknown_model_leaves_suffix_empty() {
        let mut s = state();
        let mut q = CommandQueue::new(15);
        dispatch("+CGMM", "OTHER_MODEL", &mut s, &mut q, &Settings::default());
        assert_eq!(s.gpio_save_suffix, "");
    }

    #[test]
    fn cpin_sim_pin_with_configured_pin_sends_unlock() {
        let mut s = state();
        let mut q = CommandQueue::new(15);
        let settings = Settings {
            pin: "1234".to_string(),
            ..Default::default()
        };
        dispatch("+CPIN", "SIM PIN", &mut s, &mut q, &settings);
        assert_eq!(q.pop(), Some("AT+CPIN=1234".to_string()));
    }

    #[test]
    fn cpin_sim_pin_without_configured_pin_sends_nothing() {
        let mut s = state();
        let mut q = CommandQueue::new(15);
        dispatch("+CPIN", "SIM PIN", &mut s, &mut q, &Settings::default());
        assert!(q.is_empty());
    }

    #[test]
    fn creg_home_triggers_pdp_selection_on_transition() {
        let mut s = state();
        let mut q = CommandQueue::new(15);
        let effect = dispatch("+CREG", "0,1", &mut s, &mut q, &Settings::default());
        assert_eq!(effect, DispatchEffect::TriggerPdpSelection);
        assert!(s.registered);
        assert!(!s.roaming);
    }

    #[test]
    fn creg_does_not_retrigger_when_already_registered() {
        let mut s = state();
        s.registered = true;
        let mut q = CommandQueue::new(15);
        let effect = dispatch("+CREG", "0,1", &mut s, &mut q, &Settings::default());
        assert_eq!(effect, DispatchEffect::None);
    }

    #[test]
    fn cops_with_three_fields_publishes_name() {
        let mut s = state();
        let mut q = CommandQueue::new(15);
        dispatch("+COPS", "0,0,\"Carrier\"", &mut s, &mut q, &Settings::default());
        assert_eq!(s.network_name.as_deref(), Some("Carrier"));
    }

    #[test]
    fn cops_with_fewer_fields_does_not_touch_name() {
        let mut s = state();
        s.network_name = Some("Stale".to_string());
        let mut q = CommandQueue::new(15);
        dispatch("+COPS", "0,0", &mut s, &mut q, &Settings::default());
        assert_eq!(s.network_name.as_deref(), Some("Stale"));
    }

    #[test]
    fn cgact_marks_active_and_deactivates_rival() {
        let mut s = state();
        s.pdp_cid = Some(1);
        let mut q = CommandQueue::new(15);
        dispatch("+CGACT", "2,1", &mut s, &mut q, &Settings::default());
        assert!(s.pdp_active.contains(&2));
        assert_eq!(q.pop(), Some("AT+CGACT=0,2".to_string()));
    }

    #[test]
    fn cgatt_activates_our_context_when_not_active() {
        let mut s = state();
        s.pdp_cid = Some(1);
        let mut q = CommandQueue::new(15);
        let effect = dispatch("+CGATT", "1", &mut s, &mut q, &Settings::default());
        assert_eq!(q.pop(), Some("AT+CGACT=1,1".to_string()));
        assert_eq!(effect, DispatchEffect::UpdateConnection);
    }

    #[test]
    fn cgpaddr_zero_address_publishes_null_ip() {
        let mut s = state();
        s.pdp_cid = Some(1);
        let mut q = CommandQueue::new(15);
        dispatch("+CGPADDR", "1,0.0.0.0", &mut s, &mut q, &Settings::default());
        assert_eq!(s.ip, None);
    }

    #[test]
    fn cgpaddr_real_address_publishes_ip() {
        let mut s = state();
        s.pdp_cid = Some(1);
        let mut q = CommandQueue::new(15);
        dispatch("+CGPADDR", "1,10.0.0.5", &mut s, &mut q, &Settings::default());
        assert_eq!(s.ip.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn error_on_cpin_bad_password_clears_pin() {
        let mut s = state();
        let effect = dispatch_error("+CME ERROR: 16", Some("AT+CPIN=0000"), &mut s);
        assert_eq!(effect, DispatchEffect::ClearPinSetting);
        assert_eq!(s.sim_status, SimCode::BadPasswd);
    }

    #[test]
    fn echo_prehook_clears_pdp_list_on_cgdcont_query() {
        let mut s = state();
        s.pdp_list.push(PdpContext::synthesize(1, "internet"));
        on_echo_prehook("AT+CGDCONT?", &mut s);
        assert!(s.pdp_list.is_empty());
    }

    #[test]
    fn ok_posthook_applies_pdp_selection_for_cgdcont_query() {
        assert_eq!(
            on_ok_posthook("AT+CGDCONT?"),
            DispatchEffect::ApplyPdpSelection
        );
        assert_eq!(on_ok_posthook("AT+CSQ"), DispatchEffect::None);
    }
}
