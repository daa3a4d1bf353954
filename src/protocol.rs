//! Wire-level types: PDP contexts, tagged status enums, and the CSV field
//! splitting rules shared by the response dispatcher.
//!
//! `RegStatus` models the modem's `+CREG` code as `Known(variant) | Raw(code)`
//! rather than letting an unrecognized code silently pass through — callers
//! must match the `Raw` arm explicitly. `+CPIN`'s `SimCode` has no such
//! passthrough case: an unrecognized value falls back to a fixed `Error`,
//! matching the original's default-valued lookup.

use std::fmt;

/// Split a response body on `,` and strip surrounding double quotes from
/// each field.
pub fn split_fields(body: &str) -> Vec<String> {
    body.split(',')
        .map(|f| f.trim().trim_matches('"').to_string())
        .collect()
}

/// A packet-data-protocol context as reported by `+CGDCONT?`.
///
/// Immutable once parsed — selection logic produces new candidates rather
/// than mutating an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdpContext {
    pub cid: i32,
    pub pdp_type: String,
    pub apn: String,
    pub pdp_addr: String,
    pub d_comp: i32,
    pub h_comp: i32,
    pub ipv4_ctrl: i32,
    pub emergency: i32,
}

impl PdpContext {
    /// Build the context this daemon would define itself when no suitable
    /// candidate exists on the modem.
    pub fn synthesize(cid: i32, apn: &str) -> Self {
        Self {
            cid,
            pdp_type: "IP".to_string(),
            apn: apn.to_string(),
            pdp_addr: String::new(),
            d_comp: 0,
            h_comp: 0,
            ipv4_ctrl: 0,
            emergency: 0,
        }
    }

    /// Parse one `+CGDCONT:` line body, e.g. `1,"IP","internet","",0,0`.
    pub fn parse(body: &str) -> Option<Self> {
        let f = split_fields(body);
        if f.len() < 3 {
            return None;
        }
        Some(Self {
            cid: f[0].parse().ok()?,
            pdp_type: f[1].clone(),
            apn: f[2].clone(),
            pdp_addr: f.get(3).cloned().unwrap_or_default(),
            d_comp: f.get(4).and_then(|v| v.parse().ok()).unwrap_or(0),
            h_comp: f.get(5).and_then(|v| v.parse().ok()).unwrap_or(0),
            ipv4_ctrl: f.get(6).and_then(|v| v.parse().ok()).unwrap_or(0),
            emergency: f.get(7).and_then(|v| v.parse().ok()).unwrap_or(0),
        })
    }

    /// Render as the `AT+CGDCONT=` argument list (not including the command
    /// prefix itself).
    pub fn to_define_args(&self) -> String {
        format!(
            "{},\"{}\",\"{}\",\"{}\",{},{}",
            self.cid, self.pdp_type, self.apn, self.pdp_addr, self.d_comp, self.h_comp
        )
    }

    /// Index of `pdp_type` in the preferred-type ordering, used by PDP
    /// selection; unknown types sort last.
    pub fn type_preference(&self) -> i32 {
        match self.pdp_type.as_str() {
            "IP" => 0,
            "IPV4V6" => 1,
            "IPV6" => 2,
            _ => 1000,
        }
    }
}

/// `+CREG` registration status, mapped from the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegCode {
    NotRegistered,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegStatus {
    Known(RegCode),
    Raw(i32),
}

impl RegStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Known(RegCode::NotRegistered),
            1 => Self::Known(RegCode::Home),
            2 => Self::Known(RegCode::Searching),
            3 => Self::Known(RegCode::Denied),
            4 => Self::Known(RegCode::Unknown),
            5 => Self::Known(RegCode::Roaming),
            n => Self::Raw(n),
        }
    }

    /// `(registered, roaming)` derived from a `+CREG` status code.
    pub fn derive(self) -> (bool, bool) {
        match self {
            Self::Known(RegCode::Home) => (true, false),
            Self::Known(RegCode::Roaming) => (true, true),
            _ => (false, false),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Known(RegCode::NotRegistered) => 0,
            Self::Known(RegCode::Home) => 1,
            Self::Known(RegCode::Searching) => 2,
            Self::Known(RegCode::Denied) => 3,
            Self::Known(RegCode::Unknown) => 4,
            Self::Known(RegCode::Roaming) => 5,
            Self::Raw(n) => n,
        }
    }
}

impl fmt::Display for RegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Known(RegCode::NotRegistered) => "not_registered",
            Self::Known(RegCode::Home) => "home",
            Self::Known(RegCode::Searching) => "searching",
            Self::Known(RegCode::Denied) => "denied",
            Self::Known(RegCode::Unknown) => "unknown",
            Self::Known(RegCode::Roaming) => "roaming",
            Self::Raw(_) => "raw",
        };
        write!(f, "{name}({})", self.code())
    }
}

/// SIM status as reported by `+CPIN` (textual) or derived from a `+CME
/// ERROR:` numeric code during an `AT+CPIN=` attempt. An unrecognized
/// `+CPIN:` value or error code falls back to `Error`, matching the
/// original's fixed-default `.get(resp, SIM_STATUS.ERROR)` lookup rather
/// than carrying the unrecognized value through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCode {
    Ready,
    SimPin,
    SimPuk,
    NoSim,
    BadPasswd,
    Error,
}

impl SimCode {
    /// Map a `+CPIN:` value string to a status, defaulting to `Error`.
    pub fn from_cpin_value(value: &str) -> Self {
        match value.trim() {
            "READY" => Self::Ready,
            "SIM PIN" => Self::SimPin,
            "SIM PUK" => Self::SimPuk,
            "SIM NOT INSERTED" => Self::NoSim,
            _ => Self::Error,
        }
    }

    /// Map a `+CME ERROR:` numeric code seen in reply to `AT+CPIN=<pin>`.
    pub fn from_cme_error_code(code: i32) -> Option<Self> {
        match code {
            16 => Some(Self::BadPasswd),
            10 => Some(Self::NoSim),
            _ => None,
        }
    }
}

impl fmt::Display for SimCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "READY",
            Self::SimPin => "SIM_PIN",
            Self::SimPuk => "SIM_PUK",
            Self::NoSim => "NO_SIM",
            Self::BadPasswd => "BAD_PASSWD",
            Self::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// A classified response line, produced by the command engine's reader
/// loop and handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Echo of the in-flight command (or a stray echo of something else).
    Echo(String),
    /// `ERROR` or `+CME ERROR:`/`+CMS ERROR:` terminal.
    TerminalError(String),
    /// Informational line to discard (`NO CARRIER`, `+PPPD:` prefix).
    Informational,
    /// Labeled body: `(key, csv)`.
    Solicited(String, String),
    /// Unlabeled body attributed to the last command.
    Unlabeled(String),
    /// `OK` terminal.
    Ok,
}

/// Classify one framed line per the engine's rules. `last_cmd` is the
/// command currently in flight (without its `AT` prefix already stripped —
/// callers compare against the raw sent string).
pub fn classify(line: &str) -> Classified {
    if line == "OK" {
        return Classified::Ok;
    }
    if line == "ERROR" || line.starts_with("+CME ERROR:") || line.starts_with("+CMS ERROR:") {
        return Classified::TerminalError(line.to_string());
    }
    if line == "NO CARRIER" || line.starts_with("+PPPD:") {
        return Classified::Informational;
    }
    if line.starts_with("AT") {
        return Classified::Echo(line.to_string());
    }
    if let Some(idx) = line.find(": ") {
        let key = line[..idx].to_string();
        let body = line[idx + 2..].to_string();
        return Classified::Solicited(key, body);
    }
    Classified::Unlabeled(line.to_string())
}

/// Strip a leading `CME ERROR:`/`CMS ERROR:` prefix and the following
/// whitespace, returning the remainder plus its integer value if it parses.
pub fn parse_terminal_error(line: &str) -> (String, Option<i32>) {
    let rest = line
        .trim_start_matches("+CME ERROR:")
        .trim_start_matches("+CMS ERROR:")
        .trim()
        .to_string();
    let code = rest.parse().ok();
    (rest, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdp_context_round_trips() {
        let ctx = PdpContext {
            cid: 1,
            pdp_type: "IP".to_string(),
            apn: "internet".to_string(),
            pdp_addr: String::new(),
            d_comp: 0,
            h_comp: 0,
            ipv4_ctrl: 0,
            emergency: 0,
        };
        let body = format!(
            "{},\"{}\",\"{}\",\"{}\",{},{},{},{}",
            ctx.cid,
            ctx.pdp_type,
            ctx.apn,
            ctx.pdp_addr,
            ctx.d_comp,
            ctx.h_comp,
            ctx.ipv4_ctrl,
            ctx.emergency
        );
        let parsed = PdpContext::parse(&body).unwrap();
        assert_eq!(parsed, ctx);
    }

    #[test]
    fn reg_status_home_sets_registered_not_roaming() {
        let (registered, roaming) = RegStatus::from_code(1).derive();
        assert!(registered);
        assert!(!roaming);
    }

    #[test]
    fn reg_status_roaming_sets_both() {
        let (registered, roaming) = RegStatus::from_code(5).derive();
        assert!(registered);
        assert!(roaming);
    }

    #[test]
    fn reg_status_other_clears_both() {
        let (registered, roaming) = RegStatus::from_code(2).derive();
        assert!(!registered);
        assert!(!roaming);
    }

    #[test]
    fn reg_status_derive_is_idempotent() {
        let s = RegStatus::from_code(5);
        assert_eq!(s.derive(), s.derive());
    }

    #[test]
    fn unknown_reg_code_is_raw() {
        assert_eq!(RegStatus::from_code(9), RegStatus::Raw(9));
    }

    #[test]
    fn classify_echo() {
        assert_eq!(classify("AT+CSQ"), Classified::Echo("AT+CSQ".to_string()));
    }

    #[test]
    fn classify_ok() {
        assert_eq!(classify("OK"), Classified::Ok);
    }

    #[test]
    fn classify_cme_error() {
        assert_eq!(
            classify("+CME ERROR: 16"),
            Classified::TerminalError("+CME ERROR: 16".to_string())
        );
    }

    #[test]
    fn classify_informational_no_carrier() {
        assert_eq!(classify("NO CARRIER"), Classified::Informational);
    }

    #[test]
    fn classify_informational_pppd() {
        assert_eq!(classify("+PPPD: disconnected"), Classified::Informational);
    }

    #[test]
    fn classify_solicited_splits_key_and_body() {
        assert_eq!(
            classify("+CSQ: 15,99"),
            Classified::Solicited("+CSQ".to_string(), "15,99".to_string())
        );
    }

    #[test]
    fn classify_unlabeled_is_attributed_to_last_cmd_by_caller() {
        assert_eq!(classify("15,99"), Classified::Unlabeled("15,99".to_string()));
    }

    #[test]
    fn parse_terminal_error_strips_prefix_and_parses_code() {
        assert_eq!(
            parse_terminal_error("+CME ERROR: 16"),
            ("16".to_string(), Some(16))
        );
    }

    #[test]
    fn parse_terminal_error_nonnumeric_body() {
        let (text, code) = parse_terminal_error("+CME ERROR: operation not supported");
        assert_eq!(text, "operation not supported");
        assert_eq!(code, None);
    }

    #[test]
    fn cops_with_fewer_than_three_fields_is_detectable_by_caller() {
        let fields = split_fields("0,0");
        assert!(fields.len() < 3);
    }

    #[test]
    fn type_preference_orders_ip_first() {
        let ip = PdpContext::synthesize(1, "a");
        let mut ipv6 = PdpContext::synthesize(2, "a");
        ipv6.pdp_type = "IPV6".to_string();
        assert!(ip.type_preference() < ipv6.type_preference());
    }
}
