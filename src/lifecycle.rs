//! Modem lifecycle: init sequence, periodic tick command assembly, and PDP
//! context selection.

use crate::protocol::{PdpContext, SimCode};
use crate::state::{ModemState, Settings};

/// Commands enqueued once boot-wait concludes.
pub fn init_sequence_commands(wdog_gpio: i32) -> Vec<String> {
    vec![
        "ATH".to_string(),
        "AT+CGMM".to_string(),
        "AT+CGSN".to_string(),
        "AT+CMEE=1".to_string(),
        "AT+CPIN?".to_string(),
        format!("AT+CGDRT={wdog_gpio},1"),
        format!("AT+CGSETV={wdog_gpio},1"),
    ]
}

/// Commands enqueued on the 5 s periodic tick (best-effort: `limit=true`),
/// plus the watchdog toggle the caller should apply to `state.wdog_level`
/// before formatting the `AT+CGSETV=` command.
pub fn tick_commands(sim_status: SimCode) -> Vec<String> {
    let mut cmds = vec!["AT+CPIN?".to_string(), "AT+CGPS?".to_string()];
    if sim_status == SimCode::Ready {
        cmds.extend([
            "AT+COPS?".to_string(),
            "AT+CNSMOD?".to_string(),
            "AT+CSQ".to_string(),
            "AT+CGACT?".to_string(),
            "AT+CGATT?".to_string(),
            "AT+CREG?".to_string(),
            "AT+CGPADDR".to_string(),
        ]);
    }
    cmds
}

pub fn watchdog_command(wdog_gpio: i32, level: u8, gpio_save_suffix: &str) -> String {
    format!("AT+CGSETV={wdog_gpio},{level}{gpio_save_suffix}")
}

/// Commands enqueued to kick off PDP (re)selection: disconnect PPP first
/// (caller's responsibility), clear `pdp_cid`, then re-enumerate contexts.
pub fn select_pdp_commands() -> Vec<String> {
    vec![
        "AT+CGATT=0".to_string(),
        "AT+CGACT?".to_string(),
        "AT+CGDCONT?".to_string(),
    ]
}

/// Outcome of [`update_pdp`]: the chosen context, and whether it must be
/// defined on the modem via `AT+CGDCONT=` before use.
pub struct PdpSelection {
    pub context: PdpContext,
    pub needs_define: bool,
}

/// Choose a PDP context from `candidates` per the preference tuple
/// `(¬active, type_preference, apn_differs, index)`; emergency contexts are
/// excluded. Synthesizes a default context when nothing qualifies.
pub fn update_pdp(candidates: &[PdpContext], active: &std::collections::HashSet<i32>, settings: &Settings) -> PdpSelection {
    let best = candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.emergency == 0)
        .min_by_key(|(idx, c)| {
            let not_active = !active.contains(&c.cid);
            let apn_differs = !settings.apn.is_empty() && c.apn != settings.apn;
            (not_active, c.type_preference(), apn_differs, *idx)
        })
        .map(|(_, c)| c.clone());

    match best {
        None => PdpSelection {
            context: PdpContext::synthesize(1, &settings.apn),
            needs_define: true,
        },
        Some(mut ctx) => {
            let apn_differs = !settings.apn.is_empty() && ctx.apn != settings.apn;
            if apn_differs {
                ctx.apn = settings.apn.clone();
                PdpSelection {
                    context: ctx,
                    needs_define: true,
                }
            } else {
                PdpSelection {
                    context: ctx,
                    needs_define: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ctx(cid: i32, pdp_type: &str, apn: &str, emergency: i32) -> PdpContext {
        PdpContext {
            cid,
            pdp_type: pdp_type.to_string(),
            apn: apn.to_string(),
            pdp_addr: String::new(),
            d_comp: 0,
            h_comp: 0,
            ipv4_ctrl: 0,
            emergency,
        }
    }

    #[test]
    fn prefers_active_context() {
        let candidates = vec![ctx(1, "IP", "internet", 0), ctx(2, "IP", "internet", 0)];
        let mut active = HashSet::new();
        active.insert(2);
        let settings = Settings {
            apn: "internet".to_string(),
            ..Default::default()
        };
        let sel = update_pdp(&candidates, &active, &settings);
        assert_eq!(sel.context.cid, 2);
        assert!(!sel.needs_define);
    }

    #[test]
    fn prefers_ip_type_over_ipv6() {
        let candidates = vec![ctx(1, "IPV6", "internet", 0), ctx(2, "IP", "internet", 0)];
        let active = HashSet::new();
        let settings = Settings {
            apn: "internet".to_string(),
            ..Default::default()
        };
        let sel = update_pdp(&candidates, &active, &settings);
        assert_eq!(sel.context.cid, 2);
    }

    #[test]
    fn excludes_emergency_contexts() {
        let candidates = vec![ctx(1, "IP", "sos", 1), ctx(2, "IP", "internet", 0)];
        let active = HashSet::new();
        let settings = Settings {
            apn: "internet".to_string(),
            ..Default::default()
        };
        let sel = update_pdp(&candidates, &active, &settings);
        assert_eq!(sel.context.cid, 2);
    }

    #[test]
    fn synthesizes_default_when_no_candidates() {
        let settings = Settings {
            apn: "internet".to_string(),
            ..Default::default()
        };
        let sel = update_pdp(&[], &HashSet::new(), &settings);
        assert_eq!(sel.context.cid, 1);
        assert_eq!(sel.context.apn, "internet");
        assert!(sel.needs_define);
    }

    #[test]
    fn replaces_apn_when_candidate_differs_from_configured() {
        let candidates = vec![ctx(1, "IP", "old-apn", 0)];
        let settings = Settings {
            apn: "new-apn".to_string(),
            ..Default::default()
        };
        let sel = update_pdp(&candidates, &HashSet::new(), &settings);
        assert_eq!(sel.context.apn, "new-apn");
        assert!(sel.needs_define);
    }

    #[test]
    fn tick_commands_minimal_when_sim_not_ready() {
        let cmds = tick_commands(SimCode::SimPin);
        assert_eq!(cmds, vec!["AT+CPIN?".to_string(), "AT+CGPS?".to_string()]);
    }

    #[test]
    fn tick_commands_full_when_sim_ready() {
        let cmds = tick_commands(SimCode::Ready);
        assert_eq!(cmds.len(), 9);
        assert!(cmds.contains(&"AT+CREG?".to_string()));
    }

    #[test]
    fn watchdog_command_includes_gpio_and_suffix() {
        assert_eq!(watchdog_command(44, 1, ",0"), "AT+CGSETV=44,1,0");
        assert_eq!(watchdog_command(44, 0, ""), "AT+CGSETV=44,0");
    }
}
