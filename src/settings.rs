//! Boundary client for the external settings-persistence service
//! (`com.victronenergy.settings`). This module owns no state beyond a
//! cached mirror of the values it reads; persistence and defaulting belong
//! entirely to the remote service. The engine mutates its own
//! [`crate::state::Settings`] copy and only asks this module to write a
//! value back when something external (a rejected PIN) needs clearing.

use tracing::{error, warn};
use zbus::zvariant::Value;
use zbus::Connection;

use crate::engine::SettingKey;
use crate::state::Settings;

const SERVICE: &str = "com.victronenergy.settings";

/// `(relative path under /Settings/Modem, default)`.
const PATHS: &[(&str, &str)] = &[
    ("Connect", "1"),
    ("RoamingPermitted", "0"),
    ("PIN", ""),
    ("APN", ""),
    ("User", ""),
    ("Password", ""),
];

/// Thin wrapper over a generic settings-item proxy, scoped to
/// `/Settings/Modem/*`. Keeps D-Bus proxy plumbing behind a small typed
/// client rather than threading `zbus::Connection` through business logic.
#[derive(Clone)]
pub struct SettingsClient {
    conn: Connection,
}

impl SettingsClient {
    pub async fn connect() -> zbus::Result<Self> {
        let conn = Connection::system().await?;
        Ok(Self { conn })
    }

    /// Ensure `/Settings/Modem/*` exist with their documented defaults,
    /// then read the current values back into a [`Settings`].
    pub async fn sync(&self) -> Settings {
        let mut settings = Settings::default();
        for (name, default) in PATHS {
            if let Err(e) = self.add_setting(name, default).await {
                warn!("add setting /Settings/Modem/{name} failed: {e}");
            }
        }

        settings.connect = self.get_bool("Connect", true).await;
        settings.roaming = self.get_bool("RoamingPermitted", false).await;
        settings.pin = self.get_string("PIN").await;
        settings.apn = self.get_string("APN").await;
        settings.user = self.get_string("User").await;
        settings.passwd = self.get_string("Password").await;
        settings
    }

    async fn add_setting(&self, name: &str, default: &str) -> zbus::Result<()> {
        let proxy = zbus::Proxy::new(
            &self.conn,
            SERVICE,
            "/Settings",
            "com.victronenergy.Settings",
        )
        .await?;
        proxy
            .call_method("AddSetting", &("Modem", name, default, "", "", ""))
            .await
            .map(|_| ())
    }

    async fn item_proxy(&self, name: &str) -> zbus::Result<zbus::Proxy<'_>> {
        zbus::Proxy::new(
            &self.conn,
            SERVICE,
            format!("/Settings/Modem/{name}"),
            "com.victronenergy.BusItem",
        )
        .await
    }

    async fn get_bool(&self, name: &str, fallback: bool) -> bool {
        match self.get_raw(name).await {
            Some(v) => v != "0",
            None => fallback,
        }
    }

    async fn get_string(&self, name: &str) -> String {
        self.get_raw(name).await.unwrap_or_default()
    }

    async fn get_raw(&self, name: &str) -> Option<String> {
        let proxy = self.item_proxy(name).await.ok()?;
        let reply: zbus::Result<String> = proxy.call("GetText", &()).await;
        reply.ok()
    }

    /// Write a single value back to the settings service and return the
    /// [`SettingKey`] the engine should treat as changed.
    pub async fn set_and_notify(&self, name: &str, value: &str) -> Option<SettingKey> {
        let proxy = match self.item_proxy(name).await {
            Ok(p) => p,
            Err(e) => {
                error!("settings proxy for {name} unavailable: {e}");
                return None;
            }
        };
        if let Err(e) = proxy.call_method("SetValue", &(Value::from(value),)).await {
            error!("failed to write /Settings/Modem/{name}: {e}");
            return None;
        }
        key_for(name)
    }

    pub async fn clear_pin(&self) {
        let _ = self.set_and_notify("PIN", "").await;
    }
}

fn key_for(name: &str) -> Option<SettingKey> {
    match name {
        "Connect" => Some(SettingKey::Connect),
        "RoamingPermitted" => Some(SettingKey::Roaming),
        "PIN" => Some(SettingKey::Pin),
        "APN" => Some(SettingKey::Apn),
        "User" => Some(SettingKey::User),
        "Password" => Some(SettingKey::Passwd),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_for_maps_known_paths() {
        assert_eq!(key_for("Connect"), Some(SettingKey::Connect));
        assert_eq!(key_for("PIN"), Some(SettingKey::Pin));
        assert_eq!(key_for("Unknown"), None);
    }

    #[test]
    fn default_paths_cover_all_settings() {
        let names: Vec<&str> = PATHS.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["Connect", "RoamingPermitted", "PIN", "APN", "User", "Password"]
        );
    }
}
