//! Bus surface: registers `com.victronenergy.modem` and publishes the
//! property tree from §3 as a single `com.victronenergy.Modem` interface.
//! `Debug` is the only writable property; every setting write funnels
//! through [`engine::Intent`] so the engine thread remains the sole writer
//! of [`crate::state::ModemState`].

use std::sync::Arc;

use tracing::{info, warn};
use zbus::connection::Builder as ConnectionBuilder;
use zbus::interface;

use crate::engine::{EngineHandle, Intent, SettingKey};
use crate::settings::SettingsClient;

const SERVICE_NAME: &str = "com.victronenergy.modem";
const OBJECT_PATH: &str = "/";

struct ModemInterface {
    handle: EngineHandle,
}

#[interface(name = "com.victronenergy.Modem")]
impl ModemInterface {
    #[zbus(property)]
    async fn model(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().model.unwrap_or_default())
    }

    #[zbus(property)]
    async fn imei(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().imei.unwrap_or_default())
    }

    #[zbus(property)]
    async fn network_name(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().network_name.unwrap_or_default())
    }

    #[zbus(property)]
    async fn network_type(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().network_type.unwrap_or_default())
    }

    #[zbus(property)]
    async fn signal_strength(&self) -> zbus::fdo::Result<i32> {
        Ok(self.handle.read_snapshot().signal_strength.unwrap_or(-1))
    }

    #[zbus(property)]
    async fn roaming(&self) -> zbus::fdo::Result<bool> {
        Ok(self.handle.read_snapshot().roaming)
    }

    #[zbus(property)]
    async fn connected(&self) -> zbus::fdo::Result<bool> {
        Ok(self.handle.read_snapshot().connected)
    }

    #[zbus(property)]
    async fn ip(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().ip.unwrap_or_default())
    }

    #[zbus(property)]
    async fn sim_status(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().sim_status)
    }

    #[zbus(property)]
    async fn reg_status(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().reg_status.unwrap_or_default())
    }

    #[zbus(property)]
    async fn ppp_status(&self) -> zbus::fdo::Result<String> {
        Ok(self.handle.read_snapshot().ppp_status)
    }

    #[zbus(property)]
    async fn debug(&self) -> zbus::fdo::Result<bool> {
        Ok(self.handle.read_snapshot().debug)
    }

    #[zbus(property)]
    async fn set_debug(&self, value: bool) -> zbus::Result<()> {
        self.handle.send(Intent::SetDebug(value));
        Ok(())
    }
}

/// Register the service and start the periodic tick and settings-watch
/// background tasks. Runs until the connection is dropped.
pub async fn serve(handle: EngineHandle, settings: SettingsClient) -> zbus::Result<()> {
    let iface = ModemInterface {
        handle: handle.clone(),
    };
    let _conn = ConnectionBuilder::system()?
        .name(SERVICE_NAME)?
        .serve_at(OBJECT_PATH, iface)?
        .build()
        .await?;
    info!("bus service {SERVICE_NAME} registered at {OBJECT_PATH}");

    let settings = Arc::new(settings);
    let tick_handle = handle.clone();
    let tick_task = tokio::spawn(async move { tick_loop(tick_handle).await });
    let watch_task = tokio::spawn(async move { settings_watch_loop(handle, settings).await });

    let _ = tokio::join!(tick_task, watch_task);
    Ok(())
}

async fn tick_loop(handle: EngineHandle) {
    let mut interval = tokio::time::interval(handle.tick_interval);
    loop {
        interval.tick().await;
        if handle.shutdown.is_triggered() {
            return;
        }
        handle.send(Intent::Tick);
    }
}

/// Poll the settings service for changes rather than subscribing to a
/// signal — the settings service's change-notification contract is out of
/// scope here, and the same cadence as the periodic tick is close enough.
async fn settings_watch_loop(handle: EngineHandle, settings: Arc<SettingsClient>) {
    let mut last = settings.sync().await;
    let mut interval = tokio::time::interval(handle.tick_interval);
    loop {
        interval.tick().await;
        if handle.shutdown.is_triggered() {
            return;
        }
        let current = settings.sync().await;
        for key in diff(&last, &current) {
            handle.send(Intent::SettingChanged(key));
        }
        last = current;
    }
}

fn diff(old: &crate::state::Settings, new: &crate::state::Settings) -> Vec<SettingKey> {
    let mut changed = Vec::new();
    if old.connect != new.connect {
        changed.push(SettingKey::Connect);
    }
    if old.roaming != new.roaming {
        changed.push(SettingKey::Roaming);
    }
    if old.pin != new.pin {
        changed.push(SettingKey::Pin);
    }
    if old.apn != new.apn {
        changed.push(SettingKey::Apn);
    }
    if old.user != new.user {
        changed.push(SettingKey::User);
    }
    if old.passwd != new.passwd {
        changed.push(SettingKey::Passwd);
    }
    if !changed.is_empty() {
        warn!("settings changed: {changed:?}");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Settings;

    #[test]
    fn diff_detects_single_field_change() {
        let old = Settings::default();
        let mut new = old.clone();
        new.apn = "internet".to_string();
        assert_eq!(diff(&old, &new), vec![SettingKey::Apn]);
    }

    #[test]
    fn diff_empty_when_unchanged() {
        let s = Settings::default();
        assert!(diff(&s, &s).is_empty());
    }
}
