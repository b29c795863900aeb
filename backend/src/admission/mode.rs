use std::sync::Arc;

use crate::settings::SettingsStore;

/// Maintenance switch. Holds no state of its own; the flag lives in the settings.
#[derive(Debug, Clone)]
pub struct ModeGate {
    settings: Arc<SettingsStore>,
}

impl ModeGate {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    pub fn is_service_enabled(&self) -> bool {
        !self.settings.get().maintenance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsUpdate;

    #[test]
    fn follows_maintenance_flag() {
        let settings = Arc::new(SettingsStore::default());
        let gate = ModeGate::new(Arc::clone(&settings));
        assert!(gate.is_service_enabled());

        settings
            .update(SettingsUpdate {
                maintenance: Some(true),
                ..SettingsUpdate::default()
            })
            .unwrap();
        assert!(!gate.is_service_enabled());

        settings
            .update(SettingsUpdate {
                maintenance: Some(false),
                ..SettingsUpdate::default()
            })
            .unwrap();
        assert!(gate.is_service_enabled());
    }
}
