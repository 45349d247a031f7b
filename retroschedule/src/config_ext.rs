//! Broadcast settings read from retroconfig

use std::time::Duration;

use anyhow::Result;
use retroconfig::Config;

use crate::state::ManualPolicy;

pub trait BroadcastConfigExt {
    /// `broadcast.manual_idle_timeout_secs`, 0 meaning sticky manual mode
    fn get_manual_policy(&self) -> Result<ManualPolicy>;

    fn set_manual_policy(&self, policy: ManualPolicy) -> Result<()>;

    /// Minimum interval between two persisted writes of the same key
    fn get_persist_interval(&self) -> Result<Duration>;
}

impl BroadcastConfigExt for Config {
    fn get_manual_policy(&self) -> Result<ManualPolicy> {
        Ok(ManualPolicy::from_secs(self.get_manual_idle_timeout_secs()?))
    }

    fn set_manual_policy(&self, policy: ManualPolicy) -> Result<()> {
        let secs = match policy {
            ManualPolicy::Sticky => 0,
            ManualPolicy::IdleTimeout(d) => d.as_secs().max(1),
        };
        self.set_manual_idle_timeout_secs(secs)
    }

    fn get_persist_interval(&self) -> Result<Duration> {
        Ok(Duration::from_millis(self.get_persist_debounce_ms()?))
    }
}
