// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Driver configuration, loaded by the host before `start` and threaded
//! through construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Version string announced through the `_VERSION` key at startup.
pub const DRIVER_VERSION: &str = "1.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Manager name used in log output.
    #[serde(default = "default_name")]
    pub name: String,
    /// Client-side TSAP of the ISO-on-TCP connection.
    #[serde(default = "default_local_tsap")]
    pub local_tsap: u16,
    /// PLC-side TSAP.
    #[serde(default = "default_remote_tsap")]
    pub remote_tsap: u16,
    /// Default poll interval in seconds; a per-address interval below this is
    /// raised to it. 0 falls back to 2 s.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u32,
    /// Poll cycle cadence in milliseconds.
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,
    /// Back-off between reconnection attempts, milliseconds.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    /// Grace period after the first connect, giving the host time to register
    /// pending addresses. Milliseconds.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// Sink for operator-access records; consumed by the host-side file
    /// logging, carried here so one struct holds the whole parameter set.
    #[serde(default)]
    pub userfile_path: String,
    #[serde(default)]
    pub measurement_path: String,
    #[serde(default)]
    pub event_path: String,
}

fn default_name() -> String {
    "S7200".to_owned()
}
fn default_local_tsap() -> u16 {
    0x1000
}
fn default_remote_tsap() -> u16 {
    0x1001
}
fn default_polling_interval() -> u32 {
    1
}
fn default_cycle_ms() -> u64 {
    1000
}
fn default_reconnect_backoff_ms() -> u64 {
    5000
}
fn default_startup_grace_ms() -> u64 {
    3000
}

impl Default for DriverConfig {
    fn default() -> DriverConfig {
        DriverConfig {
            name: default_name(),
            local_tsap: default_local_tsap(),
            remote_tsap: default_remote_tsap(),
            polling_interval: default_polling_interval(),
            cycle_ms: default_cycle_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            startup_grace_ms: default_startup_grace_ms(),
            userfile_path: String::new(),
            measurement_path: String::new(),
            event_path: String::new(),
        }
    }
}

impl DriverConfig {
    /// The default poll interval actually applied; an unset (zero) value
    /// polls every 2 s.
    pub fn effective_polling_interval(&self) -> u32 {
        if self.polling_interval > 0 {
            self.polling_interval
        } else {
            2
        }
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_wire_driver() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.cycle(), Duration::from_secs(1));
        assert_eq!(cfg.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.startup_grace(), Duration::from_secs(3));
        assert_eq!(cfg.effective_polling_interval(), 1);
    }

    #[test]
    fn zero_polling_interval_falls_back_to_two_seconds() {
        let cfg = DriverConfig {
            polling_interval: 0,
            ..DriverConfig::default()
        };
        assert_eq!(cfg.effective_polling_interval(), 2);
    }
}
