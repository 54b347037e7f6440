// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Process-wide registry of PLCs and the variables polled on each.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

use crate::address::{AddressDescriptor, AddressError};

/// One polled variable: the raw address text, its poll cadence and the
/// descriptor parsed once at registration.
#[derive(Debug, Clone)]
pub struct SubscribedAddress {
    pub raw: String,
    pub poll_interval: u32,
    pub descriptor: AddressDescriptor,
}

/// Live PLCs and their subscription lists, plus the per-IP `running` flags
/// that gate teardown. `remove` blocks until the session task for an emptied
/// IP has wound down, so a subsequent `add` for the same IP can safely spawn
/// a fresh one.
#[derive(Default)]
pub struct Registry {
    addresses: Mutex<HashMap<String, Vec<SubscribedAddress>>>,
    running: Mutex<HashMap<String, bool>>,
    stopped: Condvar,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers `raw` for polling on `ip`. First sight of an IP marks it
    /// live and running; exact `(raw, interval)` duplicates collapse into the
    /// existing subscription.
    pub fn add(&self, ip: &str, raw: &str, poll_interval: u32) -> Result<(), AddressError> {
        let descriptor = AddressDescriptor::parse(raw)?;

        let mut addresses = self.addresses.lock();
        let entry = addresses.entry(ip.to_owned()).or_insert_with(|| {
            log::info!("first address for {ip}, marking the device live");
            self.running.lock().insert(ip.to_owned(), true);
            Vec::new()
        });
        if !entry
            .iter()
            .any(|a| a.raw == raw && a.poll_interval == poll_interval)
        {
            entry.push(SubscribedAddress {
                raw: raw.to_owned(),
                poll_interval,
                descriptor,
            });
            log::debug!("added {raw} every {poll_interval}s on {ip}");
        }
        Ok(())
    }

    /// Drops the `(raw, interval)` subscription. Removing the last one takes
    /// the IP out of the live set and parks the caller until the session
    /// task has observed the removal and cleared its running flag.
    pub fn remove(&self, ip: &str, raw: &str, poll_interval: u32) {
        let emptied = {
            let mut addresses = self.addresses.lock();
            let Some(entry) = addresses.get_mut(ip) else {
                return;
            };
            entry.retain(|a| !(a.raw == raw && a.poll_interval == poll_interval));
            if entry.is_empty() {
                addresses.remove(ip);
                true
            } else {
                false
            }
        };

        if emptied {
            log::info!("all addresses removed from {ip}, waiting for its session to exit");
            let mut running = self.running.lock();
            while running.get(ip).copied() == Some(true) {
                self.stopped.wait(&mut running);
            }
            running.remove(ip);
            log::info!("session for {ip} is down, removal complete");
        }
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.addresses.lock().contains_key(ip)
    }

    pub fn ips(&self) -> Vec<String> {
        self.addresses.lock().keys().cloned().collect()
    }

    /// Snapshot of the subscription list, in insertion order.
    pub fn addresses(&self, ip: &str) -> Vec<SubscribedAddress> {
        self.addresses.lock().get(ip).cloned().unwrap_or_default()
    }

    pub fn is_running(&self, ip: &str) -> bool {
        self.running.lock().get(ip).copied().unwrap_or(false)
    }

    /// Flipped by the session engine; clearing wakes any blocked `remove`.
    pub fn set_running(&self, ip: &str, value: bool) {
        let mut running = self.running.lock();
        if let Some(flag) = running.get_mut(ip) {
            *flag = value;
        } else if value {
            running.insert(ip.to_owned(), true);
        }
        if !value {
            self.stopped.notify_all();
        }
    }
}
