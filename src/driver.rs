// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Host-facing driver façade.
//!
//! Owns the session engines, routes SCADA writes into the right write queue,
//! and drains the dispatch queue back into the host on its work routine. The
//! host registers a [`ValueSink`] at construction instead of subclassing
//! anything; sessions are owned values on their own threads, reachable only
//! through their handles.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;

use byteorder::{BigEndian, ByteOrder};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::address::{AddressDescriptor, WordLen};
use crate::config::{DriverConfig, DRIVER_VERSION};
use crate::dispatch::{DispatchItem, DispatchQueue};
use crate::error::DriverError;
use crate::registry::Registry;
use crate::session::{Session, SessionContext, WriteItem};
use crate::transform::TransformationKind;
use crate::transport::{S7TcpTransport, Transport};

/// Where drained dispatch items go. The host hands one in at construction.
pub trait ValueSink: Send + Sync {
    fn update(&self, key: &str, data: &[u8]);
}

impl<F> ValueSink for F
where
    F: Fn(&str, &[u8]) + Send + Sync,
{
    fn update(&self, key: &str, data: &[u8]) {
        self(key, data)
    }
}

/// Direction of a configured point, from the host's periphery config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    fn is_polled(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }
}

/// Builds the transport for one PLC. Swappable so tests can hand sessions a
/// scripted implementation.
pub type TransportFactory = dyn Fn(&str, &DriverConfig) -> Box<dyn Transport> + Send + Sync;

struct SessionHandle {
    writer: Sender<WriteItem>,
    join: JoinHandle<()>,
}

pub struct Driver {
    cfg: Arc<DriverConfig>,
    registry: Arc<Registry>,
    dispatch: Arc<DispatchQueue>,
    stop: Arc<AtomicBool>,
    passive: Arc<AtomicBool>,
    /// IPs with a session thread between spawn and exit; sessions remove
    /// themselves on the way out.
    live: Arc<Mutex<HashSet<String>>>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    /// `ip‖raw` → number of host points bound to that PLC variable.
    ref_counts: Mutex<HashMap<String, u32>>,
    sink: Arc<dyn ValueSink>,
    factory: Box<TransportFactory>,
}

impl Driver {
    /// A driver speaking real ISO-on-TCP with the configured TSAP pair.
    pub fn new(cfg: DriverConfig, sink: Arc<dyn ValueSink>) -> Driver {
        Driver::with_transport_factory(
            cfg,
            sink,
            Box::new(|ip: &str, cfg: &DriverConfig| -> Box<dyn Transport> {
                Box::new(S7TcpTransport::new(ip, cfg.local_tsap, cfg.remote_tsap))
            }),
        )
    }

    pub fn with_transport_factory(
        cfg: DriverConfig,
        sink: Arc<dyn ValueSink>,
        factory: Box<TransportFactory>,
    ) -> Driver {
        Driver {
            cfg: Arc::new(cfg),
            registry: Arc::new(Registry::new()),
            dispatch: Arc::new(DispatchQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            passive: Arc::new(AtomicBool::new(false)),
            live: Arc::new(Mutex::new(HashSet::new())),
            sessions: Mutex::new(HashMap::new()),
            ref_counts: Mutex::new(HashMap::new()),
            sink,
            factory,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A host point binds to a periphery address. Picks the transformation,
    /// bumps the per-variable ref count, and subscribes polled directions.
    pub fn configure(
        &self,
        dp_id: u32,
        periph_address: &str,
        direction: Direction,
        host_transformation: Option<TransformationKind>,
    ) -> Result<TransformationKind, DriverError> {
        log::debug!("configure dp {dp_id} at `{periph_address}` ({direction:?})");

        let tokens: Vec<&str> = periph_address.split('$').collect();
        match tokens.as_slice() {
            [_control] => {
                // control DPs carry the host-selected transformation
                host_transformation.ok_or_else(|| {
                    DriverError::UndefinedTransformation(periph_address.to_owned())
                })
            }
            [ip, raw, interval] => {
                if ip.is_empty() {
                    return Err(DriverError::EmptyIp(periph_address.to_owned()));
                }
                let interval: u32 = interval.parse().map_err(|_| {
                    DriverError::BadPollInterval(periph_address.to_owned())
                })?;

                let special = raw.starts_with('_');
                let kind = if special {
                    host_transformation.ok_or_else(|| {
                        DriverError::UndefinedTransformation(periph_address.to_owned())
                    })?
                } else {
                    let descriptor = AddressDescriptor::parse(raw)?;
                    TransformationKind::for_address(&descriptor)
                };

                let key = format!("{ip}{raw}");
                *self.ref_counts.lock().entry(key).or_insert(0) += 1;

                // special keys are produced by the driver itself, never polled
                if direction.is_polled() && !special {
                    self.registry.add(ip, raw, interval)?;
                }
                Ok(kind)
            }
            _ => Err(DriverError::MalformedPeriphAddress(periph_address.to_owned())),
        }
    }

    /// A host point unbinds. The subscription goes away only when the last
    /// point referencing the variable is gone; removing the last variable of
    /// an IP blocks until its session has exited.
    pub fn unconfigure(
        &self,
        dp_id: u32,
        periph_address: &str,
        direction: Direction,
    ) -> Result<(), DriverError> {
        log::debug!("unconfigure dp {dp_id} at `{periph_address}`");

        let tokens: Vec<&str> = periph_address.split('$').collect();
        match tokens.as_slice() {
            [_control] => Ok(()),
            [ip, raw, interval] => {
                let interval: u32 = interval.parse().map_err(|_| {
                    DriverError::BadPollInterval(periph_address.to_owned())
                })?;

                let key = format!("{ip}{raw}");
                let mut counts = self.ref_counts.lock();
                let Some(count) = counts.get_mut(&key) else {
                    log::warn!("tried to unconfigure the untracked address `{periph_address}`");
                    return Err(DriverError::MalformedPeriphAddress(
                        periph_address.to_owned(),
                    ));
                };
                *count -= 1;
                if *count > 0 {
                    log::debug!("`{periph_address}` still referenced {count} time(s)");
                    return Ok(());
                }
                counts.remove(&key);
                drop(counts);

                if direction.is_polled() && !raw.starts_with('_') {
                    self.registry.remove(ip, raw, interval);
                }
                Ok(())
            }
            _ => Err(DriverError::MalformedPeriphAddress(periph_address.to_owned())),
        }
    }

    /// A SCADA-originated write. Control addresses dispatch to their
    /// handlers; PLC addresses are queued on the owning session, buffer
    /// already in wire order courtesy of the transformation layer.
    pub fn write_data(&self, periph_address: &str, data: &[u8]) -> Result<(), DriverError> {
        let tokens: Vec<&str> = periph_address.split('$').collect();
        match tokens.as_slice() {
            [control] => self.handle_control_write(control, data),
            [ip, raw, _interval] => {
                if ip.is_empty() {
                    log::warn!("write to `{periph_address}` has an empty IP");
                    return Err(DriverError::EmptyIp(periph_address.to_owned()));
                }
                let descriptor = AddressDescriptor::parse(raw)?;
                let expected = descriptor.size_bytes();

                let mut buffer = data.to_vec();
                let is_string =
                    descriptor.word_len == WordLen::Byte && descriptor.amount > 1;
                if is_string && buffer.len() < expected {
                    buffer.resize(expected, 0);
                } else if buffer.len() != expected {
                    return Err(DriverError::WriteSizeMismatch {
                        raw: (*raw).to_owned(),
                        expected,
                        got: buffer.len(),
                    });
                }

                let sessions = self.sessions.lock();
                let Some(handle) = sessions.get(*ip) else {
                    log::warn!("no session for {ip}, dropping the write to {raw}");
                    return Err(DriverError::Unroutable {
                        ip: (*ip).to_owned(),
                        raw: (*raw).to_owned(),
                    });
                };
                handle
                    .writer
                    .send(WriteItem {
                        raw: (*raw).to_owned(),
                        data: buffer,
                    })
                    .map_err(|_| DriverError::Unroutable {
                        ip: (*ip).to_owned(),
                        raw: (*raw).to_owned(),
                    })?;
                log::debug!("queued write of {expected} byte(s) to {ip}${raw}");
                Ok(())
            }
            _ => Err(DriverError::MalformedPeriphAddress(periph_address.to_owned())),
        }
    }

    fn handle_control_write(&self, control: &str, data: &[u8]) -> Result<(), DriverError> {
        match control {
            "_DEBUGLVL" => {
                if data.len() < 2 {
                    log::warn!("_DEBUGLVL write of {} byte(s) ignored", data.len());
                    return Ok(());
                }
                let level = BigEndian::read_i16(data);
                let filter = match level {
                    1 => log::LevelFilter::Info,
                    2 => log::LevelFilter::Debug,
                    3 => log::LevelFilter::Trace,
                    _ => {
                        log::info!("_DEBUGLVL {level} out of range, keeping current level");
                        return Ok(());
                    }
                };
                log::set_max_level(filter);
                log::info!("debug level set to {level} ({filter})");
                Ok(())
            }
            other => {
                // unknown controls are harmless, log and carry on
                log::warn!("no handler for control address `{other}`");
                Ok(())
            }
        }
    }

    fn spawn_session(&self, ip: &str) {
        {
            let mut live = self.live.lock();
            if live.contains(ip) {
                return;
            }
            live.insert(ip.to_owned());
        }
        log::info!("starting polling task for {ip}");

        let (writer, reader) = unbounded();
        let transport = (self.factory)(ip, &self.cfg);
        let ctx = SessionContext {
            ip: ip.to_owned(),
            cfg: Arc::clone(&self.cfg),
            registry: Arc::clone(&self.registry),
            dispatch: Arc::clone(&self.dispatch),
            stop: Arc::clone(&self.stop),
            passive: Arc::clone(&self.passive),
            live: Arc::clone(&self.live),
        };
        let session = Session::new(ctx, transport, reader);

        let join = std::thread::Builder::new()
            .name(format!("s7200-poll-{ip}"))
            .spawn(move || session.run())
            .expect("spawning a polling thread");
        self.sessions
            .lock()
            .insert(ip.to_owned(), SessionHandle { writer, join });
    }

    /// Spawns a session per already-registered IP and announces the driver
    /// version, before any device gets a word in.
    pub fn start(&self) {
        self.dispatch.push(DispatchItem::version(DRIVER_VERSION));
        log::info!("driver {} version {DRIVER_VERSION} starting", self.cfg.name);
        for ip in self.registry.ips() {
            self.spawn_session(&ip);
        }
    }

    /// Raises the stop flag and joins every session.
    pub fn stop(&self) {
        log::info!("driver stopping");
        self.stop.store(true, Ordering::SeqCst);
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            drop(handle.writer);
            if let Err(err) = handle.join.join() {
                log::warn!("a polling thread panicked: {err:?}");
            }
        }
    }

    /// The host's polling hook: pick up IPs configured after `start`, reap
    /// finished sessions, and forward everything queued for the host.
    pub fn work_proc(&self) {
        // sessions exit on their own when their IP is unregistered; reap the
        // handles so a re-added IP gets a fresh one
        {
            let mut sessions = self.sessions.lock();
            let finished: Vec<String> = sessions
                .iter()
                .filter(|(_, handle)| handle.join.is_finished())
                .map(|(ip, _)| ip.clone())
                .collect();
            for ip in finished {
                if let Some(handle) = sessions.remove(&ip) {
                    let _ = handle.join.join();
                }
            }
        }

        for ip in self.registry.ips() {
            if !self.live.lock().contains(&ip) {
                log::info!("found the new device {ip} in the registry");
                self.spawn_session(&ip);
            }
        }

        for item in self.dispatch.drain() {
            self.sink.update(&item.key, &item.data);
        }
    }

    /// Gate for redundant host pairs: a passive driver keeps its sessions
    /// connected but stops touching the PLCs.
    pub fn set_passive(&self, passive: bool) {
        self.passive.store(passive, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn ref_count(&self, ip: &str, raw: &str) -> u32 {
        self.ref_counts
            .lock()
            .get(&format!("{ip}{raw}"))
            .copied()
            .unwrap_or(0)
    }
}

/// Installs a process-wide fatal hook at the runtime boundary: a panic gets
/// logged with a captured backtrace, handed to the previous hook, and the
/// process aborts so the host's core-dump machinery still triggers.
pub fn install_fatal_error_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = std::backtrace::Backtrace::force_capture();
            log::error!("driver panicked: {info}\n{backtrace}");
            previous(info);
            std::process::abort();
        }));
    });
}
