// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Per-PLC session engine.
//!
//! One engine runs on its own thread per configured IP. It owns the
//! transport, drains the write queue at the head of every cycle, reads
//! whichever subscribed variables have come due, and feeds results into the
//! dispatch queue. Connection trouble never kills the engine; only `stop` or
//! the removal of the IP from the registry does.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::address::AddressDescriptor;
use crate::config::DriverConfig;
use crate::dispatch::{DispatchItem, DispatchQueue};
use crate::packer::{self, Operation};
use crate::registry::{Registry, SubscribedAddress};
use crate::transport::{PduItem, Transport};

/// Reads failing past this count force a reconnect.
const MAX_READ_FAILURES: u32 = 5;

/// One SCADA-originated write: the raw PLC address plus a buffer already in
/// wire order. Lives from enqueue until transmission or session exit.
#[derive(Debug)]
pub struct WriteItem {
    pub raw: String,
    pub data: Vec<u8>,
}

/// Everything a session shares with the rest of the driver.
pub struct SessionContext {
    pub ip: String,
    pub cfg: Arc<DriverConfig>,
    pub registry: Arc<Registry>,
    pub dispatch: Arc<DispatchQueue>,
    pub stop: Arc<AtomicBool>,
    pub passive: Arc<AtomicBool>,
    pub live: Arc<Mutex<HashSet<String>>>,
}

pub struct Session<T: Transport> {
    ip: String,
    transport: T,
    cfg: Arc<DriverConfig>,
    registry: Arc<Registry>,
    dispatch: Arc<DispatchQueue>,
    writes: Receiver<WriteItem>,
    stop: Arc<AtomicBool>,
    passive: Arc<AtomicBool>,
    live: Arc<Mutex<HashSet<String>>>,
    last_read: HashMap<String, Instant>,
    read_failures: u32,
}

impl<T: Transport> Session<T> {
    pub fn new(ctx: SessionContext, transport: T, writes: Receiver<WriteItem>) -> Session<T> {
        Session {
            ip: ctx.ip,
            transport,
            cfg: ctx.cfg,
            registry: ctx.registry,
            dispatch: ctx.dispatch,
            writes,
            stop: ctx.stop,
            passive: ctx.passive,
            live: ctx.live,
            last_read: HashMap::new(),
            read_failures: 0,
        }
    }

    fn should_run(&self) -> bool {
        !self.stop.load(Ordering::SeqCst) && self.registry.contains(&self.ip)
    }

    fn emit_error(&self, errored: bool) {
        log::info!("{}: reporting device error = {errored}", self.ip);
        self.dispatch.push(DispatchItem::device_error(&self.ip, errored));
    }

    /// Keeps attempting to connect with the configured back-off until it
    /// works or the session has a reason to die.
    fn reconnect_loop(&mut self) {
        while self.should_run() && !self.transport.is_connected() {
            match self.transport.connect() {
                Ok(()) => log::info!("{}: reconnected", self.ip),
                Err(err) => {
                    log::info!(
                        "{}: reconnection failed ({err}), retrying in {:?}",
                        self.ip,
                        self.cfg.reconnect_backoff()
                    );
                    self.transport.disconnect();
                    thread::sleep(self.cfg.reconnect_backoff());
                }
            }
        }
    }

    /// The engine body. Consumes the session; runs until `stop` is raised or
    /// the IP disappears from the registry.
    pub fn run(mut self) {
        log::info!("{}: polling task started", self.ip);
        self.registry.set_running(&self.ip, true);

        if let Err(err) = self.transport.connect() {
            log::info!(
                "{}: unable to connect ({err}), trying again in {:?}",
                self.ip,
                self.cfg.reconnect_backoff()
            );
            thread::sleep(self.cfg.reconnect_backoff());
            self.emit_error(true);
            self.reconnect_loop();
        }

        if self.transport.is_connected() && self.should_run() {
            // give the host time to finish registering pending addresses
            thread::sleep(self.cfg.startup_grace());
            self.emit_error(false);

            while self.should_run() {
                if self.passive.load(Ordering::SeqCst) {
                    // passive half of a redundant pair: stay connected, do
                    // not touch the PLC
                    thread::sleep(self.cfg.cycle());
                    continue;
                }

                let cycle_start = Instant::now();
                self.run_cycle(cycle_start);

                let elapsed = cycle_start.elapsed();
                if elapsed < self.cfg.cycle() {
                    thread::sleep(self.cfg.cycle() - elapsed);
                }

                if self.read_failures > MAX_READ_FAILURES {
                    log::info!(
                        "{}: more than {MAX_READ_FAILURES} read failures, reconnecting",
                        self.ip
                    );
                    self.emit_error(true);
                    self.transport.disconnect();
                    self.reconnect_loop();
                    self.read_failures = 0;
                    if self.transport.is_connected() {
                        self.emit_error(false);
                    }
                }
            }
        }

        if !self.registry.contains(&self.ip) {
            log::info!("{}: leaving the poll loop, IP removed from the registry", self.ip);
        } else if self.stop.load(Ordering::SeqCst) {
            log::info!("{}: leaving the poll loop, driver stopping", self.ip);
        } else {
            log::info!("{}: leaving the poll loop", self.ip);
        }

        self.transport.disconnect();
        self.last_read.clear();
        self.emit_error(false);
        self.live.lock().remove(&self.ip);
        self.registry.set_running(&self.ip, false);
        log::info!("{}: polling task exited", self.ip);
    }

    /// One poll cycle: queued writes go out first, then whatever reads have
    /// come due.
    fn run_cycle(&mut self, cycle_start: Instant) {
        log::debug!("{}: polling", self.ip);
        let pending: Vec<WriteItem> = self.writes.try_iter().collect();
        if !pending.is_empty() {
            self.service_writes(pending, cycle_start);
        }

        let subscriptions = self.registry.addresses(&self.ip);
        let due = self.collect_due(&subscriptions, cycle_start);
        if !due.is_empty() {
            self.perform_reads(&due);
        } else {
            log::debug!("{}: nothing due this cycle", self.ip);
        }
    }

    /// Transmits the queued writes and pins every written address's last-read
    /// stamp to this cycle, so the fresh value is not immediately re-read and
    /// mistaken for its pre-write sample. Addresses never polled yet are left
    /// unpinned and still get their first read this cycle.
    fn service_writes(&mut self, pending: Vec<WriteItem>, cycle_start: Instant) {
        let mut items = Vec::with_capacity(pending.len());
        let mut raws = Vec::with_capacity(pending.len());
        for write in pending {
            match AddressDescriptor::parse(&write.raw) {
                Ok(descriptor) => {
                    let mut item = PduItem::from_descriptor(&descriptor);
                    item.data = write.data;
                    items.push(item);
                    raws.push(write.raw);
                }
                Err(err) => log::warn!("{}: dropping queued write: {err}", self.ip),
            }
        }
        if items.is_empty() {
            return;
        }

        let report = packer::transmit(&mut self.transport, &mut items, Operation::Write);
        if report.failed_jobs > 0 {
            log::info!(
                "{}: {} write job(s) failed, those values are dropped",
                self.ip,
                report.failed_jobs
            );
        } else {
            log::debug!("{}: wrote {} value(s)", self.ip, raws.len());
        }

        for raw in &raws {
            if let Some(stamp) = self.last_read.get_mut(raw) {
                *stamp = cycle_start;
            }
        }
    }

    /// Builds this cycle's read batch. An address never seen before is
    /// stamped with the cycle start and read right away; afterwards it is due
    /// once `max(its interval, the default)` cycles of cycle-start time have
    /// passed. Cycles are pinned at 1 s in production, so intervals read as
    /// seconds.
    fn collect_due(
        &mut self,
        subscriptions: &[SubscribedAddress],
        cycle_start: Instant,
    ) -> Vec<SubscribedAddress> {
        let default_interval = self.cfg.effective_polling_interval();
        let mut due = Vec::new();
        for sub in subscriptions {
            match self.last_read.get_mut(&sub.raw) {
                None => {
                    self.last_read.insert(sub.raw.clone(), cycle_start);
                    due.push(sub.clone());
                }
                Some(last) => {
                    let interval = sub.poll_interval.max(default_interval);
                    if cycle_start.duration_since(*last) >= self.cfg.cycle() * interval {
                        *last = cycle_start;
                        due.push(sub.clone());
                    }
                }
            }
        }
        due
    }

    fn perform_reads(&mut self, due: &[SubscribedAddress]) {
        let mut items: Vec<PduItem> = due
            .iter()
            .map(|sub| PduItem::from_descriptor(&sub.descriptor))
            .collect();

        let report = packer::transmit(&mut self.transport, &mut items, Operation::Read);
        self.read_failures += report.failed_jobs as u32;

        for ((sub, item), ok) in due.iter().zip(items).zip(&report.item_ok) {
            if *ok {
                self.dispatch.push(DispatchItem::polled(
                    &self.ip,
                    &sub.raw,
                    sub.poll_interval,
                    item.data,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Sender};

    use super::*;
    use crate::transport::{TransportError, ITEM_OK};

    #[derive(Default)]
    struct FakeTransport {
        connected: bool,
        fail_reads: bool,
        log: Vec<String>,
    }

    impl Transport for FakeTransport {
        fn connect(&mut self) -> Result<(), TransportError> {
            self.connected = true;
            Ok(())
        }
        fn disconnect(&mut self) {
            self.connected = false;
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn read_multi(&mut self, items: &mut [PduItem]) -> Result<Vec<u8>, TransportError> {
            self.log.push(format!("read x{}", items.len()));
            if self.fail_reads {
                return Err(TransportError::Unspecified);
            }
            for item in items.iter_mut() {
                item.data = vec![0xAB; item.size_bytes()];
            }
            Ok(vec![ITEM_OK; items.len()])
        }
        fn write_multi(&mut self, items: &[PduItem]) -> Result<Vec<u8>, TransportError> {
            self.log.push(format!("write x{}", items.len()));
            Ok(vec![ITEM_OK; items.len()])
        }
        fn read_area(&mut self, _item: &mut PduItem) -> Result<(), TransportError> {
            self.log.push("read_area".into());
            Ok(())
        }
        fn write_area(&mut self, _item: &PduItem) -> Result<(), TransportError> {
            self.log.push("write_area".into());
            Ok(())
        }
    }

    fn test_session(
        ip: &str,
        cfg: DriverConfig,
    ) -> (Session<FakeTransport>, Sender<WriteItem>, Arc<Registry>, Arc<DispatchQueue>) {
        let registry = Arc::new(Registry::new());
        let dispatch = Arc::new(DispatchQueue::new());
        let (tx, rx) = unbounded();
        let ctx = SessionContext {
            ip: ip.to_owned(),
            cfg: Arc::new(cfg),
            registry: Arc::clone(&registry),
            dispatch: Arc::clone(&dispatch),
            stop: Arc::new(AtomicBool::new(false)),
            passive: Arc::new(AtomicBool::new(false)),
            live: Arc::new(Mutex::new(HashSet::new())),
        };
        let mut transport = FakeTransport::default();
        transport.connected = true;
        (Session::new(ctx, transport, rx), tx, registry, dispatch)
    }

    fn tick(base: Instant, n: u32) -> Instant {
        base + Duration::from_secs(u64::from(n))
    }

    #[test]
    fn poll_cadence_reconciles_interval_and_default() {
        // default 2 s, addresses at 2 s and 3 s: ticks 1..=4 read
        // both / none / the 2 s one / the 3 s one
        let cfg = DriverConfig {
            polling_interval: 2,
            ..DriverConfig::default()
        };
        let (mut session, _tx, registry, dispatch) = test_session("192.0.2.10", cfg);
        registry.add("192.0.2.10", "VW100", 2).unwrap();
        registry.add("192.0.2.10", "VD200", 3).unwrap();

        let base = Instant::now();
        let read_keys = |session: &mut Session<FakeTransport>, n: u32| -> Vec<String> {
            session.run_cycle(tick(base, n));
            dispatch.drain().into_iter().map(|i| i.key).collect()
        };

        assert_eq!(
            read_keys(&mut session, 1),
            vec!["192.0.2.10$VW100$2", "192.0.2.10$VD200$3"]
        );
        assert_eq!(read_keys(&mut session, 2), Vec::<String>::new());
        assert_eq!(read_keys(&mut session, 3), vec!["192.0.2.10$VW100$2"]);
        assert_eq!(read_keys(&mut session, 4), vec!["192.0.2.10$VD200$3"]);
    }

    #[test]
    fn interval_below_the_default_is_raised_to_it() {
        let cfg = DriverConfig {
            polling_interval: 3,
            ..DriverConfig::default()
        };
        let (mut session, _tx, registry, dispatch) = test_session("192.0.2.10", cfg);
        registry.add("192.0.2.10", "VW100", 1).unwrap();

        let base = Instant::now();
        session.run_cycle(tick(base, 0));
        assert_eq!(dispatch.drain().len(), 1);
        session.run_cycle(tick(base, 1));
        session.run_cycle(tick(base, 2));
        assert!(dispatch.drain().is_empty());
        session.run_cycle(tick(base, 3));
        assert_eq!(dispatch.drain().len(), 1);
    }

    #[test]
    fn writes_go_out_before_reads_and_defer_the_re_read() {
        let (mut session, tx, registry, dispatch) = test_session(
            "192.0.2.11",
            DriverConfig {
                polling_interval: 2,
                ..DriverConfig::default()
            },
        );
        registry.add("192.0.2.11", "VW50", 1).unwrap();

        let base = Instant::now();
        // first cycle: initial read establishes the stamp
        session.run_cycle(tick(base, 0));
        assert_eq!(dispatch.drain().len(), 1);

        tx.send(WriteItem {
            raw: "VW50".into(),
            data: vec![0x12, 0x34],
        })
        .unwrap();

        // the write goes out first; the stamp moves to this cycle, so the
        // address is not due again before tick 4
        session.run_cycle(tick(base, 2));
        assert_eq!(session.transport.log, vec!["read x1", "write x1"]);
        assert!(dispatch.drain().is_empty());

        session.run_cycle(tick(base, 3));
        assert!(dispatch.drain().is_empty());
        session.run_cycle(tick(base, 4));
        assert_eq!(dispatch.drain().len(), 1);
    }

    #[test]
    fn write_to_a_never_polled_address_still_reads_it_that_cycle() {
        let (mut session, tx, registry, dispatch) =
            test_session("192.0.2.11", DriverConfig::default());
        registry.add("192.0.2.11", "VW50", 1).unwrap();

        tx.send(WriteItem {
            raw: "VW50".into(),
            data: vec![0x12, 0x34],
        })
        .unwrap();

        session.run_cycle(Instant::now());
        // write first, then the first-ever read of the address
        assert_eq!(session.transport.log, vec!["write x1", "read x1"]);
        assert_eq!(dispatch.drain().len(), 1);
    }

    #[test]
    fn failed_read_jobs_accumulate_toward_reconnect() {
        let (mut session, _tx, registry, _dispatch) =
            test_session("192.0.2.12", DriverConfig::default());
        registry.add("192.0.2.12", "VW10", 1).unwrap();
        session.transport.fail_reads = true;

        let base = Instant::now();
        for n in 0..6 {
            session.run_cycle(tick(base, n));
        }
        assert_eq!(session.read_failures, 6);
        assert!(session.read_failures > MAX_READ_FAILURES);
    }

    #[test]
    fn malformed_queued_writes_are_dropped() {
        let (mut session, tx, registry, _dispatch) =
            test_session("192.0.2.13", DriverConfig::default());
        registry.add("192.0.2.13", "VW10", 1).unwrap();

        tx.send(WriteItem {
            raw: "not-an-address".into(),
            data: vec![1],
        })
        .unwrap();
        session.run_cycle(Instant::now());
        // only the read happened
        assert_eq!(session.transport.log, vec!["read x1"]);
    }
}
