// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! The queue of values travelling from the poll tasks back to the host.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Key of the driver-version announcement.
pub const VERSION_KEY: &str = "_VERSION";
/// Per-device connectivity flag, keyed `<ip>$_Error`.
pub const ERROR_VAR: &str = "_Error";

/// One value update for the host: a fully-qualified key plus the owned
/// payload buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchItem {
    pub key: String,
    pub data: Vec<u8>,
}

impl DispatchItem {
    pub fn version(version: &str) -> DispatchItem {
        DispatchItem {
            key: VERSION_KEY.to_owned(),
            data: version.as_bytes().to_vec(),
        }
    }

    pub fn device_error(ip: &str, errored: bool) -> DispatchItem {
        DispatchItem {
            key: format!("{ip}${ERROR_VAR}"),
            data: vec![u8::from(errored)],
        }
    }

    pub fn polled(ip: &str, raw: &str, poll_interval: u32, data: Vec<u8>) -> DispatchItem {
        DispatchItem {
            key: format!("{ip}${raw}${poll_interval}"),
            data,
        }
    }
}

/// Mutex-guarded FIFO between the session engines and the host work routine.
/// Producers push owned buffers; the consumer takes everything in one drain.
/// FIFO order holds per producer; nothing is promised across producers.
#[derive(Default)]
pub struct DispatchQueue {
    inner: Mutex<VecDeque<DispatchItem>>,
}

impl DispatchQueue {
    pub fn new() -> DispatchQueue {
        DispatchQueue::default()
    }

    pub fn push(&self, item: DispatchItem) {
        self.inner.lock().push_back(item);
    }

    /// Takes the whole queue. The lock is held only for the swap; the caller
    /// forwards to the host outside it.
    pub fn drain(&self) -> Vec<DispatchItem> {
        let mut queue = self.inner.lock();
        queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_per_producer() {
        let queue = DispatchQueue::new();
        queue.push(DispatchItem::polled("192.0.2.1", "VW100", 2, vec![0, 1]));
        queue.push(DispatchItem::polled("192.0.2.1", "VD200", 3, vec![2; 4]));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].key, "192.0.2.1$VW100$2");
        assert_eq!(drained[1].key, "192.0.2.1$VD200$3");
        assert!(queue.is_empty());
    }

    #[test]
    fn key_shapes() {
        assert_eq!(DispatchItem::version("1.1").key, "_VERSION");
        assert_eq!(DispatchItem::version("1.1").data, b"1.1");

        let err = DispatchItem::device_error("192.0.2.7", true);
        assert_eq!(err.key, "192.0.2.7$_Error");
        assert_eq!(err.data, vec![1]);
        assert_eq!(DispatchItem::device_error("192.0.2.7", false).data, vec![0]);
    }
}
