// S7200Drv - SCADA driver core for Siemens S7-200 PLCs over S7 (ISO-on-TCP).

//! Packing of heterogeneous variable batches into PDU-bounded multi-var jobs.
//!
//! Items are taken greedily in input order while the projected telegram stays
//! inside the PDU and the per-job item cap. An item too large to fit a
//! multi-var job at all is sent alone through the chunked single-area calls,
//! which stream the payload outside the multi-var framing.

use std::ops::Range;

use crate::address::WordLen;
use crate::transform::word_to_host;
use crate::transport::{PduItem, Transport, ITEM_OK};

/// Packing bound. The S7-200 grants 240-byte PDUs.
pub const PDU_SIZE: usize = 240;

const OVERHEAD_READ_VARIABLE: usize = 5;
const OVERHEAD_READ_MESSAGE: usize = 13;
const OVERHEAD_WRITE_VARIABLE: usize = 16;
const OVERHEAD_WRITE_MESSAGE: usize = 12;
const MAX_READ_ITEMS: usize = 19;
const MAX_WRITE_ITEMS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl Operation {
    fn var_overhead(self) -> usize {
        match self {
            Operation::Read => OVERHEAD_READ_VARIABLE,
            Operation::Write => OVERHEAD_WRITE_VARIABLE,
        }
    }

    fn msg_overhead(self) -> usize {
        match self {
            Operation::Read => OVERHEAD_READ_MESSAGE,
            Operation::Write => OVERHEAD_WRITE_MESSAGE,
        }
    }

    fn max_items(self) -> usize {
        match self {
            Operation::Read => MAX_READ_ITEMS,
            Operation::Write => MAX_WRITE_ITEMS,
        }
    }
}

/// One planned submission: a slice of the input batch, either as a multi-var
/// job or as a single-area fallback call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub range: Range<usize>,
    pub single_area: bool,
}

/// Greedy packing plan over the item payload sizes, in input order.
///
/// Every multi-var job satisfies `Σ(size + V) + M ≤ PDU_SIZE` and
/// `count ≤ N`; an item that cannot satisfy the bound alone becomes a
/// one-item `single_area` job.
pub fn plan(sizes: &[usize], op: Operation) -> Vec<PlannedJob> {
    let var_oh = op.var_overhead();
    let msg_oh = op.msg_overhead();
    let cap = op.max_items();

    let mut jobs = Vec::new();
    let mut next = 0;
    while next < sizes.len() {
        let mut count = 0;
        let mut sum = 0;
        while next + count < sizes.len() && count < cap {
            let weighted = sizes[next + count] + var_oh;
            if sum + weighted + msg_oh > PDU_SIZE {
                break;
            }
            sum += weighted;
            count += 1;
        }

        if count == 0 {
            // the head item alone blows the PDU: stream it area-wise
            jobs.push(PlannedJob {
                range: next..next + 1,
                single_area: true,
            });
            next += 1;
        } else {
            jobs.push(PlannedJob {
                range: next..next + count,
                single_area: false,
            });
            next += count;
        }
    }
    jobs
}

/// Outcome of transmitting one batch.
pub struct TransmitReport {
    /// Per input item: did the item make it (job succeeded and its return
    /// code was good)?
    pub item_ok: Vec<bool>,
    /// Whole jobs that failed at the transport level.
    pub failed_jobs: usize,
}

/// Plans and submits `items` in order. Read payloads of Word-sized items are
/// swapped into host order afterwards; write buffers pass through untouched
/// (the transformation layer already produced wire order).
pub fn transmit(
    transport: &mut dyn Transport,
    items: &mut [PduItem],
    op: Operation,
) -> TransmitReport {
    let sizes: Vec<usize> = items.iter().map(PduItem::size_bytes).collect();
    let mut item_ok = vec![false; items.len()];
    let mut failed_jobs = 0;

    for job in plan(&sizes, op) {
        let range = job.range.clone();
        let result = if job.single_area {
            let item = &mut items[range.start];
            match op {
                Operation::Read => transport.read_area(item).map(|()| vec![ITEM_OK]),
                Operation::Write => transport.write_area(item).map(|()| vec![ITEM_OK]),
            }
        } else {
            match op {
                Operation::Read => transport.read_multi(&mut items[range.clone()]),
                Operation::Write => transport.write_multi(&items[range.clone()]),
            }
        };

        match result {
            Ok(codes) => {
                for (offset, code) in codes.iter().enumerate() {
                    if *code == ITEM_OK {
                        item_ok[range.start + offset] = true;
                    } else {
                        log::warn!(
                            "item {} of {:?} job returned S7 code {code:#04x}, dropping it",
                            range.start + offset,
                            op
                        );
                    }
                }
            }
            Err(err) => {
                failed_jobs += 1;
                log::info!("{:?} job of {} items failed: {err}", op, range.len());
            }
        }
    }

    if op == Operation::Read {
        for (item, ok) in items.iter_mut().zip(&item_ok) {
            if *ok && matches!(item.word_len, WordLen::Word | WordLen::Counter | WordLen::Timer)
            {
                for pair in item.data.chunks_exact_mut(2) {
                    word_to_host(pair);
                }
            }
        }
    }

    TransmitReport {
        item_ok,
        failed_jobs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddressDescriptor, Area};
    use crate::transport::TransportError;

    #[test]
    fn jobs_respect_pdu_and_item_caps() {
        let sizes: Vec<usize> = (0..40).map(|i| 1 + i % 8).collect();
        for op in [Operation::Read, Operation::Write] {
            for job in plan(&sizes, op) {
                if job.single_area {
                    continue;
                }
                let total: usize = sizes[job.range.clone()]
                    .iter()
                    .map(|s| s + op.var_overhead())
                    .sum();
                assert!(total + op.msg_overhead() <= PDU_SIZE);
                assert!(job.range.len() <= op.max_items());
            }
        }
    }

    #[test]
    fn twenty_word_reads_need_two_jobs() {
        let sizes = vec![2usize; 20];
        let jobs = plan(&sizes, Operation::Read);
        assert_eq!(
            jobs,
            vec![
                PlannedJob { range: 0..19, single_area: false },
                PlannedJob { range: 19..20, single_area: false },
            ]
        );
    }

    #[test]
    fn oversized_head_item_goes_area_wise() {
        // a 250-byte string cannot fit any multi-var job
        let jobs = plan(&[250, 2, 2], Operation::Read);
        assert_eq!(jobs[0], PlannedJob { range: 0..1, single_area: true });
        assert_eq!(jobs[1], PlannedJob { range: 1..3, single_area: false });
    }

    #[test]
    fn write_cap_is_twelve() {
        let sizes = vec![2usize; 20];
        let jobs = plan(&sizes, Operation::Write);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].range, 0..12);
        assert_eq!(jobs[1].range, 12..20);
    }

    #[test]
    fn empty_batch_plans_nothing() {
        assert!(plan(&[], Operation::Read).is_empty());
    }

    /// Scripted transport: answers multi-var jobs with canned codes and
    /// records how it was driven.
    struct ScriptedTransport {
        codes: Vec<u8>,
        fail_jobs: bool,
        multi_calls: usize,
        area_calls: usize,
    }

    impl Transport for ScriptedTransport {
        fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn disconnect(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn read_multi(&mut self, items: &mut [PduItem]) -> Result<Vec<u8>, TransportError> {
            self.multi_calls += 1;
            if self.fail_jobs {
                return Err(TransportError::Unspecified);
            }
            for item in items.iter_mut() {
                item.data = vec![0x12, 0x34];
            }
            Ok(items.iter().map(|_| self.codes.remove(0)).collect())
        }
        fn write_multi(&mut self, items: &[PduItem]) -> Result<Vec<u8>, TransportError> {
            self.multi_calls += 1;
            if self.fail_jobs {
                return Err(TransportError::Unspecified);
            }
            Ok(items.iter().map(|_| self.codes.remove(0)).collect())
        }
        fn read_area(&mut self, _item: &mut PduItem) -> Result<(), TransportError> {
            self.area_calls += 1;
            Ok(())
        }
        fn write_area(&mut self, _item: &PduItem) -> Result<(), TransportError> {
            self.area_calls += 1;
            Ok(())
        }
    }

    fn word_items(n: usize) -> Vec<PduItem> {
        let d = AddressDescriptor::parse("VW100").unwrap();
        (0..n).map(|_| PduItem::from_descriptor(&d)).collect()
    }

    #[test]
    fn per_item_failures_are_suppressed_not_fatal() {
        let mut transport = ScriptedTransport {
            codes: vec![ITEM_OK, 0x0A, ITEM_OK],
            fail_jobs: false,
            multi_calls: 0,
            area_calls: 0,
        };
        let mut items = word_items(3);
        let report = transmit(&mut transport, &mut items, Operation::Read);
        assert_eq!(report.item_ok, vec![true, false, true]);
        assert_eq!(report.failed_jobs, 0);
    }

    #[test]
    fn job_failure_counts_once() {
        let mut transport = ScriptedTransport {
            codes: Vec::new(),
            fail_jobs: true,
            multi_calls: 0,
            area_calls: 0,
        };
        let mut items = word_items(3);
        let report = transmit(&mut transport, &mut items, Operation::Read);
        assert_eq!(report.item_ok, vec![false, false, false]);
        assert_eq!(report.failed_jobs, 1);
        assert_eq!(transport.multi_calls, 1);
    }

    #[test]
    fn successful_word_reads_come_back_in_host_order() {
        let mut transport = ScriptedTransport {
            codes: vec![ITEM_OK],
            fail_jobs: false,
            multi_calls: 0,
            area_calls: 0,
        };
        let mut items = word_items(1);
        transmit(&mut transport, &mut items, Operation::Read);
        assert_eq!(
            u16::from_ne_bytes([items[0].data[0], items[0].data[1]]),
            0x1234
        );
        assert_eq!(items[0].area, Area::DataBlock);
    }

    #[test]
    fn oversized_item_uses_the_area_path() {
        let d = AddressDescriptor::parse("VB0.250").unwrap();
        let mut items = vec![PduItem::from_descriptor(&d)];
        let mut transport = ScriptedTransport {
            codes: Vec::new(),
            fail_jobs: false,
            multi_calls: 0,
            area_calls: 0,
        };
        let report = transmit(&mut transport, &mut items, Operation::Read);
        assert_eq!(transport.area_calls, 1);
        assert_eq!(transport.multi_calls, 0);
        assert_eq!(report.item_ok, vec![true]);
    }
}
