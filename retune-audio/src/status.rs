//! Status telemetry from the audio thread
//!
//! A bounded SPSC ring carries `StatusReport`s to the control plane. The
//! audio side never blocks: when the ring is full the new report is dropped.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Reports buffered before new ones are dropped
pub const STATUS_CAPACITY: usize = 64;

/// Snapshot of what the corrector is doing
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusReport {
    /// Stabilized input pitch (Hz, 0 = none yet)
    pub detected_pitch: f32,
    /// Pitch being corrected towards (Hz, 0 = none yet)
    pub target_pitch: f32,
    /// Deviation of the input from the scale tone (cents)
    pub correction_cents: f32,
    /// Confidence of the latest raw estimate
    pub confidence: f32,
    /// Applied pitch ratio
    pub ratio: f32,
}

/// Audio-side end of the status channel
pub struct StatusSender {
    producer: HeapProd<StatusReport>,
    dropped: u64,
}

/// Control-side end of the status channel
pub struct StatusReceiver {
    consumer: HeapCons<StatusReport>,
}

/// Create a status channel holding up to `capacity` reports
pub fn status_channel(capacity: usize) -> (StatusSender, StatusReceiver) {
    let (producer, consumer) = HeapRb::<StatusReport>::new(capacity.max(1)).split();
    (
        StatusSender {
            producer,
            dropped: 0,
        },
        StatusReceiver { consumer },
    )
}

impl StatusSender {
    /// Push a report; returns false (and counts the drop) if the ring is full
    #[inline]
    pub fn send(&mut self, report: StatusReport) -> bool {
        if self.producer.try_push(report).is_ok() {
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Reports dropped because the ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl StatusReceiver {
    /// Oldest pending report
    pub fn try_recv(&mut self) -> Option<StatusReport> {
        self.consumer.try_pop()
    }

    /// Drain the ring and return the newest report
    pub fn latest(&mut self) -> Option<StatusReport> {
        let mut latest = None;
        while let Some(report) = self.consumer.try_pop() {
            latest = Some(report);
        }
        latest
    }

    /// Number of reports waiting
    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(ratio: f32) -> StatusReport {
        StatusReport {
            ratio,
            ..StatusReport::default()
        }
    }

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = status_channel(4);
        tx.send(report(1.0));
        tx.send(report(2.0));
        assert_eq!(rx.pending(), 2);
        assert_eq!(rx.try_recv().map(|r| r.ratio), Some(1.0));
        assert_eq!(rx.try_recv().map(|r| r.ratio), Some(2.0));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_full_drops_newest() {
        let (mut tx, mut rx) = status_channel(2);
        assert!(tx.send(report(1.0)));
        assert!(tx.send(report(2.0)));
        assert!(!tx.send(report(3.0)));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.latest().map(|r| r.ratio), Some(2.0));
        assert_eq!(rx.pending(), 0);
    }
}
