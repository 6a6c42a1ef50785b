use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::events::BusEvent;

/// Multi-producer, single-consumer FIFO between backends and the dispatcher.
pub(crate) struct EventQueue {
    tx: Sender<BusEvent>,
    rx: Receiver<BusEvent>,
}

/// Producer end handed to backend threads.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Sender<BusEvent>,
}

impl EventSink {
    /// Queues an event; returns false once the queue has been dropped.
    pub fn push(&self, event: BusEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn sink(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    pub fn receiver(&self) -> &Receiver<BusEvent> {
        &self.rx
    }

    pub fn try_pop(&self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<BusEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drops every queued event and returns how many there were.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BusId, NativeHandle};
    use std::thread;

    fn report(handle: u64, byte: u8) -> BusEvent {
        BusEvent::InputReport {
            bus: BusId::PSEUDO,
            handle: NativeHandle(handle),
            report: vec![byte],
        }
    }

    #[test]
    fn preserves_per_producer_order() {
        let queue = EventQueue::new();
        let producers: Vec<_> = (0..3u64)
            .map(|handle| {
                let sink = queue.sink();
                thread::spawn(move || {
                    for byte in 0..50u8 {
                        assert!(sink.push(report(handle, byte)));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut last = [None::<u8>; 3];
        while let Some(event) = queue.try_pop() {
            let BusEvent::InputReport { handle, report, .. } = event else {
                panic!("unexpected event");
            };
            let slot = &mut last[handle.0 as usize];
            assert!(slot.map_or(true, |prev| prev < report[0]));
            *slot = Some(report[0]);
        }
        assert_eq!(last, [Some(49); 3]);
    }

    #[test]
    fn drain_empties_queue() {
        let queue = EventQueue::new();
        let sink = queue.sink();
        sink.push(report(1, 1));
        sink.push(BusEvent::DeviceRemoved {
            bus: BusId::PSEUDO,
            handle: NativeHandle(1),
        });
        assert_eq!(queue.drain(), 2);
        assert!(queue.pop_timeout(Duration::from_millis(1)).is_none());
    }
}
