use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::{Error, Result};

type Reply = Result<Vec<u8>>;

struct PendingRead {
    capacity: usize,
    reply: Sender<Reply>,
}

/// Blocked reads of one device plus the last-report cache.
#[derive(Default)]
pub(crate) struct PendingReads {
    queue: VecDeque<PendingRead>,
    last: Vec<u8>,
    unread: bool,
    deleted: bool,
}

fn fill(capacity: usize, report: &[u8]) -> Reply {
    if report.len() > capacity {
        return Err(hidbus_report::Error::BufferTooSmall {
            required: report.len(),
        }
        .into());
    }
    let mut out = Vec::new();
    out.try_reserve_exact(report.len())
        .map_err(|_| hidbus_report::Error::OutOfMemory)?;
    out.extend_from_slice(report);
    Ok(out)
}

impl PendingReads {
    /// Requests the next report. An unread cached report completes the
    /// ticket immediately, otherwise it waits for the next input event.
    pub fn read(&mut self, capacity: usize) -> ReadTicket {
        let (tx, rx) = bounded(1);
        if self.deleted {
            let _ = tx.send(Err(Error::DeviceDeleted));
        } else if self.queue.is_empty() && self.unread {
            self.unread = false;
            let _ = tx.send(fill(capacity, &self.last));
        } else {
            self.queue.push_back(PendingRead {
                capacity,
                reply: tx,
            });
        }
        ReadTicket { rx }
    }

    /// Stores a new report and completes the oldest live read with it.
    ///
    /// On allocation failure the report is dropped and the cache and queue
    /// stay as they were.
    pub fn push_report(&mut self, report: &[u8]) -> Result<()> {
        if self.deleted {
            return Err(Error::DeviceDeleted);
        }
        if report.len() > self.last.capacity() {
            self.last
                .try_reserve_exact(report.len() - self.last.len())
                .map_err(|_| hidbus_report::Error::OutOfMemory)?;
        }
        self.last.clear();
        self.last.extend_from_slice(report);

        while let Some(read) = self.queue.pop_front() {
            // abandoned tickets are skipped
            if read.reply.send(fill(read.capacity, report)).is_ok() {
                self.unread = false;
                return Ok(());
            }
        }
        self.unread = true;
        Ok(())
    }

    /// Fails every queued read with `DeviceDeleted` and refuses new ones.
    pub fn cancel_all(&mut self) -> usize {
        self.deleted = true;
        self.unread = false;
        let mut count = 0;
        for read in self.queue.drain(..) {
            if read.reply.send(Err(Error::DeviceDeleted)).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Copy of the most recent report, empty before the first one.
    pub fn last_report(&self) -> Result<Vec<u8>> {
        if self.deleted {
            return Err(Error::DeviceDeleted);
        }
        fill(self.last.len(), &self.last)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Completion handle of a read request.
#[derive(Debug)]
pub struct ReadTicket {
    rx: Receiver<Reply>,
}

impl ReadTicket {
    /// Blocks until the read completes.
    pub fn wait(self) -> Result<Vec<u8>> {
        self.rx.recv().unwrap_or(Err(Error::DeviceDeleted))
    }

    /// Waits up to `timeout`; `None` means the read is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Vec<u8>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Error::DeviceDeleted)),
        }
    }

    pub fn try_take(&self) -> Option<Result<Vec<u8>>> {
        match self.rx.try_recv() {
            Ok(reply) => Some(reply),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::DeviceDeleted)),
        }
    }
}
