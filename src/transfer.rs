//! Bulk transfer workers
//!
//! Every read runs on its own short-lived thread, which holds a reference to
//! the device handle only while it polls and drops it before reporting
//! completion. Writes go through one writer thread per open port, so they
//! reach the device in the order they were submitted. Once the reader has
//! stopped and the writer has been shut down, the connection owns the handle
//! again.
//!
//! A read is a single-shot receive: the worker polls the IN endpoint with a
//! short timeout until the first non-empty packet arrives, an error occurs,
//! or cancellation is requested between two polls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::backend::UsbHandle;
use crate::constants::READ_PACKET_SIZE;
use crate::error::{Result, SerialError};
use crate::structures::Direction;

/// Bytes received beyond what a read asked for, delivered by the next read
pub(crate) type Backlog = Arc<Mutex<VecDeque<u8>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts operations that hold a clone of the device handle
#[derive(Default)]
pub(crate) struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    pub(crate) fn enter(self: &Arc<Self>) -> Ticket {
        *lock(&self.count) += 1;
        Ticket(self.clone())
    }

    /// Block until every ticket has been dropped
    pub(crate) fn wait_idle(&self) {
        let count = lock(&self.count);
        let _count = self
            .idle
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Held by an operation for as long as it may touch the device handle
pub(crate) struct Ticket(Arc<InFlight>);

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut count = lock(&self.0.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Parameters of one bulk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub direction: Direction,
    pub endpoint: u8,
    /// Maximum number of bytes to deliver (IN) or the buffer length (OUT)
    pub length: usize,
    /// Per-attempt timeout for IN polls, whole-transfer timeout for OUT.
    /// Zero means no timeout.
    pub timeout: Duration,
}

/// Lifecycle of a read operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    Idle,
    Polling,
    Completed,
    Cancelled,
    Failed,
}

impl ReadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReadPhase::Completed | ReadPhase::Cancelled | ReadPhase::Failed
        )
    }
}

struct ReadSlot {
    phase: ReadPhase,
    outcome: Option<Result<Vec<u8>>>,
}

struct ReadShared {
    cancel: AtomicBool,
    slot: Mutex<ReadSlot>,
    changed: Condvar,
}

impl ReadShared {
    fn new(phase: ReadPhase, outcome: Option<Result<Vec<u8>>>) -> Arc<Self> {
        Arc::new(Self {
            cancel: AtomicBool::new(false),
            slot: Mutex::new(ReadSlot { phase, outcome }),
            changed: Condvar::new(),
        })
    }

    fn phase(&self) -> ReadPhase {
        lock(&self.slot).phase
    }

    fn finish(&self, phase: ReadPhase, outcome: Result<Vec<u8>>) {
        let mut slot = lock(&self.slot);
        if slot.phase.is_terminal() {
            return;
        }
        slot.phase = phase;
        slot.outcome = Some(outcome);
        drop(slot);
        self.changed.notify_all();
    }
}

/// Marks the read failed if the worker unwinds before reporting
struct Completion(Arc<ReadShared>);

impl Drop for Completion {
    fn drop(&mut self) {
        self.0.finish(ReadPhase::Failed, Err(SerialError::WorkerLost));
    }
}

/// Caller side of an outstanding read
pub struct PendingRead {
    shared: Arc<ReadShared>,
    backlog: Backlog,
}

impl PendingRead {
    /// A read that resolved without polling
    pub(crate) fn ready(data: Vec<u8>, backlog: Backlog) -> Self {
        Self {
            shared: ReadShared::new(ReadPhase::Completed, Some(Ok(data))),
            backlog,
        }
    }

    pub fn phase(&self) -> ReadPhase {
        self.shared.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Ask the worker to stop after its current poll
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
    }

    /// Block until the read resolves
    ///
    /// A cancelled read resolves with no data.
    pub fn wait(self) -> Result<Vec<u8>> {
        let slot = lock(&self.shared.slot);
        let mut slot = self
            .shared
            .changed
            .wait_while(slot, |slot| !slot.phase.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        slot.outcome.take().unwrap_or(Err(SerialError::WorkerLost))
    }

    /// Block until the read resolves and copy the data to `buf[offset..]`
    ///
    /// Data that does not fit is put back in front of the backlog, so the
    /// next read delivers it.
    pub fn wait_into(self, buf: &mut [u8], offset: usize) -> Result<usize> {
        let backlog = self.backlog.clone();
        let data = self.wait()?;
        let end = match offset.checked_add(data.len()) {
            Some(end) if end <= buf.len() => end,
            _ => {
                let mut backlog = lock(&backlog);
                for byte in data.iter().rev() {
                    backlog.push_front(*byte);
                }
                return Err(SerialError::InvalidRange {
                    offset,
                    length: data.len(),
                    buffer_len: buf.len(),
                });
            }
        };
        buf[offset..end].copy_from_slice(&data);
        Ok(data.len())
    }
}

/// Connection side of an outstanding read: the cancel token and the
/// completion signal
#[derive(Clone)]
pub(crate) struct ReadWorker {
    shared: Arc<ReadShared>,
}

impl ReadWorker {
    pub(crate) fn is_finished(&self) -> bool {
        self.shared.phase().is_terminal()
    }

    pub(crate) fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
    }

    /// Wait for the worker to stop, up to `deadline`. Returns whether it did.
    pub(crate) fn wait_stopped(&self, deadline: Duration) -> bool {
        let slot = lock(&self.shared.slot);
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, deadline, |slot| !slot.phase.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        slot.phase.is_terminal()
    }
}

/// Start a read worker
pub(crate) fn spawn_read<H: UsbHandle>(
    handle: Arc<H>,
    backlog: Backlog,
    request: TransferRequest,
) -> Result<(ReadWorker, PendingRead)> {
    let shared = ReadShared::new(ReadPhase::Polling, None);
    let completion = Completion(shared.clone());
    let pending_backlog = backlog.clone();

    thread::Builder::new()
        .name("blp-usb-read".to_string())
        .spawn(move || {
            let completion = completion;
            let handle = handle;
            let (phase, outcome) = poll_read(&*handle, &backlog, &completion.0, &request);
            drop(handle);
            completion.0.finish(phase, outcome);
        })?;

    Ok((
        ReadWorker {
            shared: shared.clone(),
        },
        PendingRead {
            shared,
            backlog: pending_backlog,
        },
    ))
}

fn poll_read<H: UsbHandle>(
    handle: &H,
    backlog: &Backlog,
    shared: &ReadShared,
    request: &TransferRequest,
) -> (ReadPhase, Result<Vec<u8>>) {
    let mut scratch = [0u8; READ_PACKET_SIZE];
    let mut polls: u64 = 0;

    debug!("Read worker started ({} bytes max)", request.length);
    loop {
        if shared.cancel.load(Ordering::Acquire) {
            debug!("Read cancelled after {} polls", polls);
            return (ReadPhase::Cancelled, Ok(Vec::new()));
        }

        polls += 1;
        let received = match handle.read_bulk(request.endpoint, &mut scratch, request.timeout) {
            Ok(0) | Err(rusb::Error::Timeout) => continue,
            Ok(n) => n,
            Err(status) => {
                warn!("Bulk IN failed after {} polls: {}", polls, status);
                return (
                    ReadPhase::Failed,
                    Err(SerialError::Transfer {
                        direction: Direction::In,
                        status,
                    }),
                );
            }
        };

        trace!("Bulk IN returned {} bytes", received);
        let mut backlog = lock(backlog);

        // Data that raced with cancellation is kept for the next read.
        if shared.cancel.load(Ordering::Acquire) {
            backlog.extend(&scratch[..received]);
            debug!("Read cancelled, kept {} late bytes", received);
            return (ReadPhase::Cancelled, Ok(Vec::new()));
        }

        let take = received.min(request.length);
        backlog.extend(&scratch[take..received]);
        return (ReadPhase::Completed, Ok(scratch[..take].to_vec()));
    }
}

/// Caller side of an outstanding write
pub struct PendingWrite {
    rx: mpsc::Receiver<Result<usize>>,
}

impl PendingWrite {
    /// Block until the controller accepts the data or the transfer fails
    pub fn wait(self) -> Result<usize> {
        self.rx.recv().unwrap_or(Err(SerialError::WorkerLost))
    }
}

struct WriteJob {
    data: Vec<u8>,
    request: TransferRequest,
    reply: mpsc::Sender<Result<usize>>,
}

/// Writer thread of an open port
///
/// Jobs are sent to the device one at a time, in the order they were
/// submitted. The thread holds the device handle until `shutdown`, which
/// drains the queue before returning.
pub(crate) struct Writer {
    jobs: mpsc::Sender<WriteJob>,
    thread: thread::JoinHandle<()>,
}

impl Writer {
    pub(crate) fn spawn<H: UsbHandle>(handle: Arc<H>) -> Result<Self> {
        let (jobs, queue) = mpsc::channel::<WriteJob>();

        let thread = thread::Builder::new()
            .name("blp-usb-write".to_string())
            .spawn(move || {
                debug!("Writer started");
                for job in queue {
                    let result = write_one(&*handle, &job);
                    let _ = job.reply.send(result);
                }
                drop(handle);
                debug!("Writer stopped");
            })?;

        Ok(Self { jobs, thread })
    }

    /// Queue a write behind every write submitted before it
    pub(crate) fn submit(&self, data: Vec<u8>, request: TransferRequest) -> Result<PendingWrite> {
        let (reply, rx) = mpsc::channel();
        self.jobs
            .send(WriteJob {
                data,
                request,
                reply,
            })
            .map_err(|_| SerialError::WorkerLost)?;
        Ok(PendingWrite { rx })
    }

    /// Finish the queued writes and wait for the thread to drop its handle
    pub(crate) fn shutdown(self) {
        drop(self.jobs);
        if self.thread.join().is_err() {
            warn!("Writer thread panicked");
        }
    }
}

fn write_one<H: UsbHandle>(handle: &H, job: &WriteJob) -> Result<usize> {
    let result = handle
        .write_bulk(job.request.endpoint, &job.data, job.request.timeout)
        .map_err(|status| SerialError::Transfer {
            direction: Direction::Out,
            status,
        });

    match &result {
        Ok(sent) if *sent < job.data.len() => {
            debug!("Bulk OUT accepted {} of {} bytes", sent, job.data.len())
        }
        Ok(sent) => trace!("Bulk OUT sent {} bytes", sent),
        Err(e) => warn!("{}", e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockDevice, MockHandle, MockSource, Poll};
    use crate::backend::DeviceSource;
    use crate::constants::{BLP_ENDPOINT_IN, BLP_ENDPOINT_OUT, NO_TIMEOUT, READ_POLL_TIMEOUT};

    fn open_mock() -> (MockDevice, Arc<MockHandle>) {
        let dev = MockDevice::new(0x16c0, 0x2aaf);
        let handle = MockSource::default().open(&dev).unwrap();
        (dev, Arc::new(handle))
    }

    fn read_request(length: usize) -> TransferRequest {
        TransferRequest {
            direction: Direction::In,
            endpoint: BLP_ENDPOINT_IN,
            length,
            timeout: READ_POLL_TIMEOUT,
        }
    }

    fn write_request(length: usize) -> TransferRequest {
        TransferRequest {
            direction: Direction::Out,
            endpoint: BLP_ENDPOINT_OUT,
            length,
            timeout: NO_TIMEOUT,
        }
    }

    #[test]
    fn test_read_polls_until_data() {
        let (dev, handle) = open_mock();
        dev.push_poll(Poll::Data(vec![]));
        dev.push_poll(Poll::Fail(rusb::Error::Timeout));
        dev.push_poll(Poll::Data(vec![1, 2, 3]));
        dev.push_poll(Poll::Data(vec![4, 5]));

        let (_worker, pending) = spawn_read(handle, Backlog::default(), read_request(64)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(pending.wait_into(&mut buf, 2).unwrap(), 3);
        assert_eq!(buf, [0, 0, 1, 2, 3, 0, 0, 0]);
        // single shot: the second packet is not consumed
        assert_eq!(dev.polls(), 3);
    }

    #[test]
    fn test_read_error_is_not_retried() {
        let (dev, handle) = open_mock();
        dev.push_poll(Poll::Fail(rusb::Error::NoDevice));
        dev.push_poll(Poll::Data(vec![1]));

        let (worker, pending) = spawn_read(handle, Backlog::default(), read_request(64)).unwrap();
        let err = pending.wait().unwrap_err();
        assert!(matches!(
            err,
            SerialError::Transfer {
                direction: Direction::In,
                status: rusb::Error::NoDevice
            }
        ));
        assert!(worker.is_finished());
        assert_eq!(dev.polls(), 1);
    }

    #[test]
    fn test_cancel_resolves_empty() {
        let (dev, handle) = open_mock();
        let (worker, pending) = spawn_read(handle, Backlog::default(), read_request(64)).unwrap();

        worker.cancel();
        assert!(worker.wait_stopped(READ_POLL_TIMEOUT * 2));
        assert_eq!(pending.phase(), ReadPhase::Cancelled);
        assert_eq!(pending.wait().unwrap(), Vec::<u8>::new());
        assert_eq!(dev.handles(), 0);
    }

    #[test]
    fn test_excess_bytes_go_to_backlog() {
        let (dev, handle) = open_mock();
        dev.push_poll(Poll::Data(vec![1, 2, 3, 4, 5]));
        let backlog = Backlog::default();

        let (_worker, pending) = spawn_read(handle, backlog.clone(), read_request(2)).unwrap();
        assert_eq!(pending.wait().unwrap(), vec![1, 2]);
        assert_eq!(lock(&backlog).iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn test_ready_read_returns_unplaced_bytes() {
        let backlog = Backlog::default();
        lock(&backlog).extend([7]);

        let pending = PendingRead::ready(vec![9, 8], backlog.clone());
        assert!(pending.is_finished());
        let mut buf = [0u8; 2];
        assert!(matches!(
            pending.wait_into(&mut buf, 1),
            Err(SerialError::InvalidRange { .. })
        ));
        assert_eq!(lock(&backlog).iter().copied().collect::<Vec<_>>(), vec![9, 8, 7]);
    }

    #[test]
    fn test_polled_bytes_survive_short_buffer() {
        let (dev, handle) = open_mock();
        dev.push_poll(Poll::Data(vec![1, 2, 3]));
        let backlog = Backlog::default();

        let (_worker, pending) = spawn_read(handle, backlog.clone(), read_request(64)).unwrap();
        let mut buf = [0u8; 2];
        let err = pending.wait_into(&mut buf, 0).unwrap_err();
        assert!(matches!(
            err,
            SerialError::InvalidRange {
                offset: 0,
                length: 3,
                buffer_len: 2
            }
        ));
        assert_eq!(lock(&backlog).iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_worker_releases_handle_before_completion() {
        let (dev, handle) = open_mock();
        dev.push_poll(Poll::Data(vec![7]));

        let (worker, pending) =
            spawn_read(handle.clone(), Backlog::default(), read_request(64)).unwrap();
        pending.wait().unwrap();
        assert!(worker.is_finished());
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_inflight_waits_for_tickets() {
        let inflight = Arc::new(InFlight::default());
        inflight.wait_idle();

        let ticket = inflight.enter();
        let waiter = {
            let inflight = inflight.clone();
            thread::spawn(move || inflight.wait_idle())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        drop(ticket);
        waiter.join().unwrap();
    }

    #[test]
    fn test_write_sends_whole_buffer() {
        let (dev, handle) = open_mock();
        let data: Vec<u8> = (0..200).collect();

        let writer = Writer::spawn(handle.clone()).unwrap();
        let pending = writer
            .submit(data.clone(), write_request(data.len()))
            .unwrap();
        assert_eq!(pending.wait().unwrap(), 200);
        assert_eq!(dev.writes(), vec![data]);

        writer.shutdown();
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_writes_keep_submission_order() {
        let (dev, handle) = open_mock();
        dev.state.lock().unwrap().write_delay = Some(Duration::from_millis(1));
        let writer = Writer::spawn(handle).unwrap();

        let pending: Vec<PendingWrite> = (0..20u8)
            .map(|i| writer.submit(vec![i], write_request(1)).unwrap())
            .collect();
        for write in pending {
            assert_eq!(write.wait().unwrap(), 1);
        }

        let expected: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i]).collect();
        assert_eq!(dev.writes(), expected);
        writer.shutdown();
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let (dev, handle) = open_mock();
        dev.state.lock().unwrap().write_delay = Some(Duration::from_millis(20));
        let writer = Writer::spawn(handle).unwrap();

        let first = writer.submit(vec![1], write_request(1)).unwrap();
        let second = writer.submit(vec![2], write_request(1)).unwrap();
        writer.shutdown();

        assert_eq!(dev.writes(), vec![vec![1], vec![2]]);
        assert_eq!(dev.handles(), 0);
        assert_eq!(first.wait().unwrap(), 1);
        assert_eq!(second.wait().unwrap(), 1);
    }

    #[test]
    fn test_write_reports_partial_and_errors() {
        let (dev, handle) = open_mock();
        dev.state.lock().unwrap().write_limit = Some(4);
        let writer = Writer::spawn(handle).unwrap();

        let pending = writer.submit(vec![0; 10], write_request(10)).unwrap();
        assert_eq!(pending.wait().unwrap(), 4);

        dev.state.lock().unwrap().fail_write = Some(rusb::Error::Pipe);
        let pending = writer.submit(vec![0; 10], write_request(10)).unwrap();
        assert!(matches!(
            pending.wait(),
            Err(SerialError::Transfer {
                direction: Direction::Out,
                status: rusb::Error::Pipe
            })
        ));
        writer.shutdown();
    }
}
