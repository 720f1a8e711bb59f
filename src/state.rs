//! State shared between the command side and the network worker of a line.

use crossbeam_channel::Sender;
use log::{debug, error};
use mio::net::TcpStream;
use mio::Waker;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::buffer::ByteRing;
use crate::codec::Decoder;
use crate::dial::DialData;
use crate::types::Sense;
use crate::Error;

pub(crate) const INBOUND_RING: usize = 4096;
pub(crate) const OUTBOUND_RING: usize = 4096;
pub(crate) const POLL_RING: usize = 4096;
pub(crate) const WORK_RING: usize = 65536;

pub(crate) type Guard<'a> = MutexGuard<'a, LineState>;

/// Network operation requested from the worker.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(crate) enum Pending {
    Initializing,
    Idle,
    Enable,
    Disable,
    Dial,
    Read,
    Write,
    Poll,
    Prepare,
    Shutdown,
    Closed,
}

impl Pending {
    /// The worker is done with the last request.
    pub fn is_settled(self) -> bool {
        matches!(self, Pending::Idle | Pending::Closed)
    }
}

impl fmt::Display for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pending::Initializing => "INIT",
            Pending::Idle => "IDLE",
            Pending::Enable => "ENABLE",
            Pending::Disable => "DISABLE",
            Pending::Dial => "DIAL",
            Pending::Read => "READ",
            Pending::Write => "WRITE",
            Pending::Poll => "POLL",
            Pending::Prepare => "PREPARE",
            Pending::Shutdown => "SHUTDOWN",
            Pending::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Code sent to the worker together with a [`Waker`] wakeup.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub(crate) enum Wakeup {
    /// Look at the pending operation again.
    Redrive,
    /// Abort the operation in progress.
    Halt,
}

#[derive(Debug, Default)]
pub(crate) struct PollProgress {
    /// Bytes of the poll list consumed so far.
    pub used: usize,
    pub bad: bool,
    /// A station answered the poll.
    pub status_modifier: bool,
    pub index: u8,
}

#[derive(Debug)]
pub(crate) struct LineState {
    pub inbound: ByteRing,
    pub outbound: ByteRing,
    pub poll: ByteRing,
    pub work: ByteRing,

    pub conn: Option<TcpStream>,
    pub connected: bool,
    pub enabled: bool,

    pub decoder: Decoder,
    pub read_complete: bool,
    pub transparent_write_wait: bool,
    pub data_lost: bool,
    pub eib: bool,

    pub pending: Pending,
    pub busy: bool,
    pub halt_pending: bool,
    pub halt_requested: bool,
    pub call_issued: bool,
    pub poll_progress: PollProgress,

    pub dial_data: DialData,
    pub sense: Sense,
    pub startup_error: Option<Error>,
}

impl LineState {
    fn new() -> Self {
        LineState {
            inbound: ByteRing::new(INBOUND_RING),
            outbound: ByteRing::new(OUTBOUND_RING),
            poll: ByteRing::new(POLL_RING),
            work: ByteRing::new(WORK_RING),
            conn: None,
            connected: false,
            enabled: false,
            decoder: Decoder::new(),
            read_complete: false,
            transparent_write_wait: false,
            data_lost: false,
            eib: false,
            pending: Pending::Initializing,
            busy: false,
            halt_pending: false,
            halt_requested: false,
            call_issued: false,
            poll_progress: PollProgress::default(),
            dial_data: DialData::default(),
            sense: [0; 2],
            startup_error: None,
        }
    }

    /// Forget any partially received frame.
    pub fn reset_receive(&mut self) {
        self.decoder.reset();
        self.work.flush();
        self.read_complete = false;
    }

    pub fn terminate_rings(&mut self) {
        self.inbound.terminate();
        self.outbound.terminate();
        self.poll.terminate();
        self.work.terminate();
    }
}

pub(crate) struct Shared {
    state: Mutex<LineState>,
    /// Signalled on every return to IDLE or CLOSED.
    pub complete: Condvar,
    /// Signalled when a halt has been processed.
    pub halt_ack: Condvar,
    wakeups: Sender<Wakeup>,
    waker: Waker,
}

impl Shared {
    pub fn new(wakeups: Sender<Wakeup>, waker: Waker) -> Self {
        Shared {
            state: Mutex::new(LineState::new()),
            complete: Condvar::new(),
            halt_ack: Condvar::new(),
            wakeups,
            waker,
        }
    }

    pub fn lock(&self) -> Guard<'_> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interrupt the worker's readiness wait.
    pub fn wakeup(&self, code: Wakeup) {
        if let Err(e) = self.wakeups.try_send(code) {
            // the worker still wakes and sees the flags in the state
            debug!("Wakeup code {:?} dropped: {}", code, e);
        }
        if let Err(e) = self.waker.wake() {
            error!("Cannot wake the line worker: {}", e);
        }
    }

    pub fn wait_while<'a, F>(&self, guard: Guard<'a>, condition: F) -> Guard<'a>
    where
        F: FnMut(&mut LineState) -> bool,
    {
        self.complete
            .wait_while(guard, condition)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the worker to finish the pending operation.
    pub fn wait_settled<'a>(&self, guard: Guard<'a>) -> Guard<'a> {
        self.wait_while(guard, |state| !state.pending.is_settled())
    }

    pub fn wait_halt_ack<'a>(&self, guard: Guard<'a>) -> Guard<'a> {
        self.halt_ack
            .wait_while(guard, |state| state.halt_requested)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        self.complete.notify_all();
    }
}
