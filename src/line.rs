//! Command side of a line.

use log::{debug, error, info, trace, warn};
use mio::{Poll, Waker};
use snafu::ResultExt;
use std::convert::TryFrom;
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::codec::{self, Boundary};
use crate::config::LineConfig;
use crate::dial::DialData;
use crate::state::{Guard, LineState, Pending, Shared, Wakeup};
use crate::types::{residual, Command, Completion, DialMode, UnitStatus, SENSE_CR, SENSE_IR};
use crate::worker::{Worker, WAKER};
use crate::{ChannelDevice, Error, HaltDevice, PollSnafu, SpawnSnafu};

/// Sense-id block of a 2703 transmission control unit.
const DEVICE_ID: [u8; 7] = [0xFF, 0x27, 0x03, 0x00, 0x27, 0x03, 0x00];
const WAKEUP_QUEUE: usize = 8;

/// Sense byte 1 details.
const CALL_IN_FAILED: u8 = 0x2E;
const LINE_NOT_READY: u8 = 0x21;
const NOT_DIAL_OUT: u8 = 0x04;
const ALREADY_ENABLED: u8 = 0x05;
const NOT_ENABLED: u8 = 0x06;
const READ_TIMEOUT: [u8; 2] = [0x01, 0xE3];
const BAD_POLL: [u8; 2] = [0x08, 0x84];

/// An emulated BSC line adapter.
///
/// Commands are executed synchronously with [`execute()`](Self::execute()),
/// which blocks until the network side is done with them. A command in
/// progress can be halted from another thread through a [`HaltHandle`].
///
/// ## Example
/// ```no_run
/// use bsc_line::{BscLine, Command, LineConfig};
///
/// let config = LineConfig::from_statements(&["dial=no", "lport=3088",
///     "rhost=127.0.0.1", "rport=3089"]).unwrap();
/// let mut line = BscLine::open(config).unwrap();
/// let status = line.execute(Command::Enable.into(), &mut []).status;
/// assert!(!status.is_unit_check());
/// ```
pub struct BscLine {
    shared: Arc<Shared>,
    config: LineConfig,
    worker: Option<JoinHandle<()>>,
}

impl BscLine {
    /// Start the network worker of a new line.
    /// # Errors
    /// Fails when the readiness poller or the worker thread can't be created,
    /// or when the local port can't be bound.
    pub fn open(config: LineConfig) -> Result<BscLine, Error> {
        let poll = Poll::new().context(PollSnafu)?;
        let waker = Waker::new(poll.registry(), WAKER).context(PollSnafu)?;
        let (sender, receiver) = crossbeam_channel::bounded(WAKEUP_QUEUE);
        let shared = Arc::new(Shared::new(sender, waker));

        let worker = Worker::new(Arc::clone(&shared), poll, receiver, config.clone());
        let handle = thread::Builder::new()
            .name("bsc-line".into())
            .spawn(move || worker.run())
            .context(SpawnSnafu)?;

        let mut state = shared.lock();
        state = shared.wait_while(state, |s| s.pending == Pending::Initializing);
        if state.pending == Pending::Closed {
            let err = state.startup_error.take().unwrap_or(Error::WorkerInit);
            drop(state);
            if handle.join().is_err() {
                error!("BSC line worker panicked");
            }
            return Err(err);
        }
        drop(state);
        info!("BSC line started, DIAL={}", config.dial());
        Ok(BscLine {
            shared,
            config,
            worker: Some(handle),
        })
    }

    pub fn config(&self) -> &LineConfig {
        &self.config
    }

    /// A handle for halting commands from another thread.
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle(Arc::clone(&self.shared))
    }

    /// Halt the command in progress, if any.
    pub fn halt(&self) {
        halt(&self.shared)
    }

    /// One-line status summary.
    pub fn query(&self) -> String {
        let state = self.shared.lock();
        format!(
            "BSC STA={} CN={}, EIB={} OP={}",
            if state.enabled { "ENA" } else { "DISA" },
            yes_no(state.connected),
            yes_no(state.eib),
            state.pending
        )
    }

    /// Execute one channel command on `buffer`. The command count is the
    /// length of the buffer. Unknown codes are rejected with unit check.
    pub fn execute(&mut self, code: u8, buffer: &mut [u8]) -> Completion {
        let mut state = self.shared.lock();
        state.busy = true;
        state.halt_pending = false;
        trace!("Execute {:#04x}, count {}", code, buffer.len());

        let (mut state, completion) = match Command::try_from(code) {
            Ok(Command::NoOp) => (state, Completion::done(0)),
            Ok(Command::Sense) => {
                let sense = state.sense;
                (state, transfer(&sense, buffer))
            }
            Ok(Command::SenseId) => {
                let len = if self.config.legacy_sense_id() {
                    DEVICE_ID.len()
                } else {
                    0
                };
                (state, transfer(&DEVICE_ID[..len], buffer))
            }
            Ok(Command::Enable) => self.enable(state),
            Ok(Command::Disable) => self.disable(state),
            Ok(Command::SetMode) => set_mode(state, buffer),
            Ok(Command::Poll) => self.poll(state, buffer),
            Ok(Command::Dial) => self.dial(state, buffer),
            Ok(Command::Read) => self.read(state, buffer),
            Ok(Command::Write) => self.write(state, buffer),
            Ok(Command::Prepare) => self.prepare(state, buffer.len()),
            Err(e) => {
                debug!("{}", e);
                reject(state, [SENSE_CR, 0])
            }
        };

        state.busy = false;
        debug!("Command {:#04x} ended with {:?}", code, completion);
        completion
    }

    /// Stop the worker and release the line's buffers. Called on drop.
    pub fn close(&mut self) {
        let handle = match self.worker.take() {
            Some(handle) => handle,
            None => return,
        };
        let mut state = self.shared.lock();
        if state.pending != Pending::Closed {
            state.pending = Pending::Shutdown;
            self.shared.wakeup(Wakeup::Redrive);
            state = self
                .shared
                .wait_while(state, |s| s.pending != Pending::Closed);
        }
        drop(state);
        if handle.join().is_err() {
            error!("BSC line worker panicked");
        }
        self.shared.lock().terminate_rings();
        info!("BSC line closed");
    }

    /// Hand `op` to the worker and wait until it is done.
    fn dispatch<'a>(&'a self, mut state: Guard<'a>, op: Pending) -> Guard<'a> {
        if state.halt_pending || state.pending == Pending::Closed {
            return state;
        }
        state.pending = op;
        self.shared.wakeup(Wakeup::Redrive);
        self.shared.wait_settled(state)
    }

    fn enable<'a>(&'a self, mut state: Guard<'a>) -> (Guard<'a>, Completion) {
        let dial = self.config.dial();
        if dial == DialMode::Out {
            // only a DIAL can enable a dial-out line
            return reject(state, [SENSE_IR, CALL_IN_FAILED]);
        }
        if !state.connected {
            state = self.dispatch(state, Pending::Enable);
        }
        if state.connected {
            state.enabled = true;
            state.inbound.flush();
            return (state, Completion::done(0));
        }
        if take_halt(&mut state) {
            return (state, Completion::exception(0));
        }
        let detail = if dial.dial_in() {
            CALL_IN_FAILED
        } else {
            LINE_NOT_READY
        };
        reject(state, [SENSE_IR, detail])
    }

    fn disable<'a>(&'a self, mut state: Guard<'a>) -> (Guard<'a>, Completion) {
        state.transparent_write_wait = false;
        state.inbound.flush();
        state.outbound.flush();
        state.reset_receive();
        if self.config.dial() != DialMode::No && state.connected {
            state = self.dispatch(state, Pending::Disable);
        }
        state.enabled = false;
        (state, Completion::done(0))
    }

    fn poll<'a>(&'a self, mut state: Guard<'a>, buffer: &[u8]) -> (Guard<'a>, Completion) {
        if state.transparent_write_wait {
            return reject(state, [SENSE_CR, 0]);
        }
        state.poll.flush();
        state.poll.push_slice(buffer);
        state.poll_progress = Default::default();

        state = self.dispatch(state, Pending::Poll);
        state.outbound.flush();
        state.poll.flush();

        if take_halt(&mut state) {
            return (state, Completion::exception(0));
        }
        if state.poll_progress.bad {
            return reject(state, BAD_POLL);
        }
        if !state.connected {
            return reject(state, [SENSE_IR, 0]);
        }
        let mut completion = Completion::done(residual(buffer.len(), state.poll_progress.used));
        if state.poll_progress.status_modifier {
            // a station answered, its index byte and data wait for READ
            completion.status = completion.status | UnitStatus::STATUS_MODIFIER;
        }
        (state, completion)
    }

    fn dial<'a>(&'a self, mut state: Guard<'a>, buffer: &[u8]) -> (Guard<'a>, Completion) {
        if !self.config.dial().dial_out() {
            return reject(state, [SENSE_CR, NOT_DIAL_OUT]);
        }
        if state.enabled {
            return reject(state, [SENSE_CR, ALREADY_ENABLED]);
        }
        let data = DialData::from_slice(buffer);
        let count = residual(buffer.len(), data.len());
        match data.destination() {
            Ok(addr) => {
                debug!("Dialing {}", addr);
            }
            Err(e) => {
                warn!("Invalid dial data {:02x?}: {}", data.as_bytes(), e);
                let (state, mut completion) = reject(state, [SENSE_IR, 0]);
                completion.residual = count;
                return (state, completion);
            }
        }
        state.dial_data = data;

        state = self.dispatch(state, Pending::Dial);
        state.dial_data = DialData::default();
        if take_halt(&mut state) {
            return (state, Completion::exception(count));
        }
        if !state.connected {
            state.enabled = false;
            let (state, mut completion) = reject(state, [SENSE_IR, 0]);
            completion.residual = count;
            return (state, completion);
        }
        state.enabled = true;
        (state, Completion::done(count))
    }

    fn read<'a>(&'a self, mut state: Guard<'a>, buffer: &mut [u8]) -> (Guard<'a>, Completion) {
        if !state.enabled {
            return reject(state, [SENSE_CR, NOT_ENABLED]);
        }
        if state.transparent_write_wait {
            return reject(state, [SENSE_CR, 0]);
        }
        // rest of a frame that didn't fit the last READ
        if state.read_complete && state.work.has_data() {
            let completion = deliver(&mut state, buffer, UnitStatus::DONE);
            return (state, completion);
        }
        if state.data_lost {
            state.data_lost = false;
            state.inbound.flush();
            return (state, Completion::done(buffer.len()));
        }
        state.read_complete = false;

        loop {
            state = self.dispatch(state, Pending::Read);
            if !state.connected {
                return reject(state, [SENSE_IR, 0]);
            }
            if take_halt(&mut state) {
                return (state, Completion::exception(buffer.len()));
            }
            if !state.inbound.has_data() {
                return reject(state, READ_TIMEOUT);
            }

            let s = &mut *state;
            match s.decoder.decode(&mut s.inbound, &mut s.work, s.eib) {
                Some(Boundary::EndOfTransmission) => {
                    s.read_complete = true;
                    let status = UnitStatus::DONE | UnitStatus::UNIT_EXCEPTION;
                    let completion = deliver(s, buffer, status);
                    return (state, completion);
                }
                Some(Boundary::Frame) => {
                    s.read_complete = true;
                    if s.work.has_data() {
                        let completion = deliver(s, buffer, UnitStatus::DONE);
                        return (state, completion);
                    }
                }
                None => (),
            }
        }
    }

    fn write<'a>(&'a self, mut state: Guard<'a>, buffer: &[u8]) -> (Guard<'a>, Completion) {
        trace!("Write {:02x?}", buffer);
        let count = buffer.len();
        if !state.connected {
            return reject_residual(state, [SENSE_IR, 0], count);
        }
        if !state.enabled {
            return reject_residual(state, [SENSE_CR, 0], count);
        }

        // the worker is waiting with the line unwatched. A pending byte moves
        // to the inbound ring, the next READ discards it as lost data.
        let s = &mut *state;
        if let Some(conn) = s.conn.as_mut() {
            let mut b = [0u8; 1];
            if let Ok(1) = conn.read(&mut b) {
                s.inbound.push(b[0]);
            }
        }
        if state.inbound.has_data() {
            debug!("Inbound data pending, write refused");
            state.data_lost = true;
            return (state, Completion::exception(count));
        }

        let s = &mut *state;
        s.transparent_write_wait = codec::encode(buffer, &mut s.outbound);

        state = self.dispatch(state, Pending::Write);
        if !state.connected {
            return reject(state, [SENSE_IR, 0]);
        }
        if take_halt(&mut state) {
            return (state, Completion::exception(0));
        }
        (state, Completion::done(0))
    }

    /// Wait for inbound data without transferring any. The residual is
    /// always the full count.
    fn prepare<'a>(&'a self, mut state: Guard<'a>, count: usize) -> (Guard<'a>, Completion) {
        if !state.enabled {
            return reject_residual(state, [SENSE_IR, NOT_ENABLED], count);
        }
        if state.transparent_write_wait {
            return reject_residual(state, [SENSE_CR, 0], count);
        }
        if state.inbound.has_data() {
            return (state, Completion::done(count));
        }

        state = self.dispatch(state, Pending::Prepare);
        if take_halt(&mut state) {
            return (state, Completion::exception(count));
        }
        if !state.connected {
            return reject_residual(state, [SENSE_IR, 0], count);
        }
        (state, Completion::done(count))
    }
}

impl Drop for BscLine {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChannelDevice for BscLine {
    fn execute(&mut self, code: u8, buffer: &mut [u8]) -> Completion {
        BscLine::execute(self, code, buffer)
    }
}

impl HaltDevice for BscLine {
    fn halt(&self) {
        BscLine::halt(self)
    }
}

/// Halts commands of a [`BscLine`] from another thread.
#[derive(Clone)]
pub struct HaltHandle(Arc<Shared>);

impl HaltHandle {
    pub fn halt(&self) {
        halt(&self.0)
    }
}

impl HaltDevice for HaltHandle {
    fn halt(&self) {
        HaltHandle::halt(self)
    }
}

/// Returns once the worker has acknowledged the halt.
fn halt(shared: &Shared) {
    let mut state = shared.lock();
    if !state.busy || state.pending == Pending::Closed {
        return;
    }
    debug!("Halting {}", state.pending);
    state.halt_requested = true;
    shared.wakeup(Wakeup::Halt);
    drop(shared.wait_halt_ack(state));
}

fn take_halt(state: &mut Guard<'_>) -> bool {
    std::mem::take(&mut state.halt_pending)
}

fn set_mode<'a>(mut state: Guard<'a>, buffer: &[u8]) -> (Guard<'a>, Completion) {
    if state.transparent_write_wait {
        return reject(state, [SENSE_CR, 0]);
    }
    let mode = buffer.first().copied().unwrap_or(0);
    state.eib = mode & 0x40 != 0;
    debug!("Set mode: {}", if state.eib { "EIB" } else { "no EIB" });
    (state, Completion::done(residual(buffer.len(), 1)))
}

fn reject(state: Guard<'_>, sense: [u8; 2]) -> (Guard<'_>, Completion) {
    reject_residual(state, sense, 0)
}

fn reject_residual(mut state: Guard<'_>, sense: [u8; 2], count: usize) -> (Guard<'_>, Completion) {
    state.sense = sense;
    (state, Completion::check(count))
}

/// Copy `data` to the command buffer.
fn transfer(data: &[u8], buffer: &mut [u8]) -> Completion {
    let num = data.len().min(buffer.len());
    buffer[..num].copy_from_slice(&data[..num]);
    Completion {
        status: UnitStatus::DONE,
        residual: residual(buffer.len(), num),
        more: buffer.len() < data.len(),
    }
}

/// Move decoded data to the command buffer.
fn deliver(state: &mut LineState, buffer: &mut [u8], status: UnitStatus) -> Completion {
    let num = state.work.pop_into(buffer);
    trace!("Read {:02x?}", &buffer[..num]);
    Completion {
        status,
        residual: residual(buffer.len(), num),
        more: state.work.has_data(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}
