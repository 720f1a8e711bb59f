//! Network side of a line.
//!
//! One worker thread per line owns the sockets. It looks at the pending
//! operation set by the command side, performs the socket work and returns
//! the line to IDLE when the operation is done, timed out, halted or the
//! connection failed. The lock on the line state is only released while
//! waiting for readiness.

use crossbeam_channel::Receiver;
use log::{debug, error, info, trace, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use snafu::ResultExt;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LineConfig;
use crate::ebcdic::{ENQ, EOT, SYN};
use crate::state::{Guard, LineState, Pending, Shared, Wakeup};
use crate::types::{DialMode, Timeout};
use crate::{Error, PollSnafu};

pub(crate) const LISTENER: Token = Token(0);
pub(crate) const LINE: Token = Token(1);
pub(crate) const WAKER: Token = Token(2);

/// Delay between attempts to bind a local port that is in use.
const BIND_RETRY: Duration = Duration::from_secs(5);
/// Consecutive interrupted waits before the worker gives up.
const MAX_INTERRUPTED: u32 = 100;
/// Longest poll address, terminating ENQ included.
const POLL_ADDRESS_LEN: usize = 7;
const LISTEN_BACKLOG: i32 = 10;

/// What the worker waits for in one pass of its loop.
#[derive(Debug, Copy, Clone)]
struct Wait {
    timeout: Timeout,
    line: Option<Interest>,
}

impl Wait {
    const IDLE: Wait = Wait {
        timeout: Timeout::Infinite,
        line: None,
    };

    const fn line(timeout: Timeout, interest: Interest) -> Wait {
        Wait {
            timeout,
            line: Some(interest),
        }
    }

    const fn timer(timeout: Timeout) -> Wait {
        Wait {
            timeout,
            line: None,
        }
    }
}

enum Flush {
    Done,
    Blocked,
    Failed,
}

enum PollStep {
    Sent,
    Exhausted,
    Bad,
}

enum PollReply {
    Nothing,
    EndOfTransmission,
    Response,
    Closed,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    poll: Poll,
    events: Events,
    wakeups: Receiver<Wakeup>,
    config: LineConfig,
    listener: Option<TcpListener>,
    line_interest: Option<Interest>,
    poll_active: bool,
    interrupted: u32,
}

impl Worker {
    pub fn new(
        shared: Arc<Shared>,
        poll: Poll,
        wakeups: Receiver<Wakeup>,
        config: LineConfig,
    ) -> Self {
        Worker {
            shared,
            poll,
            events: Events::with_capacity(16),
            wakeups,
            config,
            listener: None,
            line_interest: None,
            poll_active: false,
            interrupted: 0,
        }
    }

    pub fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let state = shared.lock();
        let (mut state, started) = self.start(&shared, state);
        if started {
            loop {
                let wait = match self.plan(&mut state) {
                    Some(wait) => wait,
                    None => break,
                };
                if let Err(e) = self.register(&mut state, wait.line) {
                    warn!("Cannot watch the line socket: {}", e);
                    self.disconnect(&mut state);
                    continue;
                }
                trace!("Waiting {:?} during {}", wait, state.pending);
                drop(state);
                let polled = self.poll.poll(&mut self.events, wait.timeout.as_duration());
                state = shared.lock();

                if let Err(e) = polled {
                    if e.kind() == ErrorKind::Interrupted {
                        self.interrupted += 1;
                        if self.interrupted > MAX_INTERRUPTED {
                            error!("Readiness wait interrupted too many times");
                            break;
                        }
                        continue;
                    }
                    error!("Readiness wait failed: {}", e);
                    break;
                }
                self.interrupted = 0;
                self.handle_events(&mut state, wait.timeout != Timeout::Infinite);
            }
        }
        self.exit(state);
    }

    /// Set up the listening socket, then let the opener proceed.
    fn start<'a>(&mut self, shared: &'a Shared, mut state: Guard<'a>) -> (Guard<'a>, bool) {
        let addr = match self.config.listen_addr() {
            Some(addr) => addr,
            None => {
                self.ready(&mut state);
                return (state, true);
            }
        };
        loop {
            match bind_listener(addr) {
                Ok(mut listener) => {
                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut listener, LISTENER, Interest::READABLE)
                        .context(PollSnafu)
                    {
                        state.startup_error = Some(e);
                        return (state, false);
                    }
                    info!(
                        "Listening on port {} for incoming TCP connections",
                        addr.port()
                    );
                    self.listener = Some(listener);
                    self.ready(&mut state);
                    return (state, true);
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    warn!(
                        "Waiting {} seconds for port {} to become available",
                        BIND_RETRY.as_secs(),
                        addr.port()
                    );
                    self.ready(&mut state);
                    if state.pending == Pending::Shutdown {
                        return (state, false);
                    }
                    drop(state);
                    let polled = self.poll.poll(&mut self.events, Some(BIND_RETRY));
                    state = shared.lock();
                    if let Err(e) = polled {
                        if e.kind() != ErrorKind::Interrupted {
                            error!("Readiness wait failed: {}", e);
                            return (state, false);
                        }
                    }
                    if state.pending == Pending::Shutdown {
                        return (state, false);
                    }
                    // no line yet, whatever was asked for fails
                    let halted = self.drain_wakeups();
                    if halted || state.halt_requested {
                        self.halt(&mut state);
                    } else if state.pending != Pending::Idle {
                        self.complete(&mut state);
                    }
                }
                Err(e) => {
                    error!("Bind failed: {}", e);
                    state.startup_error = Some(Error::Listen {
                        port: addr.port(),
                        source: e,
                    });
                    return (state, false);
                }
            }
        }
    }

    /// Empty the wakeup channel, true if a halt was among the codes.
    fn drain_wakeups(&self) -> bool {
        self.wakeups
            .try_iter()
            .fold(false, |halted, code| halted || code == Wakeup::Halt)
    }

    fn ready(&self, state: &mut LineState) {
        if state.pending == Pending::Initializing {
            state.pending = Pending::Idle;
            self.shared.notify();
        }
    }

    fn exit(&mut self, mut state: Guard<'_>) {
        self.close_line(&mut state);
        self.listener = None;
        state.pending = Pending::Closed;
        state.halt_requested = false;
        self.shared.notify();
        self.shared.halt_ack.notify_all();
        info!("BSC line worker terminated");
    }

    /// Start or continue the pending operation. Returns `None` on shutdown.
    fn plan(&mut self, state: &mut LineState) -> Option<Wait> {
        let wait = match state.pending {
            Pending::Shutdown | Pending::Closed => return None,
            Pending::Initializing | Pending::Idle => Wait::IDLE,
            Pending::Read => {
                if !state.connected || state.inbound.has_data() {
                    self.complete(state);
                    Wait::IDLE
                } else {
                    Wait::line(self.config.read_timeout(), Interest::READABLE)
                }
            }
            Pending::Prepare => {
                if !state.connected || state.inbound.has_data() {
                    self.complete(state);
                    Wait::IDLE
                } else {
                    Wait::line(Timeout::Infinite, Interest::READABLE)
                }
            }
            Pending::Write => match self.flush(state) {
                Flush::Done => {
                    self.complete(state);
                    Wait::IDLE
                }
                Flush::Blocked => Wait::line(Timeout::Infinite, Interest::WRITABLE),
                Flush::Failed => {
                    self.disconnect(state);
                    Wait::IDLE
                }
            },
            Pending::Poll => self.plan_poll(state),
            Pending::Dial => self.plan_dial(state),
            Pending::Enable => self.plan_enable(state),
            Pending::Disable => {
                self.close_line(state);
                self.complete(state);
                Wait::IDLE
            }
        };
        Some(wait)
    }

    fn plan_poll(&mut self, state: &mut LineState) -> Wait {
        if !state.connected {
            self.complete(state);
            return Wait::IDLE;
        }
        if !self.poll_active {
            match next_poll_address(state) {
                PollStep::Sent => self.poll_active = true,
                PollStep::Exhausted => {
                    debug!("Poll list exhausted");
                    self.complete(state);
                    return Wait::IDLE;
                }
                PollStep::Bad => {
                    debug!("Poll command abort, bad poll list");
                    state.poll_progress.bad = true;
                    self.complete(state);
                    return Wait::IDLE;
                }
            }
        }
        let timeout = self.config.poll_timeout();
        match self.flush(state) {
            Flush::Done => Wait::line(timeout, Interest::READABLE),
            Flush::Blocked => Wait::line(timeout, Interest::WRITABLE),
            Flush::Failed => {
                self.disconnect(state);
                Wait::IDLE
            }
        }
    }

    fn plan_dial(&mut self, state: &mut LineState) -> Wait {
        if state.connected {
            self.complete(state);
            return Wait::IDLE;
        }
        if state.conn.is_some() {
            // call in progress
            return Wait::line(Timeout::Infinite, Interest::WRITABLE);
        }
        let calling = match std::mem::take(&mut state.dial_data).destination() {
            Ok(addr) => self.connect(state, addr),
            Err(e) => {
                warn!("Nothing to dial: {}", e);
                false
            }
        };
        if calling {
            Wait::line(Timeout::Infinite, Interest::WRITABLE)
        } else {
            self.complete(state);
            Wait::IDLE
        }
    }

    fn plan_enable(&mut self, state: &mut LineState) -> Wait {
        if state.connected {
            self.complete(state);
            return Wait::IDLE;
        }
        let enable_timeout = self.config.enable_timeout();
        match self.config.dial() {
            DialMode::No => {
                if state.conn.is_some() {
                    Wait::line(Timeout::Infinite, Interest::WRITABLE)
                } else if state.call_issued {
                    // the last call failed, give the peer a chance to call in
                    Wait::timer(enable_timeout)
                } else {
                    let calling = match self.config.remote_addr() {
                        Some(addr) => self.connect(state, addr),
                        None => false,
                    };
                    if calling {
                        Wait::line(Timeout::Infinite, Interest::WRITABLE)
                    } else {
                        // refused before the call got going
                        state.call_issued = true;
                        self.complete(state);
                        Wait::IDLE
                    }
                }
            }
            DialMode::In | DialMode::InOut => Wait::timer(enable_timeout),
            DialMode::Out => {
                self.complete(state);
                Wait::IDLE
            }
        }
    }

    fn handle_events(&mut self, state: &mut LineState, bounded: bool) {
        let mut woken = false;
        let mut readable = false;
        let mut writable = false;
        let mut hung_up = false;
        let mut incoming = false;
        for event in self.events.iter() {
            match event.token() {
                WAKER => woken = true,
                LINE => {
                    readable |= event.is_readable() || event.is_read_closed();
                    writable |= event.is_writable() || event.is_write_closed() || event.is_error();
                    hung_up |= event.is_write_closed() || event.is_error();
                }
                LISTENER => incoming = true,
                _ => (),
            }
        }

        let halted = self.drain_wakeups();
        if halted || state.halt_requested {
            self.halt(state);
            return;
        }
        if woken {
            trace!("Redrive during {}", state.pending);
            return;
        }
        if self.events.is_empty() {
            if bounded {
                self.timeout(state);
            }
            return;
        }

        if readable && state.connected && self.receive(state) {
            return;
        }
        if writable && state.conn.is_some() {
            match state.pending {
                Pending::Dial | Pending::Enable => self.finish_call(state, hung_up),
                // blocked output is retried on the next pass
                _ => (),
            }
            return;
        }
        if incoming {
            self.accept(state);
        }
    }

    fn timeout(&mut self, state: &mut LineState) {
        debug!("Wait timed out during {}", state.pending);
        state.call_issued = false;
        self.complete(state);
    }

    fn halt(&mut self, state: &mut LineState) {
        debug!("Halt during {}", state.pending);
        state.halt_requested = false;
        state.call_issued = false;
        if state.conn.is_some() && !state.connected {
            // abort the outgoing call
            self.close_line(state);
        }
        state.halt_pending = true;
        self.complete(state);
        self.shared.halt_ack.notify_all();
    }

    /// Finish the pending operation and wake the command side.
    fn complete(&mut self, state: &mut LineState) {
        self.poll_active = false;
        if !matches!(state.pending, Pending::Shutdown | Pending::Closed) {
            state.pending = Pending::Idle;
        }
        self.shared.notify();
    }

    fn disconnect(&mut self, state: &mut LineState) {
        self.close_line(state);
        self.complete(state);
    }

    /// Handle inbound data. Returns true when the pending operation ended.
    fn receive(&mut self, state: &mut LineState) -> bool {
        if self.poll_active {
            match read_poll_reply(state) {
                PollReply::Nothing => return false,
                PollReply::EndOfTransmission => {
                    // next address on the next pass
                    self.poll_active = false;
                    return false;
                }
                PollReply::Closed => {
                    self.disconnect(state);
                    return true;
                }
                PollReply::Response => {
                    state.poll_progress.status_modifier = true;
                    read_available(state);
                    self.complete(state);
                    return true;
                }
            }
        }
        let (received, closed) = read_available(state);
        if received == 0 && closed {
            self.disconnect(state);
        } else {
            self.complete(state);
        }
        true
    }

    fn finish_call(&mut self, state: &mut LineState, hung_up: bool) {
        let outcome = match state.conn.as_ref() {
            Some(conn) => call_outcome(conn),
            None => return,
        };
        match outcome {
            Ok(Some(peer)) => {
                info!("Outgoing call to {} connected", peer);
                state.connected = true;
                state.call_issued = false;
                state.reset_receive();
            }
            Ok(None) if !hung_up => return,
            failed => {
                let reason = match failed {
                    Err(e) => e.to_string(),
                    _ => "connection closed".to_string(),
                };
                warn!(
                    "Outgoing call failed during {} command: {}",
                    state.pending, reason
                );
                if state.pending == Pending::Enable {
                    state.call_issued = true;
                }
                self.close_line(state);
            }
        }
        self.complete(state);
    }

    fn accept(&mut self, state: &mut LineState) {
        let mut calls = Vec::new();
        if let Some(listener) = self.listener.as_ref() {
            loop {
                match listener.accept() {
                    Ok(call) => calls.push(call),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        break;
                    }
                }
            }
        }
        let dial = self.config.dial();
        for (stream, peer) in calls {
            info!("Incoming call from {}", peer);
            if state.connected {
                debug!("Line busy, call from {} rejected", peer);
                continue;
            }
            if dial.dial_in() || dial == DialMode::No {
                if state.pending == Pending::Enable {
                    self.install_line(state, stream);
                    self.complete(state);
                    continue;
                }
                if dial == DialMode::No {
                    self.install_line(state, stream);
                    continue;
                }
            }
            debug!("Call from {} rejected", peer);
        }
    }

    fn connect(&mut self, state: &mut LineState, addr: SocketAddrV4) -> bool {
        self.close_line(state);
        match TcpStream::connect(SocketAddr::V4(addr)) {
            Ok(stream) => {
                info!("Calling {}", addr);
                state.conn = Some(stream);
                true
            }
            Err(e) => {
                warn!("Connect out to {} failed during initial status: {}", addr, e);
                false
            }
        }
    }

    /// Make an accepted call the active connection.
    fn install_line(&mut self, state: &mut LineState, stream: TcpStream) {
        self.close_line(state);
        state.conn = Some(stream);
        state.connected = true;
        state.reset_receive();
    }

    fn close_line(&mut self, state: &mut LineState) {
        if let Some(mut conn) = state.conn.take() {
            if self.line_interest.take().is_some() {
                if let Err(e) = self.poll.registry().deregister(&mut conn) {
                    debug!("Deregister failed: {}", e);
                }
            }
            if state.connected {
                info!("Line disconnected");
            }
            // the peer may be gone already
            let _ = conn.shutdown(Shutdown::Both);
        }
        state.connected = false;
    }

    /// Watch the line socket for `interest`. Re-arming every pass makes
    /// readiness that is still present show up again.
    fn register(&mut self, state: &mut LineState, interest: Option<Interest>) -> io::Result<()> {
        if let Some(listener) = self.listener.as_mut() {
            self.poll
                .registry()
                .reregister(listener, LISTENER, Interest::READABLE)?;
        }
        let conn = match state.conn.as_mut() {
            Some(conn) => conn,
            None => {
                self.line_interest = None;
                return Ok(());
            }
        };
        let registry = self.poll.registry();
        match (self.line_interest, interest) {
            (None, Some(interest)) => registry.register(conn, LINE, interest)?,
            (Some(_), Some(interest)) => registry.reregister(conn, LINE, interest)?,
            (Some(_), None) => registry.deregister(conn)?,
            (None, None) => (),
        }
        self.line_interest = interest;
        Ok(())
    }

    fn flush(&mut self, state: &mut LineState) -> Flush {
        let conn = match state.conn.as_mut() {
            Some(conn) => conn,
            None => return Flush::Failed,
        };
        while state.outbound.has_data() {
            let chunk = state.outbound.front();
            match conn.write(chunk) {
                Ok(0) => return Flush::Failed,
                Ok(len) => {
                    trace!("Sent {:02x?}", &chunk[..len]);
                    state.outbound.consume(len);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Flush::Blocked,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Write failed: {}", e);
                    return Flush::Failed;
                }
            }
        }
        Flush::Done
    }
}

fn bind_listener(addr: SocketAddrV4) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// `Some(peer)` once an outgoing call is connected, `None` while in progress.
fn call_outcome(conn: &TcpStream) -> io::Result<Option<SocketAddr>> {
    if let Some(e) = conn.take_error()? {
        return Err(e);
    }
    match conn.peer_addr() {
        Ok(peer) => Ok(Some(peer)),
        Err(e) if e.kind() == ErrorKind::NotConnected => Ok(None),
        Err(e) => Err(e),
    }
}

/// Queue the next poll sequence: SYN SYN and the address. The terminating
/// ENQ is consumed from the list but not sent. The index byte following the
/// ENQ is kept for the response and doesn't count as used.
fn next_poll_address(state: &mut LineState) -> PollStep {
    let progress = &mut state.poll_progress;
    if !state.poll.has_data() {
        return if progress.used > 0 {
            PollStep::Exhausted
        } else {
            PollStep::Bad
        };
    }
    state.outbound.push_slice(&[SYN, SYN]);
    let mut terminated = false;
    for _ in 0..POLL_ADDRESS_LEN {
        let b = match state.poll.pop() {
            Some(b) => b,
            None => break,
        };
        progress.used += 1;
        if b == ENQ {
            terminated = true;
            break;
        }
        state.outbound.push(b);
    }
    if !terminated {
        return PollStep::Bad;
    }
    match state.poll.pop() {
        Some(index) => {
            progress.index = index;
            PollStep::Sent
        }
        None => PollStep::Bad,
    }
}

/// Read the answer to a poll one byte at a time. A station with nothing to
/// send answers EOT. Anything else is stored after the poll index byte.
fn read_poll_reply(state: &mut LineState) -> PollReply {
    let conn = match state.conn.as_mut() {
        Some(conn) => conn,
        None => return PollReply::Closed,
    };
    let mut b = [0u8; 1];
    loop {
        match conn.read(&mut b) {
            Ok(0) => return PollReply::Closed,
            Ok(_) => match b[0] {
                SYN => continue,
                EOT => return PollReply::EndOfTransmission,
                byte => {
                    trace!("Poll response {:02x?}", byte);
                    state.inbound.push(state.poll_progress.index);
                    state.inbound.push(byte);
                    return PollReply::Response;
                }
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => return PollReply::Nothing,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Read failed: {}", e);
                return PollReply::Closed;
            }
        }
    }
}

/// Move everything the socket has into the inbound ring. Returns the byte
/// count and whether the connection is closed.
fn read_available(state: &mut LineState) -> (usize, bool) {
    let conn = match state.conn.as_mut() {
        Some(conn) => conn,
        None => return (0, true),
    };
    let mut buf = [0u8; 256];
    let mut received = 0;
    loop {
        match conn.read(&mut buf) {
            Ok(0) => return (received, true),
            Ok(len) => {
                trace!("Received {:02x?}", &buf[..len]);
                state.inbound.push_slice(&buf[..len]);
                received += len;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return (received, false),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Read failed: {}", e);
                return (received, true);
            }
        }
    }
}
