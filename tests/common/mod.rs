#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use bsc_line::{BscLine, Command, Completion, LineConfig, UnitStatus};

pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A local port that nothing listens on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Listening socket standing in for the remote line.
pub fn peer_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

pub fn accept_peer(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().unwrap();
    prepare_peer(&stream);
    stream
}

pub fn call_line(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    prepare_peer(&stream);
    stream
}

fn prepare_peer(stream: &TcpStream) {
    stream.set_read_timeout(Some(PEER_TIMEOUT)).unwrap();
    stream.set_nodelay(true).unwrap();
}

pub fn open_line(statements: &[String]) -> BscLine {
    let config = LineConfig::from_statements(statements).unwrap();
    BscLine::open(config).unwrap()
}

/// An enabled leased line connected to the returned peer socket.
pub fn leased_line(extra: &[&str]) -> (BscLine, TcpStream) {
    init_logger();
    let (listener, port) = peer_listener();
    let mut statements = vec![
        "dial=no".to_string(),
        format!("lport={}", free_port()),
        "rhost=127.0.0.1".to_string(),
        format!("rport={}", port),
    ];
    statements.extend(extra.iter().map(|s| s.to_string()));
    let mut line = open_line(&statements);

    let enable = control(&mut line, Command::Enable);
    assert_eq!(enable.status, UnitStatus::DONE);
    let peer = accept_peer(&listener);
    (line, peer)
}

pub fn control(line: &mut BscLine, command: Command) -> Completion {
    line.execute(command.into(), &mut [])
}

pub fn write(line: &mut BscLine, data: &[u8]) -> Completion {
    let mut buf = data.to_vec();
    line.execute(Command::Write.into(), &mut buf)
}

/// READ into a buffer of `count` bytes, returns the transferred data.
pub fn read(line: &mut BscLine, count: usize) -> (Completion, Vec<u8>) {
    let mut buf = vec![0; count];
    let completion = line.execute(Command::Read.into(), &mut buf);
    buf.truncate(count - completion.residual);
    (completion, buf)
}

pub fn sense(line: &mut BscLine) -> [u8; 2] {
    let mut buf = [0; 2];
    let completion = line.execute(Command::Sense.into(), &mut buf);
    assert_eq!(completion.residual, 0);
    buf
}

pub fn peer_read(peer: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    peer.read_exact(&mut buf).unwrap();
    buf
}

/// Read from the peer socket up to and including `last`.
pub fn peer_read_until(peer: &mut TcpStream, last: u8) -> Vec<u8> {
    let mut data = Vec::new();
    let mut b = [0; 1];
    loop {
        peer.read_exact(&mut b).unwrap();
        data.push(b[0]);
        if b[0] == last {
            return data;
        }
    }
}

pub fn peer_write(peer: &mut TcpStream, data: &[u8]) {
    peer.write_all(data).unwrap();
}

pub fn check() -> UnitStatus {
    UnitStatus::DONE | UnitStatus::UNIT_CHECK
}

pub fn exception() -> UnitStatus {
    UnitStatus::DONE | UnitStatus::UNIT_EXCEPTION
}
