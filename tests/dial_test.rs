mod common;

use std::io::{ErrorKind, Read};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use bsc_line::ebcdic::{ETX, STX};
use bsc_line::{Command, UnitStatus};

use common::*;

/// Dial characters for `number`, `.` separates fields and `E` ends it.
fn dial_digits(number: &str) -> Vec<u8> {
    number
        .bytes()
        .map(|c| match c {
            b'.' => 0xFD,
            b'E' => 0xFC,
            c => 0xF0 | (c - b'0'),
        })
        .collect()
}

fn dial(line: &mut bsc_line::BscLine, number: &str) -> bsc_line::Completion {
    let mut digits = dial_digits(number);
    line.execute(Command::Dial.into(), &mut digits)
}

fn dial_out_line() -> bsc_line::BscLine {
    init_logger();
    open_line(&["dial=out".to_string()])
}

fn leased_statements(lport: u16, rport: u16) -> Vec<String> {
    vec![
        "dial=no".to_string(),
        format!("lport={}", lport),
        "rhost=127.0.0.1".to_string(),
        format!("rport={}", rport),
    ]
}

#[test]
fn test_dial_out() {
    let mut line = dial_out_line();
    let (listener, port) = peer_listener();

    let completion = dial(&mut line, &format!("127.0.0.1.{}E", port));
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(completion.residual, 0);
    assert_eq!(line.query(), "BSC STA=ENA CN=YES, EIB=NO OP=IDLE");
    let mut peer = accept_peer(&listener);

    write(&mut line, &[STX, 0xC1, ETX]);
    assert_eq!(peer_read(&mut peer, 3), vec![STX, 0xC1, ETX]);

    // a second call needs a DISABLE first
    let completion = dial(&mut line, &format!("127.0.0.1.{}E", port));
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x80, 0x05]);

    let completion = control(&mut line, Command::Disable);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert!(line.query().contains("CN=NO"));
    let mut buf = [0; 1];
    assert_eq!(peer.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_dial_refused() {
    let mut line = dial_out_line();
    let port = free_port();

    let completion = dial(&mut line, &format!("127.0.0.1.{}", port));
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x40, 0x00]);
    assert_eq!(line.query(), "BSC STA=DISA CN=NO, EIB=NO OP=IDLE");
}

#[test]
fn test_invalid_dial_data() {
    let mut line = dial_out_line();

    let completion = dial(&mut line, "127.0.0.1");
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x40, 0x00]);

    let completion = dial(&mut line, "127.0.0.256.80");
    assert_eq!(completion.status, check());
    assert!(line.query().contains("CN=NO"));
}

#[test]
fn test_dial_out_line_rejects_enable() {
    let mut line = dial_out_line();
    let completion = control(&mut line, Command::Enable);
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x40, 0x2E]);
}

#[test]
fn test_dial_in_line_rejects_dial() {
    init_logger();
    let mut line = open_line(&["dial=in".to_string(), format!("lport={}", free_port())]);
    let completion = dial(&mut line, "127.0.0.1.80");
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x80, 0x04]);
}

#[test]
fn test_dial_in() {
    init_logger();
    let port = free_port();
    let mut line = open_line(&["dial=in".to_string(), format!("lport={}", port)]);

    let caller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        call_line(port)
    });
    let completion = control(&mut line, Command::Enable);
    assert_eq!(completion.status, UnitStatus::DONE);
    let mut peer = caller.join().unwrap();
    assert!(line.query().contains("STA=ENA CN=YES"));

    peer_write(&mut peer, &[STX, 0xC1, ETX]);
    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(data, vec![STX, 0xC1, ETX]);

    // the line is busy, a second caller is turned away
    let mut second = call_line(port);
    let mut buf = [0; 1];
    assert_eq!(second.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_dial_in_without_enable() {
    init_logger();
    let port = free_port();
    let line = open_line(&["dial=in".to_string(), format!("lport={}", port)]);

    let mut peer = call_line(port);
    let mut buf = [0; 1];
    assert_eq!(peer.read(&mut buf).unwrap(), 0);
    assert!(line.query().contains("CN=NO"));
}

#[test]
fn test_enable_timeout() {
    init_logger();
    let mut line = open_line(&[
        "dial=in".to_string(),
        format!("lport={}", free_port()),
        "eto=200".to_string(),
    ]);
    let completion = control(&mut line, Command::Enable);
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x40, 0x2E]);
}

#[test]
fn test_leased_enable_refused() {
    init_logger();
    let mut line = open_line(&leased_statements(free_port(), free_port()));

    let completion = control(&mut line, Command::Enable);
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x40, 0x21]);
    assert_eq!(line.query(), "BSC STA=DISA CN=NO, EIB=NO OP=IDLE");
}

#[test]
fn test_leased_enable_after_failed_call() {
    init_logger();
    let lport = free_port();
    let rport = free_port();
    let mut line = open_line(&leased_statements(lport, rport));

    let completion = control(&mut line, Command::Enable);
    assert_eq!(completion.status, check());

    // the remote side is up now, but the next ENABLE waits for its call
    let remote = TcpListener::bind(("127.0.0.1", rport)).unwrap();
    remote.set_nonblocking(true).unwrap();
    let caller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        call_line(lport)
    });
    let completion = control(&mut line, Command::Enable);
    assert_eq!(completion.status, UnitStatus::DONE);
    let mut peer = caller.join().unwrap();
    assert_eq!(remote.accept().unwrap_err().kind(), ErrorKind::WouldBlock);

    write(&mut line, &[STX, 0xC1, ETX]);
    assert_eq!(peer_read(&mut peer, 3), vec![STX, 0xC1, ETX]);
}
