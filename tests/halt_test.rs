mod common;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bsc_line::ebcdic::{ETX, STX};
use bsc_line::{Command, HaltDevice, HaltHandle, UnitStatus};

use common::*;

/// Halt whatever command runs until `done` is set. Halting an idle line has
/// no effect, so repeating the halt avoids racing the command start.
fn halter(handle: HaltHandle, done: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        while !done.load(SeqCst) {
            thread::sleep(Duration::from_millis(50));
            handle.halt();
        }
    })
}

#[test]
fn test_halt_blocked_read() {
    let (mut line, mut peer) = leased_line(&["rto=0"]);
    let done = Arc::new(AtomicBool::new(false));
    let halt_thread = halter(line.halt_handle(), Arc::clone(&done));

    let (completion, data) = read(&mut line, 16);
    done.store(true, SeqCst);
    halt_thread.join().unwrap();

    assert_eq!(completion.status, exception());
    assert_eq!(completion.residual, 16);
    assert!(data.is_empty());

    // the line is still usable after the halt
    assert!(line.query().contains("CN=YES"));
    peer_write(&mut peer, &[STX, 0xC1, ETX]);
    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(data, vec![STX, 0xC1, ETX]);
}

#[test]
fn test_halt_enable() {
    init_logger();
    let mut line = open_line(&["dial=in".to_string(), format!("lport={}", free_port())]);
    let done = Arc::new(AtomicBool::new(false));
    let halt_thread = halter(line.halt_handle(), Arc::clone(&done));

    let completion = control(&mut line, Command::Enable);
    done.store(true, SeqCst);
    halt_thread.join().unwrap();

    assert_eq!(completion.status, exception());
    assert_eq!(line.query(), "BSC STA=DISA CN=NO, EIB=NO OP=IDLE");
}

#[test]
fn test_halt_idle_line() {
    let (line, _peer) = leased_line(&[]);
    // nothing in progress, returns at once
    HaltDevice::halt(&line);
    line.halt_handle().halt();
    assert_eq!(line.query(), "BSC STA=ENA CN=YES, EIB=NO OP=IDLE");
}

#[test]
fn test_close_line() {
    let (mut line, mut peer) = leased_line(&[]);
    line.close();
    let mut buf = [0; 1];
    assert_eq!(std::io::Read::read(&mut peer, &mut buf).unwrap(), 0);
    assert!(line.query().contains("OP=CLOSED"));

    // commands on a closed line don't block
    let (completion, _) = read(&mut line, 4);
    assert_eq!(completion.status, check());
    line.halt();
}
