mod common;

use std::thread;
use std::time::Duration;

use bsc_line::ebcdic::{DLE, ENQ, EOT, ETX, STX, SYN};
use bsc_line::{Command, UnitStatus};

use common::*;

#[test]
fn test_leased_write_read() {
    let (mut line, mut peer) = leased_line(&[]);
    assert_eq!(line.query(), "BSC STA=ENA CN=YES, EIB=NO OP=IDLE");

    let block = [STX, 0xC1, 0xC2, ETX];
    let completion = write(&mut line, &block);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(completion.residual, 0);
    assert_eq!(peer_read(&mut peer, block.len()), block);

    peer_write(&mut peer, &[SYN, SYN, STX, 0xC3, ETX]);
    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(completion.residual, 13);
    assert!(!completion.more);
    assert_eq!(data, vec![STX, 0xC3, ETX]);
}

#[test]
fn test_read_rest_of_frame() {
    let (mut line, mut peer) = leased_line(&[]);
    peer_write(&mut peer, &[SYN, SYN, STX, 0xC1, 0xC2, 0xC3, ETX]);

    let (completion, data) = read(&mut line, 2);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert!(completion.more);
    assert_eq!(data, vec![STX, 0xC1]);

    let (completion, data) = read(&mut line, 16);
    assert!(!completion.more);
    assert_eq!(data, vec![0xC2, 0xC3, ETX]);
}

#[test]
fn test_read_timeout_keeps_connection() {
    let (mut line, _peer) = leased_line(&["rto=200"]);

    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, check());
    assert!(data.is_empty());
    assert_eq!(sense(&mut line), [0x01, 0xE3]);
    assert!(line.query().contains("CN=YES"));
}

#[test]
fn test_end_of_transmission() {
    let (mut line, mut peer) = leased_line(&[]);
    peer_write(&mut peer, &[SYN, SYN, EOT]);

    let (completion, data) = read(&mut line, 8);
    assert_eq!(completion.status, exception());
    assert_eq!(completion.residual, 8);
    assert!(data.is_empty());
}

#[test]
fn test_eib_mode() {
    let (mut line, mut peer) = leased_line(&[]);
    let mut mode = [0x40, 0x00];
    let completion = line.execute(Command::SetMode.into(), &mut mode);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(completion.residual, 1);
    assert!(line.query().contains("EIB=YES"));

    peer_write(&mut peer, &[STX, 0xC1, ETX]);
    let (_, data) = read(&mut line, 16);
    assert_eq!(data, vec![STX, 0xC1, ETX, 0x00]);
}

#[test]
fn test_stray_dle_before_block() {
    let (mut line, mut peer) = leased_line(&[]);
    peer_write(&mut peer, &[DLE, 0xC1, STX, 0xC2, ETX]);

    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(data, vec![STX, 0xC2, ETX]);
}

#[test]
fn test_transparent_write_blocks_reads() {
    let (mut line, mut peer) = leased_line(&[]);

    let completion = write(&mut line, &[DLE, STX, 0x10, 0x41]);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(peer_read(&mut peer, 5), vec![DLE, STX, DLE, DLE, 0x41]);

    // the transparent block isn't finished yet
    let (completion, _) = read(&mut line, 16);
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x80, 0x00]);

    write(&mut line, &[DLE, ETX]);
    assert_eq!(peer_read(&mut peer, 2), vec![DLE, ETX]);
    peer_write(&mut peer, &[DLE, 0x70]);
    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(data, vec![DLE, 0x70]);
}

#[test]
fn test_write_with_pending_input() {
    let (mut line, mut peer) = leased_line(&[]);
    peer_write(&mut peer, &[SYN, SYN, ENQ]);
    thread::sleep(Duration::from_millis(100));

    let completion = write(&mut line, &[STX, 0xC1, ETX]);
    assert_eq!(completion.status, exception());
    assert_eq!(completion.residual, 3);

    // the input that collided with the write is discarded
    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert!(data.is_empty());

    // only the first SYN was taken off the socket, the rest still arrives
    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(data, vec![ENQ]);
}

#[test]
fn test_disable_leased_line() {
    let (mut line, _peer) = leased_line(&[]);

    let completion = control(&mut line, Command::Disable);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(line.query(), "BSC STA=DISA CN=YES, EIB=NO OP=IDLE");

    let mut buf = [0; 4];
    let completion = line.execute(Command::Prepare.into(), &mut buf);
    assert_eq!(completion.status, check());
    assert_eq!(completion.residual, 4);
    assert_eq!(sense(&mut line), [0x40, 0x06]);

    let (completion, _) = read(&mut line, 4);
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x80, 0x06]);

    // the connection is still up, ENABLE needs no new call
    let completion = control(&mut line, Command::Enable);
    assert_eq!(completion.status, UnitStatus::DONE);
}

#[test]
fn test_disable_discards_input() {
    let (mut line, mut peer) = leased_line(&[]);
    peer_write(&mut peer, &[STX, 0xC1, 0xC2, 0xC3, ETX]);
    let (completion, data) = read(&mut line, 2);
    assert!(completion.more);
    assert_eq!(data, vec![STX, 0xC1]);

    assert_eq!(control(&mut line, Command::Disable).status, UnitStatus::DONE);
    assert_eq!(control(&mut line, Command::Enable).status, UnitStatus::DONE);

    // the rest of the old frame is gone
    peer_write(&mut peer, &[STX, 0xD1, ETX]);
    let (completion, data) = read(&mut line, 16);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert!(!completion.more);
    assert_eq!(data, vec![STX, 0xD1, ETX]);
}

#[test]
fn test_prepare() {
    let (mut line, mut peer) = leased_line(&[]);
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        peer_write(&mut peer, &[SYN, SYN, STX, 0xC1, ETX]);
        peer
    });

    let mut buf = [0; 8];
    let completion = line.execute(Command::Prepare.into(), &mut buf);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(completion.residual, 8);
    let _peer = writer.join().unwrap();

    let (_, data) = read(&mut line, 16);
    assert_eq!(data, vec![STX, 0xC1, ETX]);
}

#[test]
fn test_peer_hangup() {
    let (mut line, peer) = leased_line(&[]);
    drop(peer);

    let (completion, _) = read(&mut line, 16);
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x40, 0x00]);
    assert!(line.query().contains("CN=NO"));
}

#[test]
fn test_sense_and_unknown_command() {
    let (mut line, _peer) = leased_line(&["legacysenseid=yes"]);

    let completion = line.execute(0x05, &mut []);
    assert_eq!(completion.status, check());
    assert_eq!(sense(&mut line), [0x80, 0x00]);

    let mut short = [0; 1];
    let completion = line.execute(Command::Sense.into(), &mut short);
    assert!(completion.more);
    assert_eq!(short, [0x80]);

    let mut id = [0; 8];
    let completion = line.execute(Command::SenseId.into(), &mut id);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(completion.residual, 1);
    assert_eq!(&id[..7], &[0xFF, 0x27, 0x03, 0x00, 0x27, 0x03, 0x00]);

    let completion = control(&mut line, Command::NoOp);
    assert_eq!(completion.status, UnitStatus::DONE);
}

#[test]
fn test_sense_id_without_legacy() {
    let (mut line, _peer) = leased_line(&[]);
    let mut id = [0; 8];
    let completion = line.execute(Command::SenseId.into(), &mut id);
    assert_eq!(completion.status, UnitStatus::DONE);
    assert_eq!(completion.residual, 8);
}
