//! Answer every block received on a line by sending it back.
//!
//! Arguments are line statements, e.g. `bsc_echo dial=in lport=3089`.

use std::error::Error;
use std::thread;
use std::time::Duration;

use bsc_line::ebcdic::{EOT, SYN};
use bsc_line::{BscLine, Command, DialMode, LineConfig};

const BLOCK_SIZE: usize = 4096;
/// Pause before trying another ENABLE after a failed one.
const ENABLE_RETRY: Duration = Duration::from_secs(1);

fn echo_main_loop(line: &mut BscLine) -> Result<(), Box<dyn Error>> {
    let mut buf = vec![0; BLOCK_SIZE];
    loop {
        let enable = line.execute(Command::Enable.into(), &mut []);
        if enable.status.is_unit_check() {
            println!("Enable failed: {}", line.query());
            thread::sleep(ENABLE_RETRY);
            continue;
        }

        loop {
            let read = line.execute(Command::Read.into(), &mut buf);
            if read.status.is_unit_check() {
                if line.query().contains("CN=NO") {
                    break;
                }
                // read timeout, keep waiting
                continue;
            }
            let len = BLOCK_SIZE - read.residual;
            if read.status.is_unit_exception() {
                println!("Received EOT");
                let mut eot = [SYN, SYN, EOT];
                line.execute(Command::Write.into(), &mut eot);
                continue;
            }
            println!("Received {:02x?}", &buf[..len]);
            let write = line.execute(Command::Write.into(), &mut buf[..len]);
            if write.status.is_unit_check() {
                break;
            }
        }
        line.execute(Command::Disable.into(), &mut []);
    }
}

/// The echo loop waits for calls with ENABLE, which a dial-out line refuses.
fn check_dial(config: &LineConfig) -> Result<(), Box<dyn Error>> {
    if config.dial() == DialMode::Out {
        return Err("a DIAL=OUT line never answers ENABLE, use DIAL=IN or DIAL=INOUT".into());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let statements: Vec<String> = std::env::args().skip(1).collect();
    let config = LineConfig::from_statements(&statements)?;
    check_dial(&config)?;
    let mut line = BscLine::open(config)?;
    echo_main_loop(&mut line)
}
