use anyhow::{bail, Context, Result};
use std::io::Write;
use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};

use bsc_line::{BscLine, Command, Completion, LineConfig};

fn show(completion: Completion, data: &[u8]) {
    println!(
        "{:?} residual {}{}",
        completion.status,
        completion.residual,
        if completion.more { " (more)" } else { "" }
    );
    if !data.is_empty() {
        println!("{:02x?}", data);
    }
}

/// Commands with output data: read, sense, senseid.
fn cmd_input(args: &mut CmdScanner, line: &mut BscLine, command: Command) -> Result<()> {
    let count = if args.is_empty() {
        256
    } else {
        args.parse_next::<usize>()?
    };
    let mut buf = vec![0; count];
    let completion = line.execute(command.into(), &mut buf);
    let len = count - completion.residual.min(count);
    show(completion, &buf[..len]);
    Ok(())
}

/// Commands with hex input data: write, poll, dial, mode.
fn cmd_output(args: &mut CmdScanner, line: &mut BscLine, command: Command) -> Result<()> {
    let mut data = args.hex_bytes()?;
    let completion = line.execute(command.into(), &mut data);
    show(completion, &[]);
    Ok(())
}

fn cmd_control(line: &mut BscLine, command: Command) -> Result<()> {
    let completion = line.execute(command.into(), &mut []);
    show(completion, &[]);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let statements: Vec<String> = std::env::args().skip(1).collect();
    let config = LineConfig::from_statements(&statements)?;
    let mut line = BscLine::open(config)?;

    let mut stdout = std::io::stdout();
    loop {
        print!(">> ");
        stdout.flush()?;
        let mut cmd = String::new();
        if std::io::stdin().read_line(&mut cmd)? == 0 {
            break;
        }
        let mut scan = CmdScanner::new(&cmd);
        if let Err(err) = match scan.next() {
            Err(_) => continue,
            Ok("enable") => cmd_control(&mut line, Command::Enable),
            Ok("disable") => cmd_control(&mut line, Command::Disable),
            Ok("nop") => cmd_control(&mut line, Command::NoOp),
            Ok("prepare") => cmd_control(&mut line, Command::Prepare),
            Ok("read") | Ok("r") => cmd_input(&mut scan, &mut line, Command::Read),
            Ok("sense") => cmd_input(&mut scan, &mut line, Command::Sense),
            Ok("senseid") => cmd_input(&mut scan, &mut line, Command::SenseId),
            Ok("write") | Ok("w") => cmd_output(&mut scan, &mut line, Command::Write),
            Ok("poll") => cmd_output(&mut scan, &mut line, Command::Poll),
            Ok("dial") => cmd_output(&mut scan, &mut line, Command::Dial),
            Ok("mode") => cmd_output(&mut scan, &mut line, Command::SetMode),
            Ok("query") | Ok("q") => {
                println!("{}", line.query());
                Ok(())
            }
            Ok("quit") => break,
            Ok(cmd) => {
                println!("Unknown command {}", cmd);
                continue;
            }
        } {
            println!("{:?}", err)
        }
    }
    line.close();
    Ok(())
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn new(buf: &'a str) -> Self {
        let splt = buf.split_whitespace().peekable();
        Self { splt }
    }
    fn next(&mut self) -> Result<&str> {
        self.splt.next().context("End of stream")
    }
    fn is_empty(&mut self) -> bool {
        self.splt.peek().is_none()
    }
    fn parse_next<T: FromStr>(&mut self) -> Result<T> {
        self.next()?.parse::<T>().ok().context("Parse error")
    }
    /// The rest of the line as hex, spaces between bytes optional.
    fn hex_bytes(&mut self) -> Result<Vec<u8>> {
        let digits: String = self.splt.by_ref().collect();
        if !digits.is_ascii() || digits.len() % 2 != 0 {
            bail!("Expected pairs of hex digits");
        }
        (0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).context("Invalid hex"))
            .collect()
    }
}
