//! Line configuration.
//!
//! A [`LineConfig`] is validated once by [`Builder::build()`] and is immutable
//! afterwards. The builder accepts typed settings, or host-style
//! `keyword=value` statements through [`Builder::statement()`]:
//!
//! ```
//! use bsc_line::config::LineConfig;
//! let config = LineConfig::from_statements(&[
//!     "dial=no",
//!     "lport=3088",
//!     "rhost=127.0.0.1",
//!     "rport=3089",
//! ]).unwrap();
//! assert_eq!(config.local_port(), Some(3088));
//! ```

use log::{error, warn};
use snafu::Snafu;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::str::FromStr;

use crate::nom_parser::{parse_millis, parse_port, parse_statement};
use crate::types::{DialMode, Timeout};
use crate::{Error, InvalidConfigSnafu};

pub const DEFAULT_READ_TIMEOUT_MS: i64 = 3000;
pub const DEFAULT_POLL_TIMEOUT_MS: i64 = 3000;

/// One configuration violation.
#[derive(Debug, Snafu, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum ConfigProblem {
    #[snafu(display("Error parsing {}", statement))]
    Syntax { statement: String },
    #[snafu(display("Unrecognized parameter {}", keyword))]
    UnknownKeyword { keyword: String },
    #[snafu(display("Incorrect {} specification {}", keyword, value))]
    InvalidValue { keyword: &'static str, value: String },
    #[snafu(display("Incorrect switched/dial specification {}", value))]
    InvalidDialMode { value: String },
    #[snafu(display("Missing parameter: DIAL={} and {} not specified", dial, keyword))]
    Missing { dial: DialMode, keyword: &'static str },
    #[snafu(display("Conflicting parameter: DIAL={} and {} specified", dial, keyword))]
    Conflict { dial: DialMode, keyword: &'static str },
}

impl FromStr for DialMode {
    type Err = ConfigProblem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        match s.as_str() {
            "yes" | "1" | "inout" => Ok(DialMode::InOut),
            "no" | "0" => Ok(DialMode::No),
            "in" => Ok(DialMode::In),
            "out" => Ok(DialMode::Out),
            _ => InvalidDialModeSnafu { value: s }.fail(),
        }
    }
}

/// Validated, immutable line configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    local_port: Option<u16>,
    local_host: Option<Ipv4Addr>,
    remote_port: Option<u16>,
    remote_host: Option<Ipv4Addr>,
    dial: DialMode,
    read_timeout: Timeout,
    poll_timeout: Timeout,
    enable_timeout: Timeout,
    legacy_sense_id: bool,
}

impl LineConfig {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Build a configuration from `keyword=value` statements.
    /// # Errors
    /// Returns [`Error::InvalidConfig`] with every problem found.
    pub fn from_statements<S: AsRef<str>>(statements: &[S]) -> Result<LineConfig, Error> {
        let mut builder = Builder::default();
        for s in statements {
            builder.statement(s.as_ref());
        }
        builder.build()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Local address to listen on, `None` for any.
    pub fn local_host(&self) -> Option<Ipv4Addr> {
        self.local_host
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_port
    }

    pub fn remote_host(&self) -> Option<Ipv4Addr> {
        self.remote_host
    }

    pub fn dial(&self) -> DialMode {
        self.dial
    }

    pub fn read_timeout(&self) -> Timeout {
        self.read_timeout
    }

    pub fn poll_timeout(&self) -> Timeout {
        self.poll_timeout
    }

    pub fn enable_timeout(&self) -> Timeout {
        self.enable_timeout
    }

    pub fn legacy_sense_id(&self) -> bool {
        self.legacy_sense_id
    }

    /// Address the listening socket binds to, when the line listens.
    pub fn listen_addr(&self) -> Option<SocketAddrV4> {
        let port = self.local_port.filter(|_| self.dial.listens())?;
        Some(SocketAddrV4::new(
            self.local_host.unwrap_or(Ipv4Addr::UNSPECIFIED),
            port,
        ))
    }

    /// Configured peer of a leased line.
    pub fn remote_addr(&self) -> Option<SocketAddrV4> {
        Some(SocketAddrV4::new(self.remote_host?, self.remote_port?))
    }
}

/// Collects settings and problems until [`build()`](Self::build()).
#[derive(Debug, Clone, Default)]
pub struct Builder {
    local_port: Option<u16>,
    local_host: Option<Ipv4Addr>,
    remote_port: Option<u16>,
    remote_host: Option<Ipv4Addr>,
    dial: Option<DialMode>,
    read_timeout: Option<i64>,
    poll_timeout: Option<i64>,
    enable_timeout: Option<i64>,
    legacy_sense_id: bool,
    problems: Vec<ConfigProblem>,
}

impl Builder {
    pub fn local_port(&mut self, port: u16) -> &mut Self {
        self.local_port = Some(port).filter(|p| *p != 0);
        self
    }

    /// `None` listens on any local address.
    pub fn local_host(&mut self, host: Option<Ipv4Addr>) -> &mut Self {
        self.local_host = host;
        self
    }

    pub fn remote_port(&mut self, port: u16) -> &mut Self {
        self.remote_port = Some(port).filter(|p| *p != 0);
        self
    }

    pub fn remote_host(&mut self, host: Option<Ipv4Addr>) -> &mut Self {
        self.remote_host = host;
        self
    }

    pub fn remote(&mut self, addr: SocketAddrV4) -> &mut Self {
        self.remote_host(Some(*addr.ip())).remote_port(addr.port())
    }

    pub fn dial(&mut self, dial: DialMode) -> &mut Self {
        self.dial = Some(dial);
        self
    }

    /// Milliseconds, 0 waits forever and a negative value returns immediately.
    pub fn read_timeout(&mut self, ms: i64) -> &mut Self {
        self.read_timeout = Some(ms);
        self
    }

    pub fn poll_timeout(&mut self, ms: i64) -> &mut Self {
        self.poll_timeout = Some(ms);
        self
    }

    pub fn enable_timeout(&mut self, ms: i64) -> &mut Self {
        self.enable_timeout = Some(ms);
        self
    }

    pub fn legacy_sense_id(&mut self, enabled: bool) -> &mut Self {
        self.legacy_sense_id = enabled;
        self
    }

    /// Apply one `keyword=value` statement. Problems are kept for [`build()`](Self::build()).
    pub fn statement(&mut self, statement: &str) -> &mut Self {
        let parsed = match parse_statement(statement) {
            Some(parsed) => parsed,
            None => {
                return self.problem(ConfigProblem::Syntax {
                    statement: statement.to_string(),
                })
            }
        };
        let value = parsed.value;
        match parsed.keyword.to_ascii_lowercase().as_str() {
            "lport" | "local-port" => match parse_port(value) {
                Some(port) => self.local_port(port),
                None => self.invalid("LPORT", value),
            },
            "lhost" | "local-host" => match resolve_host(value) {
                Some(host) => self.local_host(host),
                None => self.invalid("LHOST", value),
            },
            "rport" | "remote-port" => match parse_port(value) {
                Some(port) => self.remote_port(port),
                None => self.invalid("RPORT", value),
            },
            "rhost" | "remote-host" => match resolve_host(value) {
                Some(host) => self.remote_host(host),
                None => self.invalid("RHOST", value),
            },
            "dial" | "switched" => match value.parse() {
                Ok(dial) => self.dial(dial),
                Err(problem) => self.problem(problem),
            },
            "rto" | "read-timeout" => match parse_millis(value) {
                Some(ms) => self.read_timeout(ms),
                None => self.invalid("RTO", value),
            },
            "pto" | "poll-timeout" => match parse_millis(value) {
                Some(ms) => self.poll_timeout(ms),
                None => self.invalid("PTO", value),
            },
            "eto" | "enable-timeout" => match parse_millis(value) {
                Some(ms) => self.enable_timeout(ms),
                None => self.invalid("ETO", value),
            },
            "legacysenseid" | "legacy-sense-id" => match parse_flag(value) {
                Some(flag) => self.legacy_sense_id(flag),
                None => self.invalid("LEGACYSENSEID", value),
            },
            _ => self.problem(ConfigProblem::UnknownKeyword {
                keyword: parsed.keyword.to_string(),
            }),
        }
    }

    fn invalid(&mut self, keyword: &'static str, value: &str) -> &mut Self {
        self.problem(ConfigProblem::InvalidValue {
            keyword,
            value: value.to_string(),
        })
    }

    fn problem(&mut self, problem: ConfigProblem) -> &mut Self {
        error!("{}", problem);
        self.problems.push(problem);
        self
    }

    fn ignored(&self, keyword: &str, value: &dyn fmt::Display, dial: DialMode) {
        warn!(
            "Parameter {}={} ignored with DIAL={}",
            keyword, value, dial
        );
    }

    /// Validate the settings against the dial mode.
    /// # Errors
    /// Returns [`Error::InvalidConfig`] listing every problem, including the
    /// ones recorded by earlier [`statement()`](Self::statement()) calls.
    pub fn build(&self) -> Result<LineConfig, Error> {
        let mut b = self.clone();
        let dial = b.dial.unwrap_or(DialMode::Out);
        let mut enable_timeout = b.enable_timeout.map_or(Timeout::Infinite, Timeout::from_millis);

        match dial {
            DialMode::No => {
                if b.local_port.is_none() {
                    b.problem(ConfigProblem::Missing {
                        dial,
                        keyword: "LPORT",
                    });
                }
                if b.remote_port.is_none() {
                    b.problem(ConfigProblem::Missing {
                        dial,
                        keyword: "RPORT",
                    });
                }
                if b.remote_host.is_none() {
                    b.problem(ConfigProblem::Missing {
                        dial,
                        keyword: "RHOST",
                    });
                }
                if b.enable_timeout.is_some() {
                    b.problem(ConfigProblem::Conflict {
                        dial,
                        keyword: "ETO",
                    });
                }
                enable_timeout = Timeout::Infinite;
            }
            DialMode::In | DialMode::InOut => {
                if b.local_port.is_none() {
                    b.problem(ConfigProblem::Missing {
                        dial,
                        keyword: "LPORT",
                    });
                }
                if let Some(port) = b.remote_port.take() {
                    b.ignored("RPORT", &port, dial);
                }
                if let Some(host) = b.remote_host.take() {
                    b.ignored("RHOST", &host, dial);
                }
            }
            DialMode::Out => {
                if let Some(port) = b.local_port.take() {
                    b.ignored("LPORT", &port, dial);
                }
                if let Some(host) = b.local_host.take() {
                    b.ignored("LHOST", &host, dial);
                }
                if let Some(port) = b.remote_port.take() {
                    b.ignored("RPORT", &port, dial);
                }
                if let Some(host) = b.remote_host.take() {
                    b.ignored("RHOST", &host, dial);
                }
            }
        }

        if !b.problems.is_empty() {
            error!("Line initialisation failed due to previous errors");
            return InvalidConfigSnafu {
                problems: b.problems,
            }
            .fail();
        }

        Ok(LineConfig {
            local_port: b.local_port,
            local_host: b.local_host,
            remote_port: b.remote_port,
            remote_host: b.remote_host,
            dial,
            read_timeout: Timeout::from_millis(b.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT_MS)),
            poll_timeout: Timeout::from_millis(b.poll_timeout.unwrap_or(DEFAULT_POLL_TIMEOUT_MS)),
            enable_timeout,
            legacy_sense_id: b.legacy_sense_id,
        })
    }
}

/// `*` is "no address", anything else an IPv4 literal or a resolvable name.
fn resolve_host(text: &str) -> Option<Option<Ipv4Addr>> {
    if text == "*" {
        return Some(None);
    }
    if let Ok(addr) = text.parse::<Ipv4Addr>() {
        return Some(Some(addr));
    }
    let addrs = (text, 0).to_socket_addrs().ok()?;
    let found = addrs.into_iter().find_map(|addr| match addr {
        SocketAddr::V4(v4) => Some(*v4.ip()),
        SocketAddr::V6(_) => None,
    });
    found.map(Some)
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "yes" | "1" | "on" | "true" => Some(true),
        "no" | "0" | "off" | "false" => Some(false),
        _ => None,
    }
}
