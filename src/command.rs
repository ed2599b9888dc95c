use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::types::{Cost, MAX_COST, RouterIdentity, SimulatedAddr};

/// One line typed at the router terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Attach { remote: RouterIdentity, weight: Cost },
    Connect { remote: RouterIdentity, weight: Cost },
    Start,
    Disconnect { port: u16 },
    Update { remote: RouterIdentity, weight: Cost },
    Neighbors,
    Detect { destination: SimulatedAddr },
    /// Dump the link-state database.
    Lsd,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("invalid command `{0}`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid {what} `{value}`")]
    InvalidArgument { what: &'static str, value: String },
}

const ATTACH_USAGE: &str = "attach <processIP> <processPort> <simulatedIP> <weight>";
const CONNECT_USAGE: &str = "connect <processIP> <processPort> <simulatedIP> <weight>";
const UPDATE_USAGE: &str = "update <processIP> <port> <simulatedIP> <weight>";
const DISCONNECT_USAGE: &str = "disconnect <port>";
const DETECT_USAGE: &str = "detect <destinationIP>";

fn argument<T: FromStr>(what: &'static str, value: &str) -> Result<T, CommandError> {
    value.parse().map_err(|_| CommandError::InvalidArgument {
        what,
        value: value.to_string(),
    })
}

fn weight(value: &str) -> Result<Cost, CommandError> {
    argument::<Cost>("weight", value)
        .ok()
        .filter(|w| *w <= MAX_COST)
        .ok_or_else(|| CommandError::InvalidArgument {
            what: "weight",
            value: value.to_string(),
        })
}

/// `<processIP> <processPort> <simulatedIP> <weight>`
fn neighbor_args(args: &[&str], usage: &'static str) -> Result<(RouterIdentity, Cost), CommandError> {
    let [address, port, simulated, cost] = args else {
        return Err(CommandError::Usage(usage));
    };
    let address: IpAddr = argument("process address", address)?;
    let port: u16 = argument("port", port)?;
    let simulated: SimulatedAddr = argument("simulated address", simulated)?;
    Ok((RouterIdentity::new(address.to_string(), port, simulated), weight(cost)?))
}

fn no_args(args: &[&str], command: Command, usage: &'static str) -> Result<Command, CommandError> {
    if args.is_empty() { Ok(command) } else { Err(CommandError::Usage(usage)) }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;
        let args: Vec<&str> = words.collect();

        match name {
            "attach" => {
                let (remote, weight) = neighbor_args(&args, ATTACH_USAGE)?;
                Ok(Command::Attach { remote, weight })
            }
            "connect" => {
                let (remote, weight) = neighbor_args(&args, CONNECT_USAGE)?;
                Ok(Command::Connect { remote, weight })
            }
            "update" => {
                let (remote, weight) = neighbor_args(&args, UPDATE_USAGE)?;
                Ok(Command::Update { remote, weight })
            }
            "disconnect" => match args.as_slice() {
                [port] => Ok(Command::Disconnect {
                    port: argument("port", port)?,
                }),
                _ => Err(CommandError::Usage(DISCONNECT_USAGE)),
            },
            "detect" => match args.as_slice() {
                [destination] => Ok(Command::Detect {
                    destination: argument("destination", destination)?,
                }),
                _ => Err(CommandError::Usage(DETECT_USAGE)),
            },
            "start" => no_args(&args, Command::Start, "start"),
            "neighbors" => no_args(&args, Command::Neighbors, "neighbors"),
            "lsd" => no_args(&args, Command::Lsd, "lsd"),
            "quit" => no_args(&args, Command::Quit, "quit"),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_neighbor_commands() {
        let expected = RouterIdentity::new("127.0.0.1", 10002, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            "attach 127.0.0.1 10002 10.0.0.2 5".parse(),
            Ok(Command::Attach {
                remote: expected.clone(),
                weight: 5
            })
        );
        assert_eq!(
            "  connect   127.0.0.1 10002 10.0.0.2 7 ".parse(),
            Ok(Command::Connect {
                remote: expected.clone(),
                weight: 7
            })
        );
        assert_eq!(
            "update 127.0.0.1 10002 10.0.0.2 0".parse(),
            Ok(Command::Update {
                remote: expected,
                weight: 0
            })
        );
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!("start".parse(), Ok(Command::Start));
        assert_eq!("neighbors".parse(), Ok(Command::Neighbors));
        assert_eq!("lsd".parse(), Ok(Command::Lsd));
        assert_eq!("quit".parse(), Ok(Command::Quit));
        assert_eq!("disconnect 10002".parse(), Ok(Command::Disconnect { port: 10002 }));
        assert_eq!(
            "detect 10.0.0.3".parse(),
            Ok(Command::Detect {
                destination: Ipv4Addr::new(10, 0, 0, 3)
            })
        );
    }

    #[test]
    fn rejects_unknown_and_empty_input() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("   ".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("route 1".parse::<Command>(), Err(CommandError::Unknown("route".to_string())));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert_eq!("attach 127.0.0.1 10002 10.0.0.2".parse::<Command>(), Err(CommandError::Usage(ATTACH_USAGE)));
        assert_eq!("quit now".parse::<Command>(), Err(CommandError::Usage("quit")));
        assert!(matches!(
            "connect 127.0.0.1 99999 10.0.0.2 1".parse::<Command>(),
            Err(CommandError::InvalidArgument { what: "port", .. })
        ));
        assert!(matches!(
            "connect nowhere 10002 10.0.0.2 1".parse::<Command>(),
            Err(CommandError::InvalidArgument { what: "process address", .. })
        ));
        assert!(matches!(
            "detect 10.0.0".parse::<Command>(),
            Err(CommandError::InvalidArgument { what: "destination", .. })
        ));
    }

    #[test]
    fn rejects_weights_outside_wire_range() {
        assert!(matches!(
            "attach 127.0.0.1 10002 10.0.0.2 40000".parse::<Command>(),
            Err(CommandError::InvalidArgument { what: "weight", .. })
        ));
        assert!(matches!(
            "attach 127.0.0.1 10002 10.0.0.2 -1".parse::<Command>(),
            Err(CommandError::InvalidArgument { what: "weight", .. })
        ));
        assert!("attach 127.0.0.1 10002 10.0.0.2 32767".parse::<Command>().is_ok());
    }
}
