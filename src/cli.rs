use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

use crate::relay::DEFAULT_RELAY_PORT;

/// In-memory multi-room chat relay
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(short, long, default_value_t = DEFAULT_RELAY_PORT)]
    pub port: u16,

    /// Address to bind to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,
}

impl Cli {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_localhost() {
        let cli = Cli::parse_from(["roomrelay"]);
        assert_eq!(cli.listen_addr(), "127.0.0.1:8061".parse().unwrap());
    }

    #[test]
    fn short_port_flag() {
        let cli = Cli::parse_from(["roomrelay", "-p", "9000", "--host", "0.0.0.0"]);
        assert_eq!(cli.listen_addr(), "0.0.0.0:9000".parse().unwrap());
    }
}
