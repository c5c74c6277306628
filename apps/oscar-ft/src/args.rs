use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file (JSON); missing fields use defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Rendezvous cookie shared with the peer, as 16 hex digits.
    /// A random one is generated and printed when omitted.
    #[arg(long, global = true)]
    pub cookie: Option<String>,

    /// Our screen name, sent to the proxy relay
    #[arg(long, global = true, default_value = "oscar-ft")]
    pub screen_name: String,

    /// Peer's screen name, for logging
    #[arg(long, global = true, default_value = "buddy")]
    pub buddy: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Offer files to the peer
    Send {
        /// Files to send, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        strategy: Strategy,
    },

    /// Accept files from the peer
    Receive {
        /// Directory incoming files are written to
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        #[command(flatten)]
        strategy: Strategy,
    },
}

/// How the stream to the peer is obtained. Exactly one is required.
#[derive(ClapArgs, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct Strategy {
    /// Listen for the peer; the chosen port is printed
    #[arg(long)]
    pub listen: bool,

    /// Connect directly to the peer
    #[arg(long, value_name = "ADDR")]
    pub connect: Option<SocketAddr>,

    /// Open a session on the rendezvous proxy; the relay address to give
    /// the peer is printed
    #[arg(long)]
    pub proxy: bool,

    /// Join a proxy session the peer opened
    #[arg(long, value_name = "IP:PORT")]
    pub proxy_join: Option<SocketAddr>,
}

impl Command {
    pub fn strategy(&self) -> &Strategy {
        match self {
            Self::Send { strategy, .. } | Self::Receive { strategy, .. } => strategy,
        }
    }
}
