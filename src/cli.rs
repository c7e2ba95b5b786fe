//! Clap definitions for filegated and the filegate client

use crate::protocol::DEFAULT_PORT;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// filegated: serve a directory over the filegate line protocol
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct DaemonOpts {
    /// TOML file with bind/root/password/deny settings (flags override it)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port) [default: 0.0.0.0:2345]
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory to serve [default: current directory]
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Password clients must send before any privileged command
    #[arg(long)]
    pub password: Option<String>,

    /// Refuse connections from this IP address or host name (repeatable)
    #[arg(long = "deny", value_name = "ADDR|HOST")]
    pub deny: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// filegate: talk to a filegated daemon
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct ClientOpts {
    /// Daemon host name or address
    #[arg(long, global = true, default_value = "127.0.0.1")]
    pub host: String,

    /// Daemon port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Password to authenticate with
    #[arg(short, long)]
    pub password: String,

    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Action {
    /// List the served directory
    Ls,
    /// Upload a local text file
    Put {
        /// Local file to send
        local: PathBuf,
        /// Name to store it under (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download a file from the served directory
    Get {
        /// Remote file name
        name: String,
        /// Where to write it (defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Stop the daemon and every session on it
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_flags() {
        let opts = DaemonOpts::parse_from([
            "filegated",
            "--password",
            "pw",
            "--deny",
            "10.0.0.1",
            "--deny",
            "bad.example",
            "-vv",
        ]);
        assert_eq!(opts.password.as_deref(), Some("pw"));
        assert_eq!(opts.deny, ["10.0.0.1", "bad.example"]);
        assert_eq!(opts.verbose, 2);
        assert!(opts.bind.is_none());
    }

    #[test]
    fn client_subcommands() {
        let opts = ClientOpts::parse_from(["filegate", "-p", "pw", "put", "notes.txt", "--name", "n.txt"]);
        assert_eq!(opts.port, DEFAULT_PORT);
        match opts.action {
            Action::Put { local, name } => {
                assert_eq!(local, PathBuf::from("notes.txt"));
                assert_eq!(name.as_deref(), Some("n.txt"));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        DaemonOpts::command().debug_assert();
        ClientOpts::command().debug_assert();
    }
}
