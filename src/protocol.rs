//! Shared protocol constants for the filegate line protocol

use std::fmt;

// Default daemon port, shared by filegated and the client CLI
pub const DEFAULT_PORT: u16 = 2345;

// Longest line either side will buffer before treating the peer as broken.
// Covers command codes, names, passwords and single payload lines alike.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

// Single-bit replies (keep numeric stable, both ends parse these verbatim)
pub mod status {
    pub const FAILURE: u8 = 0;
    pub const SUCCESS: u8 = 1;
}

/// Requests a client can issue. The numeric code is the wire contract and
/// must match exactly between client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Authenticate = 0,
    ClientDisconnect = 1,
    ServerShutdown = 2,
    ListDirectory = 3,
    UploadFile = 4,
    DownloadFile = 5,
}

impl Command {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse one command line. Surrounding whitespace is ignored; anything
    /// that is not a known code yields `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        line.trim().parse::<u8>().ok().and_then(|c| Self::try_from(c).ok())
    }
}

impl TryFrom<u8> for Command {
    type Error = UnknownCommand;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Command::Authenticate),
            1 => Ok(Command::ClientDisconnect),
            2 => Ok(Command::ServerShutdown),
            3 => Ok(Command::ListDirectory),
            4 => Ok(Command::UploadFile),
            5 => Ok(Command::DownloadFile),
            other => Err(UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Authenticate => "authenticate",
            Command::ClientDisconnect => "client-disconnect",
            Command::ServerShutdown => "server-shutdown",
            Command::ListDirectory => "list-directory",
            Command::UploadFile => "upload-file",
            Command::DownloadFile => "download-file",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown command code {0}")]
pub struct UnknownCommand(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Command::Authenticate.code(), 0);
        assert_eq!(Command::ClientDisconnect.code(), 1);
        assert_eq!(Command::ServerShutdown.code(), 2);
        assert_eq!(Command::ListDirectory.code(), 3);
        assert_eq!(Command::UploadFile.code(), 4);
        assert_eq!(Command::DownloadFile.code(), 5);
        for code in 0..=5u8 {
            assert_eq!(Command::try_from(code).map(Command::code), Ok(code));
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Command::parse_line(" 3 "), Some(Command::ListDirectory));
        assert_eq!(Command::parse_line("6"), None);
        assert_eq!(Command::parse_line("-1"), None);
        assert_eq!(Command::parse_line("hello"), None);
        assert_eq!(Command::parse_line(""), None);
        assert_eq!(Command::try_from(42), Err(UnknownCommand(42)));
    }
}
