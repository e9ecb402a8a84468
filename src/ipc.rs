use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Every command travels as exactly this many bytes, NUL padded.
pub const FRAME_LEN: usize = 16;

const SOCKET_DIR_NAME: &str = "hyprswitcher";
const SOCKET_FILE_NAME: &str = "socket";

/// Commands sent from helper invocations to the main instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Move the selection to the next window
    Cycle,
    /// Move the selection to the previous window
    CycleBackward,
    /// Focus the selected window and close the overlay
    Commit,
    /// Restore the window focused at session start and close the overlay
    Cancel,
}

impl Command {
    /// Wire spelling of the command
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Cycle => "CYCLE",
            Command::CycleBackward => "CYCLE_BACKWARD",
            Command::Commit => "COMMIT",
            Command::Cancel => "CANCEL",
        }
    }

    pub fn encode(self) -> [u8; FRAME_LEN] {
        encode_frame(self.as_str())
    }

    /// Whether this command ends the session when it reaches the main instance
    pub fn is_terminal(self) -> bool {
        matches!(self, Command::Commit | Command::Cancel)
    }
}

/// Left-justify `payload` into a frame.
///
/// Payloads longer than the frame are cut so the last byte always stays NUL.
pub fn encode_frame(payload: &str) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    let bytes = payload.as_bytes();
    let len = bytes.len().min(FRAME_LEN - 1);
    frame[..len].copy_from_slice(&bytes[..len]);
    frame
}

/// Map a complete frame to a command by prefix match on its leading bytes.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Result<Command, ParseCommandError> {
    // CYCLE is a prefix of CYCLE_BACKWARD, so the longer name goes first
    const MATCH_ORDER: [Command; 4] = [
        Command::CycleBackward,
        Command::Cycle,
        Command::Commit,
        Command::Cancel,
    ];

    MATCH_ORDER
        .into_iter()
        .find(|command| frame.starts_with(command.as_str().as_bytes()))
        .ok_or_else(|| ParseCommandError {
            payload: frame_payload(frame),
        })
}

fn frame_payload(frame: &[u8]) -> String {
    let end = frame.iter().position(|&b| b == 0).unwrap_or(frame.len());
    String::from_utf8_lossy(&frame[..end]).into_owned()
}

/// Error returned when a frame does not name a known command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError {
    payload: String,
}

impl ParseCommandError {
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown switcher command '{}'", self.payload)
    }
}

impl std::error::Error for ParseCommandError {}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of the single-instance socket and its private directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketPaths {
    dir: PathBuf,
    socket: PathBuf,
}

impl SocketPaths {
    /// Derive the paths from `XDG_RUNTIME_DIR`; fails if it is unset.
    pub fn from_env() -> Result<Self> {
        let runtime_dir = dirs::runtime_dir()
            .context("XDG_RUNTIME_DIR is not set, cannot locate the switcher socket")?;

        Ok(Self::in_runtime_dir(&runtime_dir))
    }

    pub fn in_runtime_dir(runtime_dir: &Path) -> Self {
        let dir = runtime_dir.join(SOCKET_DIR_NAME);
        let socket = dir.join(SOCKET_FILE_NAME);
        SocketPaths { dir, socket }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }
}
