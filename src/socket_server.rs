use crate::ipc::{decode_frame, Command, ParseCommandError, SocketPaths, FRAME_LEN};
use anyhow::{Context, Result};
use std::fs::{self, DirBuilder};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long an accepted client gets to deliver its whole frame
const FRAME_READ_TIMEOUT: Duration = Duration::from_millis(100);

const DIR_MODE: u32 = 0o700;
const SOCKET_MODE: u32 = 0o600;

/// Listening socket of the main instance.
///
/// Dropping it closes the socket and removes the socket file.
pub struct CommandListener {
    listener: Option<UnixListener>,
    paths: SocketPaths,
}

impl CommandListener {
    /// Become the main instance.
    ///
    /// Creates the private directory, replaces any stale socket file and
    /// binds a non-blocking listener. Every failure is fatal to the caller.
    pub fn bind(paths: SocketPaths) -> Result<Self> {
        create_private_dir(paths.dir())?;

        match fs::remove_file(paths.socket()) {
            Ok(()) => info!("Removed stale socket at {}", paths.socket().display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove stale socket {}", paths.socket().display())
                });
            }
        }

        let listener = UnixListener::bind(paths.socket())
            .with_context(|| format!("Failed to bind socket at {}", paths.socket().display()))?;

        // From here on Drop removes the file if a later step fails
        let listener = CommandListener {
            listener: Some(listener),
            paths,
        };

        fs::set_permissions(
            listener.paths.socket(),
            fs::Permissions::from_mode(SOCKET_MODE),
        )
        .with_context(|| {
            format!(
                "Failed to restrict permissions on {}",
                listener.paths.socket().display()
            )
        })?;

        if let Some(inner) = &listener.listener {
            inner
                .set_nonblocking(true)
                .context("Failed to make the command socket non-blocking")?;
        }

        info!(
            "Listening for switcher commands at {}",
            listener.paths.socket().display()
        );
        Ok(listener)
    }

    /// Accept one pending client, if any.
    ///
    /// `Ok(None)` means nothing is waiting (or the listener is already closed).
    pub fn accept_one(&self) -> io::Result<Option<UnixStream>> {
        let Some(listener) = &self.listener else {
            return Ok(None);
        };

        match listener.accept() {
            Ok((stream, _)) => {
                debug!("Accepted switcher client");
                Ok(Some(stream))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the listener and remove the socket file. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if self.listener.take().is_some() {
            debug!("Closed command socket");
        }
        remove_socket_files(&self.paths);
    }
}

impl AsRawFd for CommandListener {
    fn as_raw_fd(&self) -> RawFd {
        // -1 after cleanup; registering a closed listener fails with EBADF
        self.listener.as_ref().map_or(-1, |l| l.as_raw_fd())
    }
}

impl Drop for CommandListener {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Remove the socket file and, when it is empty, its directory.
///
/// Works without a live listener, e.g. after a crash left files behind.
pub fn remove_socket_files(paths: &SocketPaths) {
    match fs::remove_file(paths.socket()) {
        Ok(()) => info!("Removed socket file at {}", paths.socket().display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove socket file {}: {}",
            paths.socket().display(),
            e
        ),
    }

    // Fails harmlessly while other files live in the directory
    if fs::remove_dir(paths.dir()).is_ok() {
        debug!("Removed socket directory {}", paths.dir().display());
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    match DirBuilder::new().mode(DIR_MODE).create(dir) {
        Ok(()) => debug!("Created socket directory {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to create socket directory {}", dir.display()));
        }
    }

    let metadata = fs::metadata(dir)
        .with_context(|| format!("Failed to stat socket directory {}", dir.display()))?;
    if !metadata.is_dir() {
        anyhow::bail!("{} exists and is not a directory", dir.display());
    }

    let mode = metadata.permissions().mode() & 0o777;
    if mode != DIR_MODE {
        warn!(
            "Socket directory {} has mode {:o}, fixing to {:o}",
            dir.display(),
            mode,
            DIR_MODE
        );
        fs::set_permissions(dir, fs::Permissions::from_mode(DIR_MODE))
            .with_context(|| format!("Failed to fix permissions on {}", dir.display()))?;
    }

    Ok(())
}

/// Read the single command frame a client sends.
///
/// Waits at most [`FRAME_READ_TIMEOUT`] for the full frame. `None` means
/// the client sent nothing usable (short frame, timeout or I/O error);
/// `Some(Err(_))` means a full frame that names no known command.
pub fn read_command(stream: &mut UnixStream) -> Option<Result<Command, ParseCommandError>> {
    // Accepted sockets do not inherit the listener's non-blocking flag on
    // every platform, so set both explicitly
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(FRAME_READ_TIMEOUT)))
    {
        warn!("Failed to configure client socket: {}", e);
        return None;
    }

    read_frame(stream)
}

fn read_frame<R: Read>(reader: &mut R) -> Option<Result<Command, ParseCommandError>> {
    let mut frame = [0u8; FRAME_LEN];
    let mut filled = 0;

    while filled < FRAME_LEN {
        match reader.read(&mut frame[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                break;
            }
            Err(e) => {
                warn!("Failed to read command from client: {}", e);
                return None;
            }
        }
    }

    if filled < FRAME_LEN {
        if filled == 0 {
            debug!("Client disconnected without sending a command");
        } else {
            warn!(
                "Dropping short command frame ({} of {} bytes)",
                filled, FRAME_LEN
            );
        }
        return None;
    }

    let command = decode_frame(&frame);
    match &command {
        Ok(command) => debug!("Received command {}", command),
        Err(e) => warn!("Ignoring unknown command '{}'", e.payload()),
    }
    Some(command)
}
