use crate::ipc::{Command, SocketPaths};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::{debug, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Connect to a running main instance.
///
/// Returns `None` when no instance is running. A socket file nobody
/// listens on is left over from a crashed instance and gets removed.
pub fn try_connect(paths: &SocketPaths) -> Option<UnixStream> {
    let socket = paths.socket();
    if fs::symlink_metadata(socket).is_err() {
        debug!("No switcher socket at {}", socket.display());
        return None;
    }

    match UnixStream::connect(socket) {
        Ok(stream) => {
            debug!("Connected to running switcher at {}", socket.display());
            Some(stream)
        }
        Err(e) => {
            info!("Removing stale switcher socket {} ({})", socket.display(), e);
            if let Err(e) = fs::remove_file(socket) {
                warn!("Failed to remove stale socket {}: {}", socket.display(), e);
            }
            None
        }
    }
}

/// Send one command frame to the main instance
pub fn send(stream: &mut UnixStream, command: Command) -> Result<()> {
    stream
        .set_write_timeout(Some(SEND_TIMEOUT))
        .context("Failed to set write timeout")?;
    stream
        .write_all(&command.encode())
        .with_context(|| format!("Failed to send {} to the running switcher", command))?;
    stream.flush()?;

    debug!("Sent {} to running switcher", command);
    Ok(())
}

/// Deliver `command` to the running instance.
///
/// Returns `Ok(false)` when there is no instance to deliver it to.
pub fn send_command(paths: &SocketPaths, command: Command) -> Result<bool> {
    match try_connect(paths) {
        Some(mut stream) => send(&mut stream, command).map(|()| true),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::FRAME_LEN;
    use crate::socket_server::{read_command, CommandListener};
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_try_connect_without_socket() {
        let runtime = tempfile::tempdir().unwrap();
        let paths = SocketPaths::in_runtime_dir(runtime.path());
        assert!(try_connect(&paths).is_none());
    }

    #[test]
    fn test_try_connect_removes_stale_socket() {
        let runtime = tempfile::tempdir().unwrap();
        let paths = SocketPaths::in_runtime_dir(runtime.path());
        fs::create_dir(paths.dir()).unwrap();
        drop(UnixListener::bind(paths.socket()).unwrap());

        assert!(try_connect(&paths).is_none());
        assert!(!paths.socket().exists());

        // The next process can become the main instance
        assert!(CommandListener::bind(paths).is_ok());
    }

    #[test]
    fn test_send_writes_one_full_frame() {
        let (mut client, mut server) = UnixStream::pair().unwrap();

        send(&mut client, Command::Commit).unwrap();
        drop(client);

        let mut received = Vec::new();
        server.read_to_end(&mut received).unwrap();
        assert_eq!(received.len(), FRAME_LEN);
        assert_eq!(&received[..6], b"COMMIT");
    }

    #[test]
    fn test_send_command_without_instance() {
        let runtime = tempfile::tempdir().unwrap();
        let paths = SocketPaths::in_runtime_dir(runtime.path());
        assert!(!send_command(&paths, Command::Commit).unwrap());
    }

    #[test]
    fn test_send_reaches_running_instance() {
        let runtime = tempfile::tempdir().unwrap();
        let paths = SocketPaths::in_runtime_dir(runtime.path());
        let listener = CommandListener::bind(paths.clone()).unwrap();

        assert!(send_command(&paths, Command::Cancel).unwrap());

        let mut accepted = None;
        for _ in 0..100 {
            accepted = listener.accept_one().unwrap();
            if accepted.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let mut accepted = accepted.unwrap();
        assert_eq!(read_command(&mut accepted), Some(Ok(Command::Cancel)));
    }
}
