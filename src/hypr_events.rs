//! Reader for Hyprland's event socket (`.socket2.sock`).
//!
//! The socket carries newline-terminated lines of the form `NAME>>DATA`.
//! The reader is non-blocking: the session loop waits for readiness and
//! then drains whatever complete lines have arrived.

use crate::hypr_client::HyprSockets;
use crate::window_manager::WindowAddress;
use anyhow::{Context, Result};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

/// A line longer than this without a newline is garbage
const MAX_LINE_LEN: usize = 64 * 1024;

/// Compositor notifications the switcher cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorEvent {
    OpenWindow {
        address: WindowAddress,
        workspace_id: i32,
        class: String,
        title: String,
    },
    CloseWindow {
        address: WindowAddress,
    },
    ActiveWindow {
        class: String,
        title: Option<String>,
    },
    MoveWindow {
        address: WindowAddress,
        workspace_id: i32,
    },
    /// Any other event name; the line is consumed and otherwise ignored
    Unknown { name: String },
}

/// Result of one [`EventStreamReader::read_event`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Event(CompositorEvent),
    /// Bytes arrived but no complete line yet
    Partial,
    /// Nothing to read right now
    Idle,
    /// The compositor closed the stream
    Closed,
}

/// Parse one event line (without its trailing newline).
///
/// Lines without the `>>` separator are invalid and yield `None`.
pub fn parse_event_line(line: &str) -> Option<CompositorEvent> {
    let Some((name, data)) = line.split_once(">>") else {
        debug!("Ignoring malformed event line '{}'", line);
        return None;
    };

    let event = match name {
        "openwindow" => {
            // Title is last and may itself contain commas
            let mut fields = data.splitn(4, ',');
            let address = WindowAddress::from_event_token(fields.next().unwrap_or_default());
            let workspace_id = parse_workspace_id(fields.next().unwrap_or_default());
            let class = fields.next().unwrap_or_default().to_string();
            let title = fields.next().unwrap_or_default().to_string();
            CompositorEvent::OpenWindow {
                address,
                workspace_id,
                class,
                title,
            }
        }
        "closewindow" => CompositorEvent::CloseWindow {
            address: WindowAddress::from_event_token(data),
        },
        "activewindow" => match data.split_once(',') {
            Some((class, title)) => CompositorEvent::ActiveWindow {
                class: class.to_string(),
                title: Some(title.to_string()),
            },
            None => CompositorEvent::ActiveWindow {
                class: data.to_string(),
                title: None,
            },
        },
        "movewindow" => {
            let (address, workspace) = data.split_once(',').unwrap_or((data, ""));
            CompositorEvent::MoveWindow {
                address: WindowAddress::from_event_token(address),
                workspace_id: parse_workspace_id(workspace),
            }
        }
        other => CompositorEvent::Unknown {
            name: other.to_string(),
        },
    };

    Some(event)
}

/// Leading integer of a workspace field; named workspaces map to 0.
fn parse_workspace_id(field: &str) -> i32 {
    let field = field.trim();
    let digits_end = field
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(field.len(), |(i, _)| i);
    field[..digits_end].parse().unwrap_or(0)
}

/// Buffered, non-blocking reader over the event socket
pub struct EventStreamReader {
    stream: UnixStream,
    buffer: Vec<u8>,
    /// Inside an overlong line that was dropped; skip to its newline
    discarding: bool,
    closed: bool,
}

impl EventStreamReader {
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .with_context(|| format!("Failed to connect to event socket {}", path.display()))?;
        let reader = Self::from_stream(stream).context("Failed to configure event socket")?;
        info!("Subscribed to Hyprland events at {}", path.display());
        Ok(reader)
    }

    pub fn connect_from_env() -> Result<Self> {
        let sockets = HyprSockets::from_env()?;
        Self::connect(sockets.events())
    }

    pub fn from_stream(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(EventStreamReader {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
            discarding: false,
            closed: false,
        })
    }

    /// Whether a complete line is already buffered
    pub fn has_pending(&self) -> bool {
        self.buffer.contains(&b'\n')
    }

    /// Next event from already-buffered lines, skipping invalid ones
    pub fn next_buffered(&mut self) -> Option<CompositorEvent> {
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..newline]);
            if let Some(event) = parse_event_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        None
    }

    /// Produce at most one event.
    ///
    /// Buffered lines are served first; only when none is complete does
    /// this issue one read, then check the buffer again.
    pub fn read_event(&mut self) -> ReadStatus {
        if let Some(event) = self.next_buffered() {
            return ReadStatus::Event(event);
        }
        if self.closed {
            return ReadStatus::Closed;
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                warn!("Hyprland event stream closed");
                self.closed = true;
                return ReadStatus::Closed;
            }
            Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadStatus::Idle,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return ReadStatus::Partial,
            Err(e) => {
                warn!("Failed to read Hyprland events: {}", e);
                self.closed = true;
                return ReadStatus::Closed;
            }
        }

        if self.discarding {
            match self.buffer.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    self.buffer.drain(..=newline);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return ReadStatus::Partial;
                }
            }
        }

        if let Some(event) = self.next_buffered() {
            return ReadStatus::Event(event);
        }

        if self.buffer.len() > MAX_LINE_LEN {
            warn!(
                "Discarding {} bytes of event data without a line break",
                self.buffer.len()
            );
            self.buffer.clear();
            self.discarding = true;
        }
        ReadStatus::Partial
    }
}

impl AsRawFd for EventStreamReader {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn reader_pair() -> (EventStreamReader, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (EventStreamReader::from_stream(ours).unwrap(), theirs)
    }

    // ==================== parse_event_line tests ====================

    #[test]
    fn test_parse_openwindow_rejoins_title_commas() {
        let event = parse_event_line("openwindow>>5c4fe19a0,1,kitty,My,Terminal").unwrap();
        assert_eq!(
            event,
            CompositorEvent::OpenWindow {
                address: WindowAddress::new("0x5c4fe19a0"),
                workspace_id: 1,
                class: "kitty".to_string(),
                title: "My,Terminal".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_closewindow() {
        assert_eq!(
            parse_event_line("closewindow>>5c4fe19a0"),
            Some(CompositorEvent::CloseWindow {
                address: WindowAddress::new("0x5c4fe19a0"),
            })
        );
    }

    #[test]
    fn test_parse_activewindow_with_and_without_title() {
        assert_eq!(
            parse_event_line("activewindow>>firefox,Mozilla Firefox"),
            Some(CompositorEvent::ActiveWindow {
                class: "firefox".to_string(),
                title: Some("Mozilla Firefox".to_string()),
            })
        );
        assert_eq!(
            parse_event_line("activewindow>>firefox"),
            Some(CompositorEvent::ActiveWindow {
                class: "firefox".to_string(),
                title: None,
            })
        );
    }

    #[test]
    fn test_parse_movewindow_workspace() {
        assert_eq!(
            parse_event_line("movewindow>>abc,4"),
            Some(CompositorEvent::MoveWindow {
                address: WindowAddress::new("0xabc"),
                workspace_id: 4,
            })
        );
        assert_eq!(
            parse_event_line("movewindow>>abc,special:scratch"),
            Some(CompositorEvent::MoveWindow {
                address: WindowAddress::new("0xabc"),
                workspace_id: 0,
            })
        );
    }

    #[test]
    fn test_parse_unknown_and_invalid_lines() {
        assert_eq!(
            parse_event_line("workspace>>2"),
            Some(CompositorEvent::Unknown {
                name: "workspace".to_string()
            })
        );
        assert_eq!(parse_event_line("no separator here"), None);
    }

    #[test]
    fn test_parse_workspace_id() {
        assert_eq!(parse_workspace_id("12"), 12);
        assert_eq!(parse_workspace_id("-98"), -98);
        assert_eq!(parse_workspace_id("3abc"), 3);
        assert_eq!(parse_workspace_id("name"), 0);
        assert_eq!(parse_workspace_id(""), 0);
    }

    // ==================== EventStreamReader tests ====================

    #[test]
    fn test_reader_idle_without_data() {
        let (mut reader, _peer) = reader_pair();
        assert_eq!(reader.read_event(), ReadStatus::Idle);
        assert!(!reader.has_pending());
    }

    #[test]
    fn test_reader_serves_buffered_lines_before_reading() {
        let (mut reader, mut peer) = reader_pair();
        peer.write_all(b"closewindow>>a\nclosewindow>>b\nclosewindow>>c\n")
            .unwrap();

        assert!(matches!(reader.read_event(), ReadStatus::Event(_)));
        assert!(reader.has_pending());
        assert_eq!(
            reader.next_buffered(),
            Some(CompositorEvent::CloseWindow {
                address: WindowAddress::new("0xb")
            })
        );
        assert_eq!(
            reader.read_event(),
            ReadStatus::Event(CompositorEvent::CloseWindow {
                address: WindowAddress::new("0xc")
            })
        );
        assert!(!reader.has_pending());
        assert_eq!(reader.read_event(), ReadStatus::Idle);
    }

    #[test]
    fn test_reader_assembles_split_lines() {
        let (mut reader, mut peer) = reader_pair();

        peer.write_all(b"openwindow>>1,2,kit").unwrap();
        assert_eq!(reader.read_event(), ReadStatus::Partial);

        peer.write_all(b"ty,shell\n").unwrap();
        assert_eq!(
            reader.read_event(),
            ReadStatus::Event(CompositorEvent::OpenWindow {
                address: WindowAddress::new("0x1"),
                workspace_id: 2,
                class: "kitty".to_string(),
                title: "shell".to_string(),
            })
        );
    }

    #[test]
    fn test_reader_skips_invalid_lines() {
        let (mut reader, mut peer) = reader_pair();
        peer.write_all(b"garbage\nclosewindow>>ff\n").unwrap();

        assert_eq!(
            reader.read_event(),
            ReadStatus::Event(CompositorEvent::CloseWindow {
                address: WindowAddress::new("0xff")
            })
        );
    }

    #[test]
    fn test_reader_reports_close_after_draining() {
        let (mut reader, mut peer) = reader_pair();
        peer.write_all(b"closewindow>>1\n").unwrap();
        drop(peer);

        assert!(matches!(reader.read_event(), ReadStatus::Event(_)));
        assert_eq!(reader.read_event(), ReadStatus::Closed);
        assert!(reader.closed);
        assert_eq!(reader.read_event(), ReadStatus::Closed);
    }

    #[test]
    fn test_reader_drops_rest_of_overlong_line() {
        let (mut reader, mut peer) = reader_pair();
        let mut data = vec![b'x'; MAX_LINE_LEN + 2 * READ_CHUNK];
        data.extend_from_slice(b"closewindow>>e\nopenwindow>>d,1,kitty,shell\n");
        let writer = std::thread::spawn(move || {
            peer.write_all(&data).unwrap();
            peer
        });

        let mut first = None;
        for _ in 0..1000 {
            match reader.read_event() {
                ReadStatus::Event(event) => {
                    first = Some(event);
                    break;
                }
                ReadStatus::Idle => std::thread::sleep(std::time::Duration::from_millis(1)),
                ReadStatus::Partial => {}
                ReadStatus::Closed => break,
            }
        }
        let _peer = writer.join().unwrap();

        assert_eq!(
            first,
            Some(CompositorEvent::OpenWindow {
                address: WindowAddress::new("0xd"),
                workspace_id: 1,
                class: "kitty".to_string(),
                title: "shell".to_string(),
            })
        );
        assert!(!reader.discarding);
    }
}
