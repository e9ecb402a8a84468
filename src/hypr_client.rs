//! Hyprland control-socket abstraction for testability.
//!
//! Every request opens its own connection to `.socket.sock`, writes the
//! NUL-terminated command and reads the reply. The session only talks to
//! the compositor through the [`WindowDirectory`] trait so tests can swap
//! in a fake.

use crate::window_manager::WindowRecord;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use serde_json::Value;
use std::env;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const INSTANCE_SIGNATURE_ENV: &str = "HYPRLAND_INSTANCE_SIGNATURE";
const CONTROL_SOCKET_NAME: &str = ".socket.sock";
const EVENT_SOCKET_NAME: &str = ".socket2.sock";

/// Ceiling on waiting for a complete JSON reply
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Dispatch replies are short plain text and may never come
const DISPATCH_REPLY_WAIT: Duration = Duration::from_millis(200);

/// Hyprland's reply when a focus selector matched nothing
const NO_SUCH_WINDOW: &str = "No such window found";

const READ_CHUNK: usize = 4096;

/// Errors that can occur when talking to the compositor's control socket
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("XDG_RUNTIME_DIR is not set - cannot locate the Hyprland sockets")]
    RuntimeDirNotSet,

    #[error("HYPRLAND_INSTANCE_SIGNATURE is not set - is Hyprland running?")]
    SignatureNotSet,

    #[error("Failed to connect to Hyprland socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send '{request}' to Hyprland: {source}")]
    SendFailed {
        request: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to receive reply from Hyprland: {0}")]
    ReceiveFailed(#[source] io::Error),

    #[error("No complete reply from Hyprland within {0:?}")]
    Timeout(Duration),

    #[error("Hyprland closed the connection before a complete reply arrived")]
    ConnectionClosed,

    #[error("Malformed JSON reply from Hyprland: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Unexpected reply from Hyprland: {0}")]
    UnexpectedShape(String),
}

/// Paths of one Hyprland instance's control and event sockets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyprSockets {
    control: PathBuf,
    events: PathBuf,
}

impl HyprSockets {
    /// Derive both paths from `XDG_RUNTIME_DIR` and the instance signature
    pub fn from_env() -> Result<Self, DirectoryError> {
        let runtime_dir = dirs::runtime_dir().ok_or(DirectoryError::RuntimeDirNotSet)?;
        let signature = env::var(INSTANCE_SIGNATURE_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(DirectoryError::SignatureNotSet)?;

        Ok(Self::new(&runtime_dir, &signature))
    }

    pub fn new(runtime_dir: &Path, signature: &str) -> Self {
        let base = runtime_dir.join("hypr").join(signature);
        HyprSockets {
            control: base.join(CONTROL_SOCKET_NAME),
            events: base.join(EVENT_SOCKET_NAME),
        }
    }

    pub fn control(&self) -> &Path {
        &self.control
    }

    pub fn events(&self) -> &Path {
        &self.events
    }
}

/// Which focus selector Hyprland accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusStrategy {
    PrefixedAddress,
    BareAddress,
    Class,
    Title,
}

/// Queries and commands the switcher needs from the compositor
pub trait WindowDirectory {
    /// Fetch all open windows, in compositor order
    fn list_windows(&mut self) -> Result<Vec<WindowRecord>, DirectoryError>;

    /// Best-effort focus. `None` when every selector was rejected.
    fn focus_window(&mut self, window: &WindowRecord) -> Option<FocusStrategy>;
}

/// Request/reply client for Hyprland's control socket
#[derive(Debug, Clone)]
pub struct HyprCtl {
    socket: PathBuf,
    timeout: Duration,
}

impl HyprCtl {
    pub fn new(socket: PathBuf) -> Self {
        HyprCtl {
            socket,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn from_env() -> Result<Self, DirectoryError> {
        let sockets = HyprSockets::from_env()?;
        debug!("Using Hyprland control socket {}", sockets.control().display());
        Ok(Self::new(sockets.control().to_path_buf()))
    }

    /// Send a JSON request such as `j/clients` and return the parsed reply.
    ///
    /// Returns as soon as the bytes received so far form one complete JSON
    /// document; Hyprland does not always close the connection promptly.
    pub fn query(&self, request: &str) -> Result<Value, DirectoryError> {
        let mut stream = self.send_request(request)?;
        stream
            .set_nonblocking(true)
            .map_err(DirectoryError::ReceiveFailed)?;
        read_json_document(&mut stream, self.timeout)
    }

    /// Send a dispatch and return whatever text arrives within a short wait.
    ///
    /// An empty string means no reply came.
    pub fn dispatch(&self, request: &str) -> Result<String, DirectoryError> {
        let mut stream = self.send_request(request)?;
        stream
            .set_nonblocking(true)
            .map_err(DirectoryError::ReceiveFailed)?;

        if !wait_readable(&stream, DISPATCH_REPLY_WAIT)? {
            return Ok(String::new());
        }

        let mut reply = [0u8; 256];
        match stream.read(&mut reply) {
            Ok(n) => Ok(String::from_utf8_lossy(&reply[..n]).into_owned()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(String::new()),
            Err(e) => Err(DirectoryError::ReceiveFailed(e)),
        }
    }

    fn send_request(&self, request: &str) -> Result<UnixStream, DirectoryError> {
        let mut stream =
            UnixStream::connect(&self.socket).map_err(|source| DirectoryError::ConnectionFailed {
                path: self.socket.clone(),
                source,
            })?;

        let mut message = Vec::with_capacity(request.len() + 1);
        message.extend_from_slice(request.as_bytes());
        message.push(0);

        // The whole request has to go out in a single write
        let written = stream
            .write(&message)
            .map_err(|source| DirectoryError::SendFailed {
                request: request.to_string(),
                source,
            })?;
        if written != message.len() {
            return Err(DirectoryError::SendFailed {
                request: request.to_string(),
                source: io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write ({} of {} bytes)", written, message.len()),
                ),
            });
        }

        debug!("Sent Hyprland request '{}'", request);
        Ok(stream)
    }
}

impl WindowDirectory for HyprCtl {
    fn list_windows(&mut self) -> Result<Vec<WindowRecord>, DirectoryError> {
        let reply = self.query("j/clients")?;
        parse_client_list(reply)
    }

    fn focus_window(&mut self, window: &WindowRecord) -> Option<FocusStrategy> {
        let ctl = &*self;
        focus_with(window, |request| ctl.dispatch(request))
    }
}

/// Map the `j/clients` reply; elements that are not usable clients are skipped.
pub fn parse_client_list(reply: Value) -> Result<Vec<WindowRecord>, DirectoryError> {
    let Value::Array(entries) = reply else {
        return Err(DirectoryError::UnexpectedShape(format!(
            "expected a list of clients, got {}",
            json_kind(&reply)
        )));
    };

    let mut windows = Vec::with_capacity(entries.len());
    for entry in entries {
        if !entry.is_object() {
            debug!("Skipping client entry of type {}", json_kind(&entry));
            continue;
        }
        match WindowRecord::from_client_json(entry) {
            Ok(Some(window)) => windows.push(window),
            Ok(None) => {}
            Err(e) => warn!("Skipping malformed client entry: {}", e),
        }
    }

    debug!("Hyprland reported {} windows", windows.len());
    Ok(windows)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Focus selectors to try, most precise first
pub fn focus_selectors(window: &WindowRecord) -> Vec<(FocusStrategy, String)> {
    let mut selectors = Vec::with_capacity(4);

    if window.address.is_well_formed() {
        selectors.push((
            FocusStrategy::PrefixedAddress,
            format!("address:{}", window.address),
        ));
        selectors.push((FocusStrategy::BareAddress, window.address.to_string()));
    } else {
        warn!(
            "Window address '{}' is malformed, skipping address selectors",
            window.address
        );
    }

    if let Some(class) = window.app_class.as_deref().filter(|c| !c.is_empty()) {
        selectors.push((FocusStrategy::Class, format!("class:{}", escape_regex(class))));
    }
    if !window.title.is_empty() {
        selectors.push((
            FocusStrategy::Title,
            format!("title:{}", escape_regex(&window.title)),
        ));
    }

    selectors
}

/// Try each selector in order until one is not rejected.
///
/// `dispatch` sends one request and returns the reply text. I/O failures
/// of one attempt move on to the next selector.
pub fn focus_with<F>(window: &WindowRecord, mut dispatch: F) -> Option<FocusStrategy>
where
    F: FnMut(&str) -> Result<String, DirectoryError>,
{
    for (strategy, selector) in focus_selectors(window) {
        let request = format!("dispatch focuswindow {}", selector);
        match dispatch(&request) {
            Ok(reply) if !reply.contains(NO_SUCH_WINDOW) => {
                info!("Focused {} via {:?}", window.address, strategy);
                return Some(strategy);
            }
            Ok(reply) => debug!("{:?} selector rejected: {}", strategy, reply.trim()),
            Err(e) => warn!("Focus request '{}' failed: {}", request, e),
        }
    }

    warn!(
        "Could not focus {} ({})",
        window.address,
        window.display_name()
    );
    None
}

/// Anchor `literal` as a whole-string regex, escaping `.^$*+?()[]{}|\`
pub fn escape_regex(literal: &str) -> String {
    const SPECIAL: &str = ".^$*+?()[]{}|\\";

    let mut escaped = String::with_capacity(literal.len() + 2);
    escaped.push('^');
    for c in literal.chars() {
        if SPECIAL.contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('$');
    escaped
}

fn read_json_document(stream: &mut UnixStream, timeout: Duration) -> Result<Value, DirectoryError> {
    let deadline = Instant::now() + timeout;
    let mut buffer = Vec::with_capacity(READ_CHUNK * 2);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || !wait_readable(stream, remaining)? {
            return Err(DirectoryError::Timeout(timeout));
        }

        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    return complete_document(&buffer)?.ok_or(DirectoryError::ConnectionClosed);
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Some(document) = complete_document(&buffer)? {
                        return Ok(document);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DirectoryError::ReceiveFailed(e)),
            }
        }
    }
}

/// `Ok(None)` while the buffer is a valid but unfinished document
fn complete_document(buffer: &[u8]) -> Result<Option<Value>, DirectoryError> {
    let mut documents = serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();
    match documents.next() {
        None => Ok(None),
        Some(Ok(document)) => Ok(Some(document)),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(DirectoryError::Parse(e)),
    }
}

fn wait_readable(stream: &UnixStream, timeout: Duration) -> Result<bool, DirectoryError> {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    loop {
        let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, millis) {
            Ok(0) => return Ok(false),
            Ok(_) => return Ok(true),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(DirectoryError::ReceiveFailed(io::Error::from(errno))),
        }
    }
}
