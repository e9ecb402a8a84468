use crate::config::OverlayConfig;
use crate::hypr_client::WindowDirectory;
use crate::hypr_events::{CompositorEvent, EventStreamReader, ReadStatus};
use crate::ipc::Command;
use crate::keyboard_monitor::{InputSignals, KeyEvent, KeyPress, KeyboardSignals};
use crate::socket_server::{self, CommandListener};
use crate::ui::{self, FocusChange, Frame, Overlay, SurfaceSize};
use crate::window_manager::{sort_by_focus_recency, WindowRecord};
use crate::window_switcher::WindowSwitcher;
use anyhow::{Context, Result};
use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;
use tokio::io::unix::{AsyncFd, AsyncFdReadyMutGuard};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Upper bound on how long a raised input flag waits to be acted on
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Reads per wakeup before yielding back to the other sources
const MAX_EVENT_READS_PER_WAKE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the display to settle the surface size
    Configuring,
    Active,
    Terminated,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Committed,
    Cancelled,
    DisplayClosed,
}

/// I/O sources the session loop multiplexes
pub struct SessionIo {
    pub listener: CommandListener,
    pub events: Option<EventStreamReader>,
    pub keys: Option<mpsc::UnboundedReceiver<KeyPress>>,
    pub signals: KeyboardSignals,
}

/// One switching session, from first draw to commit or cancel.
///
/// Every decision is a synchronous method; [`SwitcherSession::run`] only
/// waits for input and calls them.
pub struct SwitcherSession<D, O> {
    directory: D,
    overlay: O,
    config: OverlayConfig,
    initial_command: Command,
    state: SessionState,
    outcome: Option<SessionOutcome>,
    switcher: WindowSwitcher,
    surface: SurfaceSize,
    needs_redraw: bool,
    windows_dirty: bool,
}

impl<D: WindowDirectory, O: Overlay> SwitcherSession<D, O> {
    pub fn new(directory: D, overlay: O, config: OverlayConfig, initial_command: Command) -> Self {
        let surface = SurfaceSize {
            width: config.overlay_width,
            height: ui::overlay_height(0, &config),
        };

        SwitcherSession {
            directory,
            overlay,
            config,
            initial_command,
            state: SessionState::Configuring,
            outcome: None,
            switcher: WindowSwitcher::new(),
            surface,
            needs_redraw: false,
            windows_dirty: false,
        }
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome
    }

    #[cfg(test)]
    pub fn switcher(&self) -> &WindowSwitcher {
        &self.switcher
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Apply a size negotiated with the display.
    ///
    /// The first one loads the window list and starts the selection;
    /// later ones only adopt the new width.
    pub fn configure(&mut self, reported: SurfaceSize) {
        let size = ui::negotiated_size(reported, &self.config);

        match self.state {
            SessionState::Terminated => {}
            SessionState::Active => {
                self.surface.width = size.width;
                self.resize_to_fit();
                self.needs_redraw = true;
            }
            SessionState::Configuring => {
                self.surface = size;

                let windows = self.fetch_windows().unwrap_or_default();
                self.switcher = WindowSwitcher::start(windows);
                if self.initial_command == Command::CycleBackward {
                    let last = self.switcher.windows().len() as isize - 1;
                    self.switcher.set_selection(last, false);
                }

                self.resize_to_fit();
                self.state = SessionState::Active;
                self.needs_redraw = true;
                info!(
                    "Switcher active with {} windows, selection {:?}",
                    self.switcher.windows().len(),
                    self.switcher.cursor()
                );
            }
        }
    }

    /// Route a command from a helper invocation
    pub fn handle_command(&mut self, command: Command) {
        if self.is_terminated() {
            debug!("Ignoring {} after session end", command);
            return;
        }

        debug!("Handling {}", command);
        match command {
            Command::Cycle => self.cycle(true),
            Command::CycleBackward => self.cycle(false),
            Command::Commit => self.commit(),
            Command::Cancel => self.cancel(),
        }
    }

    /// Act on the input flags raised since the last check
    pub fn poll_input<S: InputSignals>(&mut self, signals: &mut S) {
        if self.state != SessionState::Active {
            return;
        }

        let chord = signals.chord_triggered();
        // A focus loss that comes with a chord is the compositor finishing
        // the switch, not the user leaving
        if signals.focus_lost() && !chord {
            info!("Overlay lost keyboard focus");
            self.cancel();
            return;
        }
        if signals.escape_pressed() {
            self.cancel();
            return;
        }
        if chord {
            self.cycle(!signals.shift_held());
        }
        if signals.modifier_released() {
            self.commit();
        }
    }

    pub fn handle_compositor_event(&mut self, event: CompositorEvent) {
        match event {
            CompositorEvent::OpenWindow { address, class, .. } => {
                debug!("Window {} ({}) opened", address, class);
                self.windows_dirty = true;
            }
            CompositorEvent::CloseWindow { address } => {
                debug!("Window {} closed", address);
                if self.switcher.forget_anchor_if(&address) {
                    info!("Window focused at session start was closed, cancel will not restore it");
                }
                self.windows_dirty = true;
            }
            CompositorEvent::ActiveWindow { class, .. } => {
                debug!("Active window is now {}", class);
            }
            CompositorEvent::MoveWindow {
                address,
                workspace_id,
            } => {
                debug!("Window {} moved to workspace {}", address, workspace_id);
            }
            CompositorEvent::Unknown { name } => debug!("Ignoring compositor event {}", name),
        }
    }

    pub fn refresh_if_dirty(&mut self) {
        if std::mem::take(&mut self.windows_dirty) {
            self.refresh();
        }
    }

    /// Re-fetch the directory, keeping the cursor on the same window.
    ///
    /// On failure the previous list stays.
    pub fn refresh(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        let Some(windows) = self.fetch_windows() else {
            return;
        };

        self.switcher.replace_windows(windows);
        self.resize_to_fit();
        self.needs_redraw = true;
        debug!(
            "Refreshed to {} windows, selection {:?}",
            self.switcher.windows().len(),
            self.switcher.cursor()
        );
    }

    /// Focus the selected window and end the session.
    ///
    /// Ends the session even when focusing fails.
    pub fn commit(&mut self) {
        if self.is_terminated() {
            return;
        }

        match self.switcher.selected() {
            Some(window) => {
                info!("Switching to {} ({})", window.display_name(), window.address);
                if self.directory.focus_window(window).is_none() {
                    warn!("Selected window could not be focused");
                }
            }
            None => debug!("Nothing selected, closing without a switch"),
        }

        self.terminate(SessionOutcome::Committed);
    }

    /// Restore the window that was focused at session start and end the session
    pub fn cancel(&mut self) {
        if self.is_terminated() {
            return;
        }

        match self.switcher.anchor_window() {
            Some(window) => {
                info!("Cancelled, restoring {} ({})", window.display_name(), window.address);
                if self.directory.focus_window(window).is_none() {
                    warn!("Original window could not be refocused");
                }
            }
            None if self.switcher.anchor().is_set() => {
                info!("Cancelled, original window is no longer listed so focus stays where it is")
            }
            None => info!("Cancelled, original window is gone so focus stays where it is"),
        }

        self.terminate(SessionOutcome::Cancelled);
    }

    /// The display dismissed the overlay; end without touching focus
    pub fn close(&mut self) {
        if !self.is_terminated() {
            info!("Overlay closed by the display");
            self.terminate(SessionOutcome::DisplayClosed);
        }
    }

    pub fn redraw_if_needed(&mut self) {
        if !std::mem::take(&mut self.needs_redraw) || self.state != SessionState::Active {
            return;
        }

        let labels: Vec<String> = self
            .switcher
            .windows()
            .iter()
            .map(|w| ui::truncate_title(w.display_name(), self.config.max_title_chars).into_owned())
            .collect();

        self.overlay.draw(&Frame {
            labels: &labels,
            selected: self.switcher.cursor(),
        });
    }

    fn cycle(&mut self, forward: bool) {
        if self.switcher.cycle(forward) {
            self.needs_redraw = true;
        }
    }

    fn fetch_windows(&mut self) -> Option<Vec<WindowRecord>> {
        match self.directory.list_windows() {
            Ok(mut windows) => {
                sort_by_focus_recency(&mut windows);
                Some(windows)
            }
            Err(e) => {
                warn!("Failed to list windows: {}", e);
                None
            }
        }
    }

    fn resize_to_fit(&mut self) {
        let size = SurfaceSize {
            width: self.surface.width,
            height: ui::overlay_height(self.switcher.windows().len(), &self.config),
        };
        self.surface = size;
        self.overlay.set_size(size);
    }

    fn terminate(&mut self, outcome: SessionOutcome) {
        debug!("Session terminated: {:?}", outcome);
        self.state = SessionState::Terminated;
        self.outcome = Some(outcome);
    }

    /// Run until the session terminates, then tear everything down.
    ///
    /// Teardown order: event stream, overlay, keyboard, command socket.
    pub async fn run(mut self, io: SessionIo) -> Result<SessionOutcome> {
        info!("Starting switcher session");

        let SessionIo {
            listener,
            events,
            mut keys,
            mut signals,
        } = io;

        let listener = AsyncFd::new(listener).context("Failed to watch the command socket")?;
        let mut events = match events.map(AsyncFd::new).transpose() {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to watch Hyprland events, polling instead: {}", e);
                None
            }
        };

        let mut input_tick = time::interval(INPUT_POLL_INTERVAL);
        input_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period = self.config.refresh_interval;
        let mut poll_tick = time::interval_at(Instant::now() + period, period);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        while !self.is_terminated() {
            if let Some(size) = self.overlay.take_configure() {
                self.configure(size);
            }
            while let Some(change) = self.overlay.take_focus_change() {
                let event = match change {
                    FocusChange::Entered => KeyEvent::FocusEntered,
                    FocusChange::Left => KeyEvent::FocusLeft,
                };
                signals.handle(KeyPress::now(event));
            }
            if self.overlay.is_closed() {
                self.close();
                break;
            }
            self.poll_input(&mut signals);
            if self.is_terminated() {
                break;
            }
            self.refresh_if_dirty();
            self.redraw_if_needed();

            tokio::select! {
                ready = listener.readable() => {
                    let mut guard = ready.context("Command socket failed")?;
                    self.accept_commands(guard.get_inner());
                    guard.clear_ready();
                }
                ready = readable_mut(&mut events) => {
                    let mut guard = ready.context("Event socket failed")?;
                    let closed = self.drain_events(&mut guard);
                    drop(guard);
                    if closed {
                        warn!("Hyprland event stream ended, polling every {:?}", period);
                        events = None;
                    }
                }
                press = recv_key(&mut keys) => match press {
                    Some(press) => signals.handle(press),
                    None => {
                        warn!("Keyboard monitor stopped, relying on switcher commands");
                        keys = None;
                    }
                },
                _ = input_tick.tick() => {}
                _ = poll_tick.tick(), if events.is_none() => {
                    self.refresh();
                }
                _ = sigint.recv() => {
                    info!("Interrupted");
                    self.cancel();
                }
                _ = sigterm.recv() => {
                    info!("Terminated by signal");
                    self.cancel();
                }
            }
        }

        drop(events);
        self.overlay.release();
        drop(keys);
        drop(signals);

        let mut listener = listener.into_inner();
        listener.cleanup();

        let outcome = self.outcome().unwrap_or(SessionOutcome::Cancelled);
        info!("Switcher session finished: {:?}", outcome);
        Ok(outcome)
    }

    /// Serve every pending helper connection, stopping after a terminal command
    fn accept_commands(&mut self, listener: &CommandListener) {
        loop {
            let mut stream = match listener.accept_one() {
                Ok(Some(stream)) => stream,
                Ok(None) => return,
                Err(e) => {
                    warn!("Failed to accept switcher client: {}", e);
                    return;
                }
            };

            match socket_server::read_command(&mut stream) {
                Some(Ok(command)) => self.handle_command(command),
                Some(Err(_)) | None => {}
            }
            if self.is_terminated() {
                return;
            }
        }
    }

    /// Feed every complete event line to the session, then refresh once.
    ///
    /// Returns true when the stream is gone.
    fn drain_events(&mut self, guard: &mut AsyncFdReadyMutGuard<'_, EventStreamReader>) -> bool {
        for _ in 0..MAX_EVENT_READS_PER_WAKE {
            let reader = guard.get_inner_mut();
            match reader.read_event() {
                ReadStatus::Event(event) => {
                    self.handle_compositor_event(event);
                    while reader.has_pending() {
                        match reader.next_buffered() {
                            Some(event) => self.handle_compositor_event(event),
                            None => break,
                        }
                    }
                }
                ReadStatus::Partial => {}
                ReadStatus::Idle => {
                    guard.clear_ready();
                    break;
                }
                ReadStatus::Closed => return true,
            }
        }

        self.refresh_if_dirty();
        false
    }
}

async fn readable_mut<T: AsRawFd>(
    fd: &mut Option<AsyncFd<T>>,
) -> io::Result<AsyncFdReadyMutGuard<'_, T>> {
    match fd {
        Some(fd) => fd.readable_mut().await,
        None => std::future::pending().await,
    }
}

async fn recv_key(keys: &mut Option<mpsc::UnboundedReceiver<KeyPress>>) -> Option<KeyPress> {
    match keys {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
