use anyhow::{Context, Result};
use evdev::{Device, InputEventKind, Key};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Focus loss this soon after the modifier went down counts as a chord
const CHORD_INFERENCE_WINDOW_MS: u64 = 500;

/// Input conditions the session checks once per loop iteration.
///
/// Everything except `shift_held` is one-shot: reading a raised flag
/// clears it.
pub trait InputSignals {
    fn escape_pressed(&mut self) -> bool;
    fn chord_triggered(&mut self) -> bool;
    fn modifier_released(&mut self) -> bool;
    fn focus_lost(&mut self) -> bool;
    fn shift_held(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    ModifierPressed,
    ModifierReleased,
    CycleKeyPressed,
    EscapePressed,
    ShiftPressed,
    ShiftReleased,
    FocusEntered,
    FocusLeft,
}

/// A key transition with its timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub event: KeyEvent,
    pub time_ms: u64,
}

impl KeyPress {
    /// Stamp `event` with the wall clock, the same clock evdev reports
    pub fn now(event: KeyEvent) -> Self {
        KeyPress {
            event,
            time_ms: millis_since_epoch(SystemTime::now()),
        }
    }
}

/// Turns key transitions into the flags of [`InputSignals`]
#[derive(Debug, Default)]
pub struct KeyboardSignals {
    modifier_down: bool,
    shift_down: bool,
    last_modifier_press_ms: Option<u64>,
    escape: bool,
    chord: bool,
    released: bool,
    focus_lost: bool,
}

impl KeyboardSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from keys already held when the monitor attached
    pub fn with_held(modifier_down: bool, shift_down: bool) -> Self {
        KeyboardSignals {
            modifier_down,
            shift_down,
            ..Self::default()
        }
    }

    pub fn handle(&mut self, press: KeyPress) {
        debug!("Key event: {:?}", press.event);

        match press.event {
            KeyEvent::ModifierPressed => {
                self.modifier_down = true;
                self.last_modifier_press_ms = Some(press.time_ms);
            }
            KeyEvent::ModifierReleased => {
                // Also raised when the press happened before we attached
                self.modifier_down = false;
                self.released = true;
            }
            KeyEvent::CycleKeyPressed => {
                if self.modifier_down {
                    self.chord = true;
                }
            }
            KeyEvent::EscapePressed => self.escape = true,
            KeyEvent::ShiftPressed => self.shift_down = true,
            KeyEvent::ShiftReleased => self.shift_down = false,
            KeyEvent::FocusEntered => self.modifier_down = false,
            KeyEvent::FocusLeft => {
                let recent = self
                    .last_modifier_press_ms
                    .is_some_and(|t| press.time_ms.saturating_sub(t) < CHORD_INFERENCE_WINDOW_MS);
                if recent {
                    debug!("Focus left right after the modifier went down, treating as chord");
                    self.chord = true;
                }
                self.focus_lost = true;
                self.modifier_down = false;
            }
        }
    }
}

impl InputSignals for KeyboardSignals {
    fn escape_pressed(&mut self) -> bool {
        std::mem::take(&mut self.escape)
    }

    fn chord_triggered(&mut self) -> bool {
        std::mem::take(&mut self.chord)
    }

    fn modifier_released(&mut self) -> bool {
        std::mem::take(&mut self.released)
    }

    fn focus_lost(&mut self) -> bool {
        std::mem::take(&mut self.focus_lost)
    }

    fn shift_held(&self) -> bool {
        self.shift_down
    }
}

/// Map a raw evdev key transition. Value 1 is press, 0 release; repeats are ignored.
pub fn map_key(key: Key, value: i32) -> Option<KeyEvent> {
    match (key, value) {
        (Key::KEY_LEFTALT | Key::KEY_RIGHTALT, 1) => Some(KeyEvent::ModifierPressed),
        (Key::KEY_LEFTALT | Key::KEY_RIGHTALT, 0) => Some(KeyEvent::ModifierReleased),
        (Key::KEY_TAB, 1) => Some(KeyEvent::CycleKeyPressed),
        (Key::KEY_ESC, 1) => Some(KeyEvent::EscapePressed),
        (Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT, 1) => Some(KeyEvent::ShiftPressed),
        (Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT, 0) => Some(KeyEvent::ShiftReleased),
        _ => None,
    }
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Raw keyboard device read through evdev.
///
/// Only used when the user asks for it; the compositor binds already
/// deliver cycle commands otherwise.
pub struct KeyboardMonitor {
    device: Device,
}

impl KeyboardMonitor {
    /// Open `path`, or the first device that has Alt, Tab, Shift and Esc
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let device = match path {
            Some(path) => Device::open(path)
                .with_context(|| format!("Failed to open keyboard device {}", path.display()))?,
            None => Self::find_keyboard_device().context(
                "Failed to find keyboard device (is your user in the 'input' group?)",
            )?,
        };

        info!("Using keyboard device: {:?}", device.name());
        Ok(KeyboardMonitor { device })
    }

    /// Find a suitable keyboard device from /dev/input/event*
    fn find_keyboard_device() -> Result<Device> {
        for (path, device) in evdev::enumerate() {
            if let Some(keys) = device.supported_keys() {
                if keys.contains(Key::KEY_LEFTALT)
                    && keys.contains(Key::KEY_TAB)
                    && keys.contains(Key::KEY_LEFTSHIFT)
                    && keys.contains(Key::KEY_ESC)
                {
                    debug!("Found suitable keyboard {:?} at {}", device.name(), path.display());
                    return Ok(device);
                }
            }
        }

        anyhow::bail!(
            "No suitable keyboard device found. Make sure you have permission to read /dev/input/event* devices."
        )
    }

    /// Signals seeded with the modifier and shift keys currently held
    pub fn initial_signals(&self) -> KeyboardSignals {
        match self.device.get_key_state() {
            Ok(held) => KeyboardSignals::with_held(
                held.contains(Key::KEY_LEFTALT) || held.contains(Key::KEY_RIGHTALT),
                held.contains(Key::KEY_LEFTSHIFT) || held.contains(Key::KEY_RIGHTSHIFT),
            ),
            Err(e) => {
                warn!("Could not read held keys: {}", e);
                KeyboardSignals::new()
            }
        }
    }

    /// Read key events on a dedicated thread until the receiver is dropped
    pub fn spawn(self) -> Result<mpsc::UnboundedReceiver<KeyPress>> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("keyboard-monitor".to_string())
            .spawn(move || {
                if let Err(e) = self.monitor_blocking(tx) {
                    warn!("Keyboard monitor stopped: {:#}", e);
                }
            })
            .context("Failed to start keyboard monitor thread")?;
        Ok(rx)
    }

    fn monitor_blocking(mut self, tx: mpsc::UnboundedSender<KeyPress>) -> Result<()> {
        info!("Starting keyboard monitoring");

        loop {
            match self.device.fetch_events() {
                Ok(events) => {
                    for event in events {
                        let InputEventKind::Key(key) = event.kind() else {
                            continue;
                        };
                        let Some(key_event) = map_key(key, event.value()) else {
                            continue;
                        };

                        let press = KeyPress {
                            event: key_event,
                            time_ms: millis_since_epoch(event.timestamp()),
                        };
                        if tx.send(press).is_err() {
                            debug!("Session ended, stopping keyboard monitor");
                            return Ok(());
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(signals: &mut KeyboardSignals, event: KeyEvent, time_ms: u64) {
        signals.handle(KeyPress { event, time_ms });
    }

    #[test]
    fn test_focus_left_stamped_now_after_modifier_is_chord() {
        let mut signals = KeyboardSignals::new();
        signals.handle(KeyPress::now(KeyEvent::ModifierPressed));
        signals.handle(KeyPress::now(KeyEvent::FocusLeft));

        assert!(signals.chord_triggered());
        assert!(signals.focus_lost());
    }

    #[test]
    fn test_chord_requires_modifier() {
        let mut signals = KeyboardSignals::new();

        press(&mut signals, KeyEvent::CycleKeyPressed, 10);
        assert!(!signals.chord_triggered());

        press(&mut signals, KeyEvent::ModifierPressed, 20);
        press(&mut signals, KeyEvent::CycleKeyPressed, 30);
        assert!(signals.chord_triggered());
    }

    #[test]
    fn test_flags_are_one_shot() {
        let mut signals = KeyboardSignals::new();
        press(&mut signals, KeyEvent::EscapePressed, 0);

        assert!(signals.escape_pressed());
        assert!(!signals.escape_pressed());
    }

    #[test]
    fn test_modifier_release() {
        let mut signals = KeyboardSignals::new();
        press(&mut signals, KeyEvent::ModifierPressed, 0);
        assert!(!signals.modifier_released());

        press(&mut signals, KeyEvent::ModifierReleased, 100);
        assert!(signals.modifier_released());
        assert!(!signals.modifier_released());
    }

    #[test]
    fn test_release_of_modifier_held_before_attach() {
        let mut signals = KeyboardSignals::with_held(true, false);
        press(&mut signals, KeyEvent::CycleKeyPressed, 5);
        assert!(signals.chord_triggered());

        press(&mut signals, KeyEvent::ModifierReleased, 10);
        assert!(signals.modifier_released());
    }

    #[test]
    fn test_shift_is_level_triggered() {
        let mut signals = KeyboardSignals::new();
        press(&mut signals, KeyEvent::ShiftPressed, 0);
        assert!(signals.shift_held());
        assert!(signals.shift_held());

        press(&mut signals, KeyEvent::ShiftReleased, 1);
        assert!(!signals.shift_held());
    }

    #[test]
    fn test_focus_left_soon_after_modifier_is_chord() {
        let mut signals = KeyboardSignals::new();
        press(&mut signals, KeyEvent::ModifierPressed, 1_000);
        press(&mut signals, KeyEvent::FocusLeft, 1_200);

        assert!(signals.chord_triggered());
        assert!(signals.focus_lost());
    }

    #[test]
    fn test_focus_left_long_after_modifier_is_not_chord() {
        let mut signals = KeyboardSignals::new();
        press(&mut signals, KeyEvent::ModifierPressed, 1_000);
        press(&mut signals, KeyEvent::FocusLeft, 1_600);

        assert!(!signals.chord_triggered());
        assert!(signals.focus_lost());
    }

    #[test]
    fn test_focus_enter_resets_modifier() {
        let mut signals = KeyboardSignals::new();
        press(&mut signals, KeyEvent::ModifierPressed, 0);
        press(&mut signals, KeyEvent::FocusEntered, 1);
        press(&mut signals, KeyEvent::CycleKeyPressed, 2);

        assert!(!signals.chord_triggered());
    }

    #[test]
    fn test_map_key() {
        assert_eq!(map_key(Key::KEY_LEFTALT, 1), Some(KeyEvent::ModifierPressed));
        assert_eq!(map_key(Key::KEY_RIGHTALT, 0), Some(KeyEvent::ModifierReleased));
        assert_eq!(map_key(Key::KEY_TAB, 1), Some(KeyEvent::CycleKeyPressed));
        assert_eq!(map_key(Key::KEY_TAB, 2), None);
        assert_eq!(map_key(Key::KEY_ESC, 1), Some(KeyEvent::EscapePressed));
        assert_eq!(map_key(Key::KEY_A, 1), None);
    }
}
