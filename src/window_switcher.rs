//! Selection state of one switching session.
//!
//! Holds the recency-sorted window list, the cursor and the anchor (the
//! window that had focus when the session started, restored on cancel).

use crate::window_manager::{WindowAddress, WindowRecord};
use tracing::debug;

/// Window that had focus when the session started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAnchor {
    index: Option<usize>,
    address: Option<WindowAddress>,
}

impl SessionAnchor {
    pub fn is_set(&self) -> bool {
        self.index.is_some() || self.address.is_some()
    }
}

/// Manages the window list and current selection during a session.
#[derive(Debug, Default)]
pub struct WindowSwitcher {
    windows: Vec<WindowRecord>,
    cursor: Option<usize>,
    selected_address: Option<WindowAddress>,
    anchor: SessionAnchor,
}

impl WindowSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a session over `windows`, which must already be recency sorted.
    ///
    /// The first window becomes the anchor. The cursor starts on the second
    /// window so a single cycle-and-commit switches to the previous window.
    pub fn start(windows: Vec<WindowRecord>) -> Self {
        let anchor = match windows.first() {
            Some(first) => SessionAnchor {
                index: Some(0),
                address: Some(first.address.clone()),
            },
            None => SessionAnchor::default(),
        };
        let initial = if windows.len() >= 2 { 1 } else { 0 };

        let mut switcher = WindowSwitcher {
            windows,
            cursor: None,
            selected_address: None,
            anchor,
        };
        switcher.set_selection(initial, false);
        switcher
    }

    pub fn windows(&self) -> &[WindowRecord] {
        &self.windows
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn selected(&self) -> Option<&WindowRecord> {
        self.cursor.and_then(|i| self.windows.get(i))
    }

    pub fn anchor(&self) -> &SessionAnchor {
        &self.anchor
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Move the cursor to `index`.
    ///
    /// Out of range, `wrap` sends any negative index to the last window and
    /// any index at or past `len` to the first. That only models a one-step
    /// overshoot, which is all `cycle` produces; it is not modular
    /// arithmetic. Without `wrap` the index is clamped. The remembered
    /// address is always recomputed. Returns whether the cursor index changed.
    pub fn set_selection(&mut self, index: isize, wrap: bool) -> bool {
        let previous = self.cursor;

        self.cursor = match self.windows.len() {
            0 => None,
            len => {
                let last = len - 1;
                Some(if index < 0 {
                    if wrap { last } else { 0 }
                } else if index.unsigned_abs() > last {
                    if wrap { 0 } else { last }
                } else {
                    index.unsigned_abs()
                })
            }
        };
        self.selected_address = self.selected().map(|w| w.address.clone());

        let changed = previous != self.cursor;
        if changed {
            debug!(
                "Selection {:?} -> {:?} ({:?})",
                previous, self.cursor, self.selected_address
            );
        }
        changed
    }

    /// Step the cursor one window, wrapping at both ends.
    ///
    /// Returns whether the selection moved.
    pub fn cycle(&mut self, forward: bool) -> bool {
        if self.is_empty() {
            return false;
        }

        let current = self.cursor.map_or(-1, |c| c as isize);
        let target = if forward { current + 1 } else { current - 1 };
        self.set_selection(target, true)
    }

    /// Swap in a fresh window list, keeping the cursor on the same window.
    ///
    /// The selected address is looked up first; if that window is gone the
    /// previous index is clamped into the new list.
    pub fn replace_windows(&mut self, windows: Vec<WindowRecord>) {
        let previous = self.cursor;
        let wanted = self.selected_address.take();
        self.windows = windows;

        let relocated = wanted
            .as_ref()
            .and_then(|address| self.position_of(address));
        match relocated {
            Some(index) => self.set_selection(index as isize, false),
            None => self.set_selection(previous.map_or(-1, |c| c as isize), false),
        };
    }

    /// Clear the anchor if it refers to `address`. Returns whether it did.
    pub fn forget_anchor_if(&mut self, address: &WindowAddress) -> bool {
        if self.anchor.address.as_ref() != Some(address) {
            return false;
        }
        debug!("Session anchor {} closed", address);
        self.anchor = SessionAnchor::default();
        true
    }

    /// The anchor window in the current list, by address then by index
    pub fn anchor_window(&self) -> Option<&WindowRecord> {
        if let Some(window) = self
            .anchor
            .address
            .as_ref()
            .and_then(|address| self.position_of(address))
            .and_then(|i| self.windows.get(i))
        {
            return Some(window);
        }
        self.anchor.index.and_then(|i| self.windows.get(i))
    }

    fn position_of(&self, address: &WindowAddress) -> Option<usize> {
        self.windows.iter().position(|w| &w.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_window(address: &str) -> WindowRecord {
        WindowRecord {
            address: WindowAddress::new(address),
            title: format!("title-{}", address),
            app_class: Some(format!("app-{}", address)),
            workspace_id: 1,
            pid: 1,
            focus_history_id: -1,
            focused: false,
        }
    }

    fn make_windows(addresses: &[&str]) -> Vec<WindowRecord> {
        addresses.iter().map(|a| make_window(a)).collect()
    }

    fn selected(switcher: &WindowSwitcher) -> &str {
        switcher.selected().unwrap().address.as_str()
    }

    #[test]
    fn test_start_empty() {
        let switcher = WindowSwitcher::start(vec![]);
        assert!(switcher.is_empty());
        assert_eq!(switcher.cursor(), None);
        assert!(switcher.selected().is_none());
        assert!(!switcher.anchor().is_set());
    }

    #[test]
    fn test_start_single_window() {
        let switcher = WindowSwitcher::start(make_windows(&["0xa"]));
        assert_eq!(switcher.cursor(), Some(0));
        assert_eq!(switcher.anchor.index, Some(0));
    }

    #[test]
    fn test_start_at_previous_window() {
        let switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));
        assert_eq!(switcher.cursor(), Some(1));
        assert_eq!(selected(&switcher), "0xb");
        assert_eq!(switcher.selected_address.as_ref().unwrap().as_str(), "0xb");
        assert_eq!(switcher.anchor.address.as_ref().unwrap().as_str(), "0xa");
    }

    #[test]
    fn test_cycle_forward_wraps() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));

        assert!(switcher.cycle(true));
        assert_eq!(switcher.cursor(), Some(2));
        assert!(switcher.cycle(true)); // Wrap around
        assert_eq!(switcher.cursor(), Some(0));
    }

    #[test]
    fn test_cycle_backward_wraps() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));

        assert!(switcher.cycle(false));
        assert_eq!(switcher.cursor(), Some(0));
        assert!(switcher.cycle(false)); // Wrap to end
        assert_eq!(switcher.cursor(), Some(2));
    }

    #[test]
    fn test_cycle_returns_to_start_after_full_turn() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc", "0xd"]));
        let start = switcher.cursor();

        for _ in 0..4 {
            switcher.cycle(true);
        }
        assert_eq!(switcher.cursor(), start);

        for _ in 0..4 {
            switcher.cycle(false);
        }
        assert_eq!(switcher.cursor(), start);
    }

    #[test]
    fn test_cycle_single_window_is_noop() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa"]));
        assert!(!switcher.cycle(true));
        assert!(!switcher.cycle(false));
        assert_eq!(switcher.cursor(), Some(0));
    }

    #[test]
    fn test_cycle_empty() {
        let mut switcher = WindowSwitcher::new();
        assert!(!switcher.cycle(true));
        assert_eq!(switcher.cursor(), None);
    }

    #[test]
    fn test_set_selection_clamps_without_wrap() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));

        switcher.set_selection(7, false);
        assert_eq!(switcher.cursor(), Some(2));
        switcher.set_selection(-1, false);
        assert_eq!(switcher.cursor(), Some(0));
    }

    #[test]
    fn test_set_selection_wrap_jumps_to_the_far_end() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));

        switcher.set_selection(-5, true);
        assert_eq!(switcher.cursor(), Some(2));
        switcher.set_selection(9, true);
        assert_eq!(switcher.cursor(), Some(0));
    }

    #[test]
    fn test_set_selection_unchanged_index_reports_no_change() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb"]));
        assert!(!switcher.set_selection(1, false));
        assert_eq!(switcher.selected_address.as_ref().unwrap().as_str(), "0xb");
    }

    #[test]
    fn test_replace_keeps_selection_on_same_window() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));
        switcher.cycle(true);
        assert_eq!(selected(&switcher), "0xc");

        switcher.replace_windows(make_windows(&["0xa", "0xc", "0xd"]));

        assert_eq!(switcher.cursor(), Some(1));
        assert_eq!(selected(&switcher), "0xc");
    }

    #[test]
    fn test_replace_falls_back_to_clamped_index() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));
        switcher.cycle(true);
        assert_eq!(switcher.cursor(), Some(2));

        switcher.replace_windows(make_windows(&["0xa", "0xb"]));

        assert_eq!(switcher.cursor(), Some(1));
        assert_eq!(selected(&switcher), "0xb");
    }

    #[test]
    fn test_replace_when_selected_window_closed() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));
        assert_eq!(selected(&switcher), "0xb");

        switcher.replace_windows(make_windows(&["0xa", "0xc", "0xd"]));

        assert_eq!(switcher.cursor(), Some(1));
        assert_eq!(selected(&switcher), "0xc");
    }

    #[test]
    fn test_replace_with_empty_list() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb"]));
        switcher.replace_windows(vec![]);
        assert_eq!(switcher.cursor(), None);
        assert!(switcher.selected_address.is_none());
    }

    #[test]
    fn test_replace_into_previously_empty_list() {
        let mut switcher = WindowSwitcher::start(vec![]);
        switcher.replace_windows(make_windows(&["0xa", "0xb"]));
        assert_eq!(switcher.cursor(), Some(0));
    }

    #[test]
    fn test_anchor_found_by_address_after_reorder() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb", "0xc"]));
        switcher.replace_windows(make_windows(&["0xn", "0xb", "0xa"]));

        assert_eq!(switcher.anchor_window().unwrap().address.as_str(), "0xa");
    }

    #[test]
    fn test_anchor_falls_back_to_index() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb"]));
        // Anchor vanished without a close notification
        switcher.replace_windows(make_windows(&["0xb", "0xc"]));

        assert_eq!(switcher.anchor_window().unwrap().address.as_str(), "0xb");
    }

    #[test]
    fn test_forget_anchor_only_for_matching_address() {
        let mut switcher = WindowSwitcher::start(make_windows(&["0xa", "0xb"]));

        assert!(!switcher.forget_anchor_if(&WindowAddress::new("0xb")));
        assert!(switcher.anchor().is_set());

        assert!(switcher.forget_anchor_if(&WindowAddress::new("0xa")));
        assert!(!switcher.anchor().is_set());
        assert!(switcher.anchor_window().is_none());
    }
}
