//! Overlay presentation.
//!
//! The session only needs a surface it can size, draw a list on and
//! release. [`TerminalOverlay`] renders that list as text on stderr.

use crate::config::OverlayConfig;
use std::borrow::Cow;
use std::io::{self, Write};
use std::ops::Range;
use tracing::{debug, warn};

/// Tallest surface the overlay will ask for
pub const MAX_SURFACE_HEIGHT: u32 = 4096;

const ELLIPSIS: char = '…';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

/// Everything needed to paint one frame
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub labels: &'a [String],
    pub selected: Option<usize>,
}

/// Keyboard focus transition of the overlay surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Entered,
    Left,
}

/// Display surface the session draws into
pub trait Overlay {
    /// Size the display settled on, reported once per negotiation
    fn take_configure(&mut self) -> Option<SurfaceSize>;

    /// Next keyboard focus transition since the last call
    fn take_focus_change(&mut self) -> Option<FocusChange>;

    /// Ask the display for a new size
    fn set_size(&mut self, size: SurfaceSize);

    fn draw(&mut self, frame: &Frame<'_>);

    /// The display dismissed the surface
    fn is_closed(&self) -> bool;

    fn release(&mut self);
}

/// Surface height for `count` rows: all rows plus padding, never less than
/// one row and never more than [`MAX_SURFACE_HEIGHT`].
pub fn overlay_height(count: usize, config: &OverlayConfig) -> u32 {
    let visible = match config.max_visible_items {
        0 => count,
        max => count.min(max),
    };
    let visible = u32::try_from(visible).unwrap_or(u32::MAX);
    let chrome = config.padding.saturating_mul(2);
    let min = config.item_height.saturating_add(chrome);

    visible
        .saturating_mul(config.item_height)
        .saturating_add(chrome)
        .clamp(min, MAX_SURFACE_HEIGHT.max(min))
}

/// A zero dimension from the display means "pick your own"
pub fn negotiated_size(reported: SurfaceSize, config: &OverlayConfig) -> SurfaceSize {
    SurfaceSize {
        width: if reported.width == 0 {
            config.overlay_width
        } else {
            reported.width
        },
        height: if reported.height == 0 {
            config.item_height
        } else {
            reported.height
        },
    }
}

/// Cut `s` to `max_chars` characters, the last one being an ellipsis
pub fn truncate_title(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }

    let mut truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push(ELLIPSIS);
    Cow::Owned(truncated)
}

/// Rows to show so the selection stays in view
pub fn visible_range(len: usize, selected: Option<usize>, max_visible: usize) -> Range<usize> {
    if max_visible == 0 || len <= max_visible {
        return 0..len;
    }

    let selected = selected.unwrap_or(0).min(len - 1);
    let start = selected.saturating_sub(max_visible - 1).min(len - max_visible);
    start..start + max_visible
}

/// Text rendering of the overlay
pub struct TerminalOverlay<W: Write> {
    out: W,
    pending_configure: Option<SurfaceSize>,
    size: SurfaceSize,
    max_visible_items: usize,
    show_index: bool,
    released: bool,
}

impl TerminalOverlay<io::Stderr> {
    pub fn stderr(config: &OverlayConfig) -> Self {
        Self::new(io::stderr(), config)
    }
}

impl<W: Write> TerminalOverlay<W> {
    pub fn new(out: W, config: &OverlayConfig) -> Self {
        TerminalOverlay {
            out,
            // Width only; the height follows from the window count
            pending_configure: Some(SurfaceSize {
                width: config.overlay_width,
                height: 0,
            }),
            size: SurfaceSize {
                width: config.overlay_width,
                height: overlay_height(1, config),
            },
            max_visible_items: config.max_visible_items,
            show_index: config.show_index,
            released: false,
        }
    }

    fn render(&mut self, frame: &Frame<'_>) -> io::Result<()> {
        writeln!(self.out, "\n=== Window Switcher ===")?;

        if frame.labels.is_empty() {
            writeln!(self.out, "    No windows")?;
        }

        let range = visible_range(frame.labels.len(), frame.selected, self.max_visible_items);
        for i in range {
            let marker = if Some(i) == frame.selected { ">>>" } else { "   " };
            if self.show_index {
                writeln!(self.out, "{} {:>2}. {}", marker, i + 1, frame.labels[i])?;
            } else {
                writeln!(self.out, "{} {}", marker, frame.labels[i])?;
            }
        }

        writeln!(self.out, "=======================")?;
        self.out.flush()
    }
}

impl<W: Write> Overlay for TerminalOverlay<W> {
    fn take_configure(&mut self) -> Option<SurfaceSize> {
        self.pending_configure.take()
    }

    // A terminal never holds the keyboard focus of its own
    fn take_focus_change(&mut self) -> Option<FocusChange> {
        None
    }

    fn set_size(&mut self, size: SurfaceSize) {
        if size != self.size {
            debug!("Overlay resized to {}x{}", size.width, size.height);
            self.size = size;
        }
    }

    fn draw(&mut self, frame: &Frame<'_>) {
        if self.released {
            return;
        }
        if let Err(e) = self.render(frame) {
            warn!("Failed to draw overlay: {}", e);
        }
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.out.flush();
            debug!("Overlay released");
        }
    }
}
