use crate::ipc::Command;
use clap::Parser;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Parser)]
#[command(name = "hyprswitcher")]
#[command(about = "Alt-Tab style window switcher overlay for Hyprland", long_about = None)]
pub struct Cli {
    /// Cycle to the previous window instead of the next one
    #[arg(short, long, conflicts_with_all = ["commit", "cancel"])]
    pub backward: bool,

    /// Focus the selected window and close the switcher
    #[arg(short, long, conflicts_with = "cancel")]
    pub commit: bool,

    /// Close the switcher and restore the original window
    #[arg(short = 'x', long)]
    pub cancel: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Read overlay settings from this file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Watch the keyboard directly (needs read access to /dev/input)
    #[arg(long)]
    pub keyboard: bool,

    /// Keyboard device to watch instead of auto-detecting one
    #[arg(long, value_name = "PATH", requires = "keyboard")]
    pub device: Option<PathBuf>,
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }

    /// The command this invocation sends, CYCLE when no flag is given
    pub fn command(&self) -> Command {
        if self.commit {
            Command::Commit
        } else if self.cancel {
            Command::Cancel
        } else if self.backward {
            Command::CycleBackward
        } else {
            Command::Cycle
        }
    }
}

/// Overlay geometry and behaviour read from the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    pub overlay_width: u32,
    pub item_height: u32,
    pub padding: u32,
    /// 0 shows every window
    pub max_visible_items: usize,
    pub max_title_chars: usize,
    pub show_index: bool,
    /// Directory poll period while the event stream is unavailable
    pub refresh_interval: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            overlay_width: 600,
            item_height: 48,
            padding: 16,
            max_visible_items: 12,
            max_title_chars: 48,
            show_index: false,
            refresh_interval: Duration::from_millis(2000),
        }
    }
}

impl OverlayConfig {
    /// `$XDG_CONFIG_HOME/hyprswitcher/config`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hyprswitcher").join("config"))
    }

    /// Load `path`, or the default location. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Self::default(),
            },
        };

        match fs::read_to_string(&path) {
            Ok(contents) => {
                debug!("Loaded config from {}", path.display());
                Self::parse(&contents)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Failed to read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse `KEY=VALUE` lines. Comments, unknown keys and out-of-range
    /// values are ignored.
    pub fn parse(contents: &str) -> Self {
        let mut config = Self::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!("Ignoring config line without '=': {}", line);
                continue;
            };
            config.apply(key.trim(), value.trim());
        }

        config
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "overlay_width" | "width" => {
                if let Some(v) = parse_in_range(key, value, 200, 2000) {
                    self.overlay_width = v;
                }
            }
            "item_height" => {
                if let Some(v) = parse_in_range(key, value, 20, 200) {
                    self.item_height = v;
                }
            }
            "padding" => {
                if let Some(v) = parse_in_range(key, value, 0, 100) {
                    self.padding = v;
                }
            }
            "max_visible_items" | "max_items" => {
                if let Some(v) = parse_in_range(key, value, 0, 50) {
                    self.max_visible_items = v as usize;
                }
            }
            "max_title_chars" => {
                if let Some(v) = parse_in_range(key, value, 4, 256) {
                    self.max_title_chars = v as usize;
                }
            }
            "show_index" => match parse_bool(value) {
                Some(v) => self.show_index = v,
                None => warn!("Ignoring {}={}: expected a boolean", key, value),
            },
            "refresh_interval_ms" => {
                if let Some(v) = parse_in_range(key, value, 100, 60_000) {
                    self.refresh_interval = Duration::from_millis(u64::from(v));
                }
            }
            // Styling belongs to the renderer
            "font" | "font_size" | "background_color" | "text_color" | "highlight_color"
            | "border_color" | "border_width" | "corner_radius" | "show_icons" => {
                debug!("Ignoring renderer setting {}", key);
            }
            _ => debug!("Ignoring unknown config key {}", key),
        }
    }
}

fn parse_in_range(key: &str, value: &str, min: u32, max: u32) -> Option<u32> {
    match value.parse::<u32>() {
        Ok(v) if (min..=max).contains(&v) => Some(v),
        Ok(v) => {
            warn!("Ignoring {}={}: must be between {} and {}", key, v, min, max);
            None
        }
        Err(_) => {
            warn!("Ignoring {}={}: not a number", key, value);
            None
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
