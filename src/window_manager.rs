use serde::{Deserialize, Deserializer};
use std::fmt;
use tracing::debug;

/// Title shown for windows whose compositor title is empty
pub const UNTITLED: &str = "(untitled)";

/// Compositor handle of a window, e.g. `0x5c4fe19a0`.
///
/// Stable for the lifetime of the window, so it is the identity used to
/// keep the selection on the same window across directory refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowAddress(String);

impl WindowAddress {
    pub fn new(raw: impl Into<String>) -> Self {
        WindowAddress(raw.into())
    }

    /// The event socket sends addresses without the `0x` prefix the
    /// control socket uses.
    pub fn from_event_token(token: &str) -> Self {
        WindowAddress(format!("0x{}", token.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x` followed by at least one hex digit and nothing else
    pub fn is_well_formed(&self) -> bool {
        self.0
            .strip_prefix("0x")
            .is_some_and(|hex| !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

impl fmt::Display for WindowAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One open window as reported by the compositor's `j/clients` query.
///
/// Records are never edited after construction; a refresh replaces the
/// whole list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub address: WindowAddress,
    pub title: String,
    pub app_class: Option<String>,
    pub workspace_id: i32,
    pub pid: i32,
    /// 0 = focused right now, -1 = unknown, n = n-th most recent
    pub focus_history_id: i32,
    pub focused: bool,
}

impl WindowRecord {
    /// Map one entry of the clients array.
    ///
    /// Returns `Ok(None)` for entries that carry no address, since they
    /// cannot be focused or tracked.
    pub fn from_client_json(value: serde_json::Value) -> serde_json::Result<Option<Self>> {
        let raw: RawClient = serde_json::from_value(value)?;

        let Some(address) = raw.address else {
            debug!("Skipping client entry without an address");
            return Ok(None);
        };

        let title = match raw.title {
            Some(title) if !title.is_empty() => title,
            _ => UNTITLED.to_string(),
        };
        let focus_history_id = raw.focus_history_id.unwrap_or(-1);

        Ok(Some(WindowRecord {
            address: WindowAddress::new(address),
            title,
            app_class: raw.class.or(raw.initial_class),
            workspace_id: raw.workspace.and_then(RawWorkspace::id).unwrap_or(-1),
            pid: raw.pid.unwrap_or(-1),
            focus_history_id,
            focused: focus_history_id == 0,
        }))
    }

    /// Label for the overlay: the app class when known, otherwise the title
    pub fn display_name(&self) -> &str {
        match self.app_class.as_deref() {
            Some(class) if !class.is_empty() => class,
            _ if !self.title.is_empty() => &self.title,
            _ => UNTITLED,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClient {
    address: Option<String>,
    title: Option<String>,
    class: Option<String>,
    initial_class: Option<String>,
    workspace: Option<RawWorkspace>,
    #[serde(default, deserialize_with = "lenient_i32")]
    pid: Option<i32>,
    #[serde(rename = "focusHistoryID", default, deserialize_with = "lenient_i32")]
    focus_history_id: Option<i32>,
}

/// Hyprland has reported the workspace both as `{"id": 3, ...}` and as a bare id
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawWorkspace {
    Nested {
        #[serde(default, deserialize_with = "lenient_i32")]
        id: Option<i32>,
    },
    Bare(i32),
    Other(serde::de::IgnoredAny),
}

impl RawWorkspace {
    fn id(self) -> Option<i32> {
        match self {
            RawWorkspace::Nested { id } => id,
            RawWorkspace::Bare(id) => Some(id),
            RawWorkspace::Other(_) => None,
        }
    }
}

fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_i64().and_then(|v| i32::try_from(v).ok()))
}

/// Stable sort, most recently focused first; unknown recency (-1) goes last.
pub fn sort_by_focus_recency(windows: &mut [WindowRecord]) {
    windows.sort_by_key(|w| recency_rank(w.focus_history_id));
}

fn recency_rank(focus_history_id: i32) -> i64 {
    if focus_history_id < 0 {
        i64::MAX
    } else {
        i64::from(focus_history_id)
    }
}
