//! Notification values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ServerStatus,
    ToolListChanged,
    ResourceUpdate,
    Progress,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationKind::ServerStatus => "server_status",
            NotificationKind::ToolListChanged => "tool_list_changed",
            NotificationKind::ResourceUpdate => "resource_update",
            NotificationKind::Progress => "progress",
        };
        f.write_str(s)
    }
}

/// Connection status carried by server-status notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Connected => "connected",
            ServerStatus::Disconnected => "disconnected",
            ServerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Where a tool-list change came from. Server-originated changes ask the
/// client to re-discover; registry-originated ones report a discovery that
/// already happened.
pub const ORIGIN_SERVER: &str = "server";
pub const ORIGIN_REGISTRY: &str = "registry";

/// An immutable lifecycle event. The bus hands every listener the same
/// `Arc<Notification>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub server: String,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, server: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            server: server.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn server_status(server: impl Into<String>, status: ServerStatus, error: Option<&str>) -> Self {
        let mut data = Map::new();
        data.insert("status".to_string(), Value::String(status.to_string()));
        if let Some(error) = error {
            data.insert("error".to_string(), Value::String(error.to_string()));
        }
        Self::new(NotificationKind::ServerStatus, server, data)
    }

    pub fn tool_list_changed(server: impl Into<String>, origin: &str, tool_count: Option<usize>) -> Self {
        let mut data = Map::new();
        data.insert("origin".to_string(), Value::String(origin.to_string()));
        if let Some(count) = tool_count {
            data.insert("tool_count".to_string(), Value::from(count));
        }
        Self::new(NotificationKind::ToolListChanged, server, data)
    }

    /// A resource changed on the server. `params` is the raw protocol payload
    /// (typically `{"uri": ...}`); non-object payloads are stored under `params`.
    pub fn resource_update(server: impl Into<String>, params: Option<Value>) -> Self {
        Self::new(NotificationKind::ResourceUpdate, server, params_to_map(params))
    }

    pub fn progress(server: impl Into<String>, params: Option<Value>) -> Self {
        Self::new(NotificationKind::Progress, server, params_to_map(params))
    }

    pub fn status(&self) -> Option<&str> {
        self.data.get("status").and_then(Value::as_str)
    }

    pub fn origin(&self) -> Option<&str> {
        self.data.get("origin").and_then(Value::as_str)
    }
}

fn params_to_map(params: Option<Value>) -> Map<String, Value> {
    match params {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("params".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_status_carries_error() {
        let n = Notification::server_status("fs", ServerStatus::Error, Some("spawn failed"));
        assert_eq!(n.kind, NotificationKind::ServerStatus);
        assert_eq!(n.status(), Some("error"));
        assert_eq!(n.data["error"], "spawn failed");
    }

    #[test]
    fn tool_list_changed_records_origin() {
        let n = Notification::tool_list_changed("fs", ORIGIN_SERVER, None);
        assert_eq!(n.origin(), Some(ORIGIN_SERVER));
        assert!(!n.data.contains_key("tool_count"));
    }

    #[test]
    fn resource_update_keeps_object_params() {
        let n = Notification::resource_update(
            "fs",
            Some(serde_json::json!({"uri": "file:///tmp/a.txt"})),
        );
        assert_eq!(n.data["uri"], "file:///tmp/a.txt");

        let scalar = Notification::progress("fs", Some(serde_json::json!(42)));
        assert_eq!(scalar.data["params"], 42);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationKind::ToolListChanged).unwrap();
        assert_eq!(json, "\"tool_list_changed\"");
        assert_eq!(NotificationKind::ResourceUpdate.to_string(), "resource_update");
    }
}
