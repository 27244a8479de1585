//! `ToolHub` end to end against a real subprocess server.

use std::time::Duration;

use serde_json::json;

use toolwire_core::{Logger, RuntimeConfig, ServerConfig};
use toolwire_mcp::CancelSignal;
use toolwire_notify::{NotificationFilter, NotificationKind, ServerStatus};
use toolwire_tool_runtime::{ExecuteError, ToolHub, ValidationError};

/// Advertises `echo` and `enable`. Calling `enable` adds a third tool and
/// announces the change.
const MOCK_SERVER: &str = r#"
extra=''
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{"listChanged":true}},"serverInfo":{"name":"mock"}}}\n' "$id" ;;
    *'"method":"notifications/initialized"'*) ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object","properties":{"text":{"type":"string","minLength":1}},"required":["text"]}},{"name":"enable","inputSchema":{"type":"object"}}%s]}}\n' "$id" "$extra" ;;
    *'"name":"enable"'*)
      extra=',{"name":"added","description":"Added later"}'
      printf '{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"enabled"}]}}\n' "$id" ;;
    *'"name":"echo"'*)
      text=$(printf '%s\n' "$line" | sed -n 's/.*"text":"\([^"]*\)".*/\1/p')
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}]}}\n' "$id" "$text" ;;
    *)
      [ -n "$id" ] && printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

fn hub() -> ToolHub {
    ToolHub::new(RuntimeConfig::default(), Logger::disabled())
}

async fn tool_names(hub: &ToolHub) -> Vec<String> {
    hub.list_tools().await.iter().map(|t| t.name.clone()).collect()
}

#[tokio::test]
async fn registers_discovers_and_executes() {
    let hub = hub();
    let failures = hub
        .register_all([
            ServerConfig::stdio("mock", "sh", ["-c", MOCK_SERVER]),
            ServerConfig::stdio("ghost", "/nonexistent/toolwire-ghost", Vec::<String>::new()),
        ])
        .await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "ghost");

    let servers = hub.list_servers().await;
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].name, "ghost");
    assert_eq!(servers[0].status, ServerStatus::Error);
    assert_eq!(servers[1].name, "mock");
    assert!(servers[1].connected);
    assert_eq!(servers[1].tool_count, 2);

    assert_eq!(tool_names(&hub).await, vec!["echo", "enable"]);

    let never = CancelSignal::never();
    let result = hub.execute("echo", json!({"text": "hello"}), &never).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.display_text(), "hello");

    let err = hub.execute("echo", json!({"text": ""}), &never).await.unwrap_err();
    assert!(matches!(
        err,
        ExecuteError::Validation { source: ValidationError::TooShort { .. }, .. }
    ));

    hub.shutdown().await;
    assert!(hub.list_servers().await.is_empty());
}

#[tokio::test]
async fn server_announced_change_is_rediscovered() {
    let hub = hub();
    hub.register_server(ServerConfig::stdio("mock", "sh", ["-c", MOCK_SERVER]))
        .await
        .unwrap();

    let result = hub
        .execute("enable", json!({}), &CancelSignal::never())
        .await
        .unwrap();
    assert_eq!(result.display_text(), "enabled");

    let mut names = Vec::new();
    for _ in 0..200 {
        names = tool_names(&hub).await;
        if names.len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(names, vec!["added", "echo", "enable"]);

    let added = hub.registry().get_tool("added").await.unwrap();
    assert_eq!(added.description, "Added later");
    assert!(added.input_schema.is_null());

    hub.unregister_server("mock").await.unwrap();
    assert!(hub.list_tools().await.is_empty());

    let statuses = hub.history().recent(
        &NotificationFilter::new()
            .kind(NotificationKind::ServerStatus)
            .server("mock"),
        10,
    );
    assert!(statuses.iter().any(|n| n.status() == Some("connected")));
}
