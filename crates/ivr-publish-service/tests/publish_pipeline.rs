//! End-to-end publish tests against a fake switch on a local socket

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ivr_engine::{
    stamp_published, BlockKind, EventBus, Flow, FlowBuilder, FlowStatus, FlowStore, PublishStage,
    PublishStatus, VecEventSink,
};
use ivr_publish_service::{FlowService, LocalPublisher, ServiceError};
use manager_protocol::{read_message, ManagerClient, ManagerConfig, ReconnectPolicy};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const SECRET: &str = "s3cret";

/// Counters shared with the fake switch
#[derive(Default)]
struct SwitchStats {
    connections: AtomicUsize,
    logins: AtomicUsize,
    reloads: AtomicUsize,
}

struct FakeSwitch {
    port: u16,
    stats: Arc<SwitchStats>,
}

async fn start_switch(reject_reload: bool) -> FakeSwitch {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let stats = Arc::new(SwitchStats::default());
    let shared = stats.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            shared.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(stream, shared.clone(), reject_reload));
        }
    });
    FakeSwitch { port, stats }
}

async fn serve(stream: TcpStream, stats: Arc<SwitchStats>, reject_reload: bool) {
    let (read, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read);
    if writer.write_all(b"Asterisk Call Manager/7.0.3\r\n").await.is_err() {
        return;
    }

    while let Ok(Some(action)) = read_message(&mut reader).await {
        let id = action.action_id().unwrap_or_default().to_string();
        let mut close = false;
        let reply = match action.get("Action") {
            Some("Login") => {
                stats.logins.fetch_add(1, Ordering::SeqCst);
                if action.get("Secret") == Some(SECRET) {
                    "Response: Success\r\nMessage: Authentication accepted".to_string()
                } else {
                    close = true;
                    "Response: Error\r\nMessage: Authentication failed".to_string()
                }
            }
            Some("Command") => {
                stats.reloads.fetch_add(1, Ordering::SeqCst);
                // An unrelated event lands ahead of the response.
                let event = "Event: Reload\r\nPrivilege: system,all\r\nModule: pbx_config.so\r\n\r\n";
                if writer.write_all(event.as_bytes()).await.is_err() {
                    return;
                }
                if reject_reload {
                    "Response: Error\r\nMessage: Permission denied".to_string()
                } else {
                    "Response: Success\r\nMessage: Command output follows\r\nOutput: Dialplan reloaded.".to_string()
                }
            }
            Some("Logoff") => {
                close = true;
                "Response: Goodbye\r\nMessage: Thanks for all the fish.".to_string()
            }
            _ => "Response: Error\r\nMessage: Invalid/unknown command".to_string(),
        };
        let frame = format!("{}\r\nActionID: {}\r\n\r\n", reply, id);
        if writer.write_all(frame.as_bytes()).await.is_err() || close {
            return;
        }
    }
}

struct Pipeline {
    service: FlowService,
    sink: Arc<VecEventSink>,
    dialplan_dir: PathBuf,
    _dir: TempDir,
}

fn pipeline(switch: &FakeSwitch, secret: &str) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let dialplan_dir = dir.path().join("ivr");

    let mut config = ManagerConfig::new("127.0.0.1", switch.port, "ivr", secret);
    config.connect_timeout_ms = 2_000;
    config.action_timeout_ms = 2_000;
    config.reconnect = ReconnectPolicy::no_retry();

    let events = EventBus::new();
    let sink = Arc::new(VecEventSink::new());
    events.attach(sink.clone());

    let service = FlowService::new(
        FlowStore::new(),
        Arc::new(LocalPublisher::new(dialplan_dir.clone())),
        Arc::new(ManagerClient::new(config)),
        events,
    );
    Pipeline {
        service,
        sink,
        dialplan_dir,
        _dir: dir,
    }
}

fn reception(id: &str, menu: serde_json::Value) -> Flow {
    FlowBuilder::new(id, "Reception", "alice")
        .add_start("start")
        .add_block("menu", BlockKind::Menu, menu)
        .add_end("end")
        .connect("start", "menu")
        .connect("menu", "end")
        .build()
}

fn complete_menu() -> serde_json::Value {
    json!({"prompt": "welcome", "timeout": 5, "maxDigits": 1})
}

#[tokio::test]
async fn test_valid_flow_is_published() {
    let switch = start_switch(false).await;
    let p = pipeline(&switch, SECRET);
    p.service.import_flow(reception("reception", complete_menu())).await.unwrap();
    assert!(p.service.validate_flow_by_id("reception").await.unwrap().is_empty());

    let mut rx = p.service.events().subscribe();
    let outcome = p.service.publish_flow("reception").await.unwrap();

    assert_eq!(outcome.flow.status, FlowStatus::Published);
    assert!(outcome.warning.is_none());
    assert_eq!(outcome.path, p.dialplan_dir.join("ivr_reception.conf"));
    let text = std::fs::read_to_string(&outcome.path).unwrap();
    assert!(text.contains("[ivr-flow-reception]"));
    assert!(text.contains(" same => n,Set(IVR_FLOW_ID=reception)"));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.topic, "ivr:published");
    assert_eq!(event.flow_id, "reception");
    assert_eq!(event.status, PublishStatus::Success);

    assert_eq!(switch.stats.logins.load(Ordering::SeqCst), 1);
    assert_eq!(switch.stats.reloads.load(Ordering::SeqCst), 1);
    assert_eq!(
        p.service.get_flow("reception").await.unwrap().status,
        FlowStatus::Published
    );
}

#[tokio::test]
async fn test_incomplete_menu_is_rejected() {
    let switch = start_switch(false).await;
    let p = pipeline(&switch, SECRET);
    let flow = reception("reception", json!({"prompt": "welcome", "timeout": 5}));
    p.service.import_flow(flow).await.unwrap();

    let violations = p.service.validate_flow_by_id("reception").await.unwrap();
    assert_eq!(violations.len(), 1);

    let err = p.service.publish_flow("reception").await.unwrap_err();
    let ServiceError::Validation(violations) = &err else {
        panic!("expected validation failure, got {err}");
    };
    assert_eq!(violations.len(), 1);
    let message = violations[0].to_string();
    assert!(message.contains("Menu"));
    assert!(message.contains("maxDigits"));

    assert_eq!(
        p.service.get_flow("reception").await.unwrap().status,
        FlowStatus::Draft
    );
    assert!(!p.dialplan_dir.join("ivr_reception.conf").exists());
    assert_eq!(switch.stats.connections.load(Ordering::SeqCst), 0);

    let events = p.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, PublishStatus::Error);
    assert_eq!(events[0].stage, Some(PublishStage::Validation));
}

#[tokio::test]
async fn test_wrong_secret_is_fatal() {
    let switch = start_switch(false).await;
    let p = pipeline(&switch, "wrong");
    p.service.import_flow(reception("draft", complete_menu())).await.unwrap();

    let err = p.service.publish_flow("draft").await.unwrap_err();
    assert_eq!(err.stage(), PublishStage::Authentication);
    assert!(err.to_string().contains("Authentication failed"));
    assert_eq!(p.service.get_flow("draft").await.unwrap().status, FlowStatus::Draft);
    assert_eq!(switch.stats.reloads.load(Ordering::SeqCst), 0);

    let events = p.sink.events();
    assert_eq!(events[0].stage, Some(PublishStage::Authentication));
}

#[tokio::test]
async fn test_wrong_secret_keeps_published_status() {
    let switch = start_switch(false).await;
    let p = pipeline(&switch, "wrong");

    let mut flow = reception("live", complete_menu());
    flow.status = FlowStatus::Published;
    stamp_published(&mut flow, chrono::Utc::now());
    p.service.import_flow(flow.clone()).await.unwrap();

    p.service.publish_flow("live").await.unwrap_err();

    let stored = p.service.get_flow("live").await.unwrap();
    assert_eq!(stored.status, FlowStatus::Published);
    assert_eq!(stored.metadata, flow.metadata);
}

#[tokio::test]
async fn test_republish_rewrites_identical_file() {
    let switch = start_switch(false).await;
    let p = pipeline(&switch, SECRET);
    p.service.import_flow(reception("reception", complete_menu())).await.unwrap();

    let first = p.service.publish_flow("reception").await.unwrap();
    let before = std::fs::read(&first.path).unwrap();
    let second = p.service.publish_flow("reception").await.unwrap();

    assert_eq!(std::fs::read(&second.path).unwrap(), before);
    assert_eq!(second.flow.status, FlowStatus::Published);
    assert_eq!(second.flow.published_version(), 2);
    assert_eq!(switch.stats.reloads.load(Ordering::SeqCst), 2);
    // The session is reused between publishes.
    assert_eq!(switch.stats.logins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_reload_is_a_warning() {
    let switch = start_switch(true).await;
    let p = pipeline(&switch, SECRET);
    p.service.import_flow(reception("reception", complete_menu())).await.unwrap();

    let outcome = p.service.publish_flow("reception").await.unwrap();
    assert_eq!(outcome.flow.status, FlowStatus::Published);
    assert!(outcome.path.exists());
    let warning = outcome.warning.unwrap();
    assert!(warning.contains("Permission denied"));

    let events = p.sink.events();
    assert_eq!(events[0].status, PublishStatus::Success);
    assert_eq!(events[0].warning.as_deref(), Some(warning.as_str()));
}

#[tokio::test]
async fn test_delete_published_flow_removes_file() {
    let switch = start_switch(false).await;
    let p = pipeline(&switch, SECRET);
    p.service.import_flow(reception("reception", complete_menu())).await.unwrap();
    let outcome = p.service.publish_flow("reception").await.unwrap();
    assert!(outcome.path.exists());

    p.service.delete_flow("reception", "alice").await.unwrap();
    assert!(!outcome.path.exists());
    assert_eq!(switch.stats.reloads.load(Ordering::SeqCst), 2);
    assert!(p.service.get_flow("reception").await.is_err());
}

#[tokio::test]
async fn test_similar_ids_keep_separate_files() {
    let switch = start_switch(false).await;
    let p = pipeline(&switch, SECRET);
    p.service.import_flow(reception("tenant_x", complete_menu())).await.unwrap();
    p.service.import_flow(reception("tenant-x", complete_menu())).await.unwrap();
    let err = p.service.import_flow(reception("tenant.x", complete_menu())).await.unwrap_err();
    assert_eq!(err.stage(), PublishStage::Storage);

    let underscore = p.service.publish_flow("tenant_x").await.unwrap();
    let dashed = p.service.publish_flow("tenant-x").await.unwrap();
    assert_ne!(underscore.path, dashed.path);

    p.service.delete_flow("tenant-x", "alice").await.unwrap();
    assert!(!dashed.path.exists());
    let text = std::fs::read_to_string(&underscore.path).unwrap();
    assert!(text.contains("Set(IVR_FLOW_ID=tenant_x)"));
}
