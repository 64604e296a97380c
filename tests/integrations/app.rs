use notifyhub::{
    app::App,
    config::{TargetConfig, TargetKind},
    core::{Message, NotifyFeature},
    state::{MemoryBackend, StateSnapshot, StoredTargetState},
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::{mock_targets::RecordingTarget, test_config};

fn target(id: &str, name: &str, kind: TargetKind) -> TargetConfig {
    TargetConfig {
        id: Some(id.to_string()),
        name: name.to_string(),
        device_class: None,
        supported_features: None,
        kind,
    }
}

#[tokio::test]
async fn test_app_registers_configured_targets() {
    let mut config = test_config();
    config.targets = vec![
        target("console", "Console", TargetKind::Log),
        target("inbox", "Inbox", TargetKind::Persistent),
    ];

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config)
        .state_backend(Arc::new(MemoryBackend::default()))
        .build(shutdown_rx)
        .await
        .unwrap();

    let targets = app.dispatcher().targets();
    let ids: Vec<_> = targets.iter().map(|t| t.identity.as_str()).collect();
    assert_eq!(ids, vec!["console", "inbox"]);
    assert_eq!(targets[1].supported_features, NotifyFeature::all());

    shutdown_tx.send(true).unwrap();
    app.run().await.unwrap();
}

#[tokio::test]
async fn test_app_derives_identity_from_name() {
    let mut config = test_config();
    config.targets = vec![TargetConfig {
        id: None,
        ..target("", "Ops Pager", TargetKind::Log)
    }];

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config)
        .state_backend(Arc::new(MemoryBackend::default()))
        .build(shutdown_rx)
        .await
        .unwrap();

    assert!(app.registry().contains("ops_pager"));
}

#[tokio::test]
async fn test_app_rejects_invalid_target_config() {
    let mut config = test_config();
    config.targets = vec![target(
        "hook",
        "Hook",
        TargetKind::Webhook {
            url: "  ".to_string(),
            format: Default::default(),
            timeout_seconds: 10,
        },
    )];

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = App::builder(config)
        .state_backend(Arc::new(MemoryBackend::default()))
        .build(shutdown_rx)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_persistent_target_writes_to_shared_inbox() {
    let mut config = test_config();
    config.targets = vec![target("inbox", "Inbox", TargetKind::Persistent)];

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config)
        .state_backend(Arc::new(MemoryBackend::default()))
        .build(shutdown_rx)
        .await
        .unwrap();

    let handles = app
        .dispatcher()
        .call_service(json!({
            "target": "inbox",
            "message": "disk full",
            "data": {"notification_id": "disk"},
        }))
        .unwrap();
    for handle in handles {
        handle.wait().await.unwrap();
    }

    let notifications = app.persistent_notifications().list();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_id, "disk");
    assert_eq!(notifications[0].title.as_deref(), Some("Inbox"));
    assert!(notifications[0].message.contains("Message: disk full"));

    shutdown_tx.send(true).unwrap();
    app.run().await.unwrap();
}

#[tokio::test]
async fn test_extra_targets_are_torn_down_on_shutdown() {
    let recorder = RecordingTarget::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(test_config())
        .state_backend(Arc::new(MemoryBackend::default()))
        .target("recorder", Arc::new(recorder.clone()))
        .build(shutdown_rx)
        .await
        .unwrap();

    app.dispatcher()
        .send_and_wait("recorder", Message::text("hi"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(recorder.messages().len(), 1);

    shutdown_tx.send(true).unwrap();
    app.run().await.unwrap();
    assert_eq!(recorder.teardown_count(), 1);
}

#[tokio::test]
async fn test_activation_is_flushed_on_shutdown() {
    let backend = MemoryBackend::default();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(test_config())
        .state_backend(Arc::new(backend.clone()))
        .target("recorder", Arc::new(RecordingTarget::new()))
        .build(shutdown_rx)
        .await
        .unwrap();

    let handle = app.dispatcher().dispatch("recorder", Message::text("hi")).unwrap();
    let stamped = app.registry().resolve("recorder").unwrap().last_notified().unwrap();
    handle.wait().await.unwrap();

    shutdown_tx.send(true).unwrap();
    app.run().await.unwrap();

    let saved = backend.saved().expect("state saved on shutdown");
    assert_eq!(saved.targets["recorder"].last_notified, stamped);
}

#[tokio::test]
async fn test_registration_restores_last_activation() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut snapshot = StateSnapshot::default();
    snapshot
        .targets
        .insert("recorder".to_string(), StoredTargetState { last_notified: at });

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(test_config())
        .state_backend(Arc::new(MemoryBackend::with_snapshot(snapshot)))
        .target("recorder", Arc::new(RecordingTarget::new()))
        .target("fresh", Arc::new(RecordingTarget::new()))
        .build(shutdown_rx)
        .await
        .unwrap();

    let registry = app.registry();
    assert_eq!(registry.resolve("recorder").unwrap().last_notified(), Some(at));
    assert_eq!(registry.resolve("fresh").unwrap().last_notified(), None);
}
