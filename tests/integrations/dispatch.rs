//! Integration tests for the dispatch service.

use chrono::Utc;
use notifyhub::{
    core::{Message, NotifyFeature},
    dispatch::Dispatcher,
    error::DispatchError,
    events::{EventBus, TargetEvent},
    offload::Offload,
    registry::TargetRegistry,
};
use serde_json::json;
use std::sync::{atomic::Ordering, Arc};
use std::time::Duration;

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::mock_targets::{FailingTarget, GatedTarget, RecordingTarget};

fn dispatcher(bus: &EventBus) -> Dispatcher {
    let registry = Arc::new(TargetRegistry::new(bus.clone()));
    Dispatcher::new(registry, Offload::new(4, bus.clone()), bus.clone())
}

#[tokio::test]
async fn test_send_message_to_pager() {
    let bus = EventBus::new(64);
    let dispatcher = dispatcher(&bus);
    let pager = RecordingTarget::with_features(NotifyFeature::MESSAGE);
    dispatcher.registry().register("pager", Arc::new(pager.clone()));

    let handles = dispatcher
        .call_service(json!({"target": "pager", "message": "hi"}))
        .unwrap();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.wait().await.unwrap();
    }

    let entry = dispatcher.registry().resolve("pager").unwrap();
    assert!(entry.last_notified().is_some());
    assert_eq!(pager.messages(), vec![Message::text("hi")]);
}

#[tokio::test]
async fn test_unknown_target_is_rejected_without_side_effects() {
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let dispatcher = dispatcher(&bus);
    let pager = RecordingTarget::new();
    dispatcher.registry().register("pager", Arc::new(pager.clone()));
    // Drain the registration event.
    events.recv().await.unwrap();

    let err = dispatcher
        .call_service(json!({"target": "unknown", "message": "hi"}))
        .unwrap_err();
    assert!(matches!(err, DispatchError::TargetNotFound(ref id) if id == "unknown"));

    // A mixed call is rejected as a whole; the known target is not stamped.
    let err = dispatcher
        .call_service(json!({"target": ["pager", "unknown"], "message": "hi"}))
        .unwrap_err();
    assert!(err.is_rejection());

    let err = dispatcher.dispatch("unknown", Message::text("hi")).unwrap_err();
    assert!(matches!(err, DispatchError::TargetNotFound(_)));

    assert!(dispatcher.registry().resolve("pager").unwrap().last_notified().is_none());
    assert!(pager.messages().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_validation_failure_happens_before_resolution() {
    let bus = EventBus::new(64);
    let dispatcher = dispatcher(&bus);

    let err = dispatcher
        .call_service(json!({"target": "unknown", "message": ["not", "a", "string"]}))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
}

#[tokio::test]
async fn test_state_is_stamped_before_send_completes() {
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let dispatcher = dispatcher(&bus);
    let (gated, release) = GatedTarget::new();
    let completed = gated.completed.clone();
    dispatcher.registry().register("slow", Arc::new(gated));

    let started = Utc::now();
    let handle = dispatcher.dispatch("slow", Message::text("hi")).unwrap();

    let stamped = dispatcher
        .registry()
        .resolve("slow")
        .unwrap()
        .last_notified()
        .expect("activation stamped at hand-off");
    assert!(stamped >= started);
    assert_eq!(completed.load(Ordering::SeqCst), 0);
    assert!(!handle.is_finished());

    // The activation is published before the send finishes.
    loop {
        match events.recv().await.unwrap() {
            TargetEvent::Activated { identity, at } => {
                assert_eq!(identity, "slow");
                assert_eq!(at, stamped);
                break;
            }
            TargetEvent::SendSucceeded { .. } => panic!("send finished before release"),
            _ => continue,
        }
    }

    release.send(()).unwrap();
    handle.wait().await.unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sequential_dispatches_are_monotonic_and_not_deduplicated() {
    let bus = EventBus::new(64);
    let dispatcher = dispatcher(&bus);
    let target = RecordingTarget::new();
    dispatcher.registry().register("pager", Arc::new(target.clone()));
    let entry = dispatcher.registry().resolve("pager").unwrap();

    let first = dispatcher.dispatch("pager", Message::text("same")).unwrap();
    let first_stamp = entry.last_notified().unwrap();
    let second = dispatcher.dispatch("pager", Message::text("same")).unwrap();
    let second_stamp = entry.last_notified().unwrap();

    assert!(second_stamp >= first_stamp);
    first.wait().await.unwrap();
    second.wait().await.unwrap();
    assert_eq!(target.messages().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_target_does_not_affect_others() {
    let bus = EventBus::new(64);
    let dispatcher = dispatcher(&bus);
    let failing = FailingTarget {
        delay: Duration::from_millis(50),
        ..FailingTarget::new()
    };
    let healthy = RecordingTarget::new();
    dispatcher.registry().register("a", Arc::new(failing));
    dispatcher.registry().register("b", Arc::new(healthy.clone()));

    let a = dispatcher.dispatch("a", Message::text("x")).unwrap();
    let b = dispatcher.dispatch("b", Message::text("y")).unwrap();

    let (a, b) = tokio::join!(a.wait(), b.wait());
    assert!(matches!(a, Err(DispatchError::SendFailure { .. })));
    assert!(b.is_ok());
    assert_eq!(healthy.messages(), vec![Message::text("y")]);

    // The registry still serves both targets.
    assert!(dispatcher.registry().contains("a"));
    dispatcher.dispatch("b", Message::text("z")).unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn test_failed_send_still_records_activation() {
    let bus = EventBus::new(64);
    let dispatcher = dispatcher(&bus);
    dispatcher.registry().register("a", Arc::new(FailingTarget::new()));

    let result = dispatcher.send_and_wait("a", Message::text("x"), None).await;
    assert!(result.is_err());
    assert!(dispatcher.registry().resolve("a").unwrap().last_notified().is_some());
}

#[tokio::test]
async fn test_send_and_wait_times_out_but_send_continues() {
    let bus = EventBus::new(64);
    let dispatcher = dispatcher(&bus);
    let (gated, release) = GatedTarget::new();
    let completed = gated.completed.clone();
    dispatcher.registry().register("slow", Arc::new(gated));

    let err = dispatcher
        .send_and_wait("slow", Message::text("hi"), Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Timeout { .. }));

    release.send(()).unwrap();
    for _ in 0..100 {
        if completed.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_feature_enforcement() {
    let bus = EventBus::new(64);
    let registry = Arc::new(TargetRegistry::new(bus.clone()));
    let dispatcher = Dispatcher::new(registry, Offload::new(2, bus.clone()), bus.clone())
        .enforce_features(true);
    let sms = RecordingTarget::with_features(NotifyFeature::MESSAGE | NotifyFeature::RECIPIENTS);
    dispatcher.registry().register("sms", Arc::new(sms.clone()));

    let err = dispatcher
        .dispatch("sms", Message::text("hi").with_title("not supported"))
        .unwrap_err();
    assert!(matches!(err, DispatchError::Validation(ref msg) if msg.contains("title")));
    assert!(dispatcher.registry().resolve("sms").unwrap().last_notified().is_none());

    dispatcher
        .dispatch("sms", Message::text("hi").with_recipients(["+100"]))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(sms.messages().len(), 1);
}

#[tokio::test]
async fn test_replacing_target_routes_to_new_instance() {
    let bus = EventBus::new(64);
    let dispatcher = dispatcher(&bus);
    let first = RecordingTarget::new();
    let second = RecordingTarget::new();
    dispatcher.registry().register("a", Arc::new(first.clone()));
    dispatcher.registry().register("a", Arc::new(second.clone()));

    assert_eq!(dispatcher.targets().len(), 1);
    assert_eq!(first.teardown_count(), 1);

    dispatcher.dispatch("a", Message::text("hi")).unwrap().wait().await.unwrap();
    assert!(first.messages().is_empty());
    assert_eq!(second.messages().len(), 1);

    dispatcher.registry().unregister("a");
    assert!(matches!(
        dispatcher.dispatch("a", Message::text("hi")),
        Err(DispatchError::TargetNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_lookup_and_dispatch() {
    const REPLACEMENTS: usize = 200;

    let bus = EventBus::new(4096);
    let dispatcher = Arc::new(dispatcher(&bus));
    let registry = dispatcher.registry().clone();
    let replaced: Vec<RecordingTarget> = (0..=REPLACEMENTS).map(|_| RecordingTarget::new()).collect();
    registry.register("shared", Arc::new(replaced[0].clone()));
    registry.register("stable", Arc::new(RecordingTarget::new()));
    dispatcher
        .send_and_wait("shared", Message::text("warm up"), None)
        .await
        .unwrap();

    let writer = {
        let registry = registry.clone();
        let targets = replaced.clone();
        std::thread::spawn(move || {
            for target in targets.into_iter().skip(1) {
                registry.register("shared", Arc::new(target));
            }
        })
    };
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let entry = registry.resolve("shared").expect("identity never disappears");
                    assert!(entry.last_notified().is_some());
                    let ids: Vec<String> =
                        registry.snapshot().into_iter().map(|t| t.identity).collect();
                    assert_eq!(ids, vec!["shared", "stable"]);
                }
            })
        })
        .collect();

    let mut handles = Vec::new();
    for i in 0..100 {
        handles.push(dispatcher.dispatch("shared", Message::text(format!("m{i}"))).unwrap());
        if i % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    for handle in handles {
        handle.wait().await.unwrap();
    }

    let delivered: usize = replaced.iter().map(|t| t.messages().len()).sum();
    assert_eq!(delivered, 101);
    let teardowns: usize = replaced.iter().map(|t| t.teardown_count()).sum();
    assert_eq!(teardowns, REPLACEMENTS);
    assert_eq!(replaced[REPLACEMENTS].teardown_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatch_from_a_plain_thread() {
    let bus = EventBus::new(64);
    let dispatcher = Arc::new(dispatcher(&bus));
    let target = RecordingTarget::new();
    dispatcher.registry().register("pager", Arc::new(target.clone()));

    let handle = {
        let dispatcher = dispatcher.clone();
        std::thread::spawn(move || dispatcher.dispatch("pager", Message::text("hi")))
            .join()
            .unwrap()
            .unwrap()
    };
    handle.wait().await.unwrap();
    assert_eq!(target.messages(), vec![Message::text("hi")]);
}
