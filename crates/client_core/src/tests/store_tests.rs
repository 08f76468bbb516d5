use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use serde_json::json;

use super::*;

fn counter(store: &StateContainer, key: &str) -> (Arc<AtomicUsize>, Subscription) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let sub = store.subscribe(key, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (hits, sub)
}

#[test]
fn set_then_get_returns_the_value() {
    let store = StateContainer::new();
    assert!(store.get("leads.page").is_none());
    assert!(store.set("leads.page", json!({ "page": 2, "total": 41 })));
    assert_eq!(store.get("leads.page"), Some(json!({ "page": 2, "total": 41 })));
}

#[test]
fn deep_equal_values_do_not_notify() {
    let store = StateContainer::new();
    let (hits, _sub) = counter(&store, "dashboard.stats");

    assert!(store.set("dashboard.stats", json!({ "total": 3, "by": [1, 2] })));
    assert!(!store.set("dashboard.stats", json!({ "by": [1, 2], "total": 3 })));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(store.set("dashboard.stats", json!({ "total": 4, "by": [1, 2] })));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn unsubscribed_callbacks_are_not_invoked() {
    let store = StateContainer::new();
    let (hits, sub) = counter(&store, "ui.tab");
    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!sub.is_active());

    store.set("ui.tab", json!("leads"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(store.subscriber_count("ui.tab"), 0);
}

#[test]
fn dropping_the_guard_unsubscribes_but_detach_keeps_it() {
    let store = StateContainer::new();
    let (dropped_hits, dropped) = counter(&store, "k");
    drop(dropped);
    let (kept_hits, kept) = counter(&store, "k");
    kept.detach();

    store.set("k", json!(1));
    assert_eq!(dropped_hits.load(Ordering::SeqCst), 0);
    assert_eq!(kept_hits.load(Ordering::SeqCst), 1);
    assert_eq!(store.subscriber_count("k"), 1);
}

#[test]
fn subscribers_run_in_registration_order() {
    let store = StateContainer::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    let subs: Vec<Subscription> = (0..3)
        .map(|idx| {
            let order = order.clone();
            store.subscribe("k", move |_| {
                order.lock().expect("order").push(idx);
                Ok(())
            })
        })
        .collect();

    store.set("k", json!(true));
    assert_eq!(*order.lock().expect("order"), vec![0, 1, 2]);
    drop(subs);
}

#[test]
fn failing_subscribers_do_not_block_the_rest() {
    let store = StateContainer::new();
    let _erring = store.subscribe("k", |_| Err(anyhow::anyhow!("render failed")));
    let _panicking = store.subscribe("k", |_| panic!("boom"));
    let (hits, _ok) = counter(&store, "k");

    store.set("k", json!("v"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(store.failed_notifications(), 2);

    store.set("k", json!("w"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(store.failed_notifications(), 4);
}

#[test]
fn callbacks_may_write_state_reentrantly() {
    let store = StateContainer::new();
    let writer = store.clone();
    let _mirror = store.subscribe("source", move |value| {
        writer.set("mirror", value.clone());
        Ok(())
    });
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let _reader = store.subscribe("source", {
        let store = store.clone();
        move |_| {
            *sink.lock().expect("sink") = store.get("source");
            Ok(())
        }
    });

    store.set("source", json!(7));
    assert_eq!(store.get("mirror"), Some(json!(7)));
    assert_eq!(*seen.lock().expect("sink"), Some(json!(7)));
}

#[test]
fn remove_notifies_with_null_and_clear_forgets_everything() {
    let store = StateContainer::new();
    let last = Arc::new(Mutex::new(Value::Bool(false)));
    let sink = last.clone();
    let sub = store.subscribe("k", move |value| {
        *sink.lock().expect("sink") = value.clone();
        Ok(())
    });

    assert!(!store.remove("k"));
    store.set("k", json!(5));
    assert!(store.remove("k"));
    assert_eq!(*last.lock().expect("sink"), Value::Null);
    assert!(store.get("k").is_none());

    store.set("other", json!(1));
    store.clear();
    assert!(store.get("other").is_none());
    assert_eq!(store.subscriber_count("k"), 0);
    sub.unsubscribe();
}

#[test]
fn typed_helpers_round_through_json() {
    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Tab {
        name: String,
    }

    let store = StateContainer::new();
    assert!(store.set_as("ui.tab", &Tab { name: "leads".into() }));
    assert_eq!(
        store.get_as::<Tab>("ui.tab"),
        Some(Tab {
            name: "leads".into()
        })
    );
    assert_eq!(store.get_as::<u32>("ui.tab"), None);

    store.set("ui.tab", Value::Null);
    assert_eq!(store.get_as::<Tab>("ui.tab"), None);
}
