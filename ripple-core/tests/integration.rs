//! Integration Tests for the Reactive Core
//!
//! These tests verify that observables, computed values and the store work
//! together correctly through the public API only.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::json;

use ripple_core::reactive::{untrack, Computed, MemoState, Observable};
use ripple_core::store::{Store, StoreConfig, StoreState};
use ripple_core::ReactiveError;

/// Build a diamond: a -> (b, c) -> d. Returns d, its run counter and the
/// (b, c) pairs d observed.
fn diamond(
    a: &Observable<i32>,
) -> (Computed<i32>, Arc<AtomicI32>, Arc<Mutex<Vec<(i32, i32)>>>) {
    let b = Computed::new({
        let a = a.clone();
        move || a.get() * 2
    });
    let c = Computed::new({
        let a = a.clone();
        move || a.get() * 3
    });

    let runs = Arc::new(AtomicI32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let d = Computed::try_new({
        let (runs, seen) = (runs.clone(), seen.clone());
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            let (b, c) = (b.get()?, c.get()?);
            seen.lock().push((b, c));
            Ok(b + c)
        }
    });
    (d, runs, seen)
}

/// Both inputs of every run must come from the same value of `a`.
fn assert_consistent(seen: &[(i32, i32)]) {
    for (b, c) in seen {
        assert_eq!(b * 3, c * 2, "mixed inputs observed: b={b}, c={c}");
    }
}

/// Test that a diamond resolves with one run per change when pulled.
#[test]
fn diamond_runs_once_per_change_when_pulled() {
    let a = Observable::new(1);
    let (d, runs, seen) = diamond(&a);

    assert_eq!(d.get().unwrap(), 5);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    a.set(10);
    assert_eq!(d.get().unwrap(), 50);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // Reading again without changes uses the cache.
    assert_eq!(d.get().unwrap(), 50);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    assert_consistent(&seen.lock());
}

/// Test that an observed diamond is refreshed exactly once per change and
/// never sees a half-updated pair.
#[test]
fn observed_diamond_is_glitch_free() {
    let a = Observable::new(1);
    let (d, runs, seen) = diamond(&a);

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let notifications_clone = notifications.clone();
    let _sub = d
        .subscribe(move |new, old| notifications_clone.lock().push((*new, *old)))
        .unwrap();

    for value in 2..=4 {
        a.set(value);
    }

    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert_eq!(*notifications.lock(), vec![(10, 5), (15, 10), (20, 15)]);
    assert_consistent(&seen.lock());
}

/// Test that a computed value reading another keeps its chain fresh.
#[test]
fn computed_chain_follows_source_changes() {
    let base = Observable::new(5);

    let doubled = Computed::new({
        let base = base.clone();
        move || base.get() * 2
    });
    let plus_ten = Computed::try_new({
        let doubled = doubled.clone();
        move || Ok(doubled.get()? + 10)
    });

    assert_eq!(plus_ten.get().unwrap(), 20);

    base.set(10);
    assert_eq!(plus_ten.get().unwrap(), 30);
    assert_eq!(doubled.get().unwrap(), 20);
    assert_eq!(doubled.recompute_count(), 2);
}

/// Test laziness and memoization together.
#[test]
fn computed_is_lazy_and_memoized() {
    let compute_count = Arc::new(AtomicI32::new(0));
    let compute_clone = compute_count.clone();
    let source = Observable::new(21);

    let computed = Computed::new({
        let source = source.clone();
        move || {
            compute_clone.fetch_add(1, Ordering::SeqCst);
            source.get() * 2
        }
    });
    assert_eq!(compute_count.load(Ordering::SeqCst), 0);

    // Setting a dependency of a never-computed value does not compute it.
    source.set(30);
    assert_eq!(compute_count.load(Ordering::SeqCst), 0);

    for _ in 0..4 {
        assert_eq!(computed.get().unwrap(), 60);
    }
    assert_eq!(compute_count.load(Ordering::SeqCst), 1);
}

/// Test that a computed value reading itself fails instead of hanging.
#[test]
fn self_reference_is_reported_as_cycle() {
    let slot: Arc<OnceLock<Computed<i32>>> = Arc::new(OnceLock::new());
    let computed = Computed::try_new({
        let slot = slot.clone();
        move || match slot.get() {
            Some(me) => me.get(),
            None => Ok(0),
        }
    });
    let _ = slot.set(computed.clone());

    let err = computed.get().unwrap_err();
    assert!(matches!(err, ReactiveError::CircularDependency { .. }));
    assert!(err.to_string().starts_with("circular dependency detected"));
}

/// Test that a three-node cycle names all participants.
#[test]
fn indirect_cycle_reports_chain() {
    let z_slot: Arc<OnceLock<Computed<i32>>> = Arc::new(OnceLock::new());

    let x = Computed::try_new({
        let z_slot = z_slot.clone();
        move || match z_slot.get() {
            Some(z) => Ok(z.get()? + 1),
            None => Ok(0),
        }
    })
    .labeled("x");
    let y = Computed::try_new({
        let x = x.clone();
        move || Ok(x.get()? + 1)
    })
    .labeled("y");
    let z = Computed::try_new({
        let y = y.clone();
        move || Ok(y.get()? + 1)
    })
    .labeled("z");
    let _ = z_slot.set(z.clone());

    let err = x.get().unwrap_err();
    assert_eq!(err.cycle_chain().unwrap(), ["x", "z", "y", "x"]);
}

/// Test that untracked reads do not become dependencies.
#[test]
fn untracked_reads_are_not_dependencies() {
    let tracked = Observable::new(1);
    let ignored = Observable::new(100);

    let sum = Computed::new({
        let (tracked, ignored) = (tracked.clone(), ignored.clone());
        move || tracked.get() + untrack(|| ignored.get())
    });

    assert_eq!(sum.get().unwrap(), 101);
    assert_eq!(sum.observable_dependencies(), vec![tracked.id()]);

    ignored.set(200);
    assert_eq!(sum.state(), MemoState::Clean);
    assert_eq!(sum.get().unwrap(), 101);
}

/// Test that an observable listener sees downstream values already fresh.
#[test]
fn observable_listener_reads_fresh_computed() {
    let a = Observable::new(1);
    let doubled = Computed::new({
        let a = a.clone();
        move || a.get() * 2
    });
    doubled.get().unwrap();

    let seen = Arc::new(AtomicI32::new(0));
    let seen_clone = seen.clone();
    let doubled_clone = doubled.clone();
    let _sub = a.subscribe(move |_, _| {
        seen_clone.store(doubled_clone.get().unwrap(), Ordering::SeqCst);
    });

    a.set(7);
    assert_eq!(seen.load(Ordering::SeqCst), 14);
}

/// Test that `set(get())` never notifies.
#[test]
fn setting_current_value_is_silent() {
    let text = Observable::new(String::from("same"));
    let calls = Arc::new(AtomicI32::new(0));
    let calls_clone = calls.clone();
    let _sub = text.subscribe(move |_, _| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    });

    text.set(text.get());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[derive(Debug, Clone, PartialEq)]
struct Cart {
    items: Vec<String>,
    discount: u32,
}

#[derive(Default)]
struct CartPatch {
    items: Option<Vec<String>>,
    discount: Option<u32>,
}

impl StoreState for Cart {
    type Patch = CartPatch;

    fn merge(&self, patch: CartPatch) -> Self {
        Self {
            items: patch.items.unwrap_or_else(|| self.items.clone()),
            discount: patch.discount.unwrap_or(self.discount),
        }
    }
}

#[derive(Debug, PartialEq)]
enum CheckoutError {
    OutOfStock(String),
}

/// Test that a failing transaction leaves state, history and listeners
/// untouched and returns the caller's own error.
#[test]
fn store_transaction_is_atomic() {
    let store = Store::new(
        Cart {
            items: vec!["apple".into()],
            discount: 0,
        },
        StoreConfig::default().with_history(5),
    );
    let calls = Arc::new(AtomicI32::new(0));
    let calls_clone = calls.clone();
    let _sub = store.subscribe(move |_, _| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    });
    let before = store.get_state();

    let result = store.transaction(|store| {
        store.update(|cart| CartPatch {
            items: Some([cart.items.clone(), vec!["pear".into()]].concat()),
            ..Default::default()
        });
        store.set_state(CartPatch {
            discount: Some(10),
            ..Default::default()
        });
        Err::<(), _>(CheckoutError::OutOfStock("pear".into()))
    });

    assert_eq!(result, Err(CheckoutError::OutOfStock("pear".into())));
    assert_eq!(store.get_state(), before);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!store.can_undo());
}

/// Test that a successful transaction reports only first-versus-last state.
#[test]
fn store_transaction_notifies_first_versus_last() {
    let store = Store::new(json!({ "count": 0, "label": "start" }), StoreConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    let _sub = store.subscribe(move |new, previous| {
        log_clone.lock().push((previous["count"].clone(), new["count"].clone()));
    });

    store
        .transaction(|store| {
            for count in 1..=5 {
                store.set_state(json!({ "count": count }));
            }
            Ok::<_, ()>(())
        })
        .unwrap();

    assert_eq!(*log.lock(), vec![(json!(0), json!(5))]);
    assert_eq!(store.get_state()["label"], "start");
}

/// Test the history bound: five updates, limit three, three undos.
#[test]
fn store_history_bound() {
    let store = Store::new(json!({ "a": 1, "b": 2 }), StoreConfig::default().with_history(3));
    for a in 2..=6 {
        store.set_state(json!({ "a": a }));
    }

    assert!(store.undo());
    assert!(store.undo());
    assert!(store.undo());
    assert!(!store.undo());
    assert!(!store.can_undo());
    assert_eq!(*store.get_state(), json!({ "a": 3, "b": 2 }));
}

/// Test that undo followed by a new action drops the redo branch.
#[test]
fn store_redo_invalidated_by_new_action() {
    let store = Store::new(json!({ "a": 1 }), StoreConfig::default().with_history(10));
    store.set_state(json!({ "a": 2 }));

    assert!(store.undo());
    assert!(store.can_redo());

    store.set_state(json!({ "a": 3 }));
    assert!(!store.can_redo());
}

/// Test a store driving an observable, which drives a computed value.
#[test]
fn store_feeds_reactive_graph() {
    let store = Store::new(json!({ "items": 2, "price": 5 }), StoreConfig::default());
    let items = Observable::new(2i64);
    let price = Observable::new(5i64);

    let total = Computed::new({
        let (items, price) = (items.clone(), price.clone());
        move || items.get() * price.get()
    });
    let latest = Arc::new(Mutex::new(None));
    let latest_clone = latest.clone();
    let _total_sub = total
        .subscribe(move |new, _| *latest_clone.lock() = Some(*new))
        .unwrap();

    let _store_sub = store.subscribe({
        let (items, price) = (items.clone(), price.clone());
        move |state, _| {
            items.set(state["items"].as_i64().unwrap_or_default());
            price.set(state["price"].as_i64().unwrap_or_default());
        }
    });

    store.set_state(json!({ "items": 4 }));
    assert_eq!(*latest.lock(), Some(20));
    assert_eq!(total.get().unwrap(), 20);
}
