mod common;

use common::{runtime, runtime_with, throws_type_error};
use native_bridge_v8::BridgeConfig;

#[test]
fn test_get_returns_live_target() {
    let mut rt = runtime();

    let ok = rt
        .eval_bool(
            r#"
            const target = { answer: 42 };
            const weak = new WeakRef(target);
            weak.get() === target && weak.deref() === target && weak.get().answer === 42
            "#,
        )
        .unwrap();

    assert!(ok);
    assert_eq!(rt.stats().weak_pairs_created, 1);
}

#[test]
fn test_holder_does_not_keep_target_alive() {
    let mut rt = runtime();

    rt.evaluate("globalThis.weak = new WeakRef({ payload: new Array(100).fill(1) });")
        .unwrap();
    rt.collect_garbage();

    assert!(rt.eval_bool("weak.get() === null").unwrap());

    // Target gone, holder still reachable: the pair stays until the holder goes.
    let stats = rt.stats();
    assert_eq!(stats.weak_pairs_live, 1);
    assert_eq!(stats.weak_pairs_released, 0);

    rt.evaluate("weak = null;").unwrap();
    rt.collect_garbage();

    let stats = rt.stats();
    assert_eq!(stats.weak_pairs_live, 0);
    assert_eq!(stats.weak_pairs_released, 1);
}

#[test]
fn test_holder_collected_before_target() {
    let mut rt = runtime();

    rt.evaluate(
        r#"
        globalThis.target = { name: 'kept' };
        (() => { new WeakRef(target); })();
        "#,
    )
    .unwrap();
    rt.collect_garbage();

    // Holder gone, cleanup waits for the target.
    let stats = rt.stats();
    assert_eq!(stats.weak_pairs_live, 1);
    assert_eq!(stats.weak_pairs_released, 0);
    assert_eq!(rt.eval_to_string("target.name").unwrap(), "kept");

    rt.evaluate("target = null;").unwrap();
    rt.collect_garbage();

    let stats = rt.stats();
    assert_eq!(stats.weak_pairs_live, 0);
    assert_eq!(stats.weak_pairs_released, 1);
}

#[test]
fn test_both_collected_together() {
    let mut rt = runtime();

    rt.evaluate(
        r#"
        (() => {
            for (let i = 0; i < 10; i++) {
                new WeakRef({ index: i });
            }
        })();
        "#,
    )
    .unwrap();

    assert_eq!(rt.stats().weak_pairs_live, 10);

    rt.collect_garbage();

    let stats = rt.stats();
    assert_eq!(stats.weak_pairs_created, 10);
    assert_eq!(stats.weak_pairs_released, 10);
    assert_eq!(stats.weak_pairs_live, 0);
}

#[test]
fn test_clear_drops_target() {
    let mut rt = runtime();

    let ok = rt
        .eval_bool(
            r#"
            const target = {};
            const weak = new WeakRef(target);
            weak.clear();
            weak.clear();
            weak.get() === null && weak.deref() === null
            "#,
        )
        .unwrap();

    assert!(ok);
}

#[test]
fn test_cleared_pair_still_released() {
    let mut rt = runtime();

    rt.evaluate(
        r#"
        globalThis.target = {};
        globalThis.weak = new WeakRef(target);
        weak.clear();
        "#,
    )
    .unwrap();

    rt.evaluate("target = null; weak = null;").unwrap();
    rt.collect_garbage();

    let stats = rt.stats();
    assert_eq!(stats.weak_pairs_live, 0);
    assert_eq!(stats.weak_pairs_released, 1);
}

#[test]
fn test_invalid_construction() {
    let mut rt = runtime();

    assert!(throws_type_error(&mut rt, "new WeakRef(1)"));
    assert!(throws_type_error(&mut rt, "new WeakRef()"));
    assert!(throws_type_error(&mut rt, "new WeakRef(null)"));
    assert!(throws_type_error(&mut rt, "WeakRef({})"));

    assert_eq!(rt.stats().weak_pairs_created, 0);
}

#[test]
fn test_get_on_foreign_receiver_is_null() {
    let mut rt = runtime();

    assert!(
        rt.eval_bool("WeakRef.prototype.get.call({}) === null")
            .unwrap()
    );
}

#[test]
fn test_weak_ref_to_native_proxy() {
    let mut rt = runtime();

    rt.evaluate(
        r#"
        globalThis.weak = (() => {
            const bytes = new Reference(interop.types.uint8, 64);
            return new WeakRef(bytes);
        })();
        "#,
    )
    .unwrap();
    rt.collect_garbage();

    assert!(rt.eval_bool("weak.get() === null").unwrap());
    assert_eq!(rt.stats().regions_live(), 0);
}

#[test]
fn test_custom_constructor_name() {
    let config = BridgeConfig {
        weak_ref_name: "NativeWeakRef".to_string(),
        ..BridgeConfig::default()
    };
    let mut rt = runtime_with(config);

    assert!(
        rt.eval_bool("const t = {}; new NativeWeakRef(t).get() === t")
            .unwrap()
    );
}
