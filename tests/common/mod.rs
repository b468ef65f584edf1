#![allow(dead_code)]

use native_bridge_v8::{BridgeConfig, ElementKind, Runtime, StructLayout};

/// Runtime with the default configuration.
pub fn runtime() -> Runtime {
    runtime_with(BridgeConfig::default())
}

pub fn runtime_with(config: BridgeConfig) -> Runtime {
    init_logging();
    Runtime::new(config)
}

/// `Point { x: i32, y: i32 }` as the bridge sees it.
pub fn point_layout() -> StructLayout {
    StructLayout::new("Point")
        .field("x", ElementKind::Int32)
        .field("y", ElementKind::Int32)
}

/// Evaluate `code` and report whether it threw a `TypeError`.
pub fn throws_type_error(runtime: &mut Runtime, code: &str) -> bool {
    expect_throw(runtime, code, "TypeError")
}

pub fn throws_range_error(runtime: &mut Runtime, code: &str) -> bool {
    expect_throw(runtime, code, "RangeError")
}

fn expect_throw(runtime: &mut Runtime, code: &str, class: &str) -> bool {
    let wrapped = format!(
        "(() => {{ try {{ {code}; return false; }} catch (e) {{ return e instanceof {class}; }} }})()"
    );
    runtime.eval_bool(&wrapped).unwrap()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
