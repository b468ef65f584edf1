use std::rc::Rc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// State for performance.now() timing
pub struct PerformanceState {
    pub start: Instant,
}

fn performance_now(scope: &mut v8::PinScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(state) = scope.get_current_context().get_slot::<PerformanceState>() {
        rv.set_double(state.start.elapsed().as_secs_f64() * 1000.0);
    }
}

pub fn setup_performance(scope: &mut v8::PinScope) {
    let state = Rc::new(PerformanceState {
        start: Instant::now(),
    });

    // Store in context slot to keep Rc alive for the context's lifetime
    scope.get_current_context().set_slot(state);

    let now_fn = v8::Function::new(scope, performance_now).unwrap();

    let context = scope.get_current_context();
    let global = context.global(scope);

    let perf_obj = v8::Object::new(scope);
    let now_key = v8::String::new(scope, "now").unwrap();
    perf_obj.set(scope, now_key.into(), now_fn.into());

    let perf_key = v8::String::new(scope, "performance").unwrap();
    global.set(scope, perf_key.into(), perf_obj.into());
}

/// Version string reported to scripts as `__runtimeVersion`.
pub fn runtime_version() -> String {
    format!(
        "{} {} (V8 {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        v8::V8::get_version()
    )
}

/// `__time()`, `__runtimeVersion` and, when enabled, `__collect()`.
pub fn setup_runtime_globals(scope: &mut v8::PinScope, expose_collect: bool) {
    let time_fn = v8::Function::new(
        scope,
        |_scope: &mut v8::PinScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64() * 1000.0)
                .unwrap_or(0.0);
            rv.set_double(millis);
        },
    )
    .unwrap();
    register_fn!(scope, "__time", time_fn);

    let version = v8::String::new(scope, &runtime_version()).unwrap();
    register_fn!(scope, "__runtimeVersion", version);

    if expose_collect {
        let collect_fn = v8::Function::new(
            scope,
            |scope: &mut v8::PinScope, _args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue| {
                log::debug!("Full collection requested by script");
                scope.request_garbage_collection_for_testing(v8::GarbageCollectionType::Full);
            },
        )
        .unwrap();
        register_fn!(scope, "__collect", collect_fn);
    }
}
