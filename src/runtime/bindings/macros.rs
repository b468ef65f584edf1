//! Common macros for V8 bindings.
//!
//! These macros help reduce boilerplate when installing native functions and
//! small JavaScript shims on the global object.

/// Register a native function on the global scope.
///
/// # Example
/// ```ignore
/// let my_fn = v8::Function::new(scope, callback).unwrap();
/// register_fn!(scope, "myFunction", my_fn);
/// ```
macro_rules! register_fn {
    ($scope:expr, $name:expr, $func:expr) => {{
        let global = $scope.get_current_context().global($scope);
        let key = v8::String::new($scope, $name).unwrap();
        global.set($scope, key.into(), $func.into());
    }};
}

/// Execute JavaScript code in the current scope.
///
/// Only used for trusted setup shims, so compile errors are bugs.
///
/// # Example
/// ```ignore
/// exec_js!(scope, r#"globalThis.foo = 42;"#);
/// ```
macro_rules! exec_js {
    ($scope:expr, $code:expr) => {{
        let code_str = v8::String::new($scope, $code).unwrap();
        let script = v8::Script::compile($scope, code_str, None).unwrap();
        script.run($scope)
    }};
}
