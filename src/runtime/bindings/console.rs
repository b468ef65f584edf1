use crate::bridge::coerce::to_native_string;
use crate::config::{ConsoleCallback, ConsoleLevel};
use std::rc::Rc;

/// State for console logging, kept in a context slot.
pub struct ConsoleState {
    pub callback: Option<ConsoleCallback>,
}

/// Native console log function
/// Args: level (i32), message (String)
fn console_log(scope: &mut v8::PinScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let level = ConsoleLevel::from_code(args.get(0).int32_value(scope).unwrap_or(2));
    let message = to_native_string(scope, args.get(1));

    match level {
        ConsoleLevel::Error => tracing::error!(target: "console", "{}", message),
        ConsoleLevel::Warn => tracing::warn!(target: "console", "{}", message),
        ConsoleLevel::Info => tracing::info!(target: "console", "{}", message),
        ConsoleLevel::Debug => tracing::debug!(target: "console", "{}", message),
        ConsoleLevel::Trace => tracing::trace!(target: "console", "{}", message),
    }

    if let Some(state) = scope.get_current_context().get_slot::<ConsoleState>()
        && let Some(callback) = &state.callback
    {
        callback(level, &message);
    }
}

pub fn setup_console(scope: &mut v8::PinScope, callback: Option<ConsoleCallback>) {
    scope
        .get_current_context()
        .set_slot(Rc::new(ConsoleState { callback }));

    let console_log_fn = v8::Function::new(scope, console_log).unwrap();
    register_fn!(scope, "__console_log", console_log_fn);

    // Setup console object using JS that calls __console_log
    exec_js!(
        scope,
        r#"
        function __formatArg(a) {
            if (a instanceof Error) {
                return a.stack || (a.name + ': ' + a.message);
            }

            if (typeof a === 'object' && a !== null && typeof a.toString === 'function'
                && a.toString !== Object.prototype.toString) {
                return String(a);
            }

            if (typeof a === 'object' && a !== null) {
                try {
                    return JSON.stringify(a);
                } catch (e) {
                    return String(a);
                }
            }

            return String(a);
        }

        globalThis.console = {
            log: function(...args) {
                __console_log(2, args.map(__formatArg).join(' '));
            },
            info: function(...args) {
                __console_log(2, args.map(__formatArg).join(' '));
            },
            warn: function(...args) {
                __console_log(1, args.map(__formatArg).join(' '));
            },
            error: function(...args) {
                __console_log(0, args.map(__formatArg).join(' '));
            },
            debug: function(...args) {
                __console_log(3, args.map(__formatArg).join(' '));
            },
            trace: function(...args) {
                __console_log(4, args.map(__formatArg).join(' '));
            }
        };
    "#
    );
}
