#[macro_use]
mod macros;

mod console;
mod globals;

pub use console::{ConsoleState, setup_console};
pub use globals::{PerformanceState, runtime_version, setup_performance, setup_runtime_globals};
