//! The trait every subcommand implements.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// A runnable subcommand.
///
/// The `command_line` parameter carries the full invocation so commands that
/// produce a run summary can record how they were started.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self, command_line: &str) -> Result<()>;
}
