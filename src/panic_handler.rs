use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use log::error;
use std::io::{self, Write};
use std::panic;

/// Installs better-panic backtraces plus a hook that puts the terminal back
/// before the default report is printed.
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        restore_terminal();
        error!("Viewer panicked: {panic_info}");
        default_hook(panic_info);
        std::process::exit(1);
    }));
}

/// Raw mode with mouse capture for the interactive viewer.
///
/// Dropping the guard restores the terminal, so an early `?` return from
/// the view loop cannot leave the shell in raw mode.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnableMouseCapture)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Disable raw mode and mouse capture, show the cursor again
pub fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), DisableMouseCapture);
    let _ = execute!(io::stderr(), crossterm::cursor::Show);
    let _ = writeln!(io::stderr());
}
