//! Terminal echo restoration.
//!
//! A child killed while a program had echo turned off (password prompts,
//! raw-mode TUIs) leaves the terminal silent for the next generation.
//! `ensure_echo_enabled` is best effort: every failure is logged and ignored.

/// Turn keyboard echo back on for stdin if it is a terminal with echo off.
#[cfg(unix)]
pub fn ensure_echo_enabled() {
    use nix::sys::signal::{signal, SigHandler, Signal};
    use nix::sys::termios::{tcgetattr, tcsetattr, SetArg};
    use std::io::IsTerminal;

    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return;
    }

    let mut attrs = match tcgetattr(&stdin) {
        Ok(a) => a,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read terminal attributes");
            return;
        }
    };
    let Some(flags) = with_echo(attrs.local_flags) else {
        return;
    };
    attrs.local_flags = flags;

    // A background process writing terminal attributes gets SIGTTOU, which
    // would stop us mid-update under job control.
    // SAFETY: SIG_IGN installs no Rust code as a handler, and the previous
    // disposition is put back right after the attribute change.
    let previous = unsafe { signal(Signal::SIGTTOU, SigHandler::SigIgn) };

    match tcsetattr(&stdin, SetArg::TCSANOW, &attrs) {
        Ok(()) => tracing::debug!("terminal echo restored"),
        Err(e) => tracing::debug!(error = %e, "failed to restore terminal echo"),
    }

    if let Ok(handler) = previous {
        // SAFETY: reinstalls the disposition that was active before.
        if let Err(e) = unsafe { signal(Signal::SIGTTOU, handler) } {
            tracing::debug!(error = %e, "failed to restore SIGTTOU disposition");
        }
    }
}

#[cfg(not(unix))]
pub fn ensure_echo_enabled() {}

/// Returns the flags with ECHO set, or `None` when echo is already on.
#[cfg(unix)]
fn with_echo(
    flags: nix::sys::termios::LocalFlags,
) -> Option<nix::sys::termios::LocalFlags> {
    use nix::sys::termios::LocalFlags;

    if flags.contains(LocalFlags::ECHO) {
        None
    } else {
        Some(flags | LocalFlags::ECHO)
    }
}
