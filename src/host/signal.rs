//! # OS termination signals.
//!
//! **Unix:** `SIGINT` (Ctrl-C), `SIGTERM` (systemd/Kubernetes stop), `SIGQUIT`.
//! **Windows:** Ctrl-C via [`tokio::signal::ctrl_c`].

use std::fmt;
use std::io;

/// Which termination signal arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TerminationSignal {
    Interrupt,
    Terminate,
    Quit,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TerminationSignal::Interrupt => "interrupt",
            TerminationSignal::Terminate => "terminate",
            TerminationSignal::Quit => "quit",
        })
    }
}

/// Completes on the first termination signal.
///
/// Listeners are registered per call; `Err` means registration failed.
#[cfg(unix)]
pub(crate) async fn termination_signal() -> io::Result<TerminationSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| TerminationSignal::Interrupt),
        _ = sigterm.recv() => Ok(TerminationSignal::Terminate),
        _ = sigquit.recv() => Ok(TerminationSignal::Quit),
    }
}

/// Completes on Ctrl-C.
#[cfg(not(unix))]
pub(crate) async fn termination_signal() -> io::Result<TerminationSignal> {
    tokio::signal::ctrl_c()
        .await
        .map(|()| TerminationSignal::Interrupt)
}
