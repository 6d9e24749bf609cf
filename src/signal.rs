//! The public signal vocabulary, mirroring `radicle-signals`'s own `Signal`
//! enum (`examples/quivent-Secular/crates/radicle-signals/src/lib.rs`).

/// An operating system signal `signal_handler` can install a reactor event
/// for (§4.4 of the spec).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Signal {
    /// `SIGINT`.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGHUP`.
    Hangup,
    /// `SIGWINCH`.
    WindowChanged,
}

impl Signal {
    pub(crate) fn raw(self) -> std::os::raw::c_int {
        match self {
            Signal::Interrupt => signal_hook::consts::SIGINT,
            Signal::Terminate => signal_hook::consts::SIGTERM,
            Signal::Hangup => signal_hook::consts::SIGHUP,
            Signal::WindowChanged => signal_hook::consts::SIGWINCH,
        }
    }
}
