use bitflags::bitflags;

bitflags! {
    /// Registration mode for a descriptor callback.
    ///
    /// Exactly one direction must be given per registration: `READ` or
    /// `WRITE`, optionally combined with `ONESHOT`. Combining `READ`
    /// and `WRITE` in a single [`fd_cb`](crate::PollSet::fd_cb) call is
    /// a programmer error and panics; register the two directions
    /// separately instead.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Mode: u8 {
        /// Wait for the descriptor to become readable (or to report an
        /// error or hang-up condition).
        const READ = 1 << 0;

        /// Wait for the descriptor to become writable.
        const WRITE = 1 << 1;

        /// Deregister the callback automatically before it is invoked.
        const ONESHOT = 1 << 2;

        /// Shorthand for `READ | ONESHOT`.
        const READ_ONESHOT = Self::READ.bits() | Self::ONESHOT.bits();

        /// Shorthand for `WRITE | ONESHOT`.
        const WRITE_ONESHOT = Self::WRITE.bits() | Self::ONESHOT.bits();
    }
}

/// Discriminates the single byte written to the self-pipe.
///
/// The loop drains the pipe at the start of every inbox flush; a
/// `Signal` byte additionally marks signal dispatch as pending for the
/// current iteration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub(crate) enum WakeKind {
    /// A callback was injected into the async inbox.
    Inject = 0,

    /// A signal handler ran and the owner must dispatch.
    Signal = 1,
}
