use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Cooperative cancellation flag handed to `ICommand::mutate`.
///
/// The graph build is the only operation that may block for a while, so
/// this is the whole cancellation story: the caller keeps one clone, the
/// builder threads another through every mutation, and a raised flag
/// makes the build fail with `BuildError::Canceled`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
