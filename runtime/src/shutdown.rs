//! SIGINT/SIGTERM handling: fire-once `AtomicBool` flag the event loop
//! polls, mirroring `examples/N10h0ggr-Gladix/user-agent/src/cleanup.rs`
//! (`CLEANUP_DONE: AtomicBool` guarding a single teardown), adapted from
//! "run cleanup callbacks once" to "ask the event loop to stop, then
//! detach every device once".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Register SIGINT/SIGTERM handlers that set the shared flag. Safe to
    /// call once per process; registering twice is a logic error the
    /// caller should not do; `signal_hook` itself returns an error rather
    /// than invoking undefined behavior if it does happen.
    pub fn install() -> Result<Self, std::io::Error> {
        let flag = Arc::new(AtomicBool::new(false));
        flag::register(SIGTERM, Arc::clone(&flag))?;
        flag::register(SIGINT, Arc::clone(&flag))?;
        Ok(Self { flag })
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
        info!("shutdown flag set (test)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_can_be_triggered() {
        let shutdown = ShutdownFlag::install().unwrap();
        assert!(!shutdown.is_set());
        shutdown.trigger();
        assert!(shutdown.is_set());
    }
}
