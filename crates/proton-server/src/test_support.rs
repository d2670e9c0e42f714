//! Controllable environment for unit tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use proton_core::Environment;

/// Manual clock starting at a chosen wall-clock second, with OS randomness.
///
/// Clones share the clock.
#[derive(Clone)]
pub(crate) struct TestEnv {
    origin: Instant,
    start_secs: u64,
    elapsed_secs: Arc<AtomicU64>,
}

impl TestEnv {
    pub(crate) fn at(wall_clock_secs: u64) -> Self {
        Self {
            origin: Instant::now(),
            start_secs: wall_clock_secs,
            elapsed_secs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn advance_secs(&self, secs: u64) {
        self.elapsed_secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.origin + Duration::from_secs(self.elapsed_secs.load(Ordering::SeqCst))
    }

    fn wall_clock_secs(&self) -> u64 {
        self.start_secs + self.elapsed_secs.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::thread_rng().fill_bytes(buffer);
    }
}
