//! A single cooperative, process-wide ticker driving `TaskEngine` progress
//! updates and stall checks at a fixed period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TICK_PERIOD: Duration = Duration::from_millis(500);
/// Stall/`WaitingForNetwork` reactivation checks run every third tick (~1.5s).
const COARSE_EVERY: u64 = 3;

/// Engines register on transition to DOWNLOADING and unregister on
/// COMPLETE or CLOSED.
pub trait Tickable: Send + Sync {
    /// Called every tick (~500ms) for progress accounting.
    fn on_tick(&self, loop_count: u64);
    /// Called every third tick (~1.5s) for stall detection and
    /// `WaitingForNetwork` reactivation.
    fn on_coarse_tick(&self, loop_count: u64);
}

#[derive(Default)]
pub struct TimerTicker {
    engines: Mutex<HashMap<u64, Arc<dyn Tickable>>>,
}

impl TimerTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u64, engine: Arc<dyn Tickable>) {
        self.engines.lock().unwrap().insert(id, engine);
    }

    pub fn unregister(&self, id: u64) {
        self.engines.lock().unwrap().remove(&id);
    }

    pub fn registered_count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    /// Fan out one tick to every registered engine.
    pub fn tick_once(&self, loop_count: u64) {
        let engines: Vec<Arc<dyn Tickable>> = self.engines.lock().unwrap().values().cloned().collect();
        for engine in &engines {
            engine.on_tick(loop_count);
        }
        if loop_count % COARSE_EVERY == 0 {
            for engine in &engines {
                engine.on_coarse_tick(loop_count);
            }
        }
    }

    /// Runs the tick loop until the process shuts down.
    pub async fn run_loop(&self) {
        let mut loop_count: u64 = 0;
        loop {
            self.tick_once(loop_count);
            loop_count = loop_count.wrapping_add(1);
            tokio::time::sleep(TICK_PERIOD).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter {
        ticks: AtomicU64,
        coarse: AtomicU64,
    }

    impl Tickable for Counter {
        fn on_tick(&self, _loop_count: u64) {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
        fn on_coarse_tick(&self, _loop_count: u64) {
            self.coarse.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn registered_engine_receives_ticks() {
        let ticker = TimerTicker::new();
        let c = Arc::new(Counter {
            ticks: AtomicU64::new(0),
            coarse: AtomicU64::new(0),
        });
        ticker.register(1, c.clone());
        assert_eq!(ticker.registered_count(), 1);

        for i in 0..6 {
            ticker.tick_once(i);
        }
        assert_eq!(c.ticks.load(Ordering::Relaxed), 6);
        assert_eq!(c.coarse.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unregistered_engine_stops_receiving_ticks() {
        let ticker = TimerTicker::new();
        let c = Arc::new(Counter {
            ticks: AtomicU64::new(0),
            coarse: AtomicU64::new(0),
        });
        ticker.register(1, c.clone());
        ticker.tick_once(0);
        ticker.unregister(1);
        ticker.tick_once(1);
        assert_eq!(c.ticks.load(Ordering::Relaxed), 1);
        assert_eq!(ticker.registered_count(), 0);
    }
}
