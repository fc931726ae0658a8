use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

/// Background stage/counter reporter for long runs; enabled by the
/// verbosity flag and inert otherwise.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    pub stage: Arc<Mutex<String>>,
    pub slices_staged: Arc<AtomicUsize>,
    pub sets_closed: Arc<AtomicUsize>,
    pub discs_burned: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stage: Arc::new(Mutex::new(String::new())),
            slices_staged: Arc::new(AtomicUsize::new(0)),
            sets_closed: Arc::new(AtomicUsize::new(0)),
            discs_burned: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_stage(&self, s: &str) {
        if self.enabled {
            *self.stage.lock().unwrap() = s.to_string();
        }
    }

    pub fn inc_slices(&self) {
        self.slices_staged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sets(&self) {
        self.sets_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discs(&self) {
        self.discs_burned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let stage = self.stage.clone();
        let slices = self.slices_staged.clone();
        let sets = self.sets_closed.clone();
        let discs = self.discs_burned.clone();
        let running = self.running.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(5));
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let s = stage.lock().unwrap().clone();
                eprintln!(
                    "[{:>4}s] {} | slices {} | sets {} | discs {}",
                    t0.elapsed().as_secs(),
                    s,
                    slices.load(Ordering::Relaxed),
                    sets.load(Ordering::Relaxed),
                    discs.load(Ordering::Relaxed),
                );
            }
        });
    }

    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
