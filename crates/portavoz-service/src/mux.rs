//! Method multiplexer.
//!
//! Owns the ordered backend list (highest priority first) and drives the
//! whole speech side from one worker: every tick it re-evaluates backend
//! viability, switches the active backend when a higher-priority one
//! becomes usable, and runs the active backend's listen/say cycle. At most
//! one backend is resumed at any time.
//!
//! The published method tag and the any-viable flag are plain atomics so
//! the event dispatcher answers `GET_METHOD` and availability queries
//! without touching the worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{Backend, Method};
use crate::bridge::EventBridge;
use crate::storage::OutputStorage;
use crate::{Error, Result};

/// Sleep while no backend is viable, sliced so shutdown stays responsive.
const NO_METHOD_WAIT: Duration = Duration::from_secs(1);
const WAIT_SLICE: Duration = Duration::from_millis(100);

struct MuxShared {
    running: AtomicBool,
    reset_requested: AtomicBool,
    method: AtomicU8,
    any_viable: AtomicBool,
}

/// The multiplexer handle. Construction spawns the worker; dropping the
/// handle stops and joins it.
pub struct MethodMultiplexer {
    shared: Arc<MuxShared>,
    worker: Option<JoinHandle<()>>,
}

impl MethodMultiplexer {
    /// Start the multiplexer over `backends`, ordered highest priority
    /// first.
    pub fn spawn(
        backends: Vec<Backend>,
        storage: Arc<OutputStorage>,
        bridge: Arc<EventBridge>,
        tick: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(MuxShared {
            running: AtomicBool::new(true),
            reset_requested: AtomicBool::new(false),
            // Voice is the assumption until a backend is actually picked.
            method: AtomicU8::new(Method::Voice as u8),
            any_viable: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("speech-mux".to_string())
            .spawn(move || run(&worker_shared, backends, storage.as_ref(), bridge.as_ref(), tick))
            .map_err(Error::Spawn)?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// The currently published method tag.
    pub fn method(&self) -> Method {
        Method::from_u8(self.shared.method.load(Ordering::Acquire))
    }

    /// Whether any backend was viable on the last tick.
    pub fn any_viable(&self) -> bool {
        self.shared.any_viable.load(Ordering::Acquire)
    }

    /// Ask the worker to drop buffered backend ingress on its next tick.
    pub fn request_reset(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
    }

    /// Stop the worker and join it.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for MethodMultiplexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    shared: &MuxShared,
    mut backends: Vec<Backend>,
    storage: &OutputStorage,
    bridge: &EventBridge,
    tick: Duration,
) {
    let mut active: Option<usize> = None;

    while shared.running.load(Ordering::Acquire) {
        if shared.reset_requested.swap(false, Ordering::AcqRel) {
            for backend in &mut backends {
                backend.reset();
            }
        }

        // Walk the whole list every tick even when the active backend is
        // fine: a higher-priority method coming up (a CLI connecting)
        // must preempt immediately.
        let viability: Vec<bool> = backends.iter().map(Backend::is_viable).collect();
        shared
            .any_viable
            .store(viability.iter().any(|&v| v), Ordering::Release);

        let new = viability.iter().position(|&v| v);

        if new != active {
            if let Some(index) = active {
                backends[index].pause();
            }
            if let Some(index) = new {
                backends[index].resume();
                shared
                    .method
                    .store(backends[index].method() as u8, Ordering::Release);
                tracing::info!(
                    backend = backends[index].name(),
                    method = ?backends[index].method(),
                    "speech method switched"
                );
            } else {
                tracing::info!("no viable speech method");
            }
            active = new;
        }

        let Some(index) = active else {
            sleep_sliced(shared, NO_METHOD_WAIT);
            continue;
        };

        // Backend errors never reach the scheduling loop.
        if let Err(e) = backends[index].listen(bridge) {
            tracing::warn!(backend = backends[index].name(), error = %e, "listen failed");
        }
        if let Err(e) = backends[index].say(storage, bridge) {
            tracing::warn!(backend = backends[index].name(), error = %e, "say failed");
        }

        sleep_sliced(shared, tick);
    }

    // Deterministic teardown: stop the active device before the streams
    // are dropped.
    if let Some(index) = active {
        backends[index].pause();
    }
}

/// Sleep in slices so a shutdown request is honored within one slice.
fn sleep_sliced(shared: &MuxShared, total: Duration) {
    let mut remaining = total;
    while remaining > Duration::ZERO && shared.running.load(Ordering::Acquire) {
        let slice = remaining.min(WAIT_SLICE);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}
