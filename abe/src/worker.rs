//! Run one long operation on a worker thread while the calling thread keeps
//! servicing its event loop.
//!
//! ```text
//!   caller ──spawn──► worker: work()
//!     │                  │
//!     ├─ pump()          │
//!     ├─ pump()          │
//!     │ ◄──── result ────┘
//!   join, return result
//! ```

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use pfm_io::lock_is_held_by_this_thread;

use crate::error::{AbeError, Result};

/// How long the caller waits for the worker between two `pump` calls.
pub const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Run `work` on a new thread, calling `pump` on this thread until it finishes.
///
/// Returns the worker's result. A panic on the worker is resumed on the
/// calling thread. Must not be called while holding the ABE_SHARE lock.
pub fn run_with_event_pump<T, W, P>(work: W, mut pump: P) -> Result<T>
where
    T: Send,
    W: FnOnce() -> T + Send,
    P: FnMut(),
{
    debug_assert!(!lock_is_held_by_this_thread());
    let (tx, rx) = mpsc::sync_channel(1);

    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("abe-worker".into())
            .spawn_scoped(scope, move || {
                // nothing to report if the caller has already gone
                tx.send(work()).ok();
            })?;

        loop {
            match rx.recv_timeout(PUMP_INTERVAL) {
                Ok(value) => {
                    if let Err(panic) = handle.join() {
                        std::panic::resume_unwind(panic);
                    }
                    return Ok(value);
                }
                Err(RecvTimeoutError::Timeout) => pump(),
                Err(RecvTimeoutError::Disconnected) => return Err(worker_exit(handle.join())),
            }
        }
    })
}

/// Error for a worker that hung up without a result. Its panic, if any, is
/// resumed instead.
fn worker_exit(joined: thread::Result<()>) -> AbeError {
    match joined {
        Err(panic) => std::panic::resume_unwind(panic),
        Ok(()) => AbeError::WorkerLost,
    }
}
