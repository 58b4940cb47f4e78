//! Bounded page dispatch.
//!
//! Every page is run on the blocking pool (engine invocations are
//! synchronous subprocess calls) behind a semaphore sized to the admitted
//! worker count. A slot is taken before the blocking task is spawned and
//! released when that task returns, so at most `workers` pages are ever in
//! flight.
//!
//! Outcomes come back in submission order, independent of completion order.
//! A worker that panics yields `Err(message)` in its own slot; its siblings
//! keep running.

use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum Slot<R> {
    Running(JoinHandle<R>),
    Failed(String),
}

/// Run `work` over `items` with at most `workers` in flight.
pub async fn run_bounded<T, R, F>(items: Vec<T>, workers: usize, work: F) -> Vec<Result<R, String>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let work = Arc::new(work);
    let mut slots = Vec::with_capacity(items.len());

    for item in items {
        match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => {
                let work = Arc::clone(&work);
                slots.push(Slot::Running(tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    work(item)
                })));
            }
            Err(e) => slots.push(Slot::Failed(format!("worker pool closed: {e}"))),
        }
    }
    debug!("Dispatched {} item(s) over {} worker(s)", slots.len(), workers);

    let mut outcomes = Vec::with_capacity(slots.len());
    for slot in slots {
        outcomes.push(match slot {
            Slot::Running(handle) => match handle.await {
                Ok(r) => Ok(r),
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    warn!("Worker panicked: {}", msg);
                    Err(msg)
                }
                Err(e) => Err(e.to_string()),
            },
            Slot::Failed(msg) => Err(msg),
        });
    }
    outcomes
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
