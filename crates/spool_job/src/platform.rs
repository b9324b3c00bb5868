//! Host event draining during worker shutdown.
//!
//! On windowed platforms a printer driver running on the worker thread can
//! open a native modal dialog parented to the coordinator's window. Closing
//! that dialog sends a blocking message to the parent, so if the coordinator
//! thread simply blocked on the worker it would never service the message
//! and both threads would wait forever.
//!
//! Embedders on such platforms supply a [`HostEventPump`]. During shutdown
//! the job asks the worker to quit and then pumps only native input (never
//! its own queued tasks or timers) until the worker thread is gone.
//! Without a pump the job goes straight to the background finalize step.

use crate::worker::JobWorker;
use std::time::Duration;

/// Access to the host platform's native event queue.
pub trait HostEventPump: Send + Sync {
    /// Dispatch native events that are already pending.
    ///
    /// Must not run coordinator message loop tasks.
    fn pump_pending(&self);

    /// Block until native input arrives or `timeout` elapses.
    fn wait_for_input(&self, timeout: Duration);
}

/// Ask `worker` to quit and pump host events until its thread has exited.
///
/// Returns the number of pump rounds it took.
pub(crate) fn drain_until_worker_exits(
    pump: &dyn HostEventPump,
    worker: &dyn JobWorker,
    poll: Duration,
) -> usize {
    worker.stop_soon();
    let mut rounds = 0;
    while worker.is_thread_alive() {
        pump.wait_for_input(poll);
        pump.pump_pending();
        rounds += 1;
    }
    rounds
}
