pub mod bootstrap;
pub mod publisher;
pub mod ready_signal;
pub mod scheduler;

pub use bootstrap::{BootState, Bootstrap};
pub use ready_signal::ReadySignal;

use crate::os::fault::{FatalFault, FaultHandler};
use std::thread::{self, JoinHandle};

/// Spawn a named unit thread. A unit that cannot be started is fatal.
pub fn spawn_unit<F>(name: &str, faults: &dyn FaultHandler, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    match thread::Builder::new().name(name.to_string()).spawn(f) {
        Ok(handle) => handle,
        Err(e) => faults.halt(&FatalFault::ThreadSpawn {
            unit: name.to_string(),
            reason: e.to_string(),
        }),
    }
}
