// Unrecoverable faults: the device has no way to continue, so the faulting
// unit parks itself and keeps reporting until someone power-cycles it.

use chrono::{SecondsFormat, Utc};
use crossbeam_channel::tick;
use log::error;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalFault {
    /// A unit could not be started.
    ThreadSpawn { unit: String, reason: String },
    /// A unit panicked.
    UnitPanicked { unit: String, message: String },
    /// Startup could not complete.
    Startup(String),
}

impl fmt::Display for FatalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalFault::ThreadSpawn { unit, reason } => write!(f, "failed to start {}: {}", unit, reason),
            FatalFault::UnitPanicked { unit, message } => write!(f, "{} panicked: {}", unit, message),
            FatalFault::Startup(reason) => write!(f, "startup failed: {}", reason),
        }
    }
}

/// Fixed diagnostic line for a fault, with the time it was first raised.
pub fn diagnostic(fault: &FatalFault, raised_at: &str) -> String {
    format!("FATAL [{}]: {} - halted", raised_at, fault)
}

/// Where fatal faults go. Never returns.
pub trait FaultHandler: Send + Sync {
    fn halt(&self, fault: &FatalFault) -> !;
}

/// Logs the diagnostic once per `interval`, forever.
#[derive(Debug, Clone, Copy)]
pub struct LogAndHalt {
    pub interval: Duration,
}

impl Default for LogAndHalt {
    fn default() -> Self {
        LogAndHalt {
            interval: Duration::from_secs(1),
        }
    }
}

impl FaultHandler for LogAndHalt {
    fn halt(&self, fault: &FatalFault) -> ! {
        let raised_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = diagnostic(fault, &raised_at);
        error!("{}", line);
        let ticker = tick(self.interval);
        loop {
            if ticker.recv().is_ok() {
                error!("{}", line);
            }
        }
    }
}

/// Route panics of any unit to `handler` after the default hook has printed
/// them. The panicking thread never unwinds past the hook.
pub fn install_panic_hook(handler: &'static dyn FaultHandler) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        let unit = std::thread::current().name().unwrap_or("unnamed").to_string();
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        handler.halt(&FatalFault::UnitPanicked { unit, message });
    }));
}
