//! Startup sequencing: board bring-up, then the network unit, then the
//! publisher once the link has been reported ready.

use crate::network::{LinkEvent, LinkInfo, NetworkLink, StaticIpConfig};
use crate::os::fault::FaultHandler;
use crate::os::hardware::BoardInit;
use crate::threads::ready_signal::ReadySignal;
use crate::threads::spawn_unit;
use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

/// Capacity of the link event channel between the receive loop and the
/// publisher service loop.
pub const LINK_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootState {
    NetworkInit = 0,
    WaitLinkReady = 1,
    PublisherInit = 2,
    Running = 3,
}

impl BootState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BootState::NetworkInit,
            1 => BootState::WaitLinkReady,
            2 => BootState::PublisherInit,
            _ => BootState::Running,
        }
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootState::NetworkInit => "NetworkInit",
            BootState::WaitLinkReady => "WaitLinkReady",
            BootState::PublisherInit => "PublisherInit",
            BootState::Running => "Running",
        };
        f.write_str(name)
    }
}

/// Units left running once the sequencer reaches `Running`.
pub struct BootHandles {
    pub network: JoinHandle<()>,
    pub publisher: JoinHandle<()>,
    pub link_ready_at: Instant,
}

pub struct Bootstrap {
    state: Arc<AtomicU8>,
    faults: &'static dyn FaultHandler,
}

impl Bootstrap {
    pub fn new(faults: &'static dyn FaultHandler) -> Self {
        Bootstrap {
            state: Arc::new(AtomicU8::new(BootState::NetworkInit as u8)),
            faults,
        }
    }

    pub fn state(&self) -> BootState {
        BootState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn enter(&self, next: BootState) {
        let prev = BootState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev == next {
            info!("Bootstrap: {}", next);
        } else {
            info!("Bootstrap: {} -> {}", prev, next);
        }
    }

    /// Run the startup sequence.
    ///
    /// # Arguments
    /// * `board` - Hardware hook, run first
    /// * `link` - Network collaborator, moved into the network unit
    /// * `ip` - Static address to bring up
    /// * `publisher` - Body of the publisher unit; only started after the
    ///   link has been signalled ready
    ///
    /// # Returns
    /// Handles of the network and publisher units. A link that fails to come
    /// up is returned as an error and the publisher is never started.
    pub fn run<P>(
        &self,
        mut board: Box<dyn BoardInit>,
        mut link: Box<dyn NetworkLink>,
        ip: StaticIpConfig,
        publisher: P,
    ) -> Result<BootHandles>
    where
        P: FnOnce(LinkInfo, Receiver<LinkEvent>) + Send + 'static,
    {
        self.enter(BootState::NetworkInit);
        board.init();

        let ready: Arc<ReadySignal<Result<LinkInfo, String>>> = Arc::new(ReadySignal::new());
        let (event_tx, event_rx) = crossbeam_channel::bounded(LINK_EVENT_CAPACITY);

        let network_ready = Arc::clone(&ready);
        let network = spawn_unit("network", self.faults, move || {
            let outcome = link.bring_up(&ip).map_err(|e| format!("{:#}", e));
            let receiver = match &outcome {
                Ok(_) => match link.spawn_receive(event_tx) {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!("Link receive loop not started: {:#}", e);
                        None
                    }
                },
                Err(_) => None,
            };
            if network_ready.signal(outcome).is_err() {
                error!("Link readiness was already signalled");
            }
            if let Some(handle) = receiver {
                if handle.join().is_err() {
                    error!("Link receive loop panicked");
                }
                warn!("Link receive loop ended");
            }
        });

        self.enter(BootState::WaitLinkReady);
        let link_info = ready
            .wait()
            .context("Waiting for link readiness")?
            .map_err(anyhow::Error::msg)
            .context("Network link did not come up")?;
        let link_ready_at = Instant::now();
        info!("Link ready: {} ({}/{})", link_info.interface, link_info.address, link_info.prefix);

        self.enter(BootState::PublisherInit);
        let publisher = spawn_unit("publisher", self.faults, move || publisher(link_info, event_rx));

        self.enter(BootState::Running);
        Ok(BootHandles {
            network,
            publisher,
            link_ready_at,
        })
    }
}
