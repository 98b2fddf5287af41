use crate::network::multicast::FrameSink;
use crate::os::linux_rt::{MonotonicDeadline, RtThreadConfig};
use crate::pubsub::{ConfigError, FrameBuilder, PublisherContext};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Log the first failure and then every Nth.
const LOG_EVERY: u64 = 1000;

/// Counters shared between the publish cycle and whoever reports on it.
#[derive(Debug, Default)]
pub struct CycleStats {
    pub cycles: AtomicU64,
    pub overruns: AtomicU64,
    pub send_errors: AtomicU64,
    pub max_lateness_ns: AtomicU64,
}

impl CycleStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.cycles.load(Ordering::Relaxed),
            self.overruns.load(Ordering::Relaxed),
            self.send_errors.load(Ordering::Relaxed),
        )
    }
}

/// One publish cycle: update dynamic fields, build the frame, send it.
pub struct PublishCycle {
    ctx: Arc<PublisherContext>,
    builder: FrameBuilder,
    sink: Box<dyn FrameSink>,
    sequence: u16,
    stats: Arc<CycleStats>,
}

impl PublishCycle {
    pub(crate) fn new(
        ctx: Arc<PublisherContext>,
        builder: FrameBuilder,
        sink: Box<dyn FrameSink>,
        stats: Arc<CycleStats>,
    ) -> Self {
        PublishCycle {
            ctx,
            builder,
            sink,
            sequence: 0,
            stats,
        }
    }

    pub fn run_once(&mut self) {
        self.ctx.updater().tick();

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let frame = self.builder.build(sequence);
        if let Err(e) = self.sink.send_frame(frame) {
            let n = self.stats.send_errors.fetch_add(1, Ordering::Relaxed) + 1;
            if n == 1 || n % LOG_EVERY == 0 {
                warn!("Failed to send NetworkMessage {} ({} send errors so far): {}", sequence, n, e);
            }
        }
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drives the writer group's periodic publish cycle.
pub struct Scheduler {
    ctx: Arc<PublisherContext>,
    stop: Arc<AtomicBool>,
    stats: Arc<CycleStats>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<PublisherContext>) -> Self {
        Scheduler {
            ctx,
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CycleStats::default()),
            handle: None,
        }
    }

    /// Make the frozen writer group operational and start publishing every
    /// `publish_interval` on a dedicated thread.
    ///
    /// # Arguments
    /// * `sink` - where encoded NetworkMessages go
    /// * `rt` - real-time settings the cycle thread applies to itself
    pub fn enable(&mut self, sink: Box<dyn FrameSink>, rt: Option<RtThreadConfig>) -> Result<(), ConfigError> {
        let group = self.ctx.writer_group();
        if !group.is_frozen() {
            return Err(ConfigError::NotFrozen);
        }
        if group.is_operational() {
            return Err(ConfigError::AlreadyOperational);
        }
        let builder = self.ctx.frame_builder()?;
        if !group.transition_operational(false) {
            return Err(ConfigError::AlreadyOperational);
        }
        self.ctx.updater().start();
        self.stop.store(false, Ordering::Release);

        let period = group.publish_interval;
        let cycle = PublishCycle::new(Arc::clone(&self.ctx), builder, sink, Arc::clone(&self.stats));
        let stop = Arc::clone(&self.stop);
        let spawned = thread::Builder::new()
            .name("publish-cycle".into())
            .spawn(move || run_periodic(cycle, period, stop, rt));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                info!(
                    "Writer group '{}' operational, publishing every {:?}",
                    group.name, period
                );
                Ok(())
            }
            Err(e) => {
                self.ctx.updater().stop();
                group.transition_operational(true);
                Err(ConfigError::ThreadSpawn(e))
            }
        }
    }

    /// Stop and join the publish cycle. Returns false if it was not running.
    pub fn disable(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };
        self.stop.store(true, Ordering::Release);
        if handle.join().is_err() {
            error!("Publish cycle thread panicked");
        }
        self.ctx.updater().stop();
        self.ctx.writer_group().transition_operational(true);
        let (cycles, overruns, send_errors) = self.stats.snapshot();
        info!(
            "Writer group '{}' disabled after {} cycles ({} overruns, {} send errors)",
            self.ctx.writer_group().name,
            cycles,
            overruns,
            send_errors
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stats(&self) -> Arc<CycleStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.disable();
    }
}

fn run_periodic(mut cycle: PublishCycle, period: Duration, stop: Arc<AtomicBool>, rt: Option<RtThreadConfig>) {
    if let Some(rt) = rt {
        if let Err(e) = rt.apply() {
            warn!("Publish cycle runs without RT settings: {}", e);
        }
    }
    let mut deadline = match MonotonicDeadline::now() {
        Ok(d) => d,
        Err(e) => {
            error!("Publish cycle cannot start: {}", e);
            return;
        }
    };
    let stats = Arc::clone(&cycle.stats);

    while !stop.load(Ordering::Acquire) {
        cycle.run_once();
        deadline.advance(period);

        if let Ok(now) = MonotonicDeadline::now() {
            let late = deadline.lateness(&now);
            if !late.is_zero() {
                let n = stats.overruns.fetch_add(1, Ordering::Relaxed) + 1;
                stats.max_lateness_ns.fetch_max(late.as_nanos() as u64, Ordering::Relaxed);
                if n == 1 || n % LOG_EVERY == 0 {
                    warn!("Publish cycle overrun by {:?} ({} overruns so far)", late, n);
                }
                // skip the missed slots instead of bursting to catch up
                deadline = now;
            }
        }
        if let Err(e) = deadline.sleep_until() {
            error!("Publish cycle stopped: {}", e);
            break;
        }
    }
}
