// Publisher unit: builds the PubSub model from the field catalog, freezes it,
// starts the publish cycle and then services link events forever.

use crate::network::LinkEvent;
use crate::network::multicast::{FrameSink, MulticastOptions};
use crate::os::config::AppConfig;
use crate::os::linux_rt::RtThreadConfig;
use crate::pubsub::address_space::load_nodeset_from_csv;
use crate::pubsub::catalog::{default_address_space, default_catalog, load_catalog, populate};
use crate::pubsub::connection::{NetworkAddressUrl, PubSubConnection, WriterGroup};
use crate::pubsub::{PublisherContext, RtLevel};
use crate::threads::scheduler::{CycleStats, Scheduler};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, never, select, tick};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

pub const CONNECTION_NAME: &str = "UADP Connection 1";
pub const WRITER_GROUP_NAME: &str = "Demo WriterGroup";
pub const DATASET_NAME: &str = "Demo PDS";

/// Everything the publisher unit needs from the application configuration.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub address: NetworkAddressUrl,
    pub publish_interval: Duration,
    pub rt_level: RtLevel,
    pub rt_thread: Option<RtThreadConfig>,
    pub multicast: MulticastOptions,
    pub catalog_file: Option<PathBuf>,
    pub nodeset_file: Option<PathBuf>,
    pub stats_interval: Duration,
}

impl PublisherSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        PublisherSettings {
            address: config.network_address_url,
            publish_interval: config.publish_interval,
            rt_level: config.rt_level,
            rt_thread: config.rt_thread(),
            multicast: config.multicast_options(),
            catalog_file: config.catalog_file.as_deref().map(|f| PathBuf::from(config.config_path(f))),
            nodeset_file: config.nodeset_file.as_deref().map(|f| PathBuf::from(config.config_path(f))),
            stats_interval: Duration::from_secs(10),
        }
    }
}

/// Build and freeze the connection, writer group and dataset.
pub fn build_context(settings: &PublisherSettings) -> Result<PublisherContext> {
    let entries = match &settings.catalog_file {
        Some(path) => load_catalog(path)?,
        None => default_catalog(),
    };
    let space = match &settings.nodeset_file {
        Some(path) => load_nodeset_from_csv(path)?,
        None => default_address_space(&entries),
    };

    let group = WriterGroup::new(WRITER_GROUP_NAME, settings.publish_interval, settings.rt_level)?;
    let connection = PubSubConnection::new(CONNECTION_NAME, settings.address, group);
    let mut ctx = PublisherContext::new(Arc::new(space), connection, DATASET_NAME);
    populate(&mut ctx, &entries).context("Failed to register published fields")?;
    ctx.freeze().context("Failed to freeze writer group")?;
    Ok(ctx)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCounters {
    pub frames_seen: u64,
    pub uadp_frames: u64,
    pub link_down: u64,
}

pub struct PublisherUnit {
    ctx: Arc<PublisherContext>,
    scheduler: Scheduler,
    events: Receiver<LinkEvent>,
    stats_ticker: Receiver<Instant>,
    counters: ServiceCounters,
}

impl PublisherUnit {
    /// Build, freeze and enable. Any configuration error aborts before a
    /// single frame is sent.
    pub fn start(settings: &PublisherSettings, sink: Box<dyn FrameSink>, events: Receiver<LinkEvent>) -> Result<Self> {
        let ctx = Arc::new(build_context(settings)?);
        let mut scheduler = Scheduler::new(Arc::clone(&ctx));
        scheduler
            .enable(sink, settings.rt_thread)
            .context("Failed to enable writer group")?;
        info!(
            "Publisher running: {} fields ({} dynamic) to {} every {:?}",
            ctx.dataset().len(),
            ctx.updater().dynamic_fields().len(),
            ctx.connection().address,
            settings.publish_interval
        );
        Ok(PublisherUnit {
            ctx,
            scheduler,
            events,
            stats_ticker: tick(settings.stats_interval),
            counters: ServiceCounters::default(),
        })
    }

    /// Handle one service event; blocks until there is one.
    pub fn step(&mut self) {
        let mut disconnected = false;
        select! {
            recv(self.events) -> msg => match msg {
                Ok(LinkEvent::Frame { uadp, .. }) => {
                    self.counters.frames_seen += 1;
                    if uadp {
                        self.counters.uadp_frames += 1;
                    }
                }
                Ok(LinkEvent::Down(reason)) => {
                    self.counters.link_down += 1;
                    warn!("Link receive loop stopped: {}; publishing continues", reason);
                }
                Err(_) => disconnected = true,
            },
            recv(self.stats_ticker) -> _ => self.log_stats(),
        }
        if disconnected {
            warn!("Link event channel closed");
            self.events = never();
        }
    }

    fn log_stats(&self) {
        let stats: Arc<CycleStats> = self.scheduler.stats();
        info!(
            "Publish cycles={} overruns={} (max late {}us) send_errors={} | rx frames={} uadp={}",
            stats.cycles.load(Ordering::Relaxed),
            stats.overruns.load(Ordering::Relaxed),
            stats.max_lateness_ns.load(Ordering::Relaxed) / 1000,
            stats.send_errors.load(Ordering::Relaxed),
            self.counters.frames_seen,
            self.counters.uadp_frames
        );
    }

    pub fn counters(&self) -> ServiceCounters {
        self.counters
    }

    pub fn context(&self) -> &Arc<PublisherContext> {
        &self.ctx
    }

    pub fn run(mut self) -> ! {
        loop {
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::connection::DEFAULT_ADDRESS_URL;
    use crate::uadp::types::UaValue;
    use std::io::Write;

    fn settings() -> PublisherSettings {
        PublisherSettings {
            address: DEFAULT_ADDRESS_URL.parse().unwrap(),
            publish_interval: Duration::from_millis(1),
            rt_level: RtLevel::FixedSize,
            rt_thread: None,
            multicast: MulticastOptions::default(),
            catalog_file: None,
            nodeset_file: None,
            stats_interval: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_build_default_context() {
        let ctx = build_context(&settings()).unwrap();
        assert!(ctx.writer_group().is_frozen());
        assert!(!ctx.writer_group().is_operational());
        assert_eq!(ctx.dataset().len(), 15);
        assert_eq!(ctx.connection().publisher_id, 1);
    }

    #[test]
    fn test_shipped_config_files_match_defaults() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        assert_eq!(load_catalog(dir.join("published_fields.json")).unwrap(), default_catalog());

        let mut s = settings();
        s.catalog_file = Some(dir.join("published_fields.json"));
        s.nodeset_file = Some(dir.join("nodeset.csv"));
        let ctx = build_context(&s).unwrap();
        assert_eq!(ctx.address_space().len(), 15);
        assert_eq!(ctx.dataset().len(), 15);
    }

    #[test]
    fn test_incomplete_nodeset_aborts_build() {
        let mut nodeset = tempfile::NamedTempFile::new().unwrap();
        writeln!(nodeset, "namespace,id,browse_name,data_type").unwrap();
        writeln!(nodeset, "2,6045,ApplicationSequenceNr,UInt32").unwrap();
        nodeset.flush().unwrap();

        let mut s = settings();
        s.nodeset_file = Some(nodeset.path().to_path_buf());
        assert!(build_context(&s).is_err());
    }

    #[test]
    fn test_variable_width_catalog_rejected_under_fixed() {
        let mut catalog = tempfile::NamedTempFile::new().unwrap();
        write!(catalog, r#"[{{"node": "2:6053", "name": "VendorName", "type": "String", "value": "x"}}]"#).unwrap();
        catalog.flush().unwrap();

        let mut s = settings();
        s.catalog_file = Some(catalog.path().to_path_buf());
        assert!(build_context(&s).is_err());
        s.rt_level = RtLevel::DirectValueAccess;
        assert!(build_context(&s).is_ok());
    }

    #[test]
    fn test_service_loop_counts_link_events() {
        let (sink_tx, sink_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let (ev_tx, ev_rx) = crossbeam_channel::unbounded();
        let mut unit = PublisherUnit::start(&settings(), Box::new(sink_tx), ev_rx).unwrap();

        ev_tx.send(LinkEvent::Frame { len: 60, uadp: false }).unwrap();
        ev_tx.send(LinkEvent::Frame { len: 120, uadp: true }).unwrap();
        ev_tx.send(LinkEvent::Down("cable".into())).unwrap();
        for _ in 0..3 {
            unit.step();
        }
        assert_eq!(
            unit.counters(),
            ServiceCounters {
                frames_seen: 2,
                uadp_frames: 1,
                link_down: 1
            }
        );

        // the cycle keeps publishing in the background
        let frame = sink_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame[0], 0xF1);
        assert!(unit.context().writer_group().is_operational());
        assert!(matches!(unit.context().read(crate::pubsub::dataset::FieldHandle(7)), Some(UaValue::UInt16(_))));

        // dropped sender must not spin the loop
        drop(ev_tx);
        unit.step();
    }
}
