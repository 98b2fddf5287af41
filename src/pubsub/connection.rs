use super::error::ConfigError;
use super::strategy::RtLevel;
use crate::uadp::flags::{DataSetFieldContentFlags, DataSetMessageContentFlags, NetworkMessageContentFlags};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const UADP_TRANSPORT_PROFILE: &str = "http://opcfoundation.org/UA-Profile/Transport/pubsub-udp-uadp";
pub const DEFAULT_ADDRESS_URL: &str = "opc.udp://224.0.0.22:4840/";
pub const PUBLISHER_ID: u16 = 1;
pub const WRITER_GROUP_ID: u16 = 1;
pub const GROUP_VERSION: u32 = 0x21F3_8934;
pub const DATASET_WRITER_ID: u16 = 0;

/// `opc.udp://<ipv4>:<port>/` destination of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddressUrl(SocketAddrV4);

impl NetworkAddressUrl {
    pub fn socket_addr(&self) -> SocketAddrV4 {
        self.0
    }

    pub fn is_multicast(&self) -> bool {
        self.0.ip().is_multicast()
    }
}

impl FromStr for NetworkAddressUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddressUrl(s.to_string());
        let rest = s.trim().strip_prefix("opc.udp://").ok_or_else(invalid)?;
        let host_port = rest.trim_end_matches('/');
        let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
        let ip = host.parse::<Ipv4Addr>().map_err(|_| invalid())?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        Ok(NetworkAddressUrl(SocketAddrV4::new(ip, port)))
    }
}

impl fmt::Display for NetworkAddressUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opc.udp://{}:{}/", self.0.ip(), self.0.port())
    }
}

#[derive(Debug, Clone)]
pub struct DataSetWriter {
    pub name: String,
    pub writer_id: u16,
    pub key_frame_count: u32,
    pub dataset_content: DataSetMessageContentFlags,
    pub field_content: DataSetFieldContentFlags,
}

impl Default for DataSetWriter {
    fn default() -> Self {
        DataSetWriter {
            name: "Demo DataSetWriter".to_string(),
            writer_id: DATASET_WRITER_ID,
            key_frame_count: 1,
            dataset_content: DataSetMessageContentFlags::empty(),
            field_content: DataSetFieldContentFlags::empty(),
        }
    }
}

/// Writer group with its single dataset writer.
///
/// `frozen` only ever goes false -> true. `operational` is toggled by the
/// scheduler and read from other threads.
#[derive(Debug)]
pub struct WriterGroup {
    pub name: String,
    pub id: u16,
    pub publish_interval: Duration,
    pub content: NetworkMessageContentFlags,
    pub group_version: u32,
    pub rt_level: RtLevel,
    pub writer: DataSetWriter,
    frozen: bool,
    operational: AtomicBool,
}

impl WriterGroup {
    pub fn new(name: impl Into<String>, publish_interval: Duration, rt_level: RtLevel) -> Result<Self, ConfigError> {
        if publish_interval.is_zero() {
            return Err(ConfigError::ZeroPublishInterval);
        }
        Ok(WriterGroup {
            name: name.into(),
            id: WRITER_GROUP_ID,
            publish_interval,
            content: NetworkMessageContentFlags::device_default(),
            group_version: GROUP_VERSION,
            rt_level,
            writer: DataSetWriter::default(),
            frozen: false,
            operational: AtomicBool::new(false),
        })
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn mark_frozen(&mut self) {
        self.frozen = true;
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    /// Flip `operational` from `from` to `!from`; false when it was not `from`.
    pub(crate) fn transition_operational(&self, from: bool) -> bool {
        self.operational
            .compare_exchange(from, !from, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug)]
pub struct PubSubConnection {
    pub name: String,
    pub transport_profile_uri: String,
    pub address: NetworkAddressUrl,
    pub publisher_id: u16,
    pub writer_group: WriterGroup,
}

impl PubSubConnection {
    pub fn new(name: impl Into<String>, address: NetworkAddressUrl, writer_group: WriterGroup) -> Self {
        PubSubConnection {
            name: name.into(),
            transport_profile_uri: UADP_TRANSPORT_PROFILE.to_string(),
            address,
            publisher_id: PUBLISHER_ID,
            writer_group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_address_url() {
        let url: NetworkAddressUrl = DEFAULT_ADDRESS_URL.parse().unwrap();
        assert_eq!(url.socket_addr(), SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 22), 4840));
        assert!(url.is_multicast());
        assert_eq!(url.to_string(), DEFAULT_ADDRESS_URL);
    }

    #[test]
    fn test_reject_bad_address_urls() {
        for bad in ["udp://224.0.0.22:4840/", "opc.udp://224.0.0.22/", "opc.udp://host:4840/", "opc.udp://1.2.3.4:0/"] {
            assert!(matches!(
                bad.parse::<NetworkAddressUrl>(),
                Err(ConfigError::InvalidAddressUrl(_))
            ));
        }
    }

    #[test]
    fn test_writer_group_defaults() {
        let wg = WriterGroup::new("Demo WriterGroup", Duration::from_millis(1), RtLevel::FixedSize).unwrap();
        assert_eq!(wg.id, 1);
        assert_eq!(wg.group_version, 569_608_500);
        assert_eq!(wg.writer.writer_id, 0);
        assert_eq!(wg.writer.key_frame_count, 1);
        assert!(!wg.is_frozen());
        assert!(!wg.is_operational());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            WriterGroup::new("wg", Duration::ZERO, RtLevel::None),
            Err(ConfigError::ZeroPublishInterval)
        ));
    }

    #[test]
    fn test_operational_transition_once() {
        let wg = WriterGroup::new("wg", Duration::from_millis(1), RtLevel::None).unwrap();
        assert!(wg.transition_operational(false));
        assert!(!wg.transition_operational(false));
        assert!(wg.is_operational());
        assert!(wg.transition_operational(true));
        assert!(!wg.is_operational());
    }
}
