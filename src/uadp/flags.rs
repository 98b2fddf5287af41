// Content masks from OPC UA Part 14, bit values as defined for the
// corresponding *ContentMask data types.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NetworkMessageContentFlags: u32 {
        const PUBLISHER_ID = 0x0001;
        const GROUP_HEADER = 0x0002;
        const WRITER_GROUP_ID = 0x0004;
        const GROUP_VERSION = 0x0008;
        const NETWORK_MESSAGE_NUMBER = 0x0010;
        const SEQUENCE_NUMBER = 0x0020;
        const PAYLOAD_HEADER = 0x0040;
        const TIMESTAMP = 0x0080;
        const PICOSECONDS = 0x0100;
        const DATASET_CLASS_ID = 0x0200;
        const PROMOTED_FIELDS = 0x0400;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataSetMessageContentFlags: u32 {
        const TIMESTAMP = 0x01;
        const PICOSECONDS = 0x02;
        const STATUS = 0x04;
        const MAJOR_VERSION = 0x08;
        const MINOR_VERSION = 0x10;
        const SEQUENCE_NUMBER = 0x20;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataSetFieldContentFlags: u32 {
        const STATUS_CODE = 0x01;
        const SOURCE_TIMESTAMP = 0x02;
        const SERVER_TIMESTAMP = 0x04;
        const SOURCE_PICOSECONDS = 0x08;
        const SERVER_PICOSECONDS = 0x10;
        const RAW_DATA = 0x20;
    }
}

impl NetworkMessageContentFlags {
    /// Mask used by the device: everything in the group and payload headers,
    /// no timestamp.
    pub fn device_default() -> Self {
        Self::PUBLISHER_ID
            | Self::GROUP_HEADER
            | Self::WRITER_GROUP_ID
            | Self::GROUP_VERSION
            | Self::NETWORK_MESSAGE_NUMBER
            | Self::SEQUENCE_NUMBER
            | Self::PAYLOAD_HEADER
    }

    /// Bits the encoder knows how to emit.
    pub fn supported() -> Self {
        Self::device_default() | Self::TIMESTAMP
    }
}

impl DataSetMessageContentFlags {
    pub fn supported() -> Self {
        Self::SEQUENCE_NUMBER
    }
}

impl DataSetFieldContentFlags {
    pub fn supported() -> Self {
        Self::RAW_DATA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_default_has_no_timestamp() {
        let mask = NetworkMessageContentFlags::device_default();
        assert!(!mask.contains(NetworkMessageContentFlags::TIMESTAMP));
        assert!(mask.contains(NetworkMessageContentFlags::PAYLOAD_HEADER));
        assert_eq!(mask.bits(), 0x7F);
    }
}
