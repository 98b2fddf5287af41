//! UADP NetworkMessage encoder for a single DataSetMessage.
//!
//! Two ways to produce a frame:
//! - [`UadpEncoder::encode`] serializes everything from scratch,
//! - [`UadpEncoder::freeze_layout`] encodes once and remembers where every
//!   changing byte lives, so [`FixedLayout::refresh`] only rewrites those.

use crate::pubsub::connection::WriterGroup;
use crate::pubsub::dataset::Field;
use crate::pubsub::error::ConfigError;
use crate::uadp::flags::{DataSetFieldContentFlags, DataSetMessageContentFlags, NetworkMessageContentFlags};
use chrono::{DateTime, Utc};
use std::ops::Range;
use std::sync::Arc;

const UADP_VERSION: u8 = 0x01;

/// Largest field count the DataSetMessage header can express.
pub const MAX_FIELDS: usize = u16::MAX as usize;

/// Largest UDP payload over IPv4.
pub const MAX_FRAME_LEN: usize = 65_507;

// NetworkMessage header flags (byte 0, upper nibble)
const NM_PUBLISHER_ID: u8 = 0x10;
const NM_GROUP_HEADER: u8 = 0x20;
const NM_PAYLOAD_HEADER: u8 = 0x40;
const NM_EXTENDED_FLAGS1: u8 = 0x80;

// ExtendedFlags1
const EXT1_PUBLISHER_ID_UINT16: u8 = 0x01;
const EXT1_TIMESTAMP: u8 = 0x20;

// GroupHeader flags
const GH_WRITER_GROUP_ID: u8 = 0x01;
const GH_GROUP_VERSION: u8 = 0x02;
const GH_NETWORK_MESSAGE_NUMBER: u8 = 0x04;
const GH_SEQUENCE_NUMBER: u8 = 0x08;

// DataSetMessage flags1
const DSM_VALID: u8 = 0x01;
const DSM_RAW_DATA: u8 = 0x02;
const DSM_SEQUENCE_NUMBER: u8 = 0x08;

/// Offset between 1601-01-01 and 1970-01-01 in 100 ns ticks.
const UA_DATETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// OPC UA DateTime: 100 ns ticks since 1601-01-01 UTC.
pub fn ua_datetime(now: DateTime<Utc>) -> i64 {
    now.timestamp() * 10_000_000 + i64::from(now.timestamp_subsec_nanos() / 100) + UA_DATETIME_UNIX_EPOCH
}

/// Where the per-message bytes of an encoded frame live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedOffsets {
    pub sequence: Option<usize>,
    pub dataset_sequence: Option<usize>,
    pub timestamp: Option<usize>,
    /// Payload range of each field in wire order, length prefix included.
    pub fields: Vec<Range<usize>>,
}

#[derive(Debug, Clone)]
pub struct UadpEncoder {
    publisher_id: u16,
    writer_group_id: u16,
    group_version: u32,
    writer_id: u16,
    network: NetworkMessageContentFlags,
    dataset: DataSetMessageContentFlags,
    field: DataSetFieldContentFlags,
}

impl UadpEncoder {
    /// Build an encoder for `group`, rejecting content-mask bits this encoder
    /// cannot emit.
    pub fn new(group: &WriterGroup, publisher_id: u16) -> Result<Self, ConfigError> {
        let extra = group.content - NetworkMessageContentFlags::supported();
        if !extra.is_empty() {
            return Err(ConfigError::UnsupportedContentMask {
                mask: "network message",
                bits: extra.bits(),
            });
        }
        let extra = group.writer.dataset_content - DataSetMessageContentFlags::supported();
        if !extra.is_empty() {
            return Err(ConfigError::UnsupportedContentMask {
                mask: "dataset message",
                bits: extra.bits(),
            });
        }
        let extra = group.writer.field_content - DataSetFieldContentFlags::supported();
        if !extra.is_empty() {
            return Err(ConfigError::UnsupportedContentMask {
                mask: "dataset field",
                bits: extra.bits(),
            });
        }
        Ok(UadpEncoder {
            publisher_id,
            writer_group_id: group.id,
            group_version: group.group_version,
            writer_id: group.writer.writer_id,
            network: group.content,
            dataset: group.writer.dataset_content,
            field: group.writer.field_content,
        })
    }

    /// Serialize one NetworkMessage carrying `fields` into `out` (cleared
    /// first).
    pub fn encode(&self, sequence: u16, fields: &[Arc<Field>], out: &mut Vec<u8>) -> EncodedOffsets {
        out.clear();
        let mut offsets = EncodedOffsets::default();
        let nm = self.network;

        let mut ext1 = 0u8;
        if nm.contains(NetworkMessageContentFlags::PUBLISHER_ID) {
            ext1 |= EXT1_PUBLISHER_ID_UINT16;
        }
        if nm.contains(NetworkMessageContentFlags::TIMESTAMP) {
            ext1 |= EXT1_TIMESTAMP;
        }

        let mut flags = UADP_VERSION;
        if nm.contains(NetworkMessageContentFlags::PUBLISHER_ID) {
            flags |= NM_PUBLISHER_ID;
        }
        if nm.contains(NetworkMessageContentFlags::GROUP_HEADER) {
            flags |= NM_GROUP_HEADER;
        }
        if nm.contains(NetworkMessageContentFlags::PAYLOAD_HEADER) {
            flags |= NM_PAYLOAD_HEADER;
        }
        if ext1 != 0 {
            flags |= NM_EXTENDED_FLAGS1;
        }
        out.push(flags);
        if ext1 != 0 {
            out.push(ext1);
        }

        if nm.contains(NetworkMessageContentFlags::PUBLISHER_ID) {
            out.extend_from_slice(&self.publisher_id.to_le_bytes());
        }

        if nm.contains(NetworkMessageContentFlags::GROUP_HEADER) {
            let mut gh = 0u8;
            if nm.contains(NetworkMessageContentFlags::WRITER_GROUP_ID) {
                gh |= GH_WRITER_GROUP_ID;
            }
            if nm.contains(NetworkMessageContentFlags::GROUP_VERSION) {
                gh |= GH_GROUP_VERSION;
            }
            if nm.contains(NetworkMessageContentFlags::NETWORK_MESSAGE_NUMBER) {
                gh |= GH_NETWORK_MESSAGE_NUMBER;
            }
            if nm.contains(NetworkMessageContentFlags::SEQUENCE_NUMBER) {
                gh |= GH_SEQUENCE_NUMBER;
            }
            out.push(gh);
            if gh & GH_WRITER_GROUP_ID != 0 {
                out.extend_from_slice(&self.writer_group_id.to_le_bytes());
            }
            if gh & GH_GROUP_VERSION != 0 {
                out.extend_from_slice(&self.group_version.to_le_bytes());
            }
            if gh & GH_NETWORK_MESSAGE_NUMBER != 0 {
                // one NetworkMessage per publish cycle
                out.extend_from_slice(&1u16.to_le_bytes());
            }
            if gh & GH_SEQUENCE_NUMBER != 0 {
                offsets.sequence = Some(out.len());
                out.extend_from_slice(&sequence.to_le_bytes());
            }
        }

        if nm.contains(NetworkMessageContentFlags::PAYLOAD_HEADER) {
            out.push(1);
            out.extend_from_slice(&self.writer_id.to_le_bytes());
        }

        if nm.contains(NetworkMessageContentFlags::TIMESTAMP) {
            offsets.timestamp = Some(out.len());
            out.extend_from_slice(&ua_datetime(Utc::now()).to_le_bytes());
        }

        let raw = self.field.contains(DataSetFieldContentFlags::RAW_DATA);
        let mut dsm_flags = DSM_VALID;
        if raw {
            dsm_flags |= DSM_RAW_DATA;
        }
        if self.dataset.contains(DataSetMessageContentFlags::SEQUENCE_NUMBER) {
            dsm_flags |= DSM_SEQUENCE_NUMBER;
        }
        out.push(dsm_flags);
        if dsm_flags & DSM_SEQUENCE_NUMBER != 0 {
            offsets.dataset_sequence = Some(out.len());
            out.extend_from_slice(&sequence.to_le_bytes());
        }
        if !raw {
            // bounded by MAX_FIELDS at freeze
            out.extend_from_slice(&(fields.len() as u16).to_le_bytes());
        }

        offsets.fields.reserve(fields.len());
        for field in fields {
            if !raw {
                out.push(field.type_tag.variant_encoding());
                if field.type_tag.is_array_variant() {
                    out.extend_from_slice(&1i32.to_le_bytes());
                }
            }
            let start = out.len();
            field.encode_payload(out);
            offsets.fields.push(start..out.len());
        }
        offsets
    }

    /// Encode once and keep the buffer for in-place patching. Every field must
    /// have a static width that its current encoding matches.
    pub fn freeze_layout(&self, fields: &[Arc<Field>]) -> Result<FixedLayout, ConfigError> {
        let mut buffer = Vec::new();
        let offsets = self.encode(0, fields, &mut buffer);

        let mut patches = Vec::new();
        for (field, range) in fields.iter().zip(offsets.fields.iter()) {
            if field.type_tag.static_width() != Some(range.len()) {
                return Err(ConfigError::VariableWidth {
                    node: field.node_id,
                    declared: field.type_tag,
                });
            }
            if field.is_dynamic() {
                patches.push(FieldPatch {
                    field: Arc::clone(field),
                    range: range.clone(),
                });
            }
        }

        Ok(FixedLayout {
            buffer,
            offsets,
            patches,
        })
    }
}

#[derive(Debug)]
struct FieldPatch {
    field: Arc<Field>,
    range: Range<usize>,
}

/// A pre-encoded frame whose length never changes.
#[derive(Debug)]
pub struct FixedLayout {
    buffer: Vec<u8>,
    offsets: EncodedOffsets,
    patches: Vec<FieldPatch>,
}

impl FixedLayout {
    /// Rewrite sequence numbers, timestamp and dynamic field payloads, and
    /// return the frame.
    pub fn refresh(&mut self, sequence: u16) -> &[u8] {
        let seq = sequence.to_le_bytes();
        if let Some(at) = self.offsets.sequence {
            self.buffer[at..at + 2].copy_from_slice(&seq);
        }
        if let Some(at) = self.offsets.dataset_sequence {
            self.buffer[at..at + 2].copy_from_slice(&seq);
        }
        if let Some(at) = self.offsets.timestamp {
            self.buffer[at..at + 8].copy_from_slice(&ua_datetime(Utc::now()).to_le_bytes());
        }
        for patch in &self.patches {
            patch.field.patch_payload(&mut self.buffer[patch.range.clone()]);
        }
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::dataset::FieldSource;
    use crate::pubsub::storage::FieldStorage;
    use crate::pubsub::strategy::RtLevel;
    use crate::uadp::types::{NodeId, Transform, TypeTag, UaValue};
    use chrono::TimeZone;
    use std::time::Duration;

    fn field(id: u32, tag: TypeTag, value: UaValue, transform: Option<Transform>) -> Arc<Field> {
        Arc::new(Field {
            node_id: NodeId::numeric(2, id),
            alias: format!("f{}", id),
            type_tag: tag,
            transform,
            source: FieldSource::Static(Arc::new(FieldStorage::from_value(&value))),
        })
    }

    fn group() -> WriterGroup {
        WriterGroup::new("Demo WriterGroup", Duration::from_millis(1), RtLevel::FixedSize).unwrap()
    }

    #[test]
    fn test_header_bytes_device_default() {
        let enc = UadpEncoder::new(&group(), 1).unwrap();
        let fields = vec![field(6051, TypeTag::Byte, UaValue::Byte(0xEE), None)];
        let mut out = Vec::new();
        let offsets = enc.encode(0x0102, &fields, &mut out);

        let expected: Vec<u8> = vec![
            0xF1, 0x01, // flags, ext flags1
            0x01, 0x00, // publisher id
            0x0F, // group header flags
            0x01, 0x00, // writer group id
            0x34, 0x89, 0xF3, 0x21, // group version
            0x01, 0x00, // network message number
            0x02, 0x01, // sequence number
            0x01, 0x00, 0x00, // payload header
            0x01, // dataset message flags1
            0x01, 0x00, // field count
            0x03, 0xEE, // Byte field
        ];
        assert_eq!(out, expected);
        assert_eq!(offsets.sequence, Some(13));
        assert_eq!(offsets.timestamp, None);
        assert_eq!(offsets.fields, vec![22..23]);
    }

    #[test]
    fn test_fixed_string_bytes_in_place() {
        let vendor = "NetTimeLogic_GmbH_-_-_-_-_-_-_-_";
        let enc = UadpEncoder::new(&group(), 1).unwrap();
        let fields = vec![
            field(6051, TypeTag::Byte, UaValue::Byte(0xEE), None),
            field(6053, TypeTag::FixedString(32), UaValue::String(vendor.into()), None),
            field(6048, TypeTag::FixedString(10), UaValue::String("Arty A7_-_".into()), None),
        ];
        let mut out = Vec::new();
        let offsets = enc.encode(0, &fields, &mut out);

        let r = offsets.fields[1].clone();
        assert_eq!(r.len(), 36);
        // String array of one element
        assert_eq!(out[r.start - 5], 0x8C);
        assert_eq!(&out[r.start - 4..r.start], &1i32.to_le_bytes());
        assert_eq!(&out[r.start..r.start + 4], &32i32.to_le_bytes());
        assert_eq!(&out[r.start + 4..r.end], vendor.as_bytes());
        assert_eq!(offsets.fields[2].start, r.end + 5);
    }

    #[test]
    fn test_byte_string_field_bytes() {
        let enc = UadpEncoder::new(&group(), 1).unwrap();
        let fields = vec![field(
            6055,
            TypeTag::FixedByteString(8),
            UaValue::ByteString(b"12345678".to_vec()),
            None,
        )];
        let mut out = Vec::new();
        let offsets = enc.encode(0, &fields, &mut out);

        let start = offsets.fields[0].start;
        let mut expected = vec![0x8F, 0x01, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00];
        expected.extend_from_slice(b"12345678");
        assert_eq!(&out[start - 5..], &expected[..]);
        assert_eq!(enc.freeze_layout(&fields).unwrap().len(), out.len());
    }

    #[test]
    fn test_refresh_patches_only_dynamic_fields() {
        let enc = UadpEncoder::new(&group(), 1).unwrap();
        let seq = field(6045, TypeTag::UInt16, UaValue::UInt16(7), Some(Transform::Increment));
        let fields = vec![
            field(6075, TypeTag::UInt32, UaValue::UInt32(0x2000), None),
            Arc::clone(&seq),
        ];
        let mut layout = enc.freeze_layout(&fields).unwrap();
        let frozen_len = layout.len();

        seq.advance();
        let frame = layout.refresh(5).to_vec();
        assert_eq!(frame.len(), frozen_len);

        let mut reencoded = Vec::new();
        let offsets = enc.encode(5, &fields, &mut reencoded);
        assert_eq!(frame, reencoded);
        let r = offsets.fields[1].clone();
        assert_eq!(&frame[r], &8u16.to_le_bytes());
    }

    #[test]
    fn test_freeze_layout_rejects_variable_width() {
        let enc = UadpEncoder::new(&group(), 1).unwrap();
        let fields = vec![field(6053, TypeTag::String, UaValue::String("x".into()), None)];
        assert!(matches!(
            enc.freeze_layout(&fields),
            Err(ConfigError::VariableWidth { .. })
        ));
    }

    #[test]
    fn test_raw_data_and_dataset_sequence() {
        let mut wg = group();
        wg.writer.field_content = DataSetFieldContentFlags::RAW_DATA;
        wg.writer.dataset_content = DataSetMessageContentFlags::SEQUENCE_NUMBER;
        let enc = UadpEncoder::new(&wg, 1).unwrap();
        let fields = vec![field(6074, TypeTag::UInt32, UaValue::UInt32(1), None)];
        let mut out = Vec::new();
        let offsets = enc.encode(9, &fields, &mut out);

        let at = offsets.dataset_sequence.unwrap();
        assert_eq!(out[at - 1], DSM_VALID | DSM_RAW_DATA | DSM_SEQUENCE_NUMBER);
        assert_eq!(&out[at..at + 2], &9u16.to_le_bytes());
        // raw fields: no count, no type byte
        assert_eq!(offsets.fields[0].start, at + 2);
        assert_eq!(out.len(), at + 2 + 4);
    }

    #[test]
    fn test_timestamp_flag() {
        let mut wg = group();
        wg.content |= NetworkMessageContentFlags::TIMESTAMP;
        let enc = UadpEncoder::new(&wg, 1).unwrap();
        let mut out = Vec::new();
        let offsets = enc.encode(0, &[], &mut out);
        assert_eq!(out[0] & NM_EXTENDED_FLAGS1, NM_EXTENDED_FLAGS1);
        assert_eq!(out[1], EXT1_PUBLISHER_ID_UINT16 | EXT1_TIMESTAMP);
        assert!(offsets.timestamp.is_some());
    }

    #[test]
    fn test_unsupported_masks_rejected() {
        let mut wg = group();
        wg.content |= NetworkMessageContentFlags::PROMOTED_FIELDS;
        assert!(matches!(
            UadpEncoder::new(&wg, 1),
            Err(ConfigError::UnsupportedContentMask { bits: 0x400, .. })
        ));

        let mut wg = group();
        wg.writer.dataset_content = DataSetMessageContentFlags::STATUS;
        assert!(UadpEncoder::new(&wg, 1).is_err());
    }

    #[test]
    fn test_ua_datetime_epoch() {
        let unix_epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(ua_datetime(unix_epoch), UA_DATETIME_UNIX_EPOCH);
        let later = Utc.timestamp_opt(1, 500).unwrap();
        assert_eq!(ua_datetime(later), UA_DATETIME_UNIX_EPOCH + 10_000_005);
    }
}
