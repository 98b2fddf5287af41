use super::address_space::AddressSpace;
use super::connection::{PubSubConnection, WriterGroup};
use super::dataset::{Field, FieldHandle, FieldSource, PublishedDataSet};
use super::error::ConfigError;
use super::storage::FieldStorage;
use super::strategy::RtLevel;
use super::updater::ValueUpdater;
use crate::uadp::encoder::{FixedLayout, MAX_FIELDS, MAX_FRAME_LEN, UadpEncoder};
use crate::uadp::types::{NodeId, Transform, TypeTag, UaValue};
use log::info;
use std::sync::Arc;

/// Owns the whole PubSub configuration of the device: connection, writer
/// group, published dataset, field storage and the value updater.
///
/// Built and frozen on one thread, then shared read-only (behind `Arc`) with
/// the scheduler.
#[derive(Debug)]
pub struct PublisherContext {
    address_space: Arc<AddressSpace>,
    connection: PubSubConnection,
    dataset: PublishedDataSet,
    updater: ValueUpdater,
    encoder: Option<UadpEncoder>,
}

impl PublisherContext {
    pub fn new(address_space: Arc<AddressSpace>, connection: PubSubConnection, dataset_name: &str) -> Self {
        PublisherContext {
            address_space,
            connection,
            dataset: PublishedDataSet::new(dataset_name),
            updater: ValueUpdater::default(),
            encoder: None,
        }
    }

    pub fn level(&self) -> RtLevel {
        self.connection.writer_group.rt_level
    }

    /// Append a field bound to `node_id`. The returned handle indexes the
    /// field in wire order.
    ///
    /// # Arguments
    /// * `node_id` - existing variable node the field publishes
    /// * `type_tag` - declared type, fixed-length tags must match the value length
    /// * `initial` - value written into the node and the field storage
    /// * `dynamic` - per-tick transform, `None` for constant fields
    pub fn register(
        &mut self,
        node_id: NodeId,
        type_tag: TypeTag,
        initial: UaValue,
        dynamic: Option<Transform>,
    ) -> Result<FieldHandle, ConfigError> {
        if self.connection.writer_group.is_frozen() {
            return Err(ConfigError::Frozen);
        }
        let node = self
            .address_space
            .node(&node_id)
            .cloned()
            .ok_or(ConfigError::UnknownNode(node_id))?;
        if node.data_type != type_tag.base() {
            return Err(ConfigError::NodeTypeMismatch {
                node: node_id,
                declared: type_tag,
                node_type: node.data_type,
            });
        }
        if !initial.conforms_to(type_tag) {
            return Err(ConfigError::ValueMismatch {
                node: node_id,
                declared: type_tag,
                value: initial.variant_name(),
            });
        }
        if self.dataset.contains(&node_id) {
            return Err(ConfigError::DuplicateNode(node_id));
        }

        node.write(initial.clone());
        let source = if self.level().uses_static_source() {
            FieldSource::Static(Arc::new(FieldStorage::from_value(&initial)))
        } else {
            FieldSource::Node(Arc::clone(&node))
        };
        let handle = self.dataset.push(Field {
            node_id,
            alias: node.browse_name.clone(),
            type_tag,
            transform: dynamic,
            source,
        });
        Ok(handle)
    }

    /// Validate every field for the configured level and lock the layout.
    /// On error nothing changes and the group stays unfrozen.
    pub fn freeze(&mut self) -> Result<(), ConfigError> {
        let level = self.level();
        let group = &self.connection.writer_group;
        if group.is_frozen() {
            return Err(ConfigError::AlreadyFrozen);
        }
        if self.dataset.is_empty() {
            return Err(ConfigError::EmptyDataSet);
        }
        if self.dataset.len() > MAX_FIELDS {
            return Err(ConfigError::TooManyFields {
                count: self.dataset.len(),
                max: MAX_FIELDS,
            });
        }
        for field in self.dataset.fields() {
            level.validate_field(field)?;
        }
        let encoder = UadpEncoder::new(group, self.connection.publisher_id)?;
        let frame_len = if level.patches_frozen_buffer() {
            encoder.freeze_layout(self.dataset.fields())?.len()
        } else {
            let mut frame = Vec::new();
            encoder.encode(0, self.dataset.fields(), &mut frame);
            frame.len()
        };
        if frame_len > MAX_FRAME_LEN {
            return Err(ConfigError::FrameTooLarge {
                len: frame_len,
                max: MAX_FRAME_LEN,
            });
        }

        self.encoder = Some(encoder);
        self.updater.arm(self.dataset.dynamic_fields());
        self.connection.writer_group.mark_frozen();
        info!(
            "Writer group '{}' frozen: level {}, {} fields, {} byte frame",
            self.connection.writer_group.name,
            level,
            self.dataset.len(),
            frame_len
        );
        Ok(())
    }

    /// Per-cycle frame producer for the configured level.
    pub fn frame_builder(&self) -> Result<FrameBuilder, ConfigError> {
        let encoder = match &self.encoder {
            Some(e) if self.connection.writer_group.is_frozen() => e.clone(),
            _ => return Err(ConfigError::NotFrozen),
        };
        if self.level().patches_frozen_buffer() {
            Ok(FrameBuilder::Patch(encoder.freeze_layout(self.dataset.fields())?))
        } else {
            Ok(FrameBuilder::Encode {
                encoder,
                fields: self.dataset.fields().to_vec(),
                buffer: Vec::new(),
            })
        }
    }

    /// Current value of a registered field.
    pub fn read(&self, handle: FieldHandle) -> Option<UaValue> {
        self.dataset.get(handle).map(|f| f.read())
    }

    pub fn connection(&self) -> &PubSubConnection {
        &self.connection
    }

    pub fn writer_group(&self) -> &WriterGroup {
        &self.connection.writer_group
    }

    pub fn dataset(&self) -> &PublishedDataSet {
        &self.dataset
    }

    pub fn updater(&self) -> &ValueUpdater {
        &self.updater
    }

    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.address_space
    }
}

/// Produces the frame for one publish cycle.
#[derive(Debug)]
pub enum FrameBuilder {
    /// Fixed-size level: patch the frozen buffer.
    Patch(FixedLayout),
    /// Other levels: encode from scratch each cycle.
    Encode {
        encoder: UadpEncoder,
        fields: Vec<Arc<Field>>,
        buffer: Vec<u8>,
    },
}

impl FrameBuilder {
    pub fn build(&mut self, sequence: u16) -> &[u8] {
        match self {
            FrameBuilder::Patch(layout) => layout.refresh(sequence),
            FrameBuilder::Encode {
                encoder,
                fields,
                buffer,
            } => {
                encoder.encode(sequence, fields, buffer);
                buffer.as_slice()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::address_space::VariableNode;
    use crate::pubsub::catalog::{CatalogEntry, default_address_space, default_catalog};
    use crate::pubsub::connection::DEFAULT_ADDRESS_URL;
    use crate::pubsub::updater::UpdaterState;
    use proptest::prelude::*;
    use std::time::Duration;

    fn space(nodes: &[(u32, &str, TypeTag)]) -> Arc<AddressSpace> {
        let mut space = AddressSpace::new();
        for (id, name, tag) in nodes {
            space.add_variable(VariableNode::new(NodeId::numeric(2, *id), *name, *tag));
        }
        Arc::new(space)
    }

    fn context(level: RtLevel, space: Arc<AddressSpace>) -> PublisherContext {
        let wg = WriterGroup::new("Demo WriterGroup", Duration::from_millis(1), level).unwrap();
        let conn = PubSubConnection::new("UADP Connection 1", DEFAULT_ADDRESS_URL.parse().unwrap(), wg);
        PublisherContext::new(space, conn, "Demo PDS")
    }

    fn demo_space() -> Arc<AddressSpace> {
        space(&[
            (6051, "InteropAppVersion", TypeTag::Byte),
            (6053, "VendorName", TypeTag::String),
            (6045, "ApplicationSequenceNr", TypeTag::UInt16),
            (6074, "As_TimeOffset", TypeTag::UInt32),
        ])
    }

    #[test]
    fn test_register_order_equals_call_order() {
        let mut ctx = context(RtLevel::FixedSize, demo_space());
        let order = [6074, 6051, 6045];
        let tags = [TypeTag::UInt32, TypeTag::Byte, TypeTag::UInt16];
        let values = [UaValue::UInt32(0), UaValue::Byte(1), UaValue::UInt16(2)];
        for ((id, tag), value) in order.iter().zip(tags).zip(values) {
            ctx.register(NodeId::numeric(2, *id), tag, value, None).unwrap();
        }
        let got: Vec<u32> = ctx.dataset().fields().iter().map(|f| f.node_id.id).collect();
        assert_eq!(got, order);
        assert_eq!(ctx.dataset().fields()[1].alias, "InteropAppVersion");
    }

    /// Field section of a frame publishing `entries` with their initial values.
    fn expected_fields(entries: &[CatalogEntry]) -> Vec<u8> {
        let mut out = (entries.len() as u16).to_le_bytes().to_vec();
        for e in entries {
            out.push(e.type_tag.variant_encoding());
            if e.type_tag.is_array_variant() {
                out.extend_from_slice(&1i32.to_le_bytes());
            }
            e.initial.encode_payload(&mut out);
        }
        out
    }

    proptest! {
        #[test]
        fn test_wire_order_is_call_order_for_any_selection(
            entries in proptest::sample::subsequence(default_catalog(), 1..=15).prop_shuffle(),
            level in prop_oneof![Just(RtLevel::None), Just(RtLevel::DirectValueAccess), Just(RtLevel::FixedSize)],
        ) {
            let mut ctx = context(level, Arc::new(default_address_space(&default_catalog())));
            for e in &entries {
                ctx.register(e.node_id, e.type_tag, e.initial.clone(), e.transform).unwrap();
            }
            let got: Vec<NodeId> = ctx.dataset().fields().iter().map(|f| f.node_id).collect();
            let want: Vec<NodeId> = entries.iter().map(|e| e.node_id).collect();
            prop_assert_eq!(got, want);

            ctx.freeze().unwrap();
            let mut builder = ctx.frame_builder().unwrap();
            let frame = builder.build(0).to_vec();
            prop_assert!(frame.ends_with(&expected_fields(&entries)));
        }
    }

    #[test]
    fn test_register_errors() {
        let mut ctx = context(RtLevel::FixedSize, demo_space());
        assert!(matches!(
            ctx.register(NodeId::numeric(2, 9999), TypeTag::Byte, UaValue::Byte(0), None),
            Err(ConfigError::UnknownNode(_))
        ));
        assert!(matches!(
            ctx.register(NodeId::numeric(2, 6051), TypeTag::UInt16, UaValue::UInt16(0), None),
            Err(ConfigError::NodeTypeMismatch { .. })
        ));
        assert!(matches!(
            ctx.register(
                NodeId::numeric(2, 6053),
                TypeTag::FixedString(32),
                UaValue::String("too short".into()),
                None
            ),
            Err(ConfigError::ValueMismatch { .. })
        ));
        ctx.register(NodeId::numeric(2, 6051), TypeTag::Byte, UaValue::Byte(0xEE), None)
            .unwrap();
        assert!(matches!(
            ctx.register(NodeId::numeric(2, 6051), TypeTag::Byte, UaValue::Byte(0xEE), None),
            Err(ConfigError::DuplicateNode(_))
        ));
        assert_eq!(ctx.dataset().len(), 1);
    }

    #[test]
    fn test_register_writes_initial_value_to_node() {
        let space = demo_space();
        let mut ctx = context(RtLevel::DirectValueAccess, Arc::clone(&space));
        let h = ctx
            .register(NodeId::numeric(2, 6051), TypeTag::Byte, UaValue::Byte(0xEE), None)
            .unwrap();
        assert_eq!(space.node(&NodeId::numeric(2, 6051)).unwrap().read(), UaValue::Byte(0xEE));
        assert_eq!(ctx.read(h), Some(UaValue::Byte(0xEE)));
    }

    #[test]
    fn test_freeze_variable_width_under_fixed_fails() {
        let mut ctx = context(RtLevel::FixedSize, demo_space());
        ctx.register(NodeId::numeric(2, 6053), TypeTag::String, UaValue::String("abc".into()), None)
            .unwrap();
        assert!(matches!(ctx.freeze(), Err(ConfigError::VariableWidth { .. })));
        assert!(!ctx.writer_group().is_frozen());
        assert!(!ctx.writer_group().is_operational());
        assert_eq!(ctx.updater().state(), UpdaterState::Idle);
        assert!(matches!(ctx.frame_builder(), Err(ConfigError::NotFrozen)));
    }

    #[test]
    fn test_variable_width_allowed_under_direct() {
        let mut ctx = context(RtLevel::DirectValueAccess, demo_space());
        ctx.register(NodeId::numeric(2, 6053), TypeTag::String, UaValue::String("abc".into()), None)
            .unwrap();
        ctx.freeze().unwrap();
        let mut builder = ctx.frame_builder().unwrap();
        assert!(matches!(builder, FrameBuilder::Encode { .. }));
        assert!(builder.build(1).ends_with(b"abc"));
    }

    #[test]
    fn test_freeze_twice_and_register_after_freeze() {
        let mut ctx = context(RtLevel::FixedSize, demo_space());
        assert!(matches!(ctx.freeze(), Err(ConfigError::EmptyDataSet)));
        ctx.register(NodeId::numeric(2, 6045), TypeTag::UInt16, UaValue::UInt16(0), Some(Transform::Increment))
            .unwrap();
        ctx.freeze().unwrap();
        assert_eq!(ctx.updater().state(), UpdaterState::Armed);
        assert!(matches!(ctx.freeze(), Err(ConfigError::AlreadyFrozen)));
        assert!(matches!(
            ctx.register(NodeId::numeric(2, 6051), TypeTag::Byte, UaValue::Byte(0), None),
            Err(ConfigError::Frozen)
        ));
    }

    #[test]
    fn test_freeze_rejects_more_fields_than_header_counts() {
        let mut ctx = context(RtLevel::FixedSize, demo_space());
        for i in 0..=MAX_FIELDS {
            ctx.dataset.push(Field {
                node_id: NodeId::numeric(3, i as u32),
                alias: format!("f{}", i),
                type_tag: TypeTag::Byte,
                transform: None,
                source: FieldSource::Static(Arc::new(FieldStorage::from_value(&UaValue::Byte(0)))),
            });
        }
        assert!(matches!(
            ctx.freeze(),
            Err(ConfigError::TooManyFields { count, max: MAX_FIELDS }) if count == MAX_FIELDS + 1
        ));
        assert!(!ctx.writer_group().is_frozen());
        assert_eq!(ctx.updater().state(), UpdaterState::Idle);
    }

    #[test]
    fn test_freeze_rejects_frame_beyond_udp_payload() {
        let big = "x".repeat(u16::MAX as usize);

        let mut ctx = context(RtLevel::FixedSize, demo_space());
        ctx.register(
            NodeId::numeric(2, 6053),
            TypeTag::FixedString(u16::MAX),
            UaValue::String(big.clone()),
            None,
        )
        .unwrap();
        assert!(matches!(ctx.freeze(), Err(ConfigError::FrameTooLarge { max: MAX_FRAME_LEN, .. })));
        assert!(!ctx.writer_group().is_frozen());

        let mut ctx = context(RtLevel::DirectValueAccess, demo_space());
        ctx.register(NodeId::numeric(2, 6053), TypeTag::String, UaValue::String(big), None)
            .unwrap();
        assert!(matches!(ctx.freeze(), Err(ConfigError::FrameTooLarge { .. })));
        assert!(matches!(ctx.frame_builder(), Err(ConfigError::NotFrozen)));
    }

    #[test]
    fn test_largest_frame_that_fits_freezes() {
        let mut ctx = context(RtLevel::DirectValueAccess, demo_space());
        ctx.register(NodeId::numeric(2, 6053), TypeTag::String, UaValue::String(String::new()), None)
            .unwrap();
        let mut frame = Vec::new();
        UadpEncoder::new(ctx.writer_group(), 1)
            .unwrap()
            .encode(0, ctx.dataset().fields(), &mut frame);
        let room = MAX_FRAME_LEN - frame.len();

        let mut ctx = context(RtLevel::DirectValueAccess, demo_space());
        ctx.register(NodeId::numeric(2, 6053), TypeTag::String, UaValue::String("x".repeat(room)), None)
            .unwrap();
        ctx.freeze().unwrap();
        let mut builder = ctx.frame_builder().unwrap();
        assert_eq!(builder.build(0).len(), MAX_FRAME_LEN);
    }

    #[test]
    fn test_level_none_updates_through_node() {
        let space = demo_space();
        let mut ctx = context(RtLevel::None, Arc::clone(&space));
        let h = ctx
            .register(NodeId::numeric(2, 6074), TypeTag::UInt32, UaValue::UInt32(0), Some(Transform::Decrement))
            .unwrap();
        ctx.freeze().unwrap();
        ctx.updater().start();
        ctx.updater().tick();
        ctx.updater().tick();
        assert_eq!(ctx.read(h), Some(UaValue::UInt32(u32::MAX - 1)));
        assert_eq!(
            space.node(&NodeId::numeric(2, 6074)).unwrap().read(),
            UaValue::UInt32(u32::MAX - 1)
        );
    }

    #[test]
    fn test_static_storage_does_not_touch_node_after_register() {
        let space = demo_space();
        let mut ctx = context(RtLevel::FixedSize, Arc::clone(&space));
        let h = ctx
            .register(NodeId::numeric(2, 6045), TypeTag::UInt16, UaValue::UInt16(5), Some(Transform::Increment))
            .unwrap();
        ctx.freeze().unwrap();
        ctx.updater().start();
        ctx.updater().tick();
        assert_eq!(ctx.read(h), Some(UaValue::UInt16(6)));
        assert_eq!(space.node(&NodeId::numeric(2, 6045)).unwrap().read(), UaValue::UInt16(5));
    }
}
