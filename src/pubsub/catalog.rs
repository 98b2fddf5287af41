// Published field catalog of the device.
// The order of entries is the order of fields on the wire.

use super::address_space::{AddressSpace, VariableNode};
use super::context::PublisherContext;
use super::dataset::FieldHandle;
use super::error::ConfigError;
use crate::uadp::types::{NodeId, Transform, TypeTag, UaValue};
use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const DEVICE_NAMESPACE: u16 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub node_id: NodeId,
    pub alias: String,
    pub type_tag: TypeTag,
    pub initial: UaValue,
    pub transform: Option<Transform>,
}

impl CatalogEntry {
    fn new(id: u32, alias: &str, type_tag: TypeTag, initial: UaValue, transform: Option<Transform>) -> Self {
        CatalogEntry {
            node_id: NodeId::numeric(DEVICE_NAMESPACE, id),
            alias: alias.to_string(),
            type_tag,
            initial,
            transform,
        }
    }
}

/// The fifteen TSN interop fields, in wire order.
pub fn default_catalog() -> Vec<CatalogEntry> {
    use TypeTag::*;
    vec![
        CatalogEntry::new(6051, "InteropAppVersion", Byte, UaValue::Byte(0xEE), None),
        CatalogEntry::new(6050, "InteropAppStatus", Byte, UaValue::Byte(0x0C), None),
        CatalogEntry::new(6049, "InteropAppCmd", Byte, UaValue::Byte(0x00), None),
        CatalogEntry::new(
            6053,
            "VendorName",
            FixedString(32),
            UaValue::String("NetTimeLogic_GmbH_-_-_-_-_-_-_-_".to_string()),
            None,
        ),
        CatalogEntry::new(6048, "DeviceName", FixedString(10), UaValue::String("Arty A7_-_".to_string()), None),
        CatalogEntry::new(6075, "ExpectedTxOffset", UInt32, UaValue::UInt32(0x2000), None),
        CatalogEntry::new(6076, "Tsn_LastTxTimeStamp", UInt64, UaValue::UInt64(0x12345), None),
        CatalogEntry::new(6045, "ApplicationSequenceNr", UInt16, UaValue::UInt16(0), Some(Transform::Increment)),
        CatalogEntry::new(6047, "ApplicationTimeStamp", UInt64, UaValue::UInt64(0), None),
        CatalogEntry::new(6073, "As_State", Byte, UaValue::Byte(0), None),
        CatalogEntry::new(
            6055,
            "As_GrandmasterId",
            FixedByteString(8),
            UaValue::ByteString(b"12345678".to_vec()),
            None,
        ),
        CatalogEntry::new(6074, "As_TimeOffset", UInt32, UaValue::UInt32(0), Some(Transform::Decrement)),
        CatalogEntry::new(6054, "AS_GrandmasterChanges", Byte, UaValue::Byte(0x05), None),
        CatalogEntry::new(6044, "ApplicationId", Byte, UaValue::Byte(0x04), None),
        CatalogEntry::new(
            6046,
            "ApplicationSpecificData",
            FixedByteString(32),
            UaValue::ByteString(b"TSN ApplicationSpecificData 32xB".to_vec()),
            None,
        ),
    ]
}

/// Address space holding one node per catalog entry, used when no nodeset
/// file is configured.
pub fn default_address_space(entries: &[CatalogEntry]) -> AddressSpace {
    let mut space = AddressSpace::new();
    for entry in entries {
        space.add_variable(VariableNode::new(entry.node_id, entry.alias.clone(), entry.type_tag.base()));
    }
    space
}

/// Register every entry with the context, in order.
pub fn populate(ctx: &mut PublisherContext, entries: &[CatalogEntry]) -> Result<Vec<FieldHandle>, ConfigError> {
    let mut handles = Vec::with_capacity(entries.len());
    for entry in entries {
        handles.push(ctx.register(entry.node_id, entry.type_tag, entry.initial.clone(), entry.transform)?);
    }
    info!("Registered {} published fields", handles.len());
    Ok(handles)
}

/// One element of `published_fields.json`.
#[derive(Debug, Deserialize)]
struct RawEntry {
    node: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    type_tag: String,
    value: Value,
    #[serde(default)]
    dynamic: Option<Transform>,
}

impl RawEntry {
    fn to_runtime(&self) -> Result<CatalogEntry, ConfigError> {
        let node_id = self.node.parse::<NodeId>().map_err(ConfigError::InvalidCatalog)?;
        let type_tag = self
            .type_tag
            .parse::<TypeTag>()
            .map_err(|e| ConfigError::InvalidCatalog(format!("{}: {}", node_id, e)))?;
        let initial = json_to_value(&self.value, type_tag)
            .ok_or_else(|| ConfigError::InvalidCatalog(format!("{}: value {} is not a {}", node_id, self.value, type_tag)))?;
        Ok(CatalogEntry {
            node_id,
            alias: self.name.clone().unwrap_or_else(|| node_id.to_string()),
            type_tag,
            initial,
            transform: self.dynamic,
        })
    }
}

/// Interpret a JSON value as the given type. Byte strings accept either an
/// ASCII string or an array of byte values.
fn json_to_value(v: &Value, tag: TypeTag) -> Option<UaValue> {
    let value = match tag {
        TypeTag::Boolean => UaValue::Boolean(v.as_bool()?),
        TypeTag::Byte => UaValue::Byte(u8::try_from(v.as_u64()?).ok()?),
        TypeTag::UInt16 => UaValue::UInt16(u16::try_from(v.as_u64()?).ok()?),
        TypeTag::Int32 => UaValue::Int32(i32::try_from(v.as_i64()?).ok()?),
        TypeTag::UInt32 => UaValue::UInt32(u32::try_from(v.as_u64()?).ok()?),
        TypeTag::Int64 => UaValue::Int64(v.as_i64()?),
        TypeTag::UInt64 => UaValue::UInt64(v.as_u64()?),
        TypeTag::Double => UaValue::Double(v.as_f64()?),
        TypeTag::String | TypeTag::FixedString(_) => UaValue::String(v.as_str()?.to_string()),
        TypeTag::ByteString | TypeTag::FixedByteString(_) => match v {
            Value::String(s) => UaValue::ByteString(s.as_bytes().to_vec()),
            Value::Array(items) => UaValue::ByteString(
                items
                    .iter()
                    .map(|i| i.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()?,
            ),
            _ => return None,
        },
    };
    Some(value)
}

/// Load the field catalog from JSON. Array order is wire order.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<CatalogEntry>> {
    let path = path.as_ref();
    info!("Loading published field catalog from: {}", path.display());

    let file = File::open(path).with_context(|| format!("Failed to open field catalog: {}", path.display()))?;
    let raw: Vec<RawEntry> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse field catalog JSON: {}", path.display()))?;

    let mut entries = Vec::with_capacity(raw.len());
    for r in &raw {
        entries.push(r.to_runtime()?);
    }
    if entries.is_empty() {
        return Err(ConfigError::EmptyDataSet.into());
    }
    info!("Loaded {} catalog entries (order preserved from JSON)", entries.len());
    Ok(entries)
}
