use super::dataset::{Field, FieldSource};
use super::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Runtime configuration level of the writer group.
///
/// | level   | value source   | update path        | send path           |
/// |---------|----------------|--------------------|---------------------|
/// | none    | bound node     | variant round trip | re-encode           |
/// | direct  | static storage | in place           | re-encode           |
/// | fixed   | static storage | in place           | patch frozen buffer |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RtLevel {
    None,
    DirectValueAccess,
    #[default]
    FixedSize,
}

impl RtLevel {
    /// Fields get their own atomic storage instead of reading the node.
    pub fn uses_static_source(&self) -> bool {
        !matches!(self, RtLevel::None)
    }

    /// Frames are patched in place instead of re-encoded.
    pub fn patches_frozen_buffer(&self) -> bool {
        matches!(self, RtLevel::FixedSize)
    }

    /// Freeze-time check of one field. Each level adds to the checks of the
    /// level below it.
    pub fn validate_field(&self, field: &Field) -> Result<(), ConfigError> {
        if field.is_dynamic() && !field.type_tag.is_counter() {
            return Err(ConfigError::NonCounterDynamic {
                node: field.node_id,
                declared: field.type_tag,
            });
        }
        if *self == RtLevel::None {
            return Ok(());
        }
        if field.is_dynamic() {
            let atomic = match &field.source {
                FieldSource::Static(storage) => storage.is_atomic_counter(),
                FieldSource::Node(_) => false,
            };
            if !atomic {
                return Err(ConfigError::NonCounterDynamic {
                    node: field.node_id,
                    declared: field.type_tag,
                });
            }
        }
        if *self == RtLevel::FixedSize && !field.fixed_size() {
            return Err(ConfigError::VariableWidth {
                node: field.node_id,
                declared: field.type_tag,
            });
        }
        Ok(())
    }
}

impl fmt::Display for RtLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtLevel::None => write!(f, "none"),
            RtLevel::DirectValueAccess => write!(f, "direct"),
            RtLevel::FixedSize => write!(f, "fixed"),
        }
    }
}

impl FromStr for RtLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RtLevel::None),
            "direct" | "direct_value_access" => Ok(RtLevel::DirectValueAccess),
            "fixed" | "fixed_size" => Ok(RtLevel::FixedSize),
            other => Err(format!("unknown rt_level '{}', expected none, direct or fixed", other)),
        }
    }
}
