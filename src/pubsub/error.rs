use crate::uadp::types::{NodeId, TypeTag};
use thiserror::Error;

/// Configuration-time failures of the PubSub object model. All of them are
/// fatal to server construction.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("node {0} does not exist in the address space")]
    UnknownNode(NodeId),

    #[error("node {0} is already published by this dataset")]
    DuplicateNode(NodeId),

    #[error("field {node} declared as {declared} but the node holds {node_type}")]
    NodeTypeMismatch {
        node: NodeId,
        declared: TypeTag,
        node_type: TypeTag,
    },

    #[error("initial value {value} for field {node} does not fit type {declared}")]
    ValueMismatch {
        node: NodeId,
        declared: TypeTag,
        value: &'static str,
    },

    #[error("field {node} of type {declared} has no static width, fixed-size layout impossible")]
    VariableWidth { node: NodeId, declared: TypeTag },

    #[error("field {node} of type {declared} cannot carry a per-cycle counter")]
    NonCounterDynamic { node: NodeId, declared: TypeTag },

    #[error("writer group is frozen, its dataset can no longer change")]
    Frozen,

    #[error("writer group is already frozen")]
    AlreadyFrozen,

    #[error("writer group must be frozen before it can become operational")]
    NotFrozen,

    #[error("writer group is already operational")]
    AlreadyOperational,

    #[error("published dataset is empty")]
    EmptyDataSet,

    #[error("dataset has {count} fields, a DataSetMessage carries at most {max}")]
    TooManyFields { count: usize, max: usize },

    #[error("encoded frame is {len} bytes, larger than the {max} byte UDP payload limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unsupported {mask} content mask bits 0x{bits:X}")]
    UnsupportedContentMask { mask: &'static str, bits: u32 },

    #[error("publish interval must be non-zero")]
    ZeroPublishInterval,

    #[error("invalid network address url '{0}'")]
    InvalidAddressUrl(String),

    #[error("invalid field catalog: {0}")]
    InvalidCatalog(String),

    #[error("could not start publish cycle: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}
