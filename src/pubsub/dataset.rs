use super::address_space::VariableNode;
use super::storage::FieldStorage;
use crate::uadp::types::{NodeId, Transform, TypeTag, UaValue};
use std::sync::Arc;

/// Where a published field takes its value from at send time.
#[derive(Debug, Clone)]
pub enum FieldSource {
    /// Storage owned by the field, updated in place.
    Static(Arc<FieldStorage>),
    /// The value attribute of the bound node.
    Node(Arc<VariableNode>),
}

/// One published field. Immutable after registration apart from the value
/// behind its source.
#[derive(Debug)]
pub struct Field {
    pub node_id: NodeId,
    pub alias: String,
    pub type_tag: TypeTag,
    pub transform: Option<Transform>,
    pub source: FieldSource,
}

impl Field {
    pub fn is_dynamic(&self) -> bool {
        self.transform.is_some()
    }

    /// True when the encoded width never changes.
    pub fn fixed_size(&self) -> bool {
        self.type_tag.static_width().is_some()
    }

    /// Current value, copied out.
    pub fn read(&self) -> UaValue {
        match &self.source {
            FieldSource::Static(storage) => storage.load(),
            FieldSource::Node(node) => node.read(),
        }
    }

    pub fn encode_payload(&self, out: &mut Vec<u8>) {
        match &self.source {
            FieldSource::Static(storage) => storage.encode_payload(out),
            FieldSource::Node(node) => node.read().encode_payload(out),
        }
    }

    /// Rewrite this field's payload bytes in a frozen buffer.
    pub fn patch_payload(&self, dst: &mut [u8]) {
        match &self.source {
            FieldSource::Static(storage) => storage.patch_payload(dst),
            FieldSource::Node(node) => {
                let mut tmp = Vec::with_capacity(dst.len());
                node.read().encode_payload(&mut tmp);
                if tmp.len() == dst.len() {
                    dst.copy_from_slice(&tmp);
                }
            }
        }
    }

    /// Apply the per-tick transform once. Returns whether the value changed.
    pub fn advance(&self) -> bool {
        let Some(transform) = self.transform else {
            return false;
        };
        match &self.source {
            FieldSource::Static(storage) => storage.apply(transform),
            FieldSource::Node(node) => match node.read().apply(transform) {
                Some(next) => {
                    node.write(next);
                    true
                }
                None => false,
            },
        }
    }
}

/// Stable index of a registered field in its dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle(pub(crate) usize);

/// Ordered list of fields; insertion order is wire order.
#[derive(Debug)]
pub struct PublishedDataSet {
    pub name: String,
    fields: Vec<Arc<Field>>,
}

impl PublishedDataSet {
    pub fn new(name: impl Into<String>) -> Self {
        PublishedDataSet {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.fields.iter().any(|f| f.node_id == *node_id)
    }

    pub(crate) fn push(&mut self, field: Field) -> FieldHandle {
        self.fields.push(Arc::new(field));
        FieldHandle(self.fields.len() - 1)
    }

    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    pub fn get(&self, handle: FieldHandle) -> Option<&Arc<Field>> {
        self.fields.get(handle.0)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn dynamic_fields(&self) -> Vec<Arc<Field>> {
        self.fields.iter().filter(|f| f.is_dynamic()).cloned().collect()
    }
}
