// In-memory stand-in for the nodeset loaded by the server: a fixed catalog
// of variable nodes the published fields bind to.
use crate::uadp::types::{NodeId, TypeTag, UaValue};
use anyhow::Result;
use log::{error, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A variable node with its value attribute.
#[derive(Debug)]
pub struct VariableNode {
    pub node_id: NodeId,
    pub browse_name: String,
    pub data_type: TypeTag,
    value: Mutex<UaValue>,
}

impl VariableNode {
    pub fn new(node_id: NodeId, browse_name: impl Into<String>, data_type: TypeTag) -> Self {
        VariableNode {
            node_id,
            browse_name: browse_name.into(),
            data_type,
            value: Mutex::new(UaValue::default_for(data_type)),
        }
    }

    /// Read the value attribute (copy out).
    pub fn read(&self) -> UaValue {
        match self.value.lock() {
            Ok(v) => v.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Write the value attribute. Type conformance is checked by the caller.
    pub fn write(&self, value: UaValue) {
        match self.value.lock() {
            Ok(mut v) => *v = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

#[derive(Debug, Default)]
pub struct AddressSpace {
    nodes: HashMap<NodeId, Arc<VariableNode>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node; returns false if the id is already taken.
    pub fn add_variable(&mut self, node: VariableNode) -> bool {
        if self.nodes.contains_key(&node.node_id) {
            return false;
        }
        self.nodes.insert(node.node_id, Arc::new(node));
        true
    }

    pub fn node(&self, id: &NodeId) -> Option<&Arc<VariableNode>> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// One row of the nodeset CSV.
#[derive(Debug, Deserialize)]
struct NodeRow {
    namespace: u16,
    id: u32,
    browse_name: String,
    data_type: String,
}

/// Load variable nodes from a CSV file with headers
/// `namespace,id,browse_name,data_type`.
///
/// Bad rows (unparseable, unknown type, duplicate id, empty name) are logged
/// and skipped so that one typo does not hide the rest of the nodeset.
pub fn load_nodeset_from_csv<P: AsRef<Path>>(path: P) -> Result<AddressSpace> {
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to open nodeset CSV file '{:?}': {}", path.as_ref(), e);
            anyhow::bail!("Failed to open nodeset CSV file '{:?}': {}", path.as_ref(), e);
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let mut space = AddressSpace::new();

    for (idx, result) in rdr.deserialize::<NodeRow>().enumerate() {
        let row_num = idx + 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                error!("Failed to deserialize nodeset row {}: {}. Skipping row.", row_num, e);
                continue;
            }
        };

        let browse_name = row.browse_name.trim();
        if browse_name.is_empty() {
            error!("Nodeset row {}: browse_name is empty. Skipping row.", row_num);
            continue;
        }

        let data_type = match row.data_type.parse::<TypeTag>() {
            Ok(t) => t.base(),
            Err(e) => {
                error!("Nodeset row {}: {}. Skipping row.", row_num, e);
                continue;
            }
        };

        let node_id = NodeId::numeric(row.namespace, row.id);
        if !space.add_variable(VariableNode::new(node_id, browse_name, data_type)) {
            error!("Nodeset row {}: duplicate node {} (must be unique). Skipping row.", row_num, node_id);
        }
    }

    info!("Loaded {} variable nodes from nodeset", space.len());
    Ok(space)
}
