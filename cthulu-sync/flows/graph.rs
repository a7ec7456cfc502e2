use std::collections::HashMap;

use super::schema::{Port, PortKind, SchemaCatalog};
use super::{Edge, Node};

/// Handle id assumed for edges saved before nodes declared named input ports.
pub const LEGACY_INPUT_HANDLE: &str = "input";

/// Display name used when the node on the far side of an edge is gone.
pub const UNKNOWN_CONNECTION: &str = "Connected";

/// Human-readable names of the nodes connected to each port of `node_id`.
///
/// `dynamic_ports` are ports a node declares at runtime on top of its schema.
/// Ports without connections are left out of the map.
pub fn resolve_connection_names(
    node_id: &str,
    ports: &[Port],
    dynamic_ports: &[Port],
    nodes: &[Node],
    edges: &[Edge],
    schemas: &SchemaCatalog,
) -> HashMap<String, Vec<String>> {
    let mut names: HashMap<String, Vec<String>> = HashMap::new();

    for port in ports.iter().chain(dynamic_ports) {
        let connected: Vec<String> = edges
            .iter()
            .filter_map(|edge| remote_end(node_id, port, edge))
            .map(|remote_id| display_name(nodes.iter().find(|n| n.id == remote_id), schemas))
            .collect();

        if !connected.is_empty() {
            names.entry(port.id.clone()).or_default().extend(connected);
        }
    }

    names
}

/// The id of the node at the other end of `edge` if it attaches to `port`.
fn remote_end<'a>(node_id: &str, port: &Port, edge: &'a Edge) -> Option<&'a str> {
    match port.kind {
        PortKind::Input => {
            let handle = edge
                .target_handle
                .as_deref()
                .unwrap_or(LEGACY_INPUT_HANDLE);
            (edge.target == node_id && handle == port.id).then_some(edge.source.as_str())
        }
        PortKind::Output => {
            (edge.source == node_id && edge.source_handle.as_deref() == Some(port.id.as_str()))
                .then_some(edge.target.as_str())
        }
    }
}

/// Configured name, then schema label, then node type.
pub fn display_name(node: Option<&Node>, schemas: &SchemaCatalog) -> String {
    let Some(node) = node else {
        return UNKNOWN_CONNECTION.to_string();
    };

    node.config_str("name")
        .or_else(|| schemas.label(&node.node_type))
        .or_else(|| Some(node.node_type.as_str()).filter(|t| !t.is_empty()))
        .unwrap_or(UNKNOWN_CONNECTION)
        .to_string()
}
