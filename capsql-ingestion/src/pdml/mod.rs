mod flatten;
mod names;
mod reader;
mod tree;

pub use flatten::flatten;
pub use names::{combine_names, filter_name};
pub use reader::PdmlReader;
pub use tree::{NodeKind, TreeNode};

use std::io::BufRead;

use capsql_schema::typer::type_value;
use capsql_schema::SchemaRegistry;
use capsql_types::errors::internal::BoxedError;
use capsql_types::log::warn;
use capsql_types::types::{DataRow, Value};

use crate::errors::IngestionError;
use crate::fixups::FixupEngine;

/// Name of the synthetic per-packet metadata protocol. Its row is emitted
/// first and carries the originating capture file.
const GENINFO_TABLE: &str = "geninfo";

/// Streams a pdml document and turns every packet into a set of related
/// rows: fixups repair node attributes, the value typer attaches typed
/// values, and flattening produces the row tree.
pub struct PacketTransformer<'a> {
    registry: &'a SchemaRegistry,
    fixups: &'a FixupEngine,
}

impl<'a> PacketTransformer<'a> {
    pub fn new(registry: &'a SchemaRegistry, fixups: &'a FixupEngine) -> PacketTransformer<'a> {
        PacketTransformer { registry, fixups }
    }

    /// Reads packets from `source` and hands the flattened rows of each
    /// packet to `emit`, geninfo row first. Returns the number of packets
    /// processed.
    ///
    /// A packet that fails to parse is skipped and the reader advances to
    /// the next `<packet>`; sink errors abort the file.
    pub fn transform_stream<R: BufRead>(
        &self,
        source: R,
        capture_path: &str,
        mut emit: impl FnMut(DataRow) -> Result<(), BoxedError>,
    ) -> Result<usize, IngestionError> {
        let mut reader = PdmlReader::new(source);
        let mut packets = 0usize;
        let mut last_error_position = None;
        loop {
            match reader.next_packet() {
                Ok(Some(packet)) => {
                    for row in self.packet_rows(packet, capture_path) {
                        emit(row).map_err(IngestionError::Sink)?;
                    }
                    packets += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    let position = reader.buffer_position();
                    if last_error_position == Some(position) {
                        // The reader stopped making progress; the rest of
                        // the stream is unreadable.
                        warn!("Abandoning {capture_path} at byte {position}: {e}");
                        break;
                    }
                    last_error_position = Some(position);
                    warn!(
                        "Skipping malformed packet after packet {packets} in {capture_path}: {e}"
                    );
                }
            }
        }
        Ok(packets)
    }

    /// Flattens one packet into its emission-ordered rows.
    pub fn packet_rows(&self, packet: TreeNode, capture_path: &str) -> Vec<DataRow> {
        let protos = self.enrich_packet(packet);
        let mut rows: Vec<DataRow> = protos
            .iter()
            .filter_map(|proto| flatten(proto, ""))
            .collect();

        if let Some(position) = rows.iter().position(|row| row.table_name == GENINFO_TABLE) {
            let mut geninfo = rows.remove(position);
            geninfo.push_column(
                "file".to_string(),
                Value::Text(capture_path.to_string()),
            );
            rows.insert(0, geninfo);
        }
        rows
    }

    /// Builds the packet's proto list: assigns protocol names, applies
    /// fixups, types field nodes, promotes nested protos to packet level
    /// and prunes unexpected children.
    fn enrich_packet(&self, packet: TreeNode) -> Vec<TreeNode> {
        let mut protos = Vec::new();
        for child in packet.children {
            if child.kind != NodeKind::Proto {
                continue;
            }
            let mut promoted = Vec::new();
            let proto = self.enrich_node(child, None, "", &mut promoted);
            protos.push(proto);
            protos.append(&mut promoted);
        }
        protos
    }

    fn enrich_node(
        &self,
        mut node: TreeNode,
        inherited_protocol: Option<&str>,
        parent_name: &str,
        promoted: &mut Vec<TreeNode>,
    ) -> TreeNode {
        // The protocol context is set once per descent, by the outermost
        // proto node; nested protos keep the outer name.
        node.protocol = match inherited_protocol {
            Some(protocol) => protocol.to_string(),
            None => node.attrs.name.clone(),
        };
        let protocol = node.protocol.clone();

        self.fixups.apply(&protocol, parent_name, &mut node.attrs);

        if node.kind == NodeKind::Field {
            node.typed = Some(type_value(
                self.registry,
                &node.attrs.name,
                &node.attrs.show,
                node.attrs.value.as_deref(),
            ));
        }

        let children = std::mem::take(&mut node.children);
        for child in children {
            match (node.kind, child.kind) {
                // Nested protos are promoted to packet level.
                (NodeKind::Proto, NodeKind::Proto) => {
                    let nested =
                        self.enrich_node(child, Some(&protocol), &node.attrs.name, promoted);
                    promoted.push(nested);
                }
                (NodeKind::Proto, NodeKind::Field) | (NodeKind::Field, NodeKind::Field) => {
                    let enriched =
                        self.enrich_node(child, Some(&protocol), &node.attrs.name, promoted);
                    node.children.push(enriched);
                }
                // Anything else is dissector noise.
                _ => {}
            }
        }
        node
    }
}
