use std::io::BufRead;

use capsql_types::log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::IngestionError;
use crate::fixups::NodeAttrs;

use super::tree::{NodeKind, TreeNode};

/// Streaming reader over a pdml-shaped document. At most one packet's
/// subtree is held in memory; whitespace, comments and processing
/// instructions are ignored.
pub struct PdmlReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> PdmlReader<R> {
    pub fn new(source: R) -> PdmlReader<R> {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        PdmlReader {
            reader,
            buf: Vec::new(),
        }
    }

    /// Advances to the next `<packet>` element and returns its raw subtree,
    /// or `None` at end of stream.
    pub fn next_packet(&mut self) -> Result<Option<TreeNode>, IngestionError> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) if e.name().as_ref() == b"packet" => {
                    let packet = node_from_element(NodeKind::Packet, &e)?;
                    return self.read_subtree(packet).map(Some);
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    /// Byte offset of the reader in the underlying stream.
    pub fn buffer_position(&self) -> u64 {
        self.reader.buffer_position()
    }

    /// Reads events until the element that opened `root` closes, building
    /// the node tree as it goes. An element whose attributes cannot be
    /// read is dropped together with its subtree; its siblings survive.
    fn read_subtree(&mut self, root: TreeNode) -> Result<TreeNode, IngestionError> {
        let mut stack = vec![root];
        loop {
            self.buf.clear();
            let mut skip_subtree = false;
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => {
                    let kind = kind_from_tag(e.name().as_ref());
                    match node_from_element(kind, &e) {
                        Ok(node) => stack.push(node),
                        Err(err) => {
                            warn!("Dropping malformed element and its subtree: {err}");
                            skip_subtree = true;
                        }
                    }
                }
                Event::Empty(e) => {
                    let kind = kind_from_tag(e.name().as_ref());
                    match node_from_element(kind, &e) {
                        Ok(node) => stack
                            .last_mut()
                            .expect("subtree stack cannot be empty")
                            .children
                            .push(node),
                        Err(err) => warn!("Dropping malformed element: {err}"),
                    }
                }
                Event::End(_) => {
                    let node = stack.pop().expect("subtree stack cannot be empty");
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => return Ok(node),
                    }
                }
                Event::Eof => return Err(IngestionError::TruncatedPacket),
                _ => {}
            }
            if skip_subtree {
                self.skip_element()?;
            }
        }
    }

    /// Consumes events until the element just opened closes.
    fn skip_element(&mut self) -> Result<(), IngestionError> {
        let mut depth = 1usize;
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Event::Eof => return Err(IngestionError::TruncatedPacket),
                _ => {}
            }
        }
    }
}

fn kind_from_tag(tag: &[u8]) -> NodeKind {
    match tag {
        b"packet" => NodeKind::Packet,
        b"proto" => NodeKind::Proto,
        b"field" => NodeKind::Field,
        _ => NodeKind::Other,
    }
}

fn node_from_element(kind: NodeKind, e: &BytesStart) -> Result<TreeNode, IngestionError> {
    let mut node = TreeNode::new(kind);
    let mut attrs = NodeAttrs::default();
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"name" => attrs.name = value.into_owned(),
            b"showname" => attrs.showname = value.into_owned(),
            b"show" => attrs.show = value.into_owned(),
            b"value" => attrs.value = Some(value.into_owned()),
            b"size" => node.size = value.parse().unwrap_or(0),
            b"pos" => node.pos = value.parse().unwrap_or(0),
            b"hide" => node.hide = value.as_ref() == "yes",
            _ => {}
        }
    }
    node.attrs = attrs;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packets(xml: &str) -> Vec<TreeNode> {
        let mut reader = PdmlReader::new(xml.as_bytes());
        let mut out = Vec::new();
        while let Some(packet) = reader.next_packet().unwrap() {
            out.push(packet);
        }
        out
    }

    #[test]
    fn reads_packets_one_at_a_time() {
        let trees = packets(
            r#"<?xml version="1.0"?>
               <pdml version="0">
                 <packet>
                   <proto name="frame" size="42">
                     <field name="frame.len" show="42"/>
                   </proto>
                 </packet>
                 <packet>
                   <proto name="frame"/>
                 </packet>
               </pdml>"#,
        );
        assert_eq!(trees.len(), 2);
        let frame = &trees[0].children[0];
        assert_eq!(frame.kind, NodeKind::Proto);
        assert_eq!(frame.attrs.name, "frame");
        assert_eq!(frame.size, 42);
        assert_eq!(frame.children[0].attrs.show, "42");
    }

    #[test]
    fn attributes_default_when_absent() {
        let trees = packets("<pdml><packet><proto name=\"p\"/></packet></pdml>");
        let proto = &trees[0].children[0];
        assert_eq!(proto.size, 0);
        assert_eq!(proto.pos, 0);
        assert!(!proto.hide);
        assert_eq!(proto.attrs.value, None);
    }

    #[test]
    fn hide_attribute_is_boolean() {
        let trees =
            packets("<pdml><packet><field name=\"f\" hide=\"yes\"/></packet></pdml>");
        assert!(trees[0].children[0].hide);
    }

    #[test]
    fn unknown_elements_become_other_nodes() {
        let trees = packets(
            "<pdml><packet><proto name=\"p\"><showname>noise</showname></proto></packet></pdml>",
        );
        assert_eq!(trees[0].children[0].children[0].kind, NodeKind::Other);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut reader =
            PdmlReader::new("<pdml><packet><proto name=\"p\">".as_bytes());
        assert!(reader.next_packet().is_err());
    }

    #[test]
    fn malformed_element_subtree_is_dropped() {
        // The duplicated attribute poisons the element; its subtree goes
        // with it, the following sibling stays.
        let trees = packets(
            "<pdml><packet><proto name=\"p\">\
               <field name=\"bad\" name=\"dup\">\
                 <field name=\"inner\" show=\"1\"/>\
               </field>\
               <field name=\"good\" show=\"2\"/>\
             </proto></packet></pdml>",
        );
        let proto = &trees[0].children[0];
        assert_eq!(proto.children.len(), 1);
        assert_eq!(proto.children[0].attrs.name, "good");
    }
}
