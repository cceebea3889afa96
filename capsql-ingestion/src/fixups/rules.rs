use std::io::Read;

use capsql_types::log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::errors::IngestionError;

use super::NodeAttrs;

/// Magic header of the packaged rule blob; a raw-deflate payload follows.
const RULE_MAGIC: [u8; 4] = [0x53, 0x49, 0x47, 0x4d];

static BUILTIN_RULES: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/builtin_fixups.bin"));

#[derive(Debug, Default)]
pub struct FixupRules {
    pub constants: Vec<ConstantRule>,
    pub prefixes: Vec<PrefixRule>,
    pub templates: Vec<TemplateRule>,
}

impl FixupRules {
    pub fn from_xml(xml: &str) -> Result<FixupRules, IngestionError> {
        parse_rules_xml(xml)
    }

    pub fn extend(&mut self, other: FixupRules) {
        self.constants.extend(other.constants);
        self.prefixes.extend(other.prefixes);
        self.templates.extend(other.templates);
    }
}

#[derive(Debug)]
pub struct ConstantRule {
    protocols: Vec<String>,
    pub text: String,
    pub name: String,
}

#[derive(Debug)]
pub struct PrefixRule {
    protocols: Vec<String>,
    pub text: String,
    pub name: String,
}

#[derive(Debug)]
pub struct TemplateRule {
    protocols: Vec<String>,
    parent_name: Option<Regex>,
    name: Option<Regex>,
    show: Option<Regex>,
    showname: Option<Regex>,
    value: Option<Regex>,
    pub name_format: Option<String>,
    pub value_format: Option<String>,
}

fn matches_protocol(protocols: &[String], protocol: &str) -> bool {
    protocols.is_empty()
        || protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
}

impl ConstantRule {
    pub fn matches_protocol(&self, protocol: &str) -> bool {
        matches_protocol(&self.protocols, protocol)
    }
}

impl PrefixRule {
    pub fn matches_protocol(&self, protocol: &str) -> bool {
        matches_protocol(&self.protocols, protocol)
    }
}

impl TemplateRule {
    pub fn matches_protocol(&self, protocol: &str) -> bool {
        matches_protocol(&self.protocols, protocol)
    }

    /// Matches every provided regex against its attribute. An absent regex
    /// matches anything. On success the named captures of all matchers are
    /// returned in matcher order.
    pub fn try_match(
        &self,
        parent_name: &str,
        attrs: &NodeAttrs,
    ) -> Option<Vec<(String, String)>> {
        let mut captures = Vec::new();
        let value = attrs.value.as_deref().unwrap_or("");
        for (regex, text) in [
            (&self.parent_name, parent_name),
            (&self.name, attrs.name.as_str()),
            (&self.show, attrs.show.as_str()),
            (&self.showname, attrs.showname.as_str()),
            (&self.value, value),
        ] {
            let Some(regex) = regex else { continue };
            let found = regex.captures(text)?;
            for name in regex.capture_names().flatten() {
                if let Some(m) = found.name(name) {
                    captures.push((name.to_string(), m.as_str().to_string()));
                }
            }
        }
        Some(captures)
    }
}

/// Decompresses and parses the rule blob packaged with the binary.
pub fn load_builtin() -> Result<FixupRules, IngestionError> {
    inflate_rules(BUILTIN_RULES).and_then(|xml| parse_rules_xml(&xml))
}

pub fn inflate_rules(blob: &[u8]) -> Result<String, IngestionError> {
    if blob.len() < RULE_MAGIC.len() || blob[..RULE_MAGIC.len()] != RULE_MAGIC {
        return Err(IngestionError::BadRuleMagic);
    }
    let mut xml = String::new();
    flate2::read::DeflateDecoder::new(&blob[RULE_MAGIC.len()..])
        .read_to_string(&mut xml)
        .map_err(IngestionError::RuleInflate)?;
    Ok(xml)
}

/// Parses a `<fixups>` document. Rules with an uncompilable regex are
/// skipped with a warning; a document without a `<fixups>` root is an
/// error.
pub fn parse_rules_xml(xml: &str) -> Result<FixupRules, IngestionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut rules = FixupRules::default();
    let mut saw_root = false;
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let tag = e.name().as_ref().to_vec();
                match tag.as_slice() {
                    b"fixups" => saw_root = true,
                    b"constant" | b"prefix" | b"speculative" | b"template" if saw_root => {
                        if let Err(err) = add_rule(&mut rules, &tag, &e) {
                            warn!("Skipping fixup rule: {err}");
                        }
                    }
                    other => {
                        warn!(
                            "Ignoring unknown fixup element: {}",
                            String::from_utf8_lossy(other)
                        );
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !saw_root {
        return Err(IngestionError::NotAFixupsDocument);
    }
    Ok(rules)
}

fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>, IngestionError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn split_protocols(value: Option<String>) -> Vec<String> {
    value
        .map(|list| {
            list.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn add_rule(rules: &mut FixupRules, tag: &[u8], e: &BytesStart) -> Result<(), IngestionError> {
    let protocols = split_protocols(attribute(e, "protocol")?);
    match tag {
        b"constant" | b"prefix" | b"speculative" => {
            let text = attribute(e, "text")?.unwrap_or_default();
            let name = attribute(e, "name")?.unwrap_or_default();
            if tag != b"prefix" {
                rules.constants.push(ConstantRule {
                    protocols: protocols.clone(),
                    text: text.clone(),
                    name: name.clone(),
                });
            }
            if tag != b"constant" {
                rules.prefixes.push(PrefixRule {
                    protocols,
                    text,
                    name,
                });
            }
        }
        b"template" => {
            rules.templates.push(TemplateRule {
                protocols,
                parent_name: compile(e, "parentName")?,
                name: compile(e, "name")?,
                show: compile(e, "show")?,
                showname: compile(e, "showname")?,
                value: compile(e, "value")?,
                name_format: attribute(e, "nameFormat")?,
                value_format: attribute(e, "valueFormat")?,
            });
        }
        _ => unreachable!("add_rule called with unknown tag"),
    }
    Ok(())
}

fn compile(e: &BytesStart, name: &'static str) -> Result<Option<Regex>, IngestionError> {
    match attribute(e, name)? {
        None => Ok(None),
        Some(pattern) => Regex::new(&pattern)
            .map(Some)
            .map_err(|source| IngestionError::RuleRegex {
                attribute: name,
                source,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_rules_load() {
        let rules = load_builtin().unwrap();
        assert!(!rules.constants.is_empty() || !rules.templates.is_empty());
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(
            inflate_rules(b"nope"),
            Err(IngestionError::BadRuleMagic)
        ));
    }

    #[test]
    fn inflate_round_trip() {
        let xml = "<fixups><constant protocol=\"eth\" text=\"t\" name=\"n\"/></fixups>";
        let mut blob = RULE_MAGIC.to_vec();
        let mut encoder =
            flate2::write::DeflateEncoder::new(&mut blob, flate2::Compression::default());
        encoder.write_all(xml.as_bytes()).unwrap();
        encoder.finish().unwrap();
        assert_eq!(inflate_rules(&blob).unwrap(), xml);
    }

    #[test]
    fn bad_regex_skips_rule_only() {
        let rules = parse_rules_xml(
            r#"<fixups>
                 <template protocol="x" show="(unclosed" nameFormat="x"/>
                 <constant protocol="x" text="t" name="n"/>
               </fixups>"#,
        )
        .unwrap();
        assert!(rules.templates.is_empty());
        assert_eq!(rules.constants.len(), 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(matches!(
            parse_rules_xml("<nope/>"),
            Err(IngestionError::NotAFixupsDocument)
        ));
    }
}
