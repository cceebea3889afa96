mod rules;

pub use rules::{ConstantRule, FixupRules, PrefixRule, TemplateRule};

use capsql_types::log::warn;

use crate::errors::IngestionError;

/// The rewritable attribute set of a tree node. Fixups and the transformer
/// share this view; position/size/typing stay on the node itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeAttrs {
    pub name: String,
    pub showname: String,
    pub show: String,
    pub value: Option<String>,
}

/// Applies name-rewriting rules to nodes whose attributes the dissector
/// left incomplete or mangled.
///
/// Rule order per node: constants, then prefixes (first hit short-circuits
/// both), then every template rule in declared order, later matches
/// overwriting earlier ones.
#[derive(Debug, Default)]
pub struct FixupEngine {
    rules: FixupRules,
}

impl FixupEngine {
    pub fn new(rules: FixupRules) -> FixupEngine {
        FixupEngine { rules }
    }

    /// Built-in rules only.
    pub fn builtin() -> Result<FixupEngine, IngestionError> {
        Ok(FixupEngine::new(rules::load_builtin()?))
    }

    /// Built-in rules augmented by an external rule file.
    pub fn with_external(xml: &str) -> Result<FixupEngine, IngestionError> {
        let mut rules = rules::load_builtin()?;
        rules.extend(rules::parse_rules_xml(xml)?);
        Ok(FixupEngine::new(rules))
    }

    pub fn apply(&self, protocol: &str, parent_name: &str, attrs: &mut NodeAttrs) {
        if !self.apply_constant(protocol, attrs) {
            self.apply_prefix(protocol, attrs);
        }
        self.apply_templates(protocol, parent_name, attrs);
    }

    fn apply_constant(&self, protocol: &str, attrs: &mut NodeAttrs) -> bool {
        if !attrs.name.is_empty() {
            return false;
        }
        for rule in &self.rules.constants {
            if rule.matches_protocol(protocol) && attrs.show == rule.text {
                attrs.name = rule.name.clone();
                attrs.showname = std::mem::take(&mut attrs.show);
                attrs.value = None;
                return true;
            }
        }
        false
    }

    fn apply_prefix(&self, protocol: &str, attrs: &mut NodeAttrs) -> bool {
        if !attrs.name.is_empty() {
            return false;
        }
        for rule in &self.rules.prefixes {
            if !rule.matches_protocol(protocol) {
                continue;
            }
            let Some(rest) = attrs.show.strip_prefix(&rule.text) else {
                continue;
            };
            let Some(rest) = rest.strip_prefix(':') else {
                continue;
            };
            let rest = rest.trim_start().to_string();
            attrs.name = rule.name.clone();
            attrs.showname = std::mem::replace(&mut attrs.show, rest.clone());
            attrs.value = Some(rest);
            return true;
        }
        false
    }

    fn apply_templates(&self, protocol: &str, parent_name: &str, attrs: &mut NodeAttrs) {
        for rule in &self.rules.templates {
            if !rule.matches_protocol(protocol) {
                continue;
            }
            let Some(captures) = rule.try_match(parent_name, attrs) else {
                continue;
            };

            let mut keys = captures;
            // Implicit keys go last so they shadow same-named captures.
            keys.push(("parentName".to_string(), parent_name.to_string()));
            keys.push((
                "parentNamePrefix".to_string(),
                if parent_name.is_empty() {
                    String::new()
                } else {
                    format!("{parent_name}.")
                },
            ));
            keys.push(("name".to_string(), attrs.name.clone()));
            keys.push(("show".to_string(), attrs.show.clone()));
            keys.push(("showname".to_string(), attrs.showname.clone()));
            keys.push(("value".to_string(), attrs.value.clone().unwrap_or_default()));

            let new_name = normalize_name(&expand_format(
                rule.name_format.as_deref().unwrap_or(""),
                &keys,
            ));
            let new_value = expand_format(rule.value_format.as_deref().unwrap_or(""), &keys);

            // All four attributes are overwritten on a match, even when one
            // of the format strings was absent.
            attrs.name = new_name.clone();
            attrs.showname = new_name;
            attrs.show = new_value.clone();
            attrs.value = Some(new_value);
        }
    }
}

/// Expands `$(key)` tokens against an association list. Lookup scans from
/// the end, so entries appended later shadow earlier ones; unknown keys
/// expand to nothing.
fn expand_format(format: &str, keys: &[(String, String)]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find(')') {
            Some(end) => {
                let key = &after[..end];
                if let Some((_, value)) = keys.iter().rev().find(|(k, _)| k == key) {
                    out.push_str(value);
                } else {
                    warn!("Unknown format key: {key}");
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Normalizes a synthesized node name: alphanumerics are kept lowercased,
/// any run of other characters collapses to a single `.`, and a trailing
/// `.` is trimmed.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dot = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dot && !out.is_empty() {
                out.push('.');
            }
            pending_dot = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dot = true;
        }
    }
    out
}
