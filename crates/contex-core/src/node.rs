//! Payload normalization and node decomposition.
//!
//! Incoming `data` is an opaque value in any supported format. Ingress
//! normalizes it to canonical JSON, then decomposes nested structures above a
//! configurable depth into multiple context nodes keyed by
//! `data_key + "#" + json_pointer`. Downstream code pattern-matches on the
//! canonical value and never inspects runtime types.

use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// Supported ingress data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    #[default]
    Json,
    Yaml,
    Toml,
    Xml,
    Csv,
    Text,
}

impl DataFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(DataFormat::Json),
            "yaml" | "yml" => Ok(DataFormat::Yaml),
            "toml" => Ok(DataFormat::Toml),
            "xml" => Ok(DataFormat::Xml),
            "csv" => Ok(DataFormat::Csv),
            "text" | "txt" | "plain" => Ok(DataFormat::Text),
            other => Err(Error::Validation(format!("unknown data format: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Json => "json",
            DataFormat::Yaml => "yaml",
            DataFormat::Toml => "toml",
            DataFormat::Xml => "xml",
            DataFormat::Csv => "csv",
            DataFormat::Text => "text",
        }
    }
}

/// A decomposed node before embedding: JSON pointer (empty for the root) and
/// its payload slice.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    /// JSON pointer within the published payload ("" for the root node).
    pub pointer: String,
    pub data: JsonValue,
}

impl NodeDraft {
    /// Node key for this draft: `data_key` for the root, otherwise
    /// `data_key + "#" + pointer`.
    pub fn node_key(&self, data_key: &str) -> String {
        if self.pointer.is_empty() {
            data_key.to_string()
        } else {
            format!("{}#{}", data_key, self.pointer)
        }
    }
}

/// Normalize raw input to canonical JSON based on the declared format.
///
/// Structured input (already-parsed JSON) passes through untouched for the
/// `json` format. For every other format the input must be a string, which is
/// parsed into an equivalent JSON value.
pub fn normalize(data: &JsonValue, format: DataFormat) -> Result<JsonValue> {
    match format {
        DataFormat::Json => Ok(data.clone()),
        DataFormat::Text => match data {
            JsonValue::String(_) => Ok(data.clone()),
            other => Ok(JsonValue::String(stringify_scalar(other))),
        },
        DataFormat::Yaml => {
            let raw = require_string(data, format)?;
            let parsed: JsonValue = serde_yaml::from_str(raw)
                .map_err(|e| Error::Validation(format!("invalid YAML payload: {e}")))?;
            Ok(parsed)
        }
        DataFormat::Toml => {
            let raw = require_string(data, format)?;
            let parsed: toml::Value = toml::from_str(raw)
                .map_err(|e| Error::Validation(format!("invalid TOML payload: {e}")))?;
            serde_json::to_value(parsed).map_err(Into::into)
        }
        DataFormat::Xml => {
            let raw = require_string(data, format)?;
            parse_xml(raw)
        }
        DataFormat::Csv => {
            let raw = require_string(data, format)?;
            Ok(parse_csv(raw))
        }
    }
}

fn require_string<'a>(data: &'a JsonValue, format: DataFormat) -> Result<&'a str> {
    data.as_str().ok_or_else(|| {
        Error::Validation(format!(
            "{} payloads must be provided as a string",
            format.as_str()
        ))
    })
}

fn stringify_scalar(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse CSV text into an array of row objects keyed by the header line.
///
/// Rows shorter than the header are padded with nulls; extra cells are
/// dropped. Quoting is not interpreted; cells are comma-split verbatim.
fn parse_csv(raw: &str) -> JsonValue {
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let header: Vec<String> = match lines.next() {
        Some(h) => h.split(',').map(|c| c.trim().to_string()).collect(),
        None => return JsonValue::Array(vec![]),
    };

    let rows: Vec<JsonValue> = lines
        .map(|line| {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let mut obj = Map::new();
            for (i, key) in header.iter().enumerate() {
                let value = cells
                    .get(i)
                    .map(|c| JsonValue::String((*c).to_string()))
                    .unwrap_or(JsonValue::Null);
                obj.insert(key.clone(), value);
            }
            JsonValue::Object(obj)
        })
        .collect();

    JsonValue::Array(rows)
}

/// Parse XML into a JSON object tree.
///
/// Elements become objects keyed by tag name; repeated sibling tags collapse
/// into arrays; text-only elements become strings; attributes are ignored.
fn parse_xml(raw: &str) -> Result<JsonValue> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(raw);

    // Stack of (tag, accumulated children, accumulated text).
    let mut stack: Vec<(String, Map<String, JsonValue>, String)> = Vec::new();
    let mut root: Option<JsonValue> = None;
    let mut root_tag = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push((tag, Map::new(), String::new()));
            }
            Ok(Event::Empty(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                attach_child(&mut stack, &mut root, &mut root_tag, tag, JsonValue::Null);
            }
            Ok(Event::Text(t)) => {
                if let Some((_, _, text)) = stack.last_mut() {
                    let decoded = t
                        .unescape()
                        .map_err(|e| Error::Validation(format!("invalid XML payload: {e}")))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::End(_)) => {
                let (tag, children, text) = match stack.pop() {
                    Some(frame) => frame,
                    None => {
                        return Err(Error::Validation(
                            "invalid XML payload: unbalanced end tag".to_string(),
                        ))
                    }
                };
                let value = if children.is_empty() {
                    JsonValue::String(text.trim().to_string())
                } else {
                    JsonValue::Object(children)
                };
                attach_child(&mut stack, &mut root, &mut root_tag, tag, value);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::Validation(format!("invalid XML payload: {e}"))),
        }
        buf.clear();
    }

    match root {
        Some(value) => {
            let mut obj = Map::new();
            obj.insert(root_tag, value);
            Ok(JsonValue::Object(obj))
        }
        None => Err(Error::Validation(
            "invalid XML payload: no root element".to_string(),
        )),
    }
}

fn attach_child(
    stack: &mut [(String, Map<String, JsonValue>, String)],
    root: &mut Option<JsonValue>,
    root_tag: &mut String,
    tag: String,
    value: JsonValue,
) {
    if let Some((_, children, _)) = stack.last_mut() {
        match children.get_mut(&tag) {
            // Repeated sibling tag: collapse into an array.
            Some(JsonValue::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = JsonValue::Array(vec![first, value]);
            }
            None => {
                children.insert(tag, value);
            }
        }
    } else {
        *root_tag = tag;
        *root = Some(value);
    }
}

/// Decompose a normalized payload into one or more node drafts.
///
/// The root always yields a node carrying the full payload. Containers still
/// present at `max_depth` additionally become their own nodes, keyed by JSON
/// pointer, so deeply nested structures stay addressable without unbounded
/// recursion.
pub fn decompose(data: &JsonValue, max_depth: usize) -> Vec<NodeDraft> {
    let mut drafts = vec![NodeDraft {
        pointer: String::new(),
        data: data.clone(),
    }];
    if max_depth > 0 {
        collect_nested(data, String::new(), 0, max_depth, &mut drafts);
    }
    drafts
}

fn collect_nested(
    value: &JsonValue,
    pointer: String,
    depth: usize,
    max_depth: usize,
    drafts: &mut Vec<NodeDraft>,
) {
    let children: Vec<(String, &JsonValue)> = match value {
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| (format!("{}/{}", pointer, escape_pointer_token(k)), v))
            .collect(),
        JsonValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{}/{}", pointer, i), v))
            .collect(),
        _ => return,
    };

    for (child_pointer, child) in children {
        let is_container = child.is_object() || child.is_array();
        if !is_container {
            continue;
        }
        if depth + 1 >= max_depth {
            drafts.push(NodeDraft {
                pointer: child_pointer,
                data: child.clone(),
            });
        } else {
            collect_nested(child, child_pointer, depth + 1, max_depth, drafts);
        }
    }
}

/// Escape a JSON pointer reference token (RFC 6901).
fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Build the text used for embedding and keyword indexing.
///
/// Includes key names so property names are searchable; objects render as
/// `key: value` pairs, arrays as comma-joined items.
pub fn text_content(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                JsonValue::Object(_) | JsonValue::Array(_) => {
                    format!("{}: {}", k, text_content(v))
                }
                other => format!("{}: {}", k, stringify_scalar(other)),
            })
            .collect::<Vec<_>>()
            .join(" | "),
        JsonValue::Array(items) => items
            .iter()
            .map(text_content)
            .collect::<Vec<_>>()
            .join(", "),
        other => stringify_scalar(other),
    }
}

/// Auto-generate a description: the data key followed by the first
/// `max_tokens` whitespace-separated tokens of the normalized text.
pub fn describe(data_key: &str, data: &JsonValue, max_tokens: usize) -> String {
    let text = text_content(data);
    let tokens: Vec<&str> = text.split_whitespace().take(max_tokens).collect();
    if tokens.is_empty() {
        data_key.to_string()
    } else {
        format!("{} {}", data_key, tokens.join(" "))
    }
}
