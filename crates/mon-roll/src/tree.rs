//! Parses a flat `Item` stream into a nested tree per its `begArray` /
//! `begObject` schema markers, then renders that tree to JSON or XML.

use crate::item::{Counter, Item, Schema, TextSource};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("schema markers are not balanced")]
    UnbalancedSchema,
    #[error("endArray/endObject key {1:?} does not match its begArray/begObject key {0:?}")]
    MismatchedKey(String, String),
    #[error("an item inside object context must have a key")]
    MissingKeyInObject,
}

enum LeafValue {
    Counter(Counter),
    Text(TextSource),
}

enum Node {
    Leaf { key: Option<&'static str>, value: LeafValue },
    Container { key: Option<&'static str>, is_array: bool, children: Vec<Node> },
}

impl Node {
    fn key(&self) -> Option<&'static str> {
        match self {
            Node::Leaf { key, .. } => *key,
            Node::Container { key, .. } => *key,
        }
    }
}

enum EndKind {
    Array,
    Object,
}

/// The parsed, render-ready form of a registered item vector.
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn parse(items: &[Item]) -> Result<Self, Error> {
        let mut idx = 0;
        let (nodes, end) = parse_block(items, &mut idx, false)?;
        if end.is_some() {
            return Err(Error::UnbalancedSchema);
        }
        Ok(Tree { nodes })
    }

    pub fn to_json(&self) -> serde_json::Value {
        render_json(&self.nodes, false)
    }

    pub fn to_xml(&self) -> String {
        render_xml(&self.nodes, false)
    }
}

fn parse_block(
    items: &[Item],
    idx: &mut usize,
    container_is_array: bool,
) -> Result<(Vec<Node>, Option<(EndKind, Option<&'static str>)>), Error> {
    let mut nodes = Vec::new();

    while *idx < items.len() {
        match &items[*idx] {
            Item::Schema(Schema::EndArray(key)) => {
                *idx += 1;
                return Ok((nodes, Some((EndKind::Array, *key))));
            }
            Item::Schema(Schema::EndObject(key)) => {
                *idx += 1;
                return Ok((nodes, Some((EndKind::Object, *key))));
            }
            Item::Schema(Schema::BegArray(key)) => {
                *idx += 1;
                let (children, end) = parse_block(items, idx, true)?;
                match end {
                    Some((EndKind::Array, end_key)) => check_key(key, end_key)?,
                    _ => return Err(Error::UnbalancedSchema),
                }
                nodes.push(Node::Container { key: Some(key), is_array: true, children });
            }
            Item::Schema(Schema::BegObject(key)) => {
                *idx += 1;
                let (children, end) = parse_block(items, idx, false)?;
                match end {
                    Some((EndKind::Object, end_key)) => check_key(key, end_key)?,
                    _ => return Err(Error::UnbalancedSchema),
                }
                nodes.push(Node::Container { key: Some(key), is_array: false, children });
            }
            Item::MutexBoundary => {
                *idx += 1;
            }
            Item::Counter { key, value } => {
                require_key(*key, container_is_array)?;
                nodes.push(Node::Leaf { key: *key, value: LeafValue::Counter(value.clone()) });
                *idx += 1;
            }
            Item::Text { key, value } => {
                require_key(*key, container_is_array)?;
                nodes.push(Node::Leaf { key: *key, value: LeafValue::Text(value.clone()) });
                *idx += 1;
            }
        }
    }

    Ok((nodes, None))
}

fn require_key(key: Option<&'static str>, in_array: bool) -> Result<(), Error> {
    if !in_array && key.is_none() {
        return Err(Error::MissingKeyInObject);
    }
    Ok(())
}

fn check_key(open: &'static str, close: Option<&'static str>) -> Result<(), Error> {
    if let Some(close) = close {
        if close != open {
            return Err(Error::MismatchedKey(open.to_string(), close.to_string()));
        }
    }
    Ok(())
}

fn render_json(nodes: &[Node], as_array: bool) -> serde_json::Value {
    if as_array {
        serde_json::Value::Array(nodes.iter().map(render_json_value).collect())
    } else {
        let mut map = serde_json::Map::new();
        for node in nodes {
            let key = node.key().expect("object items are key-required at parse time");
            map.insert(key.to_string(), render_json_value(node));
        }
        serde_json::Value::Object(map)
    }
}

fn render_json_value(node: &Node) -> serde_json::Value {
    match node {
        Node::Leaf { value: LeafValue::Counter(c), .. } => serde_json::Value::Number(c.load()),
        Node::Leaf { value: LeafValue::Text(t), .. } => serde_json::Value::String(t.read()),
        Node::Container { is_array, children, .. } => render_json(children, *is_array),
    }
}

fn render_xml(nodes: &[Node], _as_array: bool) -> String {
    let mut out = String::new();
    for node in nodes {
        let tag = node.key().unwrap_or("item");
        match node {
            Node::Leaf { value: LeafValue::Counter(c), .. } => {
                out.push_str(&format!("<{tag}>{}</{tag}>", c.load()));
            }
            Node::Leaf { value: LeafValue::Text(t), .. } => {
                out.push_str(&format!("<{tag}>{}</{tag}>", xml_escape(&t.read())));
            }
            Node::Container { is_array, children, .. } => {
                out.push_str(&format!("<{tag}>{}</{tag}>", render_xml(children, *is_array)));
            }
        }
    }
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Counter;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    fn counter(n: i64) -> Counter {
        Counter::I64(Arc::new(AtomicI64::new(n)))
    }

    #[test]
    fn flat_items_render_as_a_flat_object() {
        let items = vec![Item::counter("a", counter(1)), Item::counter("b", counter(2))];
        let tree = Tree::parse(&items).unwrap();
        assert_eq!(tree.to_json(), serde_json::json!({"a": 1, "b": 2}));
        assert_eq!(tree.to_xml(), "<a>1</a><b>2</b>");
    }

    #[test]
    fn nested_object_renders_with_object_keys() {
        let items = vec![
            Item::Schema(Schema::BegObject("keys")),
            Item::counter("key1", counter(1)),
            Item::counter("key2", counter(2)),
            Item::Schema(Schema::EndObject(Some("keys"))),
        ];
        let tree = Tree::parse(&items).unwrap();
        assert_eq!(tree.to_json(), serde_json::json!({"keys": {"key1": 1, "key2": 2}}));
        assert_eq!(tree.to_xml(), "<keys><key1>1</key1><key2>2</key2></keys>");
    }

    #[test]
    fn nested_array_ignores_element_keys_for_json_but_not_xml() {
        let items = vec![
            Item::Schema(Schema::BegArray("keyvals")),
            Item::array_counter(counter(1)),
            Item::array_counter(counter(2)),
            Item::Schema(Schema::EndArray(None)),
        ];
        let tree = Tree::parse(&items).unwrap();
        assert_eq!(tree.to_json(), serde_json::json!({"keyvals": [1, 2]}));
        assert_eq!(tree.to_xml(), "<keyvals><item>1</item><item>2</item></keyvals>");
    }

    #[test]
    fn mismatched_end_key_is_rejected() {
        let items = vec![
            Item::Schema(Schema::BegObject("a")),
            Item::counter("x", counter(1)),
            Item::Schema(Schema::EndObject(Some("b"))),
        ];
        assert!(matches!(Tree::parse(&items), Err(Error::MismatchedKey(..))));
    }

    #[test]
    fn unbalanced_schema_is_rejected() {
        let items = vec![Item::Schema(Schema::BegObject("a"))];
        assert!(matches!(Tree::parse(&items), Err(Error::UnbalancedSchema)));
    }

    #[test]
    fn missing_key_in_object_context_is_rejected() {
        let items = vec![Item::array_counter(counter(1))];
        assert!(matches!(Tree::parse(&items), Err(Error::MissingKeyInObject)));
    }
}
