//! Cycle-safe rendering of caller metadata into JSON.
//!
//! Every composite node (map, list, nested fault) is rendered at most once per
//! traversal; any later visit of the same node yields
//! [`CIRCULAR_REFERENCE_PLACEHOLDER`]. Leaves with no JSON form become strings.

use crate::domain::{Metadata, StructuredFault, Value};
use serde_json::{Map, Number, Value as Json};
use std::collections::HashSet;

pub const CIRCULAR_REFERENCE_PLACEHOLDER: &str = "[Circular]";
pub const DEPTH_PLACEHOLDER: &str = "[MaxDepth]";
pub const MAX_DEPTH: usize = 64;

/// Tracks visited nodes across one serialization pass.
#[derive(Debug, Default)]
pub struct Sanitizer {
    seen: HashSet<usize>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&mut self, value: &Value) -> Json {
        self.visit(value, 0)
    }

    pub fn metadata(&mut self, map: &Metadata) -> Map<String, Json> {
        self.entries(map, 0)
    }

    /// Detached copy of `map`: no node is shared with the caller, so later
    /// writes to the original graph are not seen.
    pub fn snapshot(&mut self, map: &Metadata) -> Metadata {
        self.metadata(map)
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect()
    }

    fn visit(&mut self, value: &Value, depth: usize) -> Json {
        if let Some(id) = value.node_id() {
            if !self.seen.insert(id) {
                return Json::String(CIRCULAR_REFERENCE_PLACEHOLDER.to_string());
            }
            if depth >= MAX_DEPTH {
                return Json::String(DEPTH_PLACEHOLDER.to_string());
            }
        }

        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(i) => Json::from(*i),
            Value::Float(x) => {
                Number::from_f64(*x).map_or_else(|| Json::String(x.to_string()), Json::Number)
            }
            Value::BigInteger(i) => Json::String(i.to_string()),
            Value::String(s) => Json::String(s.clone()),
            Value::Opaque(label) => Json::String(label.clone()),
            Value::List(node) => {
                let items = node.read();
                Json::Array(
                    items
                        .iter()
                        .map(|item| self.visit(item, depth + 1))
                        .collect(),
                )
            }
            Value::Map(node) => {
                let map = node.read();
                Json::Object(self.entries(&map, depth + 1))
            }
            Value::Fault(fault) => fault_summary(fault),
        }
    }

    fn entries(&mut self, map: &Metadata, depth: usize) -> Map<String, Json> {
        map.iter()
            .map(|(key, value)| (key.clone(), self.visit(value, depth)))
            .collect()
    }
}

/// Nested faults are reduced to `{name, message, stack}`.
fn fault_summary(fault: &StructuredFault) -> Json {
    let mut summary = Map::new();
    summary.insert("name".to_string(), Json::String(fault.name.clone()));
    summary.insert(
        "message".to_string(),
        Json::String(fault.message.clone().unwrap_or_default()),
    );
    if let Some(stack) = &fault.stack {
        summary.insert("stack".to_string(), Json::String(stack.clone()));
    }
    Json::Object(summary)
}

/// Renders any metadata value to a finite JSON string.
pub fn safe_stringify(value: &Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Sanitizer::new().value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metadata;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn direct_self_reference_is_marked_once() {
        let node = Value::map();
        node.insert("name", "root");
        node.insert("me", node.clone());

        let json = safe_stringify(&node).unwrap();

        assert_eq!(json, r#"{"me":"[Circular]","name":"root"}"#);
    }

    #[test]
    fn mutual_references_terminate() {
        let parent = Value::map();
        let child = Value::map();
        parent.insert("child", child.clone());
        child.insert("parent", parent.clone());
        child.insert("siblings", Value::from(vec![child.clone()]));

        let json = safe_stringify(&parent).unwrap();

        assert_eq!(count(&json, CIRCULAR_REFERENCE_PLACEHOLDER), 2);
    }

    #[test]
    fn leaves_without_json_form_become_placeholders() {
        let value = Value::from(metadata([
            ("callback", Value::callable()),
            ("handle", Value::opaque("[Socket fd=3]")),
            ("big", Value::BigInteger(170_141_183_460_469_231_731_687_303_715_884_105_727)),
            ("nan", Value::Float(f64::NAN)),
        ]));

        let json: Json = serde_json::from_str(&safe_stringify(&value).unwrap()).unwrap();

        assert_eq!(json["callback"], "[Function]");
        assert_eq!(json["handle"], "[Socket fd=3]");
        assert_eq!(json["big"], "170141183460469231731687303715884105727");
        assert_eq!(json["nan"], "NaN");
    }

    #[test]
    fn nested_faults_are_reduced() {
        let fault = StructuredFault::new("TimeoutError", "took too long")
            .with_code("ETIMEDOUT")
            .with_field("secret", "not rendered");
        let value = Value::from(metadata([("err", Value::from(fault))]));

        let json: Json = serde_json::from_str(&safe_stringify(&value).unwrap()).unwrap();

        assert_eq!(
            json["err"],
            serde_json::json!({"name": "TimeoutError", "message": "took too long"})
        );
    }

    #[test]
    fn deep_chains_are_truncated() {
        let root = Value::list();
        let mut tail = root.clone();
        for _ in 0..(MAX_DEPTH * 2) {
            let next = Value::list();
            tail.push(next.clone());
            tail = next;
        }

        let json = safe_stringify(&root).unwrap();

        assert!(json.contains(DEPTH_PLACEHOLDER));
    }
}
