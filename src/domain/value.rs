use super::fault::StructuredFault;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Interior-mutable node; cloning shares the node rather than copying it.
pub type Shared<T> = Arc<RwLock<T>>;

/// Caller-supplied key/value metadata attached to an event.
pub type Metadata = BTreeMap<String, Value>;

/// Placeholder rendered for callables attached as metadata.
pub const FUNCTION_PLACEHOLDER: &str = "[Function]";

/// Dynamic metadata value.
///
/// Composite variants are shared nodes so a caller can build graphs in which
/// a map or list (directly or through a child) contains itself. Such graphs
/// are rendered finitely by [`crate::builder::safe_json`].
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    /// Integers beyond `i64`; rendered as their decimal string.
    BigInteger(i128),
    String(String),
    List(Shared<Vec<Value>>),
    Map(Shared<Metadata>),
    /// A nested fault, reduced to `{name, message, stack}` on the wire.
    Fault(Arc<StructuredFault>),
    /// A value with no JSON form (callable, handle, ...), rendered as its label.
    Opaque(String),
}

impl Value {
    pub fn map() -> Self {
        Value::Map(Arc::new(RwLock::new(Metadata::new())))
    }

    pub fn list() -> Self {
        Value::List(Arc::new(RwLock::new(Vec::new())))
    }

    pub fn callable() -> Self {
        Value::Opaque(FUNCTION_PLACEHOLDER.to_string())
    }

    pub fn opaque(label: impl Into<String>) -> Self {
        Value::Opaque(label.into())
    }

    /// Inserts into a map node. Returns `false` when `self` is not a map.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        match self {
            Value::Map(node) => {
                node.write().insert(key.into(), value.into());
                true
            }
            _ => false,
        }
    }

    /// Appends to a list node. Returns `false` when `self` is not a list.
    pub fn push(&self, value: impl Into<Value>) -> bool {
        match self {
            Value::List(node) => {
                node.write().push(value.into());
                true
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Identity of a composite node, used for repeat detection.
    pub(crate) fn node_id(&self) -> Option<usize> {
        match self {
            Value::List(node) => Some(Arc::as_ptr(node) as *const () as usize),
            Value::Map(node) => Some(Arc::as_ptr(node) as *const () as usize),
            Value::Fault(fault) => Some(Arc::as_ptr(fault) as *const () as usize),
            _ => None,
        }
    }
}

// Debug never descends into shared nodes: they may be cyclic.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Integer(i) => write!(f, "Integer({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::BigInteger(i) => write!(f, "BigInteger({i})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(node) => write!(f, "List(<{:p}>)", Arc::as_ptr(node)),
            Value::Map(node) => write!(f, "Map(<{:p}>)", Arc::as_ptr(node)),
            Value::Fault(fault) => write!(f, "Fault({})", fault.name),
            Value::Opaque(label) => write!(f, "Opaque({label})"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Value::BigInteger(value as i128), Value::Integer)
    }
}

impl From<i128> for Value {
    fn from(value: i128) -> Self {
        Value::BigInteger(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        let items = values.into_iter().map(Into::into).collect();
        Value::List(Arc::new(RwLock::new(items)))
    }
}

impl From<Metadata> for Value {
    fn from(map: Metadata) -> Self {
        Value::Map(Arc::new(RwLock::new(map)))
    }
}

impl From<StructuredFault> for Value {
    fn from(fault: StructuredFault) -> Self {
        Value::Fault(Arc::new(fault))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Value::from(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::from(items.into_iter().map(Value::from).collect::<Vec<_>>())
            }
            serde_json::Value::Object(map) => Value::from(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Metadata>(),
            ),
        }
    }
}

/// Builds a [`Metadata`] map from `(key, value)` pairs.
pub fn metadata<K, V, I>(pairs: I) -> Metadata
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
