//! Arena representation of a JSON-Schema-like document.
//!
//! Nodes live in a flat `Vec` and point at each other by [`NodeId`], so a
//! definitions table whose entries reference each other in a cycle is just a
//! graph with a back edge. Nothing here follows `$ref` edges; that is the job
//! of [`crate::schema::normalize`].

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{SchemaError, SchemaResult};

/// Extension marker: prompt for the model's justification of a field.
pub const X_REASONING_PROMPT: &str = "X-ReasoningPrompt";
/// Extension marker: the field needs a verbatim supporting quote.
pub const X_SOURCE_QUOTE: &str = "X-SourceQuote";
/// Extension marker: per-field prompt text.
pub const X_FIELD_PROMPT: &str = "X-FieldPrompt";
/// Extension marker: document-level system prompt (root only).
pub const X_SYSTEM_PROMPT: &str = "X-SystemPrompt";

/// Index of a node inside a [`SchemaDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Primitive JSON types as they appear in the `type` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl JsonType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "object" => Self::Object,
            "array" => Self::Array,
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "null" => Self::Null,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

/// Derived classification of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Reference,
    AnyOf,
    OneOf,
    AllOf,
    Enum,
    /// Several `type` members, e.g. `["string", "null"]`
    TypeUnion,
    /// No type information at all
    Any,
}

/// A single schema node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaNode {
    /// The `type` keyword (string or list form)
    pub types: Vec<JsonType>,
    /// Whether `type` was written as a list
    pub type_is_list: bool,
    pub properties: IndexMap<String, NodeId>,
    pub required: Vec<String>,
    pub items: Option<NodeId>,
    pub any_of: Vec<NodeId>,
    pub one_of: Vec<NodeId>,
    pub all_of: Vec<NodeId>,
    pub enum_values: Option<Vec<Value>>,
    /// Raw `$ref` string
    pub reference: Option<String>,
    pub description: Option<String>,
    /// `X-*` keys
    pub extensions: IndexMap<String, Value>,
    /// Every other keyword, preserved verbatim
    pub keywords: IndexMap<String, Value>,
}

impl SchemaNode {
    pub fn with_type(ty: JsonType) -> Self {
        Self {
            types: vec![ty],
            ..Default::default()
        }
    }

    pub fn kind(&self) -> SchemaKind {
        if self.reference.is_some() {
            return SchemaKind::Reference;
        }
        if self.enum_values.is_some() {
            return SchemaKind::Enum;
        }
        if !self.all_of.is_empty() {
            return SchemaKind::AllOf;
        }
        if !self.any_of.is_empty() {
            return SchemaKind::AnyOf;
        }
        if !self.one_of.is_empty() {
            return SchemaKind::OneOf;
        }
        match self.types.as_slice() {
            [] if !self.properties.is_empty() => SchemaKind::Object,
            [] => SchemaKind::Any,
            [single] => match single {
                JsonType::Object => SchemaKind::Object,
                JsonType::Array => SchemaKind::Array,
                JsonType::String => SchemaKind::String,
                JsonType::Number => SchemaKind::Number,
                JsonType::Integer => SchemaKind::Integer,
                JsonType::Boolean => SchemaKind::Boolean,
                JsonType::Null => SchemaKind::Null,
            },
            _ => SchemaKind::TypeUnion,
        }
    }

    pub fn is_object(&self) -> bool {
        self.kind() == SchemaKind::Object
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn extension_str(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).and_then(Value::as_str)
    }

    pub fn reasoning_prompt(&self) -> Option<&str> {
        self.extension_str(X_REASONING_PROMPT)
    }

    pub fn wants_source_quote(&self) -> bool {
        self.extension(X_SOURCE_QUOTE)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Leaf nodes have no properties, items or combinators.
    pub fn is_leaf(&self) -> bool {
        self.properties.is_empty()
            && self.items.is_none()
            && self.any_of.is_empty()
            && self.one_of.is_empty()
            && self.all_of.is_empty()
            && self.reference.is_none()
            && !self.types.contains(&JsonType::Object)
            && !self.types.contains(&JsonType::Array)
    }
}

/// A schema document: the node arena, its root and its definitions table.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    nodes: Vec<SchemaNode>,
    root: NodeId,
    /// Definition name to node
    pub definitions: IndexMap<String, NodeId>,
    /// `"definitions"` or `"$defs"`, whichever the input used
    pub definitions_key: String,
}

const DEFINITIONS: &str = "definitions";
const DEFS: &str = "$defs";

impl SchemaDocument {
    /// Build a document holding a single root node.
    pub fn new(root: SchemaNode) -> Self {
        Self {
            nodes: vec![root],
            root: NodeId(0),
            definitions: IndexMap::new(),
            definitions_key: DEFINITIONS.to_string(),
        }
    }

    /// Parse a JSON schema value into an arena document.
    pub fn from_value(value: &Value) -> SchemaResult<Self> {
        let Value::Object(map) = value else {
            return Err(SchemaError::invalid("schema root must be an object"));
        };

        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            definitions: IndexMap::new(),
            definitions_key: DEFINITIONS.to_string(),
        };

        let mut root_map = map.clone();
        for key in [DEFINITIONS, DEFS] {
            if let Some(table) = root_map.shift_remove(key) {
                let Value::Object(entries) = table else {
                    return Err(SchemaError::invalid(format!("`{key}` must be an object")));
                };
                doc.definitions_key = key.to_string();
                for (name, def) in &entries {
                    let id = doc.parse_node(def)?;
                    doc.definitions.insert(name.clone(), id);
                }
            }
        }

        doc.root = doc.parse_node(&Value::Object(root_map))?;
        Ok(doc)
    }

    fn parse_node(&mut self, value: &Value) -> SchemaResult<NodeId> {
        let map = match value {
            Value::Object(map) => map,
            // `true` accepts anything
            Value::Bool(true) => return Ok(self.push(SchemaNode::default())),
            other => {
                return Err(SchemaError::invalid(format!(
                    "expected schema object, found {other}"
                )))
            }
        };

        let mut node = SchemaNode::default();
        for (key, v) in map {
            match key.as_str() {
                "type" => {
                    let (types, is_list) = parse_types(v)?;
                    node.types = types;
                    node.type_is_list = is_list;
                }
                "properties" => {
                    let Value::Object(props) = v else {
                        return Err(SchemaError::invalid("`properties` must be an object"));
                    };
                    for (name, child) in props {
                        let id = self.parse_node(child)?;
                        node.properties.insert(name.clone(), id);
                    }
                }
                "required" => {
                    let Value::Array(names) = v else {
                        return Err(SchemaError::invalid("`required` must be an array"));
                    };
                    for name in names {
                        let name = name.as_str().ok_or_else(|| {
                            SchemaError::invalid("`required` entries must be strings")
                        })?;
                        if !node.is_required(name) {
                            node.required.push(name.to_string());
                        }
                    }
                }
                "items" => node.items = Some(self.parse_node(v)?),
                "anyOf" => node.any_of = self.parse_members(key, v)?,
                "oneOf" => node.one_of = self.parse_members(key, v)?,
                "allOf" => node.all_of = self.parse_members(key, v)?,
                "enum" => {
                    let Value::Array(values) = v else {
                        return Err(SchemaError::invalid("`enum` must be an array"));
                    };
                    node.enum_values = Some(values.clone());
                }
                "$ref" => {
                    let reference = v
                        .as_str()
                        .ok_or_else(|| SchemaError::invalid("`$ref` must be a string"))?;
                    node.reference = Some(reference.to_string());
                }
                "description" => {
                    let description = v
                        .as_str()
                        .ok_or_else(|| SchemaError::invalid("`description` must be a string"))?;
                    node.description = Some(description.to_string());
                }
                k if k.starts_with("X-") => {
                    node.extensions.insert(key.clone(), v.clone());
                }
                _ => {
                    node.keywords.insert(key.clone(), v.clone());
                }
            }
        }

        Ok(self.push(node))
    }

    fn parse_members(&mut self, key: &str, value: &Value) -> SchemaResult<Vec<NodeId>> {
        let Value::Array(members) = value else {
            return Err(SchemaError::invalid(format!("`{key}` must be an array")));
        };
        members.iter().map(|m| self.parse_node(m)).collect()
    }

    pub fn push(&mut self, node: SchemaNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SchemaNode {
        &mut self.nodes[id.0]
    }

    pub fn root_node(&self) -> &SchemaNode {
        self.node(self.root)
    }

    /// Look up a definition by its `$ref` string.
    pub fn resolve(&self, reference: &str) -> SchemaResult<NodeId> {
        let name = definition_name(reference)?;
        self.definitions
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnresolvedReference {
                reference: reference.to_string(),
            })
    }

    /// Direct child ids of a node (properties, items, combinator members).
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let node = self.node(id);
        node.properties
            .values()
            .copied()
            .chain(node.items)
            .chain(node.any_of.iter().copied())
            .chain(node.one_of.iter().copied())
            .chain(node.all_of.iter().copied())
            .collect()
    }

    /// Copy the subtree rooted at `id` into fresh nodes.
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        let mut node = self.node(id).clone();
        for child in node.properties.values_mut() {
            *child = self.deep_copy(*child);
        }
        if let Some(items) = node.items {
            node.items = Some(self.deep_copy(items));
        }
        for list in [&mut node.any_of, &mut node.one_of, &mut node.all_of] {
            let copied: Vec<NodeId> = list.iter().map(|m| self.deep_copy(*m)).collect();
            *list = copied;
        }
        self.push(node)
    }

    /// Render the document back to JSON, including the definitions table
    /// when it is non-empty.
    pub fn to_value(&self) -> Value {
        let mut out = match self.node_to_value(self.root) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if !self.definitions.is_empty() {
            let table: Map<String, Value> = self
                .definitions
                .iter()
                .map(|(name, id)| (name.clone(), self.node_to_value(*id)))
                .collect();
            out.insert(self.definitions_key.clone(), Value::Object(table));
        }
        Value::Object(out)
    }

    /// Render a single subtree.
    pub fn node_to_value(&self, id: NodeId) -> Value {
        let node = self.node(id);
        let mut map = Map::new();

        if let Some(reference) = &node.reference {
            map.insert("$ref".into(), Value::String(reference.clone()));
        }
        if !node.types.is_empty() {
            map.insert("type".into(), types_to_value(&node.types, node.type_is_list));
        }
        if let Some(description) = &node.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        if !node.properties.is_empty() {
            let props: Map<String, Value> = node
                .properties
                .iter()
                .map(|(name, child)| (name.clone(), self.node_to_value(*child)))
                .collect();
            map.insert("properties".into(), Value::Object(props));
        }
        if !node.required.is_empty() {
            map.insert(
                "required".into(),
                Value::Array(node.required.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(items) = node.items {
            map.insert("items".into(), self.node_to_value(items));
        }
        for (key, members) in [("anyOf", &node.any_of), ("oneOf", &node.one_of), ("allOf", &node.all_of)] {
            if !members.is_empty() {
                map.insert(
                    key.into(),
                    Value::Array(members.iter().map(|m| self.node_to_value(*m)).collect()),
                );
            }
        }
        if let Some(values) = &node.enum_values {
            map.insert("enum".into(), Value::Array(values.clone()));
        }
        for (key, value) in node.keywords.iter().chain(node.extensions.iter()) {
            map.insert(key.clone(), value.clone());
        }

        Value::Object(map)
    }
}

/// Extract the definition name from `#/definitions/<name>` or `#/$defs/<name>`.
pub fn definition_name(reference: &str) -> SchemaResult<&str> {
    reference
        .strip_prefix("#/definitions/")
        .or_else(|| reference.strip_prefix("#/$defs/"))
        .filter(|name| !name.is_empty() && !name.contains('/'))
        .ok_or_else(|| SchemaError::UnsupportedReference {
            reference: reference.to_string(),
        })
}

fn parse_types(value: &Value) -> SchemaResult<(Vec<JsonType>, bool)> {
    let unknown = |name: &str| SchemaError::invalid(format!("unknown type `{name}`"));
    match value {
        Value::String(name) => Ok((vec![JsonType::parse(name).ok_or_else(|| unknown(name))?], false)),
        Value::Array(names) => {
            let mut types = Vec::with_capacity(names.len());
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| SchemaError::invalid("`type` entries must be strings"))?;
                types.push(JsonType::parse(name).ok_or_else(|| unknown(name))?);
            }
            Ok((types, true))
        }
        other => Err(SchemaError::invalid(format!("invalid `type`: {other}"))),
    }
}

pub(crate) fn types_to_value(types: &[JsonType], as_list: bool) -> Value {
    match types {
        [single] if !as_list => Value::String(single.as_str().to_string()),
        many => Value::Array(
            many.iter()
                .map(|t| Value::String(t.as_str().to_string()))
                .collect(),
        ),
    }
}
