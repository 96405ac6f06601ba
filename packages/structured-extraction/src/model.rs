//! Structural record types synthesized from a schema.
//!
//! Instead of generating native types at runtime, a schema is interpreted
//! into a tagged [`StructuralType`] and data is validated by matching over
//! the tags. [`PartialType`] is the same shape with every field optional at
//! every depth, so a half-streamed value can be checked without being
//! rejected for what has not arrived yet.
//!
//! `anyOf`/`oneOf` shapes other than "T or null" are kept as
//! [`FieldType::Opaque`] and accept any value, as are references into a
//! definition cycle. References to acyclic definitions are resolved.

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;

use serde_json::Value;

use crate::error::{SchemaError, SchemaResult, ValidationError, ValidationIssue};
use crate::flat::SEPARATOR;
use crate::schema::node::{definition_name, JsonType, NodeId, SchemaDocument, SchemaKind};
use crate::schema::normalize::cyclic_definitions;

/// Scalar value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Any,
}

impl ScalarKind {
    fn from_json_type(ty: JsonType) -> Option<Self> {
        Some(match ty {
            JsonType::String => Self::String,
            JsonType::Number => Self::Number,
            JsonType::Integer => Self::Integer,
            JsonType::Boolean => Self::Boolean,
            JsonType::Null => Self::Null,
            JsonType::Object | JsonType::Array => return None,
        })
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            Self::Boolean => value.is_boolean(),
            Self::Null => value.is_null(),
            Self::Any => true,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Any => "any",
        }
    }
}

/// Value-type descriptor of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarKind),
    /// One of a fixed set of values (`enum`)
    Literal(Vec<Value>),
    Record(StructuralType),
    List(Box<FieldType>),
    Nullable(Box<FieldType>),
    /// Union shape that is not destructured; accepts anything
    Opaque,
}

impl FieldType {
    /// Wrap in `Nullable` unless it already accepts null.
    pub fn nullable(self) -> Self {
        match self {
            Self::Nullable(_) | Self::Opaque | Self::Scalar(ScalarKind::Null | ScalarKind::Any) => {
                self
            }
            other => Self::Nullable(Box::new(other)),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(
            self,
            Self::Nullable(_) | Self::Opaque | Self::Scalar(ScalarKind::Null | ScalarKind::Any)
        )
    }

    fn to_partial(&self) -> Self {
        match self {
            Self::Record(record) => Self::Record(record.partial_record()),
            Self::List(element) => Self::List(Box::new(element.to_partial().nullable())),
            Self::Nullable(inner) => inner.to_partial().nullable(),
            other => other.clone(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => f.write_str(kind.as_str()),
            Self::Literal(values) => {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "one of [{}]", values.join(", "))
            }
            Self::Record(record) => f.write_str(&record.name),
            Self::List(element) => write!(f, "list of {element}"),
            Self::Nullable(inner) => write!(f, "{inner} or null"),
            Self::Opaque => f.write_str("union"),
        }
    }
}

/// A named field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    /// May be absent (or null)
    pub optional: bool,
    pub description: Option<String>,
}

/// A named record description.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralType {
    pub name: String,
    pub fields: Vec<Field>,
}

impl StructuralType {
    /// Build the record type of the document root.
    pub fn from_schema(doc: &SchemaDocument, root_name: &str) -> SchemaResult<Self> {
        let mut root = doc.root();
        // A root that is a bare reference into a cyclic table: follow it once.
        if let Some(reference) = &doc.node(root).reference {
            root = doc.resolve(reference)?;
        }
        let node = doc.node(root);
        let is_object = node.kind() == SchemaKind::Object
            || (node.kind() == SchemaKind::TypeUnion && node.types.contains(&JsonType::Object));
        if !is_object {
            return Err(SchemaError::invalid("root schema must describe an object"));
        }
        let synth = Synthesizer {
            doc,
            cyclic: cyclic_definitions(doc),
        };
        let name = synth.title(root).unwrap_or_else(|| root_name.to_string());
        Ok(synth.build_record(root, name))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every field optional, at every depth.
    pub fn to_partial(&self) -> PartialType {
        PartialType(self.partial_record())
    }

    fn partial_record(&self) -> StructuralType {
        StructuralType {
            name: format!("{}Partial", self.name),
            fields: self
                .fields
                .iter()
                .map(|field| Field {
                    name: field.name.clone(),
                    ty: field.ty.to_partial().nullable(),
                    optional: true,
                    description: field.description.clone(),
                })
                .collect(),
        }
    }

    /// Check `value` against this type, collecting every issue.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        check_record(self, value, "", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                type_name: self.name.clone(),
                issues,
            })
        }
    }
}

/// A [`StructuralType`] whose fields are all optional, recursively.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialType(StructuralType);

impl PartialType {
    pub fn as_type(&self) -> &StructuralType {
        &self.0
    }
}

impl Deref for PartialType {
    type Target = StructuralType;

    fn deref(&self) -> &StructuralType {
        &self.0
    }
}

// =============================================================================
// Synthesis
// =============================================================================

struct Synthesizer<'a> {
    doc: &'a SchemaDocument,
    /// References to these stay opaque.
    cyclic: HashSet<String>,
}

impl Synthesizer<'_> {
    fn title(&self, id: NodeId) -> Option<String> {
        self.doc
            .node(id)
            .keywords
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn build_record(&self, id: NodeId, name: String) -> StructuralType {
        let node = self.doc.node(id);
        let fields = node
            .properties
            .iter()
            .map(|(field_name, child)| Field {
                name: field_name.clone(),
                ty: self.field_type(*child, &pascal_case(field_name)),
                optional: !node.is_required(field_name),
                description: self.doc.node(*child).description.clone(),
            })
            .collect();
        StructuralType { name, fields }
    }

    fn field_type(&self, id: NodeId, type_name: &str) -> FieldType {
        let doc = self.doc;
        let node = doc.node(id);
        match node.kind() {
            SchemaKind::Reference => match self.resolve_acyclic(id) {
                Some(target) => self.field_type(target, type_name),
                None => FieldType::Opaque,
            },
            SchemaKind::Enum => FieldType::Literal(node.enum_values.clone().unwrap_or_default()),
            SchemaKind::Object => self.record_type(id, type_name),
            SchemaKind::Array => self.list_type(id, type_name),
            SchemaKind::Any => FieldType::Scalar(ScalarKind::Any),
            SchemaKind::String
            | SchemaKind::Number
            | SchemaKind::Integer
            | SchemaKind::Boolean
            | SchemaKind::Null => node
                .types
                .first()
                .and_then(|ty| ScalarKind::from_json_type(*ty))
                .map_or(FieldType::Opaque, FieldType::Scalar),
            SchemaKind::TypeUnion => {
                let non_null: Vec<JsonType> = node
                    .types
                    .iter()
                    .copied()
                    .filter(|ty| *ty != JsonType::Null)
                    .collect();
                let has_null = non_null.len() < node.types.len();
                match non_null.as_slice() {
                    [single] => {
                        let inner = self.single_type(id, *single, type_name);
                        if has_null {
                            inner.nullable()
                        } else {
                            inner
                        }
                    }
                    _ => FieldType::Opaque,
                }
            }
            SchemaKind::AnyOf | SchemaKind::OneOf => {
                let members = if node.any_of.is_empty() {
                    &node.one_of
                } else {
                    &node.any_of
                };
                match members.as_slice() {
                    [a, b] => {
                        let is_null = |m: NodeId| doc.node(m).kind() == SchemaKind::Null;
                        match (is_null(*a), is_null(*b)) {
                            (true, false) => self.field_type(*b, type_name).nullable(),
                            (false, true) => self.field_type(*a, type_name).nullable(),
                            _ => FieldType::Opaque,
                        }
                    }
                    _ => FieldType::Opaque,
                }
            }
            SchemaKind::AllOf => match node.all_of.as_slice() {
                [member] => self.field_type(*member, type_name),
                _ => FieldType::Opaque,
            },
        }
    }

    /// Target of a reference node, unless it is missing or cyclic.
    fn resolve_acyclic(&self, id: NodeId) -> Option<NodeId> {
        let reference = self.doc.node(id).reference.as_deref()?;
        let name = definition_name(reference).ok()?;
        if self.cyclic.contains(name) {
            return None;
        }
        self.doc.resolve(reference).ok()
    }

    fn single_type(&self, id: NodeId, ty: JsonType, type_name: &str) -> FieldType {
        match ty {
            JsonType::Object => self.record_type(id, type_name),
            JsonType::Array => self.list_type(id, type_name),
            scalar => ScalarKind::from_json_type(scalar).map_or(FieldType::Opaque, FieldType::Scalar),
        }
    }

    fn record_type(&self, id: NodeId, type_name: &str) -> FieldType {
        let name = self.title(id).unwrap_or_else(|| type_name.to_string());
        FieldType::Record(self.build_record(id, name))
    }

    fn list_type(&self, id: NodeId, type_name: &str) -> FieldType {
        let element = match self.doc.node(id).items {
            Some(items) => self.field_type(items, &format!("{type_name}Item")),
            None => FieldType::Scalar(ScalarKind::Any),
        };
        FieldType::List(Box::new(element))
    }
}

fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

// =============================================================================
// Validation
// =============================================================================

fn join_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}{SEPARATOR}{segment}")
    }
}

fn issue(issues: &mut Vec<ValidationIssue>, path: &str, message: impl Into<String>) {
    issues.push(ValidationIssue {
        path: path.to_string(),
        message: message.into(),
    });
}

fn check_record(
    record: &StructuralType,
    value: &Value,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Value::Object(map) = value else {
        issue(issues, path, format!("expected object {}, found {}", record.name, kind_of(value)));
        return;
    };

    for field in &record.fields {
        let field_path = join_path(path, &field.name);
        match map.get(&field.name) {
            None if field.optional => {}
            None => issue(issues, &field_path, "missing required field"),
            Some(Value::Null) if field.optional => {}
            Some(child) => check_type(&field.ty, child, &field_path, issues),
        }
    }
}

fn check_type(ty: &FieldType, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    match ty {
        FieldType::Opaque => {}
        FieldType::Scalar(kind) => {
            if !kind.accepts(value) {
                issue(issues, path, format!("expected {}, found {}", kind.as_str(), kind_of(value)));
            }
        }
        FieldType::Literal(values) => {
            if !values.contains(value) {
                issue(issues, path, format!("expected {ty}, found {value}"));
            }
        }
        FieldType::Record(record) => check_record(record, value, path, issues),
        FieldType::List(element) => match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    check_type(element, item, &join_path(path, &index.to_string()), issues);
                }
            }
            other => issue(issues, path, format!("expected list, found {}", kind_of(other))),
        },
        FieldType::Nullable(inner) => {
            if !value.is_null() {
                check_type(inner, value, path, issues);
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
