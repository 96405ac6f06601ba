//! Reference resolution and cycle detection.
//!
//! [`expand`] inlines every `#/definitions/<name>` reference so the rest of
//! the pipeline sees one self-contained tree. A definition that lies on or
//! reaches a cycle cannot be inlined. References to those stay in place,
//! together with the definitions table, and every other reference is inlined.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::{SchemaError, SchemaResult};
use crate::schema::node::{definition_name, NodeId, SchemaDocument, SchemaNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done(bool),
}

/// Walks the definitions table along `$ref` edges.
struct CycleFinder<'a> {
    doc: &'a SchemaDocument,
    memo: HashMap<String, Visit>,
    stack: Vec<String>,
}

impl<'a> CycleFinder<'a> {
    fn new(doc: &'a SchemaDocument) -> Self {
        Self {
            doc,
            memo: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Whether `name` lies on a cycle or can reach one.
    fn reaches_cycle(&mut self, name: &str) -> bool {
        match self.memo.get(name) {
            Some(Visit::InProgress) => {
                debug!(definition = name, path = ?self.stack, "back edge in definitions");
                return true;
            }
            Some(Visit::Done(result)) => return *result,
            None => {}
        }

        let Some(&id) = self.doc.definitions.get(name) else {
            return false;
        };

        self.memo.insert(name.to_string(), Visit::InProgress);
        self.stack.push(name.to_string());

        let mut found = false;
        for target in referenced_definitions(self.doc, id) {
            if self.reaches_cycle(&target) {
                found = true;
                break;
            }
        }

        self.stack.pop();
        self.memo.insert(name.to_string(), Visit::Done(found));
        found
    }
}

/// Names of the definitions referenced anywhere inside the subtree at `id`.
/// References are not followed.
fn referenced_definitions(doc: &SchemaDocument, id: NodeId) -> Vec<String> {
    let mut names = Vec::new();
    let mut pending = vec![id];
    while let Some(current) = pending.pop() {
        if let Some(reference) = &doc.node(current).reference {
            if let Ok(name) = definition_name(reference) {
                names.push(name.to_string());
            }
        }
        pending.extend(doc.children(current));
    }
    names
}

/// Returns `true` if the definitions table contains a reference cycle.
pub fn has_cycle(doc: &SchemaDocument) -> bool {
    let mut finder = CycleFinder::new(doc);
    let names: Vec<String> = doc.definitions.keys().cloned().collect();
    names.iter().any(|name| finder.reaches_cycle(name))
}

/// Definitions that lie on a cycle or reference one, directly or not.
pub fn cyclic_definitions(doc: &SchemaDocument) -> HashSet<String> {
    let mut finder = CycleFinder::new(doc);
    doc.definitions
        .keys()
        .filter(|name| finder.reaches_cycle(name))
        .cloned()
        .collect()
}

/// Inline every `$ref` and transparent `allOf`, then drop the definitions
/// table.
///
/// When the definitions contain a cycle, references to definitions in
/// [`cyclic_definitions`] are left as they are and the table is kept. The
/// acyclic definitions are expanded in place, since the bodies of cyclic
/// ones may still point at them.
pub fn expand(doc: &SchemaDocument) -> SchemaResult<SchemaDocument> {
    let mut out = doc.clone();
    let cyclic = cyclic_definitions(doc);
    let root = out.root();
    expand_node(&mut out, root, &cyclic)?;

    if cyclic.is_empty() {
        out.definitions.clear();
        return Ok(out);
    }

    warn!(
        cyclic = cyclic.len(),
        definitions = doc.definitions.len(),
        "schema definitions contain a cycle; leaving cyclic references unexpanded"
    );
    let acyclic: Vec<NodeId> = out
        .definitions
        .iter()
        .filter(|(name, _)| !cyclic.contains(*name))
        .map(|(_, id)| *id)
        .collect();
    for id in acyclic {
        expand_node(&mut out, id, &cyclic)?;
    }
    Ok(out)
}

fn expand_node(doc: &mut SchemaDocument, id: NodeId, keep: &HashSet<String>) -> SchemaResult<()> {
    loop {
        if let Some(reference) = doc.node(id).reference.clone() {
            let target = doc.resolve(&reference)?;
            if !is_kept(&reference, keep) {
                let copy = doc.deep_copy(target);
                let mut merged = doc.node(copy).clone();
                overlay_metadata(&mut merged, doc.node(id));
                *doc.node_mut(id) = merged;
                debug!(reference = %reference, "inlined reference");
                continue;
            }
        }

        let all_of = doc.node(id).all_of.clone();
        if !all_of.is_empty() {
            let [member] = all_of.as_slice() else {
                return Err(SchemaError::AllOfArity {
                    count: all_of.len(),
                });
            };
            expand_node(doc, *member, keep)?;
            let member_node = doc.node(*member).clone();
            let parent = doc.node_mut(id);
            parent.all_of.clear();
            merge_member(parent, member_node);
            continue;
        }

        break;
    }

    for child in doc.children(id) {
        expand_node(doc, child, keep)?;
    }
    Ok(())
}

fn is_kept(reference: &str, keep: &HashSet<String>) -> bool {
    definition_name(reference).is_ok_and(|name| keep.contains(name))
}

/// Referencing node metadata wins over the inlined target.
fn overlay_metadata(target: &mut SchemaNode, referencing: &SchemaNode) {
    target.reference = None;
    if referencing.description.is_some() {
        target.description = referencing.description.clone();
    }
    for (key, value) in &referencing.extensions {
        target.extensions.insert(key.clone(), value.clone());
    }
    for (key, value) in &referencing.keywords {
        target.keywords.insert(key.clone(), value.clone());
    }
}

/// Fold a single `allOf` member into its parent. Parent fields win.
fn merge_member(parent: &mut SchemaNode, member: SchemaNode) {
    if parent.types.is_empty() {
        parent.types = member.types;
        parent.type_is_list = member.type_is_list;
    }
    for (name, id) in member.properties {
        parent.properties.entry(name).or_insert(id);
    }
    for name in member.required {
        if !parent.is_required(&name) {
            parent.required.push(name);
        }
    }
    if parent.items.is_none() {
        parent.items = member.items;
    }
    if parent.any_of.is_empty() {
        parent.any_of = member.any_of;
    }
    if parent.one_of.is_empty() {
        parent.one_of = member.one_of;
    }
    if parent.enum_values.is_none() {
        parent.enum_values = member.enum_values;
    }
    if parent.description.is_none() {
        parent.description = member.description;
    }
    for (key, value) in member.extensions {
        parent.extensions.entry(key).or_insert(value);
    }
    for (key, value) in member.keywords {
        parent.keywords.entry(key).or_insert(value);
    }
}
