//! Field value extraction and data-type inference.
//!
//! A field value is a tuple-shaped child of a data node whose first
//! grandchild resolves to a known field label; the remaining grandchildren
//! are the ordered (possibly multi-valued) payload. Each field label also
//! gets a registry entry carrying its data type: an explicit declaration
//! on the label node always wins, and only undeclared fields fall back to
//! value-shape heuristics.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::graph::{NodeGraph, DATA_TYPE_MARKER};

/// Fixed code→type table for explicit declarations.
const DATA_TYPE_CODES: &[(&str, FieldDataType)] = &[
    ("SYS_V01", FieldDataType::Checkbox),
    ("SYS_V02", FieldDataType::Date),
    ("SYS_V03", FieldDataType::SupertagRef),
    ("SYS_V04", FieldDataType::PlainText),
    ("SYS_V05", FieldDataType::Number),
    ("SYS_V06", FieldDataType::Url),
    ("SYS_V07", FieldDataType::Email),
    ("SYS_V08", FieldDataType::SingleOption),
    ("SYS_V09", FieldDataType::MultiOptions),
    ("SYS_V10", FieldDataType::UserRef),
];

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2})?").expect("static pattern"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"));

/// Resolved data type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldDataType {
    Checkbox,
    Date,
    SupertagRef,
    #[default]
    PlainText,
    Number,
    Url,
    Email,
    SingleOption,
    MultiOptions,
    UserRef,
}

impl FieldDataType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Date => "date",
            Self::SupertagRef => "supertag_ref",
            Self::PlainText => "plain_text",
            Self::Number => "number",
            Self::Url => "url",
            Self::Email => "email",
            Self::SingleOption => "single_option",
            Self::MultiOptions => "multi_options",
            Self::UserRef => "user_ref",
        }
    }
}

/// One flat per-tuple field row.
#[derive(Debug, Clone)]
pub struct FieldTupleRow {
    pub tuple_id: String,
    pub parent_id: String,
    pub field_name: String,
    pub field_label_id: String,
    pub value_text: Option<String>,
    pub created_at: i64,
}

/// One normalized field value row.
#[derive(Debug, Clone)]
pub struct FieldValueRow {
    pub tuple_id: String,
    pub parent_id: String,
    pub field_def_id: String,
    pub field_name: String,
    pub value_node_id: String,
    pub value_text: Option<String>,
    pub value_order: i64,
    pub created_at: i64,
}

/// One field registry row.
#[derive(Debug, Clone)]
pub struct FieldNameRow {
    pub field_label_id: String,
    pub field_name: String,
    pub normalized_name: String,
    pub data_type: FieldDataType,
    pub target_type_id: Option<String>,
    pub target_type_name: Option<String>,
}

/// Everything the field extractor produces in one pass.
#[derive(Debug, Default)]
pub struct FieldExtraction {
    pub fields: Vec<FieldTupleRow>,
    pub values: Vec<FieldValueRow>,
    pub names: Vec<FieldNameRow>,
}

impl FieldExtraction {
    /// Registry rows keyed by field label id, for the supertag extractor.
    #[must_use]
    pub fn names_by_label(&self) -> HashMap<&str, &FieldNameRow> {
        self.names
            .iter()
            .map(|n| (n.field_label_id.as_str(), n))
            .collect()
    }
}

/// Extract field rows from every data node in the graph.
///
/// Type definitions are skipped here: their field tuples declare fields
/// (with defaults), which is the supertag extractor's job.
#[must_use]
pub fn extract_fields(graph: &NodeGraph) -> FieldExtraction {
    let mut out = FieldExtraction::default();

    for parent in graph.iter() {
        if graph.is_type_definition(&parent.id) {
            continue;
        }
        for child_id in &parent.children {
            let Some(tuple) = graph.node(child_id) else {
                continue;
            };
            let Some((label_id, value_ids)) = split_field_tuple(graph, &tuple.children) else {
                continue;
            };
            let field_name = graph.name_of(label_id);

            out.fields.push(FieldTupleRow {
                tuple_id: tuple.id.clone(),
                parent_id: parent.id.clone(),
                field_name: field_name.clone(),
                field_label_id: label_id.to_string(),
                value_text: value_ids
                    .first()
                    .and_then(|v| graph.node(v))
                    .and_then(|n| n.name.clone()),
                created_at: tuple.created,
            });

            for (order, value_id) in value_ids.iter().enumerate() {
                out.values.push(FieldValueRow {
                    tuple_id: tuple.id.clone(),
                    parent_id: parent.id.clone(),
                    field_def_id: label_id.to_string(),
                    field_name: field_name.clone(),
                    value_node_id: (*value_id).to_string(),
                    value_text: graph.node(value_id).and_then(|n| n.name.clone()),
                    value_order: order as i64,
                    created_at: tuple.created,
                });
            }
        }
    }

    out.names = build_field_registry(graph, &out.values);
    out
}

/// A field tuple is `[known-label-id, value...]`. Returns the label and
/// the value payload, or `None` for anything else.
fn split_field_tuple<'a>(
    graph: &NodeGraph,
    children: &'a [String],
) -> Option<(&'a str, &'a [String])> {
    let (first, rest) = children.split_first()?;
    if graph.is_field_label(first) {
        Some((first.as_str(), rest))
    } else {
        None
    }
}

/// Build the field registry: explicit declarations first, then the
/// value-shape fallback pass for everything left undeclared.
fn build_field_registry(graph: &NodeGraph, values: &[FieldValueRow]) -> Vec<FieldNameRow> {
    let mut rows = Vec::new();

    for label in &graph.field_label_tuples {
        let (declared_type, target_type_id, target_type_name) =
            match explicit_declaration(graph, &label.field_label_id) {
                Some((data_type, (id, name))) => (Some(data_type), id, name),
                None => (None, None, None),
            };

        let data_type = declared_type.unwrap_or_else(|| {
            let observed: Vec<&str> = values
                .iter()
                .filter(|v| v.field_def_id == label.field_label_id)
                .filter_map(|v| v.value_text.as_deref())
                .collect();
            infer_from_values(&observed)
        });

        rows.push(FieldNameRow {
            field_label_id: label.field_label_id.clone(),
            field_name: label.field_name.clone(),
            normalized_name: normalize_name(&label.field_name),
            data_type,
            target_type_id,
            target_type_name,
        });
    }

    rows
}

type Declaration = (FieldDataType, (Option<String>, Option<String>));

/// Look for a data-type declaration tuple under the field label node:
/// `[DATA_TYPE_MARKER, code]`, with a trailing target id for
/// reference-typed fields.
fn explicit_declaration(graph: &NodeGraph, label_id: &str) -> Option<Declaration> {
    let label = graph.node(label_id)?;
    for child_id in &label.children {
        let Some(tuple) = graph.node(child_id) else {
            continue;
        };
        let Some((first, rest)) = tuple.children.split_first() else {
            continue;
        };
        if first != DATA_TYPE_MARKER {
            continue;
        }
        let code = rest.first()?;
        let data_type = DATA_TYPE_CODES
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, t)| *t)?;

        let target = if data_type == FieldDataType::SupertagRef {
            rest.get(1).map(|id| (id.clone(), graph.name_of(id)))
        } else {
            None
        };
        let (target_type_id, target_type_name) = match target {
            Some((id, name)) => (Some(id), Some(name)),
            None => (None, None),
        };
        return Some((data_type, (target_type_id, target_type_name)));
    }
    None
}

/// Shape heuristics over every observed value of an undeclared field.
fn infer_from_values(values: &[&str]) -> FieldDataType {
    if values.is_empty() {
        return FieldDataType::PlainText;
    }
    let all = |pred: fn(&str) -> bool| values.iter().all(|v| pred(v));

    if all(|v| ISO_DATE.is_match(v)) {
        FieldDataType::Date
    } else if all(|v| matches!(v.to_lowercase().as_str(), "true" | "false" | "done" | "todo")) {
        FieldDataType::Checkbox
    } else if all(|v| v.parse::<f64>().is_ok()) {
        FieldDataType::Number
    } else if all(|v| v.starts_with("http://") || v.starts_with("https://")) {
        FieldDataType::Url
    } else if all(|v| EMAIL.is_match(v)) {
        FieldDataType::Email
    } else {
        FieldDataType::PlainText
    }
}

/// Lowercase, alphanumerics kept, everything else collapsed to `_`.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.to_lowercase().chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore && !out.is_empty() {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_end_matches('_').to_string()
}
