//! Supertag metadata extraction and inheritance queries.
//!
//! For every detected type definition this walks the tag node's tuple
//! children for field declarations (a field tuple's value payload is the
//! declared default) and for "extends" tuples naming parent types. The
//! read side answers ancestor queries breadth-first over the persisted
//! inheritance edges, nearest ancestor first, with same-named fields on
//! closer ancestors shadowing farther ones.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;
use crate::graph::{NodeGraph, EXTENDS_MARKER};
use crate::sync::fields::{normalize_name, FieldDataType, FieldNameRow};

/// Cycle guard for ancestor traversal.
const MAX_ANCESTOR_DEPTH: usize = 32;

/// A field declared on a type.
#[derive(Debug, Clone)]
pub struct SupertagFieldRow {
    pub tag_id: String,
    pub tag_name: String,
    pub field_name: String,
    pub field_label_id: String,
    pub field_order: i64,
    pub normalized_name: String,
    pub data_type: FieldDataType,
    pub target_type_id: Option<String>,
    pub target_type_name: Option<String>,
    pub default_value_id: Option<String>,
    pub default_value_text: Option<String>,
}

/// One inheritance edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupertagParentRow {
    pub child_tag_id: String,
    pub parent_tag_id: String,
}

/// Walk every type definition and produce its field-definition and
/// inheritance rows.
#[must_use]
pub fn extract_supertag_metadata(
    graph: &NodeGraph,
    field_registry: &HashMap<&str, &FieldNameRow>,
) -> (Vec<SupertagFieldRow>, Vec<SupertagParentRow>) {
    let mut fields = Vec::new();
    let mut parents = Vec::new();
    let mut seen_fields: HashSet<(String, String)> = HashSet::new();
    let mut seen_parents: HashSet<(String, String)> = HashSet::new();

    for tag in &graph.type_tuples {
        let Some(tag_node) = graph.node(&tag.tag_id) else {
            continue;
        };

        let mut order = 0;
        for child_id in &tag_node.children {
            let Some(tuple) = graph.node(child_id) else {
                continue;
            };
            let Some((first, rest)) = tuple.children.split_first() else {
                continue;
            };

            if first == EXTENDS_MARKER {
                for parent_id in rest {
                    if seen_parents.insert((tag.tag_id.clone(), parent_id.clone())) {
                        parents.push(SupertagParentRow {
                            child_tag_id: tag.tag_id.clone(),
                            parent_tag_id: parent_id.clone(),
                        });
                    }
                }
                continue;
            }

            if !graph.is_field_label(first) {
                continue;
            }
            let field_name = graph.name_of(first);
            if !seen_fields.insert((tag.tag_id.clone(), field_name.clone())) {
                continue;
            }

            let registry = field_registry.get(first.as_str());
            let default_value_id = rest.first().cloned();
            let default_value_text = default_value_id
                .as_deref()
                .and_then(|id| graph.node(id))
                .and_then(|n| n.name.clone());

            fields.push(SupertagFieldRow {
                tag_id: tag.tag_id.clone(),
                tag_name: tag.tag_name.clone(),
                field_name: field_name.clone(),
                field_label_id: first.clone(),
                field_order: order,
                normalized_name: normalize_name(&field_name),
                data_type: registry.map_or(FieldDataType::PlainText, |r| r.data_type),
                target_type_id: registry.and_then(|r| r.target_type_id.clone()),
                target_type_name: registry.and_then(|r| r.target_type_name.clone()),
                default_value_id,
                default_value_text,
            });
            order += 1;
        }
    }

    (fields, parents)
}

/// An ancestor type with its minimum distance from the queried tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub tag_id: String,
    pub tag_name: String,
    /// 1 = direct parent.
    pub distance: usize,
}

/// Breadth-first ancestor walk over `supertag_parents`.
///
/// Each ancestor appears once with its minimum distance, nearest first.
/// Diamond shapes collapse; the traversal is depth-limited so cycles in
/// malformed data terminate.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn get_ancestors(conn: &Connection, tag_id: &str) -> Result<Vec<Ancestor>> {
    let mut stmt = conn.prepare(
        "SELECT parent_tag_id FROM supertag_parents WHERE child_tag_id = ?1",
    )?;
    let mut name_stmt = conn.prepare("SELECT tag_name FROM supertags WHERE tag_id = ?1")?;

    let mut ancestors = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(tag_id.to_string());
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((tag_id.to_string(), 0));

    while let Some((current, distance)) = queue.pop_front() {
        if distance >= MAX_ANCESTOR_DEPTH {
            continue;
        }
        let parent_ids: Vec<String> = stmt
            .query_map([&current], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        for parent_id in parent_ids {
            if !visited.insert(parent_id.clone()) {
                continue;
            }
            let tag_name: String = name_stmt
                .query_row([&parent_id], |row| row.get(0))
                .optional()?
                .unwrap_or_else(|| parent_id.clone());
            ancestors.push(Ancestor {
                tag_id: parent_id.clone(),
                tag_name,
                distance: distance + 1,
            });
            queue.push_back((parent_id, distance + 1));
        }
    }

    Ok(ancestors)
}

/// A field visible on a type, own or inherited.
#[derive(Debug, Clone)]
pub struct VisibleField {
    pub field_name: String,
    pub field_label_id: Option<String>,
    pub data_type: String,
    /// Name of the ancestor that declared it; `None` for own fields.
    pub inherited_from: Option<String>,
}

/// List a type's own fields, declaration order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn own_fields(conn: &Connection, tag_id: &str) -> Result<Vec<VisibleField>> {
    let mut stmt = conn.prepare(
        "SELECT field_name, field_label_id, data_type
         FROM supertag_fields WHERE tag_id = ?1 ORDER BY field_order",
    )?;
    let rows = stmt.query_map([tag_id], |row| {
        Ok(VisibleField {
            field_name: row.get(0)?,
            field_label_id: row.get(1)?,
            data_type: row.get(2)?,
            inherited_from: None,
        })
    })?;
    Ok(rows.collect::<std::result::Result<_, _>>()?)
}

/// List all fields visible on a type including inherited ones.
///
/// Own fields come first. A field declared on a closer ancestor shadows a
/// same-named field declared farther away; each surviving inherited entry
/// is annotated with its declaring ancestor's name.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn all_fields(conn: &Connection, tag_id: &str) -> Result<Vec<VisibleField>> {
    let mut fields = own_fields(conn, tag_id)?;
    let mut seen: HashSet<String> = fields.iter().map(|f| f.field_name.clone()).collect();

    for ancestor in get_ancestors(conn, tag_id)? {
        for field in own_fields(conn, &ancestor.tag_id)? {
            if seen.insert(field.field_name.clone()) {
                fields.push(VisibleField {
                    inherited_from: Some(ancestor.tag_name.clone()),
                    ..field
                });
            }
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportDocument;
    use crate::sync::fields::extract_fields;

    fn graph(json: &str) -> NodeGraph {
        let export: ExportDocument = serde_json::from_str(json).unwrap();
        NodeGraph::build(&export)
    }

    /// Two tags where `task` extends `item` and declares one field with a
    /// default value.
    const TAG_DOC: &str = r#"{"docs":[
        {"id":"item","props":{"name":"item"},"children":["metaI"]},
        {"id":"metaI","props":{},"children":["SYS_A13","SYS_T01"]},
        {"id":"task","props":{"name":"task"},"children":["metaT","ext","ftuple"]},
        {"id":"metaT","props":{},"children":["SYS_A13","SYS_T01"]},
        {"id":"ext","props":{},"children":["SYS_A12","item"]},
        {"id":"lblDue","props":{"name":"Due"},"children":["metaL"]},
        {"id":"metaL","props":{},"children":["SYS_A13","SYS_T02"]},
        {"id":"ftuple","props":{},"children":["lblDue","dflt"]},
        {"id":"dflt","props":{"name":"tomorrow"}}
    ]}"#;

    #[test]
    fn test_field_and_parent_extraction() {
        let g = graph(TAG_DOC);
        let extraction = extract_fields(&g);
        let (fields, parents) = extract_supertag_metadata(&g, &extraction.names_by_label());

        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].child_tag_id, "task");
        assert_eq!(parents[0].parent_tag_id, "item");

        assert_eq!(fields.len(), 1);
        let f = &fields[0];
        assert_eq!(f.tag_id, "task");
        assert_eq!(f.field_name, "Due");
        assert_eq!(f.normalized_name, "due");
        assert_eq!(f.default_value_id.as_deref(), Some("dflt"));
        assert_eq!(f.default_value_text.as_deref(), Some("tomorrow"));
    }

    fn seed_inheritance(conn: &Connection) {
        // Diamond: d -> b, d -> c, b -> a, c -> a
        conn.execute_batch(
            "INSERT INTO supertags (tag_id, tag_name) VALUES
                ('a', 'alpha'), ('b', 'beta'), ('c', 'gamma'), ('d', 'delta');
             INSERT INTO supertag_parents (child_tag_id, parent_tag_id) VALUES
                ('d', 'b'), ('d', 'c'), ('b', 'a'), ('c', 'a');",
        )
        .unwrap();
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::schema::apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_diamond_ancestors_min_distance() {
        let conn = test_conn();
        seed_inheritance(&conn);

        let ancestors = get_ancestors(&conn, "d").unwrap();
        assert_eq!(ancestors.len(), 3);
        // Nearest first; 'a' appears once, at its minimum distance
        assert_eq!(ancestors[0].distance, 1);
        assert_eq!(ancestors[1].distance, 1);
        let a = ancestors.iter().find(|x| x.tag_id == "a").unwrap();
        assert_eq!(a.distance, 2);
        assert_eq!(a.tag_name, "alpha");
    }

    #[test]
    fn test_cycle_terminates() {
        let conn = test_conn();
        conn.execute_batch(
            "INSERT INTO supertag_parents (child_tag_id, parent_tag_id) VALUES
                ('x', 'y'), ('y', 'x');",
        )
        .unwrap();
        let ancestors = get_ancestors(&conn, "x").unwrap();
        assert_eq!(ancestors.len(), 1);
        assert_eq!(ancestors[0].tag_id, "y");
    }

    #[test]
    fn test_inheritance_shadowing() {
        let conn = test_conn();
        seed_inheritance(&conn);
        conn.execute_batch(
            "INSERT INTO supertag_fields
                (tag_id, tag_name, field_name, field_order, normalized_name, data_type)
             VALUES
                ('d', 'delta', 'Status', 0, 'status', 'plain_text'),
                ('b', 'beta', 'Status', 0, 'status', 'single_option'),
                ('b', 'beta', 'Owner', 1, 'owner', 'user_ref'),
                ('a', 'alpha', 'Owner', 0, 'owner', 'plain_text'),
                ('a', 'alpha', 'Created', 1, 'created', 'date');",
        )
        .unwrap();

        // Own listing: only d's declaration
        let own = own_fields(&conn, "d").unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].field_name, "Status");
        assert!(own[0].inherited_from.is_none());

        let all = all_fields(&conn, "d").unwrap();
        let names: Vec<(&str, Option<&str>)> = all
            .iter()
            .map(|f| (f.field_name.as_str(), f.inherited_from.as_deref()))
            .collect();

        // Status: own wins over b's. Owner: b (distance 1) shadows a
        // (distance 2). Created: only on a.
        assert!(names.contains(&("Status", None)));
        assert!(names.contains(&("Owner", Some("beta"))));
        assert!(names.contains(&("Created", Some("alpha"))));
        assert_eq!(all.len(), 3);
        let owner = all.iter().find(|f| f.field_name == "Owner").unwrap();
        assert_eq!(owner.data_type, "user_ref");
    }
}
