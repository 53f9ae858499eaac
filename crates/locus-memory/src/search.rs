//! Basic attribute and tag search over live entities.

use crate::error::MemoryError;
use crate::store::AgentMemory;
use crate::triples::HAS_TAG;
use locus_types::{MemId, NodeKind};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

/// Conjunctive filter for [`AgentMemory::basic_search`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub kind: Option<NodeKind>,
    /// Every tag must be present.
    #[serde(default)]
    pub tags: Vec<String>,
    /// `(pred_text, obj_text)` pairs that must all be present.
    #[serde(default)]
    pub has: Vec<(String, String)>,
    /// Entities tagged `_forgotten` are skipped unless this is set.
    #[serde(default)]
    pub include_forgotten: bool,
}

impl SearchFilter {
    pub fn kind(kind: NodeKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn with(mut self, pred_text: &str, obj_text: &str) -> Self {
        self.has.push((pred_text.to_string(), obj_text.to_string()));
        self
    }
}

const TRIPLE_EXISTS: &str =
    "EXISTS (SELECT 1 FROM Triples T WHERE T.subj = M.uuid AND T.pred_text = ? AND T.obj_text = ?)";

impl AgentMemory {
    /// Ids of live entities matching `filter`, oldest first.
    pub fn basic_search(&self, filter: &SearchFilter) -> Result<Vec<MemId>, MemoryError> {
        let mut clauses = vec!["M.is_snapshot = 0".to_string()];
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(kind) = filter.kind {
            clauses.push("M.node_type = ?".to_string());
            args.push(SqlValue::Text(kind.as_str().to_string()));
        }
        let pairs = filter
            .tags
            .iter()
            .map(|t| (HAS_TAG.to_string(), t.clone()))
            .chain(filter.has.iter().cloned());
        for (pred, obj) in pairs {
            clauses.push(TRIPLE_EXISTS.to_string());
            args.push(SqlValue::Text(pred));
            args.push(SqlValue::Text(obj));
        }
        if !filter.include_forgotten {
            clauses.push(format!("NOT {TRIPLE_EXISTS}"));
            args.push(SqlValue::Text(HAS_TAG.to_string()));
            args.push(SqlValue::Text("_forgotten".to_string()));
        }
        let sql = format!(
            "SELECT M.uuid FROM Memories M WHERE {} ORDER BY M.create_time ASC, M.rowid ASC",
            clauses.join(" AND ")
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), |row| {
                row.get::<_, String>(0).map(MemId::from)
            })?;
            let ids = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triples::NodeRef;
    use locus_types::Position;

    #[test]
    fn filters_by_kind_tag_and_triple() {
        let m = AgentMemory::open_in_memory().unwrap();
        let house = m.add_location(Position::default()).unwrap();
        let shed = m.add_location(Position::default()).unwrap();
        m.tag(&house, "big").unwrap();
        m.add_triple(NodeRef::Id(house.clone()), "has_name", NodeRef::text("house"), 1.0)
            .unwrap();
        m.add_triple(NodeRef::Id(shed.clone()), "has_name", NodeRef::text("shed"), 1.0)
            .unwrap();

        let all = m.basic_search(&SearchFilter::kind(NodeKind::Location)).unwrap();
        assert_eq!(all, vec![house.clone(), shed.clone()]);
        let big = m
            .basic_search(&SearchFilter::kind(NodeKind::Location).tagged("big"))
            .unwrap();
        assert_eq!(big, vec![house.clone()]);
        let named = m
            .basic_search(&SearchFilter::default().with("has_name", "shed"))
            .unwrap();
        assert_eq!(named, vec![shed]);
    }

    #[test]
    fn forgotten_entities_are_hidden_by_default() {
        let m = AgentMemory::open_in_memory().unwrap();
        let id = m.add_location(Position::default()).unwrap();
        m.delete(&id, false).unwrap();
        let filter = SearchFilter::kind(NodeKind::Location);
        assert!(m.basic_search(&filter).unwrap().is_empty());
        let filter = SearchFilter {
            include_forgotten: true,
            ..filter
        };
        assert_eq!(m.basic_search(&filter).unwrap(), vec![id]);
    }

    #[test]
    fn self_entity_is_found_by_tag() {
        let m = AgentMemory::open_in_memory().unwrap();
        let found = m.basic_search(&SearchFilter::default().tagged("_self")).unwrap();
        assert_eq!(found, vec![m.self_id()]);
    }
}
