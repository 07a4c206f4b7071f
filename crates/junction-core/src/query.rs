//! Neutral query shapes and the boolean stream-membership expression.
//!
//! [`StreamQuery`] is a boolean expression over stream references:
//! `any` (OR over a leaf set), `not` (exclusion), `and` (conjunction of
//! sub-expressions). [`StreamQuery::normalize`] rewrites any expression into
//! the canonical form — a conjunction of `any` clauses plus one unioned,
//! de-duplicated `not` clause — preserving semantics exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Boolean expression over stream references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamQuery {
    /// Matches events referencing at least one of these streams.
    Any(Vec<String>),
    /// Matches events referencing none of these streams.
    Not(Vec<String>),
    /// Matches events satisfying every sub-expression.
    And(Vec<StreamQuery>),
}

impl StreamQuery {
    /// Rewrite into canonical form: `And([Any(..), Any(..), .., Not(..)])`.
    ///
    /// Nested `and`s are flattened, all `not` leaf sets are unioned into a
    /// single exclusion clause, and duplicates are removed (within each
    /// `any` clause, across identical `any` clauses, and in the `not`
    /// clause). Normalization is idempotent.
    #[must_use]
    pub fn normalize(&self) -> StreamQuery {
        let mut any_clauses: Vec<Vec<String>> = Vec::new();
        let mut not_ids: Vec<String> = Vec::new();
        collect(self, &mut any_clauses, &mut not_ids);

        dedupe(&mut not_ids);
        for clause in &mut any_clauses {
            dedupe(clause);
        }
        any_clauses.dedup();

        let mut parts: Vec<StreamQuery> =
            any_clauses.into_iter().map(StreamQuery::Any).collect();
        if !not_ids.is_empty() {
            parts.push(StreamQuery::Not(not_ids));
        }
        match parts.len() {
            1 => parts.remove(0),
            _ => StreamQuery::And(parts),
        }
    }

    /// The canonical parts of this expression: the `any` clauses (each must
    /// hold in at least one constituent) and the unioned exclusion list.
    #[must_use]
    pub fn canonical_parts(&self) -> (Vec<Vec<String>>, Vec<String>) {
        let mut any_clauses = Vec::new();
        let mut not_ids = Vec::new();
        collect(&self.normalize(), &mut any_clauses, &mut not_ids);
        (any_clauses, not_ids)
    }

    /// Evaluate the expression against an event's stream references.
    #[must_use]
    pub fn matches(&self, stream_ids: &[String]) -> bool {
        match self {
            StreamQuery::Any(ids) => ids.iter().any(|id| stream_ids.contains(id)),
            StreamQuery::Not(ids) => !ids.iter().any(|id| stream_ids.contains(id)),
            StreamQuery::And(parts) => parts.iter().all(|part| part.matches(stream_ids)),
        }
    }

    /// All leaf stream references, in expression order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit_leaves(&mut out);
        out
    }

    fn visit_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            StreamQuery::Any(ids) | StreamQuery::Not(ids) => {
                out.extend(ids.iter().map(String::as_str));
            }
            StreamQuery::And(parts) => {
                for part in parts {
                    part.visit_leaves(out);
                }
            }
        }
    }
}

fn collect(expr: &StreamQuery, any_clauses: &mut Vec<Vec<String>>, not_ids: &mut Vec<String>) {
    match expr {
        StreamQuery::Any(ids) => any_clauses.push(ids.clone()),
        StreamQuery::Not(ids) => not_ids.extend(ids.iter().cloned()),
        StreamQuery::And(parts) => {
            for part in parts {
                collect(part, any_clauses, not_ids);
            }
        }
    }
}

/// Order-preserving de-duplication by equality.
fn dedupe(ids: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

/// Trashed-state filter, defaulting to live items only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    /// Live items only.
    #[default]
    Default,
    /// Trashed items only.
    Trashed,
    /// Both.
    All,
}

impl StateFilter {
    /// Whether an item with the given trashed flag passes this filter.
    #[must_use]
    pub fn admits(self, trashed: bool) -> bool {
        match self {
            StateFilter::Default => !trashed,
            StateFilter::Trashed => trashed,
            StateFilter::All => true,
        }
    }
}

/// Logical (federated) event query, as assembled by an upstream consumer.
///
/// Absent optional fields are omitted when mapped onto a backend query —
/// never defaulted to sentinel values.
#[derive(Clone, Debug, Default)]
pub struct EventsQuery {
    /// Target a single event by (possibly store-qualified) id.
    pub id: Option<String>,
    /// Trashed-state filter.
    pub state: StateFilter,
    /// Lower bound of the time window.
    pub from_time: Option<DateTime<Utc>>,
    /// Upper bound of the time window.
    pub to_time: Option<DateTime<Utc>>,
    /// Stream-membership expression with store-qualified leaves.
    pub streams: Option<StreamQuery>,
    /// Restrict to these type tags.
    pub types: Option<Vec<String>>,
    /// Only events with no end time.
    pub running: Option<bool>,
    /// Only events modified strictly after this cutoff.
    pub modified_since: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Number of results to skip.
    pub skip: Option<u64>,
}

/// Store-facing event query: same shape as [`EventsQuery`] but with bare
/// local ids everywhere.
#[derive(Clone, Debug, Default)]
pub struct StoreQuery {
    /// Target a single event by local id.
    pub id: Option<String>,
    /// Trashed-state filter.
    pub state: StateFilter,
    /// Lower bound of the time window.
    pub from_time: Option<DateTime<Utc>>,
    /// Upper bound of the time window.
    pub to_time: Option<DateTime<Utc>>,
    /// Stream-membership expression with local-id leaves.
    pub streams: Option<StreamQuery>,
    /// Restrict to these type tags.
    pub types: Option<Vec<String>>,
    /// Only events with no end time.
    pub running: Option<bool>,
    /// Only events modified strictly after this cutoff.
    pub modified_since: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Number of results to skip.
    pub skip: Option<u64>,
}

/// Stream listing/lookup parameters.
#[derive(Clone, Debug, Default)]
pub struct StreamsQuery {
    /// Subtree root id; `"*"` means the whole forest. Defaults to `"*"`.
    pub id: Option<String>,
    /// Explicit store selector when `id` carries no qualifier.
    pub store_id: Option<crate::ids::StoreId>,
    /// Trashed-state filter.
    pub state: StateFilter,
    /// Ids whose subtrees are excluded from the result.
    pub excluded_ids: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
