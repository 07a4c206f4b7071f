//! Query decomposition.
//!
//! A federated [`EventsQuery`] may target several stores at once through its
//! stream-membership expression. Decomposition splits it into one bare-id
//! [`StoreQuery`] per store, enforcing the scoping rules: every `any`/`not`
//! leaf set must resolve to a single store, while sibling `and` branches may
//! each target a different store and are bucketed independently.

use std::collections::HashMap;

use junction_core::query::{EventsQuery, StoreQuery, StreamQuery};
use junction_core::{Result, RouterError, StoreId, ids};

/// Split a federated query into one store-local sub-query per store.
///
/// A query naming neither an id nor any streams targets the local store.
pub fn decompose_by_store(query: &EventsQuery) -> Result<HashMap<StoreId, StoreQuery>> {
    let mut buckets: HashMap<StoreId, Vec<StreamQuery>> = HashMap::new();
    if let Some(expr) = &query.streams {
        bucket_expression(expr, &mut buckets)?;
    }

    let id_scope = query
        .id
        .as_deref()
        .map(ids::parse)
        .transpose()?;

    if let Some((id_store, local_id)) = id_scope {
        if let Some(other) = buckets.keys().find(|store| **store != id_store) {
            return Err(RouterError::ConflictingScope(format!(
                "item id targets store '{id_store}' but stream expression targets '{other}'"
            )));
        }
        let streams = buckets.remove(&id_store).map(conjoin);
        let mut sub = to_store_query(query, streams);
        sub.id = Some(local_id);
        return Ok(HashMap::from([(id_store, sub)]));
    }

    if buckets.is_empty() {
        return Ok(HashMap::from([(
            StoreId::local(),
            to_store_query(query, None),
        )]));
    }

    Ok(buckets
        .into_iter()
        .map(|(store, clauses)| {
            let sub = to_store_query(query, Some(conjoin(clauses)));
            (store, sub)
        })
        .collect())
}

/// Walk the expression tree; every `any`/`not` leaf set lands in the bucket
/// of its (single) store with its leaves stripped to bare local ids.
fn bucket_expression(
    expr: &StreamQuery,
    buckets: &mut HashMap<StoreId, Vec<StreamQuery>>,
) -> Result<()> {
    match expr {
        StreamQuery::Any(leaf_ids) | StreamQuery::Not(leaf_ids) => {
            let mut store: Option<StoreId> = None;
            let mut bare = Vec::with_capacity(leaf_ids.len());
            for full_id in leaf_ids {
                let (leaf_store, local_id) = ids::parse(full_id)?;
                match &store {
                    None => store = Some(leaf_store),
                    Some(existing) if *existing != leaf_store => {
                        return Err(RouterError::CrossStoreQuery(format!(
                            "stream clause mixes stores '{existing}' and '{leaf_store}'"
                        )));
                    }
                    Some(_) => {}
                }
                bare.push(local_id);
            }
            let clause = match expr {
                StreamQuery::Any(_) => StreamQuery::Any(bare),
                _ => StreamQuery::Not(bare),
            };
            buckets
                .entry(store.unwrap_or_else(StoreId::local))
                .or_default()
                .push(clause);
        }
        StreamQuery::And(parts) => {
            for part in parts {
                bucket_expression(part, buckets)?;
            }
        }
    }
    Ok(())
}

/// Conjoin a store's clauses into one canonical expression.
fn conjoin(mut clauses: Vec<StreamQuery>) -> StreamQuery {
    let expr = match clauses.len() {
        1 => clauses.remove(0),
        _ => StreamQuery::And(clauses),
    };
    expr.normalize()
}

/// Map the neutral scalar filters onto the store-facing shape. Absent
/// optional fields stay absent.
fn to_store_query(query: &EventsQuery, streams: Option<StreamQuery>) -> StoreQuery {
    StoreQuery {
        id: None,
        state: query.state,
        from_time: query.from_time,
        to_time: query.to_time,
        streams,
        types: query.types.clone(),
        running: query.running,
        modified_since: query.modified_since,
        limit: query.limit,
        skip: query.skip,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
