//! Backend-error translation.
//!
//! Stores speak [`StoreError`]; callers of the router only ever see
//! [`RouterError`]. Translation is tagged with the originating store id so
//! untranslated failures remain attributable.

use junction_core::{RouterError, StoreId};
use junction_store::StoreError;

/// Map a store-native error into the router vocabulary.
pub fn map_store_error(store_id: &StoreId, err: StoreError) -> RouterError {
    match err {
        StoreError::NotFound(what) => RouterError::UnknownResource(what),
        StoreError::AlreadyExists(what) => RouterError::ItemAlreadyExists(what),
        StoreError::InvalidInput(what) => RouterError::InvalidRequestStructure(what),
        StoreError::AlreadyInitialized => RouterError::AlreadyInitialized,
        other => RouterError::Unexpected {
            store_id: store_id.as_str().to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn translates_the_common_variants() {
        let store = StoreId::new("vault");
        assert_matches!(
            map_store_error(&store, StoreError::NotFound("e1".into())),
            RouterError::UnknownResource(_)
        );
        assert_matches!(
            map_store_error(&store, StoreError::AlreadyExists("e1".into())),
            RouterError::ItemAlreadyExists(_)
        );
        assert_matches!(
            map_store_error(&store, StoreError::AlreadyInitialized),
            RouterError::AlreadyInitialized
        );
    }

    #[test]
    fn untranslated_failures_carry_the_store_id() {
        let err = map_store_error(
            &StoreId::new("vault"),
            StoreError::Internal("disk on fire".into()),
        );
        assert_matches!(err, RouterError::Unexpected { store_id, .. } if store_id == "vault");
    }
}
