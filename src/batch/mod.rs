//! Shared batch-operation engine.
//!
//! Every batch endpoint follows the same shape: load all candidate rows in
//! one query, partition them into an authorized subset and per-item
//! rejections, run the mutation for the authorized subset inside a single
//! transaction, and report a partial-success outcome. Partial success only
//! applies to the partitioning step; once the transaction has started, any
//! failure rolls the whole batch back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ApiError;

/// Body shared by plain batch endpoints: { "ids": [1, 2, 3] }.
#[derive(Debug, Deserialize)]
pub struct BatchIdsRequest {
    pub ids: Vec<i64>,
}

/// Body for merge endpoints: { "source_ids": [...], "target_id": n }.
#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source_ids: Vec<i64>,
    pub target_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct OrderEntry {
    pub id: i64,
    pub sort_order: i32,
}

/// Body for reorder endpoints: { "orders": [{ "id": n, "sort_order": n }] }.
#[derive(Debug, Deserialize)]
pub struct UpdateOrdersRequest {
    pub orders: Vec<OrderEntry>,
}

/// One rejected item with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
    pub id: i64,
    pub reason: String,
}

/// Aggregate result reported to the client.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub affected_count: usize,
    pub total_count: usize,
    pub errors: Option<Vec<BatchError>>,
}

impl BatchOutcome {
    pub fn new(affected_count: usize, total_count: usize, errors: Vec<BatchError>) -> Self {
        Self {
            affected_count,
            total_count,
            errors: if errors.is_empty() { None } else { Some(errors) },
        }
    }
}

/// Result of partitioning requested ids against loaded rows.
#[derive(Debug)]
pub struct Partition<T> {
    pub authorized: Vec<T>,
    pub rejected: Vec<BatchError>,
}

impl<T> Partition<T> {
    pub fn authorized_ids(&self, id_of: impl Fn(&T) -> i64) -> Vec<i64> {
        self.authorized.iter().map(id_of).collect()
    }

    pub fn into_outcome(self, total_count: usize) -> BatchOutcome {
        BatchOutcome::new(self.authorized.len(), total_count, self.rejected)
    }
}

/// Reject empty id lists and non-positive ids before anything is loaded.
pub fn validate_ids(ids: &[i64]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(ApiError::bad_request("ids must not be empty"));
    }
    if let Some(bad) = ids.iter().find(|id| **id <= 0) {
        return Err(ApiError::bad_request(format!(
            "ids must be positive integers, got {}",
            bad
        )));
    }
    Ok(())
}

/// Validate a merge body: sources go through the id rules, the target must
/// be positive, and the target cannot be one of the sources.
pub fn validate_merge(req: &MergeRequest) -> Result<(), ApiError> {
    validate_ids(&req.source_ids)?;
    if req.target_id <= 0 {
        return Err(ApiError::bad_request(format!(
            "target_id must be a positive integer, got {}",
            req.target_id
        )));
    }
    if req.source_ids.contains(&req.target_id) {
        return Err(ApiError::bad_request(
            "target_id cannot be one of source_ids",
        ));
    }
    Ok(())
}

/// Pure partitioning step.
///
/// Matches the requested ids against the loaded rows in request order and
/// applies a per-item check (ownership, role, or domain constraint). Ids with
/// no matching row are rejected as not found; duplicated ids are rejected so
/// that every requested id is accounted for exactly once in the outcome.
pub fn partition<T, F>(
    requested: &[i64],
    loaded: Vec<T>,
    id_of: impl Fn(&T) -> i64,
    check: F,
) -> Partition<T>
where
    F: Fn(&T) -> Result<(), String>,
{
    let mut by_id: HashMap<i64, T> = loaded.into_iter().map(|e| (id_of(&e), e)).collect();

    let mut authorized = Vec::new();
    let mut rejected = Vec::new();

    for &id in requested {
        match by_id.remove(&id) {
            Some(entity) => match check(&entity) {
                Ok(()) => authorized.push(entity),
                Err(reason) => rejected.push(BatchError { id, reason }),
            },
            None => {
                let reason = if authorized.iter().any(|e| id_of(e) == id)
                    || rejected.iter().any(|e| e.id == id)
                {
                    "Duplicate id in request".to_string()
                } else {
                    "Not found".to_string()
                };
                rejected.push(BatchError { id, reason });
            }
        }
    }

    Partition {
        authorized,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Row {
        id: i64,
        owner_id: i64,
    }

    fn rows(pairs: &[(i64, i64)]) -> Vec<Row> {
        pairs
            .iter()
            .map(|&(id, owner_id)| Row { id, owner_id })
            .collect()
    }

    #[test]
    fn test_validate_ids_rejects_empty_and_non_positive() {
        assert!(validate_ids(&[]).is_err());
        assert!(validate_ids(&[1, 0]).is_err());
        assert!(validate_ids(&[-5]).is_err());
        assert!(validate_ids(&[1, 2, 3]).is_ok());
    }

    #[test]
    fn test_validate_merge_rejects_bad_targets() {
        let ok = MergeRequest {
            source_ids: vec![1, 2],
            target_id: 3,
        };
        assert!(validate_merge(&ok).is_ok());

        let zero_target = MergeRequest {
            source_ids: vec![1],
            target_id: 0,
        };
        assert!(validate_merge(&zero_target).is_err());

        let negative_target = MergeRequest {
            source_ids: vec![1],
            target_id: -4,
        };
        assert!(validate_merge(&negative_target).is_err());

        let target_in_sources = MergeRequest {
            source_ids: vec![1, 3],
            target_id: 3,
        };
        assert!(validate_merge(&target_in_sources).is_err());

        let empty_sources = MergeRequest {
            source_ids: vec![],
            target_id: 3,
        };
        assert!(validate_merge(&empty_sources).is_err());
    }

    #[test]
    fn test_partition_missing_rows_are_not_found() {
        let part = partition(&[1, 2, 3], rows(&[(1, 9), (3, 9)]), |r| r.id, |_| Ok(()));
        assert_eq!(part.authorized.len(), 2);
        assert_eq!(
            part.rejected,
            vec![BatchError {
                id: 2,
                reason: "Not found".to_string()
            }]
        );
    }

    #[test]
    fn test_partition_applies_ownership_check() {
        let caller = 7;
        let part = partition(
            &[1, 2],
            rows(&[(1, 7), (2, 8)]),
            |r| r.id,
            |r| {
                if r.owner_id == caller {
                    Ok(())
                } else {
                    Err("No permission".to_string())
                }
            },
        );
        assert_eq!(part.authorized_ids(|r| r.id), vec![1]);
        assert_eq!(part.rejected[0].id, 2);
        assert_eq!(part.rejected[0].reason, "No permission");
    }

    #[test]
    fn test_every_requested_id_is_accounted_for() {
        let requested = [5, 6, 7, 8];
        let part = partition(
            &requested,
            rows(&[(5, 1), (7, 2)]),
            |r| r.id,
            |r| {
                if r.owner_id == 1 {
                    Ok(())
                } else {
                    Err("No permission".to_string())
                }
            },
        );
        let outcome = part.into_outcome(requested.len());
        assert!(outcome.affected_count <= outcome.total_count);
        let errors = outcome.errors.expect("errors");
        assert_eq!(outcome.affected_count + errors.len(), requested.len());
    }

    #[test]
    fn test_duplicate_ids_are_rejected_not_double_counted() {
        let part = partition(&[1, 1, 2], rows(&[(1, 9), (2, 9)]), |r| r.id, |_| Ok(()));
        assert_eq!(part.authorized.len(), 2);
        assert_eq!(part.rejected.len(), 1);
        assert_eq!(part.rejected[0].reason, "Duplicate id in request");
    }

    #[test]
    fn test_all_rejected_is_an_outcome_not_an_error() {
        let part = partition(
            &[1, 2],
            rows(&[(1, 3), (2, 3)]),
            |r| r.id,
            |_| Err("No permission".to_string()),
        );
        let outcome = part.into_outcome(2);
        assert_eq!(outcome.affected_count, 0);
        assert_eq!(outcome.errors.as_ref().map(|e| e.len()), Some(2));
    }

    #[test]
    fn test_outcome_with_no_errors_serializes_null() {
        let outcome = BatchOutcome::new(3, 3, vec![]);
        let v = serde_json::to_value(&outcome).expect("json");
        assert!(v["errors"].is_null());
        assert_eq!(v["affected_count"], 3);
        assert_eq!(v["total_count"], 3);
    }
}
