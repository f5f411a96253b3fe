//! Output types for bulk stack operations.

use serde::Serialize;

use crate::project::LeafResults;

/// Standardized bulk execution result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult<T: Serialize> {
    pub action: String,
    pub results: Vec<ItemOutcome<T>>,
    pub summary: BulkSummary,
}

/// Outcome for a single stack in a bulk operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome<T: Serialize> {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl<T: Serialize> BulkResult<T> {
    /// Flatten per-leaf results, in leaf-name order.
    pub fn from_leaf_results(action: &str, results: LeafResults<T>) -> Self {
        let mut outcomes = Vec::with_capacity(results.len());
        let mut succeeded = 0;
        let mut failed = 0;

        for (id, result) in results {
            match result {
                Ok(value) => {
                    succeeded += 1;
                    outcomes.push(ItemOutcome {
                        id,
                        result: Some(value),
                        error: None,
                    });
                }
                Err(err) => {
                    failed += 1;
                    outcomes.push(ItemOutcome {
                        id,
                        result: None,
                        error: Some(ItemError {
                            code: err.code.as_str().to_string(),
                            message: err.message,
                            details: err.details,
                        }),
                    });
                }
            }
        }

        Self {
            action: action.to_string(),
            results: outcomes,
            summary: BulkSummary {
                total: succeeded + failed,
                succeeded,
                failed,
            },
        }
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}
