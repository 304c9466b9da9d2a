//! Dependency planning: id normalization, edge discovery, and a stable
//! topological order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use sqlgate_core::{ApiError, ApiResult};

use crate::reference::referenced_ids;
use crate::request::OperationSpec;

/// An operation with its normalized id and discovered dependencies.
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    pub id: String,
    pub spec: OperationSpec,
    /// Explicit `depends_on` plus every id referenced via `$ref:`.
    pub depends_on: BTreeSet<String>,
}

/// The validated execution plan.
#[derive(Debug)]
pub struct ExecutionPlan {
    /// Topological order, stable by batch position on ties.
    pub order: Vec<String>,
    pub operations: BTreeMap<String, PlannedOperation>,
}

/// Build the execution plan for a batch.
///
/// Operations without an id get `op_<index>` (0-indexed by position).
/// Duplicate ids, unknown dependency targets, and cycles are structural
/// errors that abort the batch before anything executes.
pub fn build_plan(specs: &[OperationSpec]) -> ApiResult<ExecutionPlan> {
    let mut ids = Vec::with_capacity(specs.len());
    let mut seen = BTreeSet::new();
    for (index, spec) in specs.iter().enumerate() {
        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| format!("op_{index}"));
        if !seen.insert(id.clone()) {
            return Err(ApiError::BadRequest(format!(
                "duplicate operation id '{id}' in batch"
            )));
        }
        ids.push(id);
    }

    let mut operations = BTreeMap::new();
    for (index, spec) in specs.iter().enumerate() {
        let id = &ids[index];
        let mut depends_on: BTreeSet<String> = spec.depends_on.iter().cloned().collect();
        depends_on.extend(referenced_ids(&Value::Object(spec.query_params.clone())));
        depends_on.extend(referenced_ids(&Value::Object(spec.store_params.clone())));

        for dependency in &depends_on {
            if !seen.contains(dependency) {
                return Err(ApiError::BadRequest(format!(
                    "operation '{id}' references unknown operation '{dependency}'"
                )));
            }
        }

        operations.insert(
            id.clone(),
            PlannedOperation {
                id: id.clone(),
                spec: spec.clone(),
                depends_on,
            },
        );
    }

    let order = topological_order(&ids, &operations)?;
    Ok(ExecutionPlan { order, operations })
}

/// Kahn's algorithm over the dependency graph, picking the earliest batch
/// position among ready nodes so ties keep the submission order.
fn topological_order(
    ids: &[String],
    operations: &BTreeMap<String, PlannedOperation>,
) -> ApiResult<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = ids
        .iter()
        .map(|id| (id.as_str(), operations[id].depends_on.len()))
        .collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (id, planned) in operations {
        for dependency in &planned.depends_on {
            dependents
                .entry(dependency.as_str())
                .or_default()
                .push(id.as_str());
        }
    }

    let mut order = Vec::with_capacity(ids.len());
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    while order.len() < ids.len() {
        let next = ids
            .iter()
            .map(String::as_str)
            .find(|id| !placed.contains(id) && in_degree[id] == 0);
        let Some(id) = next else {
            let remaining: Vec<&str> = ids
                .iter()
                .map(String::as_str)
                .filter(|id| !placed.contains(id))
                .collect();
            return Err(ApiError::BadRequest(format!(
                "circular dependency in batch: {}",
                cycle_path(&remaining, operations)
            )));
        };
        placed.insert(id);
        order.push(id.to_string());
        if let Some(children) = dependents.get(id) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }
    }
    Ok(order)
}

/// Walk dependencies among the remaining nodes until one repeats, to show
/// an example path through the cycle.
fn cycle_path(remaining: &[&str], operations: &BTreeMap<String, PlannedOperation>) -> String {
    let Some(start) = remaining.first() else {
        return String::new();
    };
    let remaining_set: BTreeSet<&str> = remaining.iter().copied().collect();
    let mut path = vec![*start];
    let mut visited = BTreeSet::from([*start]);
    let mut current = *start;
    loop {
        let next = operations[current]
            .depends_on
            .iter()
            .map(String::as_str)
            .find(|d| remaining_set.contains(d));
        let Some(next) = next else { break };
        path.push(next);
        if !visited.insert(next) {
            break;
        }
        current = next;
    }
    path.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(id: Option<&str>, depends_on: &[&str], store: Value) -> OperationSpec {
        OperationSpec {
            id: id.map(String::from),
            entity: "album".into(),
            action: "create".into(),
            store_params: store.as_object().cloned().unwrap_or_default(),
            query_params: serde_json::Map::new(),
            metadata_params: Default::default(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            claims: None,
        }
    }

    #[test]
    fn missing_ids_are_assigned_by_position() {
        let plan = build_plan(&[
            spec(None, &[], json!({})),
            spec(Some("mine"), &[], json!({})),
            spec(None, &[], json!({})),
        ])
        .unwrap();
        assert_eq!(plan.order, vec!["op_0", "mine", "op_2"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = build_plan(&[
            spec(Some("a"), &[], json!({})),
            spec(Some("a"), &[], json!({})),
        ])
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn reference_tokens_create_edges() {
        let plan = build_plan(&[
            spec(Some("line"), &[], json!({"invoice_id": "$ref:inv.invoice_id"})),
            spec(Some("inv"), &[], json!({})),
        ])
        .unwrap();
        assert_eq!(plan.order, vec!["inv", "line"]);
        assert!(plan.operations["line"].depends_on.contains("inv"));
    }

    #[test]
    fn stable_order_keeps_batch_position_on_ties() {
        let plan = build_plan(&[
            spec(Some("c"), &[], json!({})),
            spec(Some("a"), &[], json!({})),
            spec(Some("b"), &[], json!({})),
        ])
        .unwrap();
        assert_eq!(plan.order, vec!["c", "a", "b"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = build_plan(&[spec(Some("a"), &["ghost"], json!({}))]).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("ghost")));
    }

    #[test]
    fn cycle_is_reported_with_a_path() {
        let err = build_plan(&[
            spec(Some("a"), &["b"], json!({})),
            spec(Some("b"), &["a"], json!({})),
        ])
        .unwrap_err();
        let ApiError::BadRequest(msg) = err else {
            panic!("expected BadRequest");
        };
        assert!(msg.contains("circular dependency"));
        assert!(msg.contains("a"));
        assert!(msg.contains("b"));
    }
}
