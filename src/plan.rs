use serde_json::Value;

/// One step of an EXPLAIN tree, carrying the raw node payload plus derived
/// timing fields. The payload is passed through to the visualizer untouched
/// beyond that enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
  pub node_type: String,
  pub total_cost: Option<f64>,
  pub plan_rows: Option<f64>,
  pub actual_rows: Option<f64>,
  /// Time reported by the backend for this node and its children, per loop.
  pub inclusive_time_ms: Option<f64>,
  /// Inclusive time minus the children's inclusive time, floored at zero.
  pub exclusive_time_ms: Option<f64>,
  pub children: Vec<PlanNode>,
  pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanTree {
  pub root: PlanNode,
  pub execution_time_ms: Option<f64>,
}

/// Parse an `EXPLAIN (FORMAT JSON)` payload. Any shape surprise yields
/// `None` so the caller can fall back to the ordinary tabular display
/// instead of crashing the session.
pub fn parse_plan(payload: &str) -> Option<PlanTree> {
  let value: Value = serde_json::from_str(payload).ok()?;

  // Postgres wraps the plan in a one-element array: [{"Plan": {...}}].
  let envelope = match &value {
    Value::Array(items) => items.first()?,
    other => other,
  };
  let plan = match envelope.get("Plan") {
    Some(plan) => plan,
    None if envelope.get("Node Type").is_some() => envelope,
    None => return None,
  };

  let root = build_node(plan)?;
  let execution_time_ms = envelope.get("Execution Time").and_then(Value::as_f64);
  Some(PlanTree { root, execution_time_ms })
}

fn build_node(value: &Value) -> Option<PlanNode> {
  let obj = value.as_object()?;
  let node_type = obj.get("Node Type")?.as_str()?.to_string();

  let children: Vec<PlanNode> = obj
    .get("Plans")
    .and_then(Value::as_array)
    .map(|plans| plans.iter().filter_map(build_node).collect())
    .unwrap_or_default();

  let inclusive_time_ms = obj.get("Actual Total Time").and_then(Value::as_f64);
  let exclusive_time_ms = inclusive_time_ms.map(|inclusive| {
    let child_time: f64 = children.iter().filter_map(|c| c.inclusive_time_ms).sum();
    (inclusive - child_time).max(0.0)
  });

  Some(PlanNode {
    node_type,
    total_cost: obj.get("Total Cost").and_then(Value::as_f64),
    plan_rows: obj.get("Plan Rows").and_then(Value::as_f64),
    actual_rows: obj.get("Actual Rows").and_then(Value::as_f64),
    inclusive_time_ms,
    exclusive_time_ms,
    children,
    raw: value.clone(),
  })
}
