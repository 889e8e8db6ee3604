use crate::error::{UpdateError, ValueError};
use crate::path::FieldPath;
use crate::value::{Number, Value, MAX_DEPTH};

const OPERATORS: [&str; 4] = ["$set", "$unset", "$inc", "$push"];

/// One field-level mutation. Operators apply in the order they appear in the update document.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Writes a value, creating intermediate objects along the path.
    Set { path: FieldPath, value: Value },
    /// Removes a field; a missing field is left alone.
    Unset { path: FieldPath },
    /// Adds to a number; a missing field starts at zero.
    Inc { path: FieldPath, amount: Number },
    /// Appends values to an array; a missing field starts empty.
    Push { path: FieldPath, values: Vec<Value> },
}

impl UpdateOp {
    pub fn operator(&self) -> &'static str {
        match self {
            UpdateOp::Set { .. } => "$set",
            UpdateOp::Unset { .. } => "$unset",
            UpdateOp::Inc { .. } => "$inc",
            UpdateOp::Push { .. } => "$push",
        }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            UpdateOp::Set { path, .. } | UpdateOp::Unset { path } | UpdateOp::Inc { path, .. } | UpdateOp::Push { path, .. } => path,
        }
    }

    fn written_depth(&self) -> usize {
        match self {
            UpdateOp::Set { value, .. } => value.depth(),
            UpdateOp::Unset { .. } | UpdateOp::Inc { .. } => 0,
            UpdateOp::Push { values, .. } => 1 + values.iter().map(Value::depth).max().unwrap_or(0),
        }
    }
}

/// A parsed update document.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    /// An empty list of operators is a valid update that changes nothing.
    pub fn new(ops: Vec<UpdateOp>) -> Result<Self, UpdateError> {
        for op in &ops {
            if op.path().is_rooted_at_id() {
                return Err(UpdateError::ImmutableId(op.operator().to_owned()));
            }
            // the stored document nests one level per path segment, then the written value
            if op.path().depth() + op.written_depth() > MAX_DEPTH {
                return Err(UpdateError::Value(ValueError::DepthExceeded(MAX_DEPTH)));
            }
        }
        Ok(Self { ops })
    }

    /// Parses an update document. `{}` is rejected, while operators with no fields (`{ "$set": {} }`) are no-ops.
    pub fn parse(value: &Value) -> Result<Self, UpdateError> {
        let map = match value {
            Value::Object(map) if map.is_empty() => return Err(UpdateError::Empty),
            Value::Object(map) => map,
            other => return Err(UpdateError::NotAnObject(other.type_name())),
        };
        let mut ops = Vec::new();
        for (operator, operand) in map {
            if !operator.starts_with('$') {
                return Err(UpdateError::NotAnOperator(operator.clone()));
            }
            if !OPERATORS.contains(&operator.as_str()) {
                return Err(UpdateError::UnknownOperator(operator.clone()));
            }
            let fields = match operand {
                Value::Object(fields) => fields,
                other => return Err(UpdateError::OperatorOperand { operator: operator.clone(), found: other.type_name() }),
            };
            for (field, value) in fields {
                ops.push(parse_op(operator, FieldPath::parse(field)?, value)?);
            }
        }
        Self::new(ops)
    }

    /// True when applying this update can never change a document.
    pub fn is_noop(&self) -> bool { self.ops.is_empty() }

    pub fn ops(&self) -> &[UpdateOp] { &self.ops }
}

impl TryFrom<Value> for Update {
    type Error = UpdateError;
    fn try_from(value: Value) -> Result<Self, Self::Error> { Update::parse(&value) }
}

impl TryFrom<&Value> for Update {
    type Error = UpdateError;
    fn try_from(value: &Value) -> Result<Self, Self::Error> { Update::parse(value) }
}

impl TryFrom<serde_json::Value> for Update {
    type Error = UpdateError;
    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> { Update::parse(&Value::from_json(json)?) }
}

fn parse_op(operator: &str, path: FieldPath, value: &Value) -> Result<UpdateOp, UpdateError> {
    Ok(match operator {
        "$set" => UpdateOp::Set { path, value: value.clone() },
        "$unset" => UpdateOp::Unset { path },
        "$inc" => match value {
            Value::Number(amount) => UpdateOp::Inc { path, amount: amount.clone() },
            other => {
                return Err(UpdateError::InvalidOperand { operator: "$inc", path: path.to_string(), expected: "a number", found: other.type_name() })
            }
        },
        "$push" => UpdateOp::Push { values: push_values(&path, value)?, path },
        _ => return Err(UpdateError::UnknownOperator(operator.to_owned())),
    })
}

/// `{ "$each": [..] }` pushes every element; any other value is pushed as a single element.
fn push_values(path: &FieldPath, value: &Value) -> Result<Vec<Value>, UpdateError> {
    let Value::Object(map) = value else { return Ok(vec![value.clone()]) };
    if !map.keys().any(|key| key.starts_with('$')) {
        return Ok(vec![value.clone()]);
    }
    let mut values = Vec::new();
    for (modifier, operand) in map {
        match (modifier.as_str(), operand) {
            ("$each", Value::Array(items)) => values = items.clone(),
            ("$each", other) => {
                return Err(UpdateError::InvalidOperand { operator: "$push", path: path.to_string(), expected: "an array for $each", found: other.type_name() })
            }
            _ => return Err(UpdateError::UnknownOperator(format!("$push.{modifier}"))),
        }
    }
    Ok(values)
}
