use crate::error::FilterError;
use crate::id::DocumentId;
use crate::path::FieldPath;
use crate::value::{Map, Value};

/// A parsed filter document.
///
/// Top-level keys of a filter document are conjoined. A field whose condition is a plain value
/// becomes [`Filter::FieldEquals`]; a field whose condition is an operator object becomes one
/// [`Filter::FieldOperator`] per operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every clause matches. An empty conjunction matches every document.
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    FieldEquals { path: FieldPath, value: Value },
    FieldOperator { path: FieldPath, operator: Operator },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl Comparison {
    pub fn name(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => "$gt",
            Comparison::GreaterThanOrEqual => "$gte",
            Comparison::LessThan => "$lt",
            Comparison::LessThanOrEqual => "$lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq(Value),
    Ne(Value),
    /// Only ever holds a non-null scalar operand.
    Compare(Comparison, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    All(Vec<Value>),
    Exists(bool),
    Size(u64),
    ElemMatch(ElemMatch),
    Not(Vec<Operator>),
}

/// The two shapes of `$elemMatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemMatch {
    /// `{ "$elemMatch": { "street": "Main" } }`: some object element matches the nested filter
    Document(Box<Filter>),
    /// `{ "$elemMatch": { "$gte": 80, "$lt": 85 } }`: some element satisfies every operator
    Value(Vec<Operator>),
}

impl Filter {
    /// A filter matching every document.
    pub fn all() -> Self { Filter::And(Vec::new()) }

    pub fn by_id(id: &DocumentId) -> Self { Filter::FieldEquals { path: FieldPath::id(), value: Value::String(id.to_string()) } }

    pub fn parse(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Object(map) => parse_document(map),
            other => Err(FilterError::NotAnObject(other.type_name())),
        }
    }

    pub fn matches_everything(&self) -> bool { matches!(self, Filter::And(clauses) if clauses.is_empty()) }
}

impl TryFrom<Value> for Filter {
    type Error = FilterError;
    fn try_from(value: Value) -> Result<Self, Self::Error> { Filter::parse(&value) }
}

impl TryFrom<&Value> for Filter {
    type Error = FilterError;
    fn try_from(value: &Value) -> Result<Self, Self::Error> { Filter::parse(value) }
}

impl TryFrom<serde_json::Value> for Filter {
    type Error = FilterError;
    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> { Filter::parse(&Value::from_json(json)?) }
}

fn parse_document(map: &Map) -> Result<Filter, FilterError> {
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "$and" => clauses.push(Filter::And(parse_clauses(key, value)?)),
            "$or" => clauses.push(Filter::Or(parse_clauses(key, value)?)),
            "$nor" => clauses.push(Filter::Nor(parse_clauses(key, value)?)),
            operator if operator.starts_with('$') => return Err(FilterError::UnknownOperator(key.clone())),
            _ => parse_condition(FieldPath::parse(key)?, value, &mut clauses)?,
        }
    }
    Ok(if clauses.len() == 1 { clauses.remove(0) } else { Filter::And(clauses) })
}

fn parse_clauses(operator: &str, value: &Value) -> Result<Vec<Filter>, FilterError> {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(Filter::parse).collect(),
        other => Err(invalid(operator, "a non-empty array of filters", other)),
    }
}

fn parse_condition(path: FieldPath, condition: &Value, clauses: &mut Vec<Filter>) -> Result<(), FilterError> {
    match condition {
        Value::Object(map) if is_operator_object(&path, map)? => {
            for operator in parse_operators(map)? {
                clauses.push(Filter::FieldOperator { path: path.clone(), operator });
            }
        }
        _ => clauses.push(Filter::FieldEquals { path, value: condition.clone() }),
    }
    Ok(())
}

/// A non-empty object whose keys all start with `$` holds operators; one without any is a literal sub-document.
fn is_operator_object(path: &FieldPath, map: &Map) -> Result<bool, FilterError> {
    match map.keys().filter(|key| key.starts_with('$')).count() {
        0 => Ok(false),
        n if n == map.len() => Ok(true),
        _ => Err(FilterError::MixedCondition(path.to_string())),
    }
}

fn parse_operators(map: &Map) -> Result<Vec<Operator>, FilterError> {
    map.iter().map(|(key, operand)| parse_operator(key, operand)).collect()
}

fn parse_operator(key: &str, operand: &Value) -> Result<Operator, FilterError> {
    Ok(match key {
        "$eq" => Operator::Eq(operand.clone()),
        "$ne" => Operator::Ne(operand.clone()),
        "$gt" => compare(Comparison::GreaterThan, operand)?,
        "$gte" => compare(Comparison::GreaterThanOrEqual, operand)?,
        "$lt" => compare(Comparison::LessThan, operand)?,
        "$lte" => compare(Comparison::LessThanOrEqual, operand)?,
        "$in" => Operator::In(array(key, operand)?),
        "$nin" => Operator::Nin(array(key, operand)?),
        "$all" => Operator::All(array(key, operand)?),
        "$exists" => Operator::Exists(match operand {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
            other => return Err(invalid(key, "a boolean", other)),
        }),
        "$size" => Operator::Size(
            operand
                .as_number()
                .and_then(|n| n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)))
                .ok_or_else(|| invalid(key, "a non-negative integer", operand))?,
        ),
        "$elemMatch" => Operator::ElemMatch(parse_elem_match(operand)?),
        "$not" => match operand {
            Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => Operator::Not(parse_operators(map)?),
            other => return Err(invalid(key, "an operator object", other)),
        },
        _ => return Err(FilterError::UnknownOperator(key.to_owned())),
    })
}

fn compare(comparison: Comparison, operand: &Value) -> Result<Operator, FilterError> {
    if !operand.is_scalar() {
        return Err(invalid(comparison.name(), "a non-null scalar", operand));
    }
    Ok(Operator::Compare(comparison, operand.clone()))
}

fn array(operator: &str, operand: &Value) -> Result<Vec<Value>, FilterError> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        other => Err(invalid(operator, "an array", other)),
    }
}

fn parse_elem_match(operand: &Value) -> Result<ElemMatch, FilterError> {
    let map = match operand {
        Value::Object(map) => map,
        other => return Err(invalid("$elemMatch", "an object", other)),
    };
    let value_operators = map.keys().filter(|key| key.starts_with('$') && !matches!(key.as_str(), "$and" | "$or" | "$nor")).count();
    match value_operators {
        0 => Ok(ElemMatch::Document(Box::new(parse_document(map)?))),
        n if n == map.len() => Ok(ElemMatch::Value(parse_operators(map)?)),
        _ => Err(FilterError::MixedCondition("$elemMatch".to_owned())),
    }
}

fn invalid(operator: &str, expected: &'static str, found: &Value) -> FilterError {
    FilterError::InvalidOperand { operator: operator.to_owned(), expected, found: found.type_name() }
}
