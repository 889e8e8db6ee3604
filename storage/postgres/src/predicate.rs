//! Filter compilation.
//!
//! A [`Filter`] becomes a boolean SQL expression over the `data` column. Every generated leaf
//! evaluates to TRUE or FALSE, never NULL, so negation composes without three-valued surprises.
//!
//! A field condition matches when it holds for the value at the path or, if that value is an
//! array, for at least one of its elements. Array traversal is always guarded by a
//! `jsonb_typeof(..) = 'array'` check inside a CASE, since `jsonb_array_elements` raises on scalars.

use mongres_ql::{ElemMatch, FieldPath, Filter, FilterError, Operator, Value};

use crate::sql_builder::{comparison_op_to_sql, quote_identifier, SqlBuilder, DATA_COLUMN, ID_COLUMN};
use crate::value::PgParam;

/// SQL text with `$n` placeholders, plus the parameters they refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub sql: String,
    pub params: Vec<PgParam>,
}

/// Parses and compiles a filter document.
pub fn compile(filter: &Value) -> Result<CompiledFilter, FilterError> { Ok(compile_filter(&Filter::parse(filter)?)) }

pub fn compile_filter(filter: &Filter) -> CompiledFilter {
    let mut builder = SqlBuilder::new();
    let sql = builder.predicate(filter);
    CompiledFilter { sql, params: builder.into_params() }
}

/// What the paths of a filter are resolved against.
enum Scope {
    /// The stored row: `_id` lives in the `id` column, everything else in `data`
    Document,
    /// An array element bound by an enclosing `$elemMatch`
    Element(String),
}

impl SqlBuilder {
    pub fn predicate(&mut self, filter: &Filter) -> String { self.filter(&Scope::Document, filter) }

    fn filter(&mut self, scope: &Scope, filter: &Filter) -> String {
        match filter {
            Filter::And(clauses) => self.junction(scope, clauses, " AND ", "TRUE"),
            Filter::Or(clauses) => self.junction(scope, clauses, " OR ", "FALSE"),
            Filter::Nor(clauses) => format!("(NOT {})", self.junction(scope, clauses, " OR ", "FALSE")),
            Filter::FieldEquals { path, value } => {
                if let Some(sql) = self.id_equals(scope, path, value) {
                    return sql;
                }
                let target = self.locate(scope, path);
                self.equals(&target, value, true)
            }
            Filter::FieldOperator { path, operator } => {
                if let Operator::Eq(value) = operator {
                    if let Some(sql) = self.id_equals(scope, path, value) {
                        return sql;
                    }
                }
                let target = self.locate(scope, path);
                self.operator(&target, operator, true)
            }
        }
    }

    fn junction(&mut self, scope: &Scope, clauses: &[Filter], separator: &str, empty: &str) -> String {
        let mut parts: Vec<String> = clauses.iter().map(|clause| self.filter(scope, clause)).collect();
        match parts.len() {
            0 => empty.to_owned(),
            1 => parts.remove(0),
            _ => format!("({})", parts.join(separator)),
        }
    }

    /// String equality on `_id` compares the key column directly.
    fn id_equals(&mut self, scope: &Scope, path: &FieldPath, value: &Value) -> Option<String> {
        match (scope, value) {
            (Scope::Document, Value::String(id)) if path.is_id() => {
                Some(format!("({} = {})", quote_identifier(ID_COLUMN), self.bind(PgParam::Text(id.clone()))))
            }
            _ => None,
        }
    }

    /// The jsonb expression a path refers to; SQL NULL when the path is missing.
    fn locate(&mut self, scope: &Scope, path: &FieldPath) -> String {
        let (base, segments) = match scope {
            Scope::Document if path.is_rooted_at_id() => (format!("to_jsonb({})", quote_identifier(ID_COLUMN)), &path.segments()[1..]),
            Scope::Document => (quote_identifier(DATA_COLUMN), path.segments()),
            Scope::Element(element) => (element.clone(), path.segments()),
        };
        if segments.is_empty() {
            return base;
        }
        format!("({base} #> {})", self.bind_path(segments))
    }

    fn operator(&mut self, target: &str, operator: &Operator, fanout: bool) -> String {
        match operator {
            Operator::Eq(value) => self.equals(target, value, fanout),
            Operator::Ne(value) => format!("(NOT {})", self.equals(target, value, fanout)),
            Operator::Compare(comparison, operand) => {
                // jsonb orders across types, so the operand's type brackets the comparison
                let json_type = operand.type_name();
                let operand = self.bind_json(operand);
                let op = comparison_op_to_sql(comparison);
                self.any(target, fanout, |v| format!("(jsonb_typeof({v}) = '{json_type}' AND {v} {op} {operand})"))
            }
            Operator::In(values) => {
                let alternatives: Vec<String> = values.iter().map(|value| self.equals(target, value, fanout)).collect();
                disjunction(alternatives)
            }
            Operator::Nin(values) => {
                let alternatives: Vec<String> = values.iter().map(|value| self.equals(target, value, fanout)).collect();
                format!("(NOT {})", disjunction(alternatives))
            }
            Operator::All(values) => {
                if values.is_empty() {
                    return "FALSE".to_owned();
                }
                let required: Vec<String> = values.iter().map(|value| self.equals(target, value, fanout)).collect();
                format!("({})", required.join(" AND "))
            }
            Operator::Exists(true) => format!("({target} IS NOT NULL)"),
            Operator::Exists(false) => format!("({target} IS NULL)"),
            Operator::Size(size) => format!("CASE WHEN jsonb_typeof({target}) = 'array' THEN jsonb_array_length({target}) = {size} ELSE FALSE END"),
            Operator::ElemMatch(ElemMatch::Document(filter)) => {
                let (alias, element) = self.element();
                let inner = self.filter(&Scope::Element(element.clone()), filter);
                exists_element(target, &alias, &format!("jsonb_typeof({element}) = 'object' AND {inner}"))
            }
            Operator::ElemMatch(ElemMatch::Value(operators)) => {
                let (alias, element) = self.element();
                let inner: Vec<String> = operators.iter().map(|operator| self.operator(&element, operator, false)).collect();
                exists_element(target, &alias, &inner.join(" AND "))
            }
            Operator::Not(operators) => {
                let inner: Vec<String> = operators.iter().map(|operator| self.operator(target, operator, fanout)).collect();
                format!("(NOT ({}))", inner.join(" AND "))
            }
        }
    }

    /// Containment-aware equality. Objects compare exactly, independent of key order.
    fn equals(&mut self, target: &str, value: &Value, fanout: bool) -> String {
        if value.is_null() {
            let null_element = self.any(target, fanout, |v| format!("{v} = 'null'::jsonb"));
            return format!("({target} IS NULL OR {null_element})");
        }
        let operand = self.bind_json(value);
        self.any(target, fanout, |v| format!("{v} = {operand}"))
    }

    /// `condition` holds for the target itself or, with `fanout`, for one of its array elements.
    fn any(&mut self, target: &str, fanout: bool, condition: impl Fn(&str) -> String) -> String {
        let direct = format!("COALESCE({}, FALSE)", condition(target));
        if !fanout {
            return direct;
        }
        let (alias, element) = self.element();
        format!("({direct} OR {})", exists_element(target, &alias, &condition(&element)))
    }

    fn element(&mut self) -> (String, String) {
        let alias = self.alias("e");
        let element = format!(r#"{alias}."v""#);
        (alias, element)
    }
}

fn exists_element(target: &str, alias: &str, condition: &str) -> String {
    format!(
        r#"CASE WHEN jsonb_typeof({target}) = 'array' THEN EXISTS (SELECT 1 FROM jsonb_array_elements({target}) AS {alias}("v") WHERE {condition}) ELSE FALSE END"#
    )
}

fn disjunction(mut alternatives: Vec<String>) -> String {
    match alternatives.len() {
        0 => "FALSE".to_owned(),
        1 => alternatives.remove(0),
        _ => format!("({})", alternatives.join(" OR ")),
    }
}
