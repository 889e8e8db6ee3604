//! Update compilation.
//!
//! Update operators are folded left to right into a chain of `CROSS JOIN LATERAL` stages, each
//! producing the next version of the document from the previous one. None of the rewrites can
//! raise: where an operator meets a value it cannot handle, a guard expression reports the step
//! instead, and the statement leaves the row untouched.

use mongres_ql::path::is_index;
use mongres_ql::{ConflictReason, Update, UpdateError, UpdateOp, Value};

use crate::sql_builder::{quote_identifier, SqlBuilder, DATA_COLUMN};
use crate::value::PgParam;

/// The pieces of a compiled update.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// `CROSS JOIN LATERAL` stages to append to the FROM clause holding the source document
    pub joins: String,
    /// Expression for the fully updated document
    pub document: String,
    /// Integer expression: NULL when every operator applies, otherwise a code for [`conflict`]
    pub guard: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMutation {
    pub mutation: Mutation,
    pub params: Vec<PgParam>,
}

/// Parses and compiles an update document against the `data` column.
pub fn compile(update: &Value) -> Result<CompiledMutation, UpdateError> { Ok(compile_update(&Update::parse(update)?)) }

pub fn compile_update(update: &Update) -> CompiledMutation {
    let mut builder = SqlBuilder::new();
    let mutation = builder.mutation(&quote_identifier(DATA_COLUMN), update);
    CompiledMutation { mutation, params: builder.into_params() }
}

#[derive(Clone, Copy)]
enum Violation {
    Target,
    Parent,
}

fn code(step: usize, violation: Violation) -> usize {
    match violation {
        Violation::Target => step * 2,
        Violation::Parent => step * 2 + 1,
    }
}

/// Maps a guard code reported by the statement back to the operator that could not be applied.
pub fn conflict(update: &Update, code: i32) -> UpdateError {
    let step = usize::try_from(code / 2).unwrap_or(0);
    let parent = code % 2 == 1;
    match update.ops().get(step) {
        Some(op) => {
            let reason = match op {
                _ if parent => ConflictReason::NotAContainer,
                UpdateOp::Inc { .. } => ConflictReason::NotANumber,
                UpdateOp::Push { .. } => ConflictReason::NotAnArray,
                UpdateOp::Set { .. } | UpdateOp::Unset { .. } => ConflictReason::NotAContainer,
            };
            UpdateError::Conflict { operator: op.operator(), path: op.path().to_string(), reason }
        }
        None => UpdateError::Conflict { operator: "update", path: String::new(), reason: ConflictReason::NotAContainer },
    }
}

/// Container types that can hold the next path segment.
fn containers_for(segment: &str) -> &'static str {
    if is_index(segment) {
        "'object', 'array'"
    } else {
        "'object'"
    }
}

impl SqlBuilder {
    pub fn mutation(&mut self, source: &str, update: &Update) -> Mutation {
        let mut joins = String::new();
        let mut guards = Vec::new();
        let mut document = source.to_owned();
        for (step, op) in update.ops().iter().enumerate() {
            let rewritten = self.rewrite(&document, step, op, &mut guards);
            let alias = self.alias("u");
            joins.push_str(&format!(r#" CROSS JOIN LATERAL (SELECT {rewritten} AS "doc") AS {alias}"#));
            document = format!(r#"{alias}."doc""#);
        }
        let guard = if guards.is_empty() { "NULL::integer".to_owned() } else { format!("CASE {} END", guards.join(" ")) };
        Mutation { joins, document, guard }
    }

    fn rewrite(&mut self, doc: &str, step: usize, op: &UpdateOp, guards: &mut Vec<String>) -> String {
        let segments = op.path().segments();
        match op {
            UpdateOp::Unset { .. } => self.unset(doc, segments),
            UpdateOp::Set { value, .. } => {
                self.guard_parents(doc, segments, step, guards);
                let value = self.bind_json(value);
                self.set_at(doc, segments, value)
            }
            UpdateOp::Inc { amount, .. } => {
                self.guard_parents(doc, segments, step, guards);
                let current = format!("({doc} #> {})", self.bind_path(segments));
                guards.push(format!("WHEN jsonb_typeof({current}) <> 'number' THEN {}", code(step, Violation::Target)));
                let amount = self.bind_json(&Value::Number(amount.clone()));
                let value = format!(
                    "to_jsonb(COALESCE(CASE WHEN jsonb_typeof({current}) = 'number' THEN ({current})::numeric END, 0) + ({amount})::numeric)"
                );
                self.set_at(doc, segments, value)
            }
            UpdateOp::Push { values, .. } => {
                self.guard_parents(doc, segments, step, guards);
                let current = format!("({doc} #> {})", self.bind_path(segments));
                guards.push(format!("WHEN jsonb_typeof({current}) <> 'array' THEN {}", code(step, Violation::Target)));
                let values = self.bind_json(&Value::Array(values.clone()));
                let value = format!("(CASE WHEN jsonb_typeof({current}) = 'array' THEN {current} ELSE '[]'::jsonb END || {values})");
                self.set_at(doc, segments, value)
            }
        }
    }

    /// Every existing value above the target must be able to hold the next segment.
    fn guard_parents(&mut self, doc: &str, segments: &[String], step: usize, guards: &mut Vec<String>) {
        for depth in 1..segments.len() {
            let prefix = self.bind_path(&segments[..depth]);
            guards.push(format!(
                "WHEN jsonb_typeof({doc} #> {prefix}) NOT IN ({}) THEN {}",
                containers_for(&segments[depth]),
                code(step, Violation::Parent)
            ));
        }
    }

    /// Writes `value` at the path, creating missing objects on the way down.
    ///
    /// Each level is read from the stage input directly, so the expression grows linearly with
    /// path depth. Levels that cannot hold the next segment are replaced by an empty object;
    /// the guard has already flagged those.
    fn set_at(&mut self, doc: &str, segments: &[String], value: String) -> String {
        let mut expr = value;
        for depth in (1..segments.len()).rev() {
            let prefix = self.bind_path(&segments[..depth]);
            let key = self.bind_path(&segments[depth..=depth]);
            let container = format!("({doc} #> {prefix})");
            expr = format!(
                "jsonb_set(CASE WHEN jsonb_typeof({container}) IN ({}) THEN {container} ELSE '{{}}'::jsonb END, {key}, {expr}, true)",
                containers_for(&segments[depth])
            );
        }
        let key = self.bind_path(&segments[..1]);
        format!("jsonb_set({doc}, {key}, {expr}, true)")
    }

    /// Removes the path when it can exist; otherwise the document passes through unchanged.
    ///
    /// An array element is nulled rather than removed, so later elements keep their positions.
    fn unset(&mut self, doc: &str, segments: &[String]) -> String {
        let path = self.bind_path(segments);
        if segments.len() == 1 {
            return format!("({doc} #- {path})");
        }
        let checks: Vec<String> = (1..segments.len())
            .map(|depth| {
                let prefix = self.bind_path(&segments[..depth]);
                format!("jsonb_typeof({doc} #> {prefix}) IN ({})", containers_for(&segments[depth]))
            })
            .collect();
        let last = segments.len() - 1;
        let removed = if is_index(&segments[last]) {
            let parent = self.bind_path(&segments[..last]);
            // out of range indexes leave the array as it is
            format!("CASE WHEN jsonb_typeof({doc} #> {parent}) = 'array' THEN jsonb_set({doc}, {path}, 'null'::jsonb, false) ELSE {doc} #- {path} END")
        } else {
            format!("{doc} #- {path}")
        };
        format!("CASE WHEN {} THEN {removed} ELSE {doc} END", checks.join(" AND "))
    }
}
