use std::collections::HashMap;
use std::fmt;

use mongres_ql::{Comparison, Document, Filter, Update, Value};

use crate::options::FindOptions;
use crate::value::PgParam;

pub const ID_COLUMN: &str = "id";
pub const DATA_COLUMN: &str = "data";

/// A collection table, optionally qualified by the schema of its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: Option<String>,
    name: String,
}

impl TableName {
    pub fn new(name: &str) -> Self { Self { schema: None, name: name.to_owned() } }

    pub fn in_schema(schema: &str, name: &str) -> Self { Self { schema: Some(schema.to_owned()), name: name.to_owned() } }

    pub fn schema(&self) -> Option<&str> { self.schema.as_deref() }

    pub fn name(&self) -> &str { &self.name }

    /// Whether `relation`, as the server spells it in error messages, is this table.
    pub fn is_relation(&self, relation: &str) -> bool {
        match &self.schema {
            Some(schema) => relation.strip_prefix(schema.as_str()).and_then(|rest| rest.strip_prefix('.')) == Some(self.name.as_str()),
            None => relation == self.name,
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", quote_identifier(schema), quote_identifier(&self.name)),
            None => f.write_str(&quote_identifier(&self.name)),
        }
    }
}

/// Accumulates `$n` parameters while statement text is assembled.
///
/// Path parameters are deduplicated, so a path mentioned several times in one statement is bound once.
#[derive(Debug, Default)]
pub struct SqlBuilder {
    params: Vec<PgParam>,
    paths: HashMap<Vec<String>, usize>,
    aliases: usize,
}

impl SqlBuilder {
    pub fn new() -> Self { Self::default() }

    /// Binds a parameter and returns its placeholder.
    pub fn bind(&mut self, param: PgParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn bind_json(&mut self, value: &Value) -> String { format!("{}::jsonb", self.bind(PgParam::jsonb(value))) }

    pub fn bind_path(&mut self, segments: &[String]) -> String {
        if let Some(index) = self.paths.get(segments) {
            return format!("${index}::text[]");
        }
        self.params.push(PgParam::Path(segments.to_vec()));
        let index = self.params.len();
        self.paths.insert(segments.to_vec(), index);
        format!("${index}::text[]")
    }

    /// A fresh quoted alias, unique within this statement.
    pub(crate) fn alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        quote_identifier(&format!("{prefix}{}", self.aliases))
    }

    pub fn params(&self) -> &[PgParam] { &self.params }

    pub fn into_params(self) -> Vec<PgParam> { self.params }

    // --- statements ---

    pub fn create_schema(schema: &str) -> String { format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema)) }

    pub fn create_table(table: &TableName) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} JSONB NOT NULL)"#,
            table,
            quote_identifier(ID_COLUMN),
            quote_identifier(DATA_COLUMN)
        )
    }

    pub fn insert(&mut self, table: &TableName, documents: &[Document]) -> String {
        let rows: Vec<String> = documents
            .iter()
            .map(|document| {
                let id = self.bind(PgParam::Text(document.id.to_string()));
                let data = self.bind(PgParam::Jsonb(Value::Object(document.data.clone()).into()));
                format!("({id}, {data}::jsonb)")
            })
            .collect();
        format!(r#"INSERT INTO {} ("id", "data") VALUES {}"#, table, rows.join(", "))
    }

    pub fn select(&mut self, table: &TableName, filter: &Filter, options: &FindOptions) -> String {
        let predicate = self.predicate(filter);
        let mut sql = format!(r#"SELECT "id", "data" FROM {} WHERE {}"#, table, predicate);

        // without a sort, rows come back in storage order
        if !options.sort.is_empty() {
            let mut keys: Vec<String> = Vec::with_capacity(options.sort.len() + 1);
            for (path, direction) in &options.sort {
                let expr = if path.is_id() { r#""id""#.to_owned() } else { format!(r#"("data" #> {})"#, self.bind_path(path.segments())) };
                keys.push(format!("{expr} {}", direction.sql()));
            }
            keys.push(r#""id" ASC"#.to_owned());
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        if let Some(skip) = options.skip {
            let offset = self.bind(PgParam::BigInt(i64::try_from(skip).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        if let Some(limit) = options.limit {
            let limit = self.bind(PgParam::BigInt(i64::try_from(limit).unwrap_or(i64::MAX)));
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    pub fn count(&mut self, table: &TableName, filter: &Filter) -> String {
        let predicate = self.predicate(filter);
        format!(r#"SELECT COUNT(*) FROM {} WHERE {}"#, table, predicate)
    }

    /// With `single`, at most one matching row is locked and removed.
    pub fn delete(&mut self, table: &TableName, filter: &Filter, single: bool) -> String {
        let predicate = self.predicate(filter);
        if single {
            format!(
                r#"WITH "target" AS (SELECT "id" FROM {table} WHERE {predicate} LIMIT 1 FOR UPDATE) DELETE FROM {table} USING "target" WHERE {table}."id" = "target"."id""#
            )
        } else {
            format!(r#"DELETE FROM {table} WHERE {predicate}"#)
        }
    }

    /// Builds the single statement behind `updateOne`/`updateMany`.
    ///
    /// Matching rows are locked, rewritten through the staged mutation and written back only when
    /// no row reports a conflict and the document actually changed. The statement returns one row
    /// per matched document: its id, the conflict code (NULL when the mutation applies cleanly)
    /// and whether it was written.
    pub fn update(&mut self, table: &TableName, filter: &Filter, update: &Update, single: bool) -> String {
        let predicate = self.predicate(filter);
        let limit = if single { " LIMIT 1" } else { "" };
        let mutation = self.mutation(r#""target"."data""#, update);
        format!(
            concat!(
                r#"WITH "target" AS (SELECT "id", "data" FROM {table} WHERE {predicate}{limit} FOR UPDATE), "#,
                r#""staged" AS (SELECT "target"."id", "target"."data" AS "old", {document} AS "new", {guard} AS "conflict" FROM "target"{joins}), "#,
                r#""applied" AS (UPDATE {table} SET "data" = "staged"."new" FROM "staged" WHERE {table}."id" = "staged"."id" AND "staged"."old" IS DISTINCT FROM "staged"."new" "#,
                r#"AND NOT EXISTS (SELECT 1 FROM "staged" WHERE "staged"."conflict" IS NOT NULL) RETURNING {table}."id") "#,
                r#"SELECT "staged"."id", "staged"."conflict", EXISTS (SELECT 1 FROM "applied" WHERE "applied"."id" = "staged"."id") AS "modified" FROM "staged""#
            ),
            table = table,
            predicate = predicate,
            limit = limit,
            document = mutation.document,
            guard = mutation.guard,
            joins = mutation.joins,
        )
    }
}

pub fn quote_identifier(name: &str) -> String { format!(r#""{}""#, name.replace('"', "\"\"")) }

pub fn comparison_op_to_sql(op: &Comparison) -> &'static str {
    match op {
        Comparison::GreaterThan => ">",
        Comparison::GreaterThanOrEqual => ">=",
        Comparison::LessThan => "<",
        Comparison::LessThanOrEqual => "<=",
    }
}
