use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mongres_ql::{Document, DocumentId, Filter, Update, Value};
use tokio_postgres::{Client, Row};
use tracing::{debug, error, info, warn};

use crate::cursor::{Cursor, DocumentStream};
use crate::error::{error_kind, Error, ErrorKind, Operation};
use crate::mutation;
use crate::options::FindOptions;
use crate::pool::{PgConnection, PoolHandle};
use crate::results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
use crate::sql_builder::{SqlBuilder, TableName};
use crate::value::{param_refs, PgParam};

/// Keeps each multi-row insert well below the server's parameter limit.
const INSERT_BATCH_SIZE: usize = 1000;

/// Longest identifier Postgres stores without truncation.
const MAX_NAME_LEN: usize = 63;

/// A named collection backed by one `(id TEXT PRIMARY KEY, data JSONB)` table.
///
/// The table (and its schema, for collections of a named database) is created on first use.
/// Clones share the pool and the table state.
#[derive(Clone)]
pub struct PostgresCollection {
    table: TableName,
    pool: PoolHandle,
    state: Arc<TableState>,
}

struct TableState {
    ready: AtomicBool,
    ddl_lock: tokio::sync::Mutex<()>,
}

impl PostgresCollection {
    /// A collection whose table lives on the connection's search path.
    pub fn new(pool: PoolHandle, name: &str) -> Result<Self, Error> {
        if !Self::sane_name(name) {
            return Err(Error::InvalidCollectionName(name.to_owned()));
        }
        Ok(Self::build(pool, TableName::new(name)))
    }

    /// A collection whose table lives in the Postgres schema `schema`, keeping same-named
    /// collections of different databases apart.
    pub fn with_schema(pool: PoolHandle, schema: &str, name: &str) -> Result<Self, Error> {
        // pg_ names are reserved for system schemas
        if !Self::sane_name(schema) || schema.starts_with("pg_") {
            return Err(Error::InvalidDatabaseName(schema.to_owned()));
        }
        if !Self::sane_name(name) {
            return Err(Error::InvalidCollectionName(name.to_owned()));
        }
        Ok(Self::build(pool, TableName::in_schema(schema, name)))
    }

    fn build(pool: PoolHandle, table: TableName) -> Self {
        Self { table, pool, state: Arc::new(TableState { ready: AtomicBool::new(false), ddl_lock: tokio::sync::Mutex::new(()) }) }
    }

    pub fn sane_name(name: &str) -> bool {
        !name.is_empty() && name.len() <= MAX_NAME_LEN && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':'))
    }

    pub fn name(&self) -> &str { self.table.name() }

    /// The schema holding the table, when the collection belongs to a named database.
    pub fn schema(&self) -> Option<&str> { self.table.schema() }

    pub fn pool(&self) -> &PoolHandle { &self.pool }

    pub async fn insert_one(&self, document: Document) -> Result<InsertOneResult, Error> {
        let mut sql = SqlBuilder::new();
        let query = sql.insert(&self.table, std::slice::from_ref(&document));
        let client = self.connection().await?;
        self.execute(&client, Operation::Insert, &query, sql.params()).await?;
        Ok(InsertOneResult { inserted_id: document.id })
    }

    /// Inserts all documents in one transaction; a duplicate `_id` anywhere inserts none of them.
    pub async fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult, Error> {
        if documents.is_empty() {
            return Ok(InsertManyResult { inserted_ids: Vec::new() });
        }
        let mut connection = self.connection().await?;
        let transaction = connection.transaction().await.map_err(|err| self.classify(Operation::Insert, err))?;
        for batch in documents.chunks(INSERT_BATCH_SIZE) {
            let mut sql = SqlBuilder::new();
            let query = sql.insert(&self.table, batch);
            debug!("PostgresCollection({}).insert_many: {} rows", self.table, batch.len());
            transaction.execute(query.as_str(), &param_refs(sql.params())).await.map_err(|err| self.classify(Operation::Insert, err))?;
        }
        transaction.commit().await.map_err(|err| self.classify(Operation::Insert, err))?;
        Ok(InsertManyResult { inserted_ids: documents.into_iter().map(|document| document.id).collect() })
    }

    pub fn find(&self, filter: Filter) -> Cursor { Cursor::new(self.clone(), filter, FindOptions::default()) }

    pub fn find_with(&self, filter: Filter, options: FindOptions) -> Cursor { Cursor::new(self.clone(), filter, options) }

    pub async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, Error> {
        let mut documents = self.fetch(filter, &FindOptions::default().limit(1)).await?;
        Ok(documents.pop())
    }

    pub async fn count_documents(&self, filter: &Filter) -> Result<u64, Error> {
        let mut sql = SqlBuilder::new();
        let query = sql.count(&self.table, filter);
        let client = self.connection().await?;
        let rows = self.query(&client, Operation::Count, &query, sql.params()).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get(0).map_err(|err| self.classify(Operation::Count, err))?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    pub async fn update_one(&self, filter: &Filter, update: &Update) -> Result<UpdateResult, Error> { self.update(filter, update, true).await }

    /// Applies the update to every match, or to none of them if any match cannot take it.
    pub async fn update_many(&self, filter: &Filter, update: &Update) -> Result<UpdateResult, Error> { self.update(filter, update, false).await }

    pub async fn delete_one(&self, filter: &Filter) -> Result<DeleteResult, Error> { self.delete(filter, true).await }

    pub async fn delete_many(&self, filter: &Filter) -> Result<DeleteResult, Error> { self.delete(filter, false).await }

    async fn update(&self, filter: &Filter, update: &Update, single: bool) -> Result<UpdateResult, Error> {
        let mut sql = SqlBuilder::new();
        let query = sql.update(&self.table, filter, update, single);
        let client = self.connection().await?;
        let rows = self.query(&client, Operation::Update, &query, sql.params()).await?;

        let mut result = UpdateResult::default();
        for row in &rows {
            let conflict: Option<i32> = row.try_get("conflict").map_err(|err| self.classify(Operation::Update, err))?;
            if let Some(code) = conflict {
                let err = mutation::conflict(update, code);
                warn!("PostgresCollection({}).update: rejected: {}", self.table, err);
                return Err(Error::InvalidUpdate(err));
            }
            let modified: bool = row.try_get("modified").map_err(|err| self.classify(Operation::Update, err))?;
            result.matched_count += 1;
            if modified {
                result.modified_count += 1;
            }
        }
        debug!("PostgresCollection({}).update: {:?}", self.table, result);
        Ok(result)
    }

    async fn delete(&self, filter: &Filter, single: bool) -> Result<DeleteResult, Error> {
        let mut sql = SqlBuilder::new();
        let query = sql.delete(&self.table, filter, single);
        let client = self.connection().await?;
        let deleted_count = self.execute(&client, Operation::Delete, &query, sql.params()).await?;
        Ok(DeleteResult { deleted_count })
    }

    pub(crate) async fn fetch(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<Document>, Error> {
        let mut sql = SqlBuilder::new();
        let query = sql.select(&self.table, filter, options);
        let client = self.connection().await?;
        let rows = self.query(&client, Operation::Find, &query, sql.params()).await?;
        rows.iter().map(|row| row_to_document(self.name(), row)).collect()
    }

    pub(crate) async fn stream(&self, filter: &Filter, options: &FindOptions) -> Result<DocumentStream, Error> {
        let mut sql = SqlBuilder::new();
        let query = sql.select(&self.table, filter, options);
        let connection = self.connection().await?;
        debug!("PostgresCollection({}).stream: {} with params: {:?}", self.table, query, sql.params());
        let rows = match connection.query_raw(query.as_str(), sql.params().iter()).await {
            Ok(rows) => rows,
            Err(err) if self.missing_table(&err) => {
                self.recreate_table(&connection).await?;
                connection.query_raw(query.as_str(), sql.params().iter()).await.map_err(|err| self.classify(Operation::Find, err))?
            }
            Err(err) => return Err(self.classify(Operation::Find, err)),
        };
        Ok(DocumentStream::new(connection, rows, self.name().to_owned()))
    }

    // --- table management ---

    async fn connection(&self) -> Result<PgConnection, Error> {
        let connection = self.pool.acquire().await?;
        self.ensure_table(&connection).await?;
        Ok(connection)
    }

    async fn ensure_table(&self, client: &Client) -> Result<(), Error> {
        if self.state.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.state.ddl_lock.lock().await;
        if self.state.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.create_table(client).await?;
        self.state.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn create_table(&self, client: &Client) -> Result<(), Error> {
        if let Some(schema) = self.table.schema() {
            self.run_ddl(client, &SqlBuilder::create_schema(schema)).await?;
        }
        self.run_ddl(client, &SqlBuilder::create_table(&self.table)).await?;
        info!("PostgresCollection({}): table ready", self.table);
        Ok(())
    }

    async fn run_ddl(&self, client: &Client, query: &str) -> Result<(), Error> {
        debug!("{query}");
        match client.execute(query, &[]).await {
            Ok(_) => Ok(()),
            Err(err) => match error_kind(&err) {
                ErrorKind::DuplicateObject => {
                    debug!("PostgresCollection({}): created concurrently", self.table);
                    Ok(())
                }
                _ => {
                    error!("PostgresCollection({}).create_table: {}", self.table, err);
                    Err(Error::Backend { collection: self.name().to_owned(), operation: Operation::CreateTable, source: err })
                }
            },
        }
    }

    async fn recreate_table(&self, client: &Client) -> Result<(), Error> {
        warn!("PostgresCollection({}): table went missing, recreating", self.table);
        self.state.ready.store(false, Ordering::Release);
        self.ensure_table(client).await
    }

    fn missing_table(&self, err: &tokio_postgres::Error) -> bool {
        match error_kind(err) {
            ErrorKind::UndefinedTable { table } => table.map_or(true, |table| self.table.is_relation(&table)),
            ErrorKind::UndefinedSchema { schema } => match self.table.schema() {
                Some(own) => schema.map_or(true, |schema| schema == own),
                None => false,
            },
            _ => false,
        }
    }

    fn classify(&self, operation: Operation, err: tokio_postgres::Error) -> Error {
        match error_kind(&err) {
            ErrorKind::UniqueViolation { key } if operation == Operation::Insert => {
                Error::DuplicateKey { collection: self.name().to_owned(), id: key.unwrap_or_default() }
            }
            _ => Error::Backend { collection: self.name().to_owned(), operation, source: err },
        }
    }

    /// Runs a statement returning rows, recreating the table and retrying once if it went missing.
    async fn query(&self, client: &Client, operation: Operation, sql: &str, params: &[PgParam]) -> Result<Vec<Row>, Error> {
        debug!("PostgresCollection({}).{}: {} with params: {:?}", self.table, operation, sql, params);
        match client.query(sql, &param_refs(params)).await {
            Ok(rows) => Ok(rows),
            Err(err) if self.missing_table(&err) => {
                self.recreate_table(client).await?;
                client.query(sql, &param_refs(params)).await.map_err(|err| self.classify(operation, err))
            }
            Err(err) => Err(self.classify(operation, err)),
        }
    }

    async fn execute(&self, client: &Client, operation: Operation, sql: &str, params: &[PgParam]) -> Result<u64, Error> {
        debug!("PostgresCollection({}).{}: {} with params: {:?}", self.table, operation, sql, params);
        match client.execute(sql, &param_refs(params)).await {
            Ok(count) => Ok(count),
            Err(err) if self.missing_table(&err) => {
                self.recreate_table(client).await?;
                client.execute(sql, &param_refs(params)).await.map_err(|err| self.classify(operation, err))
            }
            Err(err) => Err(self.classify(operation, err)),
        }
    }
}

impl std::fmt::Debug for PostgresCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCollection").field("table", &self.table).field("pool", &self.pool).finish()
    }
}

pub(crate) fn row_to_document(collection: &str, row: &Row) -> Result<Document, Error> {
    let decode = |message: String| Error::Decode { collection: collection.to_owned(), message };
    let id: String = row.try_get(0).map_err(|err| decode(err.to_string()))?;
    let data: serde_json::Value = row.try_get(1).map_err(|err| decode(err.to_string()))?;
    let id = DocumentId::try_from(id).map_err(|err| decode(err.to_string()))?;
    match Value::from_json(data).map_err(|err| decode(err.to_string()))? {
        Value::Object(map) => Ok(Document::new(id, map)),
        other => Err(decode(format!("expected an object, got {}", other.type_name()))),
    }
}
