use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use mongres_ql::{Document, FieldPath, Filter};
use tokio_postgres::RowStream;

use crate::collection::{row_to_document, PostgresCollection};
use crate::error::{Error, Operation};
use crate::options::{FindOptions, SortDirection};
use crate::pool::PgConnection;

/// A lazily executed `find`.
///
/// Nothing runs until [`Cursor::to_array`] or [`Cursor::stream`]; each call executes the query anew.
#[derive(Clone)]
pub struct Cursor {
    collection: PostgresCollection,
    filter: Filter,
    options: FindOptions,
}

impl Cursor {
    pub(crate) fn new(collection: PostgresCollection, filter: Filter, options: FindOptions) -> Self { Self { collection, filter, options } }

    pub fn sort(mut self, path: FieldPath, direction: SortDirection) -> Self {
        self.options = self.options.sort(path, direction);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.options = self.options.skip(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.options = self.options.limit(limit);
        self
    }

    pub fn filter(&self) -> &Filter { &self.filter }

    pub fn options(&self) -> &FindOptions { &self.options }

    /// Name of the collection being queried.
    pub fn collection(&self) -> &str { self.collection.name() }

    pub async fn to_array(&self) -> Result<Vec<Document>, Error> { self.collection.fetch(&self.filter, &self.options).await }

    /// Streams matching documents, holding one pooled connection until the stream is dropped.
    pub async fn stream(&self) -> Result<DocumentStream, Error> { self.collection.stream(&self.filter, &self.options).await }
}

/// Rows decoded into documents as they arrive from the server.
pub struct DocumentStream {
    // keeps the connection checked out for as long as rows are pending
    _connection: PgConnection,
    rows: Pin<Box<RowStream>>,
    collection: String,
}

impl DocumentStream {
    pub(crate) fn new(connection: PgConnection, rows: RowStream, collection: String) -> Self {
        Self { _connection: connection, rows: Box::pin(rows), collection }
    }
}

impl Stream for DocumentStream {
    type Item = Result<Document, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rows.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(row_to_document(&this.collection, &row))),
            Poll::Ready(Some(Err(source))) => {
                Poll::Ready(Some(Err(Error::Backend { collection: this.collection.clone(), operation: Operation::Find, source })))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
