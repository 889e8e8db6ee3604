use std::marker::PhantomData;

use futures_util::stream::{Stream, StreamExt};
use mongres_ql::{Document, FieldPath, Filter, FilterError, Update, UpdateError, Value};
use mongres_storage_postgres::{
    Cursor as DocumentCursor, DeleteResult, Error, FindOptions, InsertManyResult, InsertOneResult, PostgresCollection, SortDirection,
    UpdateResult,
};
use serde::{de::DeserializeOwned, Serialize};

/// A collection whose documents (de)serialize as `T`.
///
/// Filters and updates are anything convertible into the parsed ASTs: a `serde_json::Value`
/// built with `json!`, a [`Value`], or an already parsed [`Filter`] / [`Update`].
pub struct Collection<T = Document> {
    inner: PostgresCollection,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone(), _record: PhantomData } }
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_tuple("Collection").field(&self.inner).finish() }
}

impl<T> Collection<T>
where T: Serialize + DeserializeOwned
{
    pub(crate) fn new(inner: PostgresCollection) -> Self { Self { inner, _record: PhantomData } }

    pub fn name(&self) -> &str { self.inner.name() }

    /// The untyped collection underneath.
    pub fn inner(&self) -> &PostgresCollection { &self.inner }

    /// Inserts `record`, assigning an `_id` when it serializes without one.
    pub async fn insert_one(&self, record: &T) -> Result<InsertOneResult, Error> { self.inner.insert_one(to_document(record)?).await }

    pub async fn insert_many<'a, I>(&self, records: I) -> Result<InsertManyResult, Error>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let documents = records.into_iter().map(to_document).collect::<Result<Vec<_>, _>>()?;
        self.inner.insert_many(documents).await
    }

    pub fn find<F>(&self, filter: F) -> Result<Cursor<T>, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
    {
        Ok(Cursor::new(self.inner.find(parse_filter(filter)?)))
    }

    pub fn find_with<F>(&self, filter: F, options: FindOptions) -> Result<Cursor<T>, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
    {
        Ok(Cursor::new(self.inner.find_with(parse_filter(filter)?, options)))
    }

    pub async fn find_one<F>(&self, filter: F) -> Result<Option<T>, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
    {
        match self.inner.find_one(&parse_filter(filter)?).await? {
            Some(document) => Ok(Some(from_document(self.name(), document)?)),
            None => Ok(None),
        }
    }

    pub async fn count_documents<F>(&self, filter: F) -> Result<u64, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
    {
        self.inner.count_documents(&parse_filter(filter)?).await
    }

    pub async fn update_one<F, U>(&self, filter: F, update: U) -> Result<UpdateResult, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
        U: TryInto<Update>,
        U::Error: Into<UpdateError>,
    {
        let (filter, update) = (parse_filter(filter)?, parse_update(update)?);
        self.inner.update_one(&filter, &update).await
    }

    pub async fn update_many<F, U>(&self, filter: F, update: U) -> Result<UpdateResult, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
        U: TryInto<Update>,
        U::Error: Into<UpdateError>,
    {
        let (filter, update) = (parse_filter(filter)?, parse_update(update)?);
        self.inner.update_many(&filter, &update).await
    }

    pub async fn delete_one<F>(&self, filter: F) -> Result<DeleteResult, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
    {
        self.inner.delete_one(&parse_filter(filter)?).await
    }

    pub async fn delete_many<F>(&self, filter: F) -> Result<DeleteResult, Error>
    where
        F: TryInto<Filter>,
        F::Error: Into<FilterError>,
    {
        self.inner.delete_many(&parse_filter(filter)?).await
    }
}

/// A lazy typed `find`; each terminal call runs the query again.
pub struct Cursor<T> {
    inner: DocumentCursor,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Cursor<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone(), _record: PhantomData } }
}

impl<T> Cursor<T>
where T: DeserializeOwned
{
    fn new(inner: DocumentCursor) -> Self { Self { inner, _record: PhantomData } }

    pub fn sort(self, path: FieldPath, direction: SortDirection) -> Self { Self::new(self.inner.sort(path, direction)) }

    pub fn skip(self, skip: u64) -> Self { Self::new(self.inner.skip(skip)) }

    pub fn limit(self, limit: u64) -> Self { Self::new(self.inner.limit(limit)) }

    pub async fn to_array(&self) -> Result<Vec<T>, Error> {
        let collection = self.collection();
        self.inner.to_array().await?.into_iter().map(|document| from_document(&collection, document)).collect()
    }

    /// Decodes documents as rows arrive. The stream holds one pooled connection until dropped.
    pub async fn stream(&self) -> Result<impl Stream<Item = Result<T, Error>>, Error> {
        let collection = self.collection();
        let rows = self.inner.stream().await?;
        Ok(rows.map(move |row| row.and_then(|document| from_document(&collection, document))))
    }

    fn collection(&self) -> String { self.inner.collection().to_owned() }
}

fn parse_filter<F>(filter: F) -> Result<Filter, Error>
where
    F: TryInto<Filter>,
    F::Error: Into<FilterError>,
{
    filter.try_into().map_err(|err| Error::InvalidFilter(err.into()))
}

fn parse_update<U>(update: U) -> Result<Update, Error>
where
    U: TryInto<Update>,
    U::Error: Into<UpdateError>,
{
    update.try_into().map_err(|err| Error::InvalidUpdate(err.into()))
}

fn to_document<T: Serialize>(record: &T) -> Result<Document, Error> { Ok(Document::try_from(Value::from_serialize(record)?)?) }

fn from_document<T: DeserializeOwned>(collection: &str, document: Document) -> Result<T, Error> {
    document.into_value().deserialize_into().map_err(|err| Error::Decode { collection: collection.to_owned(), message: err.to_string() })
}
