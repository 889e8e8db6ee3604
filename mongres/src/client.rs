use mongres_storage_postgres::{Error, PoolHandle, PoolRegistry, PostgresCollection};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::collection::Collection;

/// A connection target and the pool serving it. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Client {
    pool: PoolHandle,
}

impl Client {
    pub async fn connect(target: &str) -> Result<Self, Error> { Self::connect_with(PoolRegistry::global(), target).await }

    /// Connects through `registry` instead of the process-wide one.
    pub async fn connect_with(registry: &PoolRegistry, target: &str) -> Result<Self, Error> {
        let pool = registry.acquire_pool(target).await?;
        info!("Client connected to {}", pool.label());
        Ok(Self { pool })
    }

    pub fn db(&self, name: &str) -> Database { Database { client: self.clone(), name: name.to_owned() } }

    /// `host:port/dbname` of the target, without credentials.
    pub fn label(&self) -> &str { self.pool.label() }

    pub fn pool(&self) -> &PoolHandle { &self.pool }
}

/// A named scope for collections.
///
/// The Postgres database is fixed by the connection target, so each database name maps to a
/// Postgres schema of the same name, created on first use. Collections are tables in that schema.
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub fn name(&self) -> &str { &self.name }

    pub fn client(&self) -> &Client { &self.client }

    pub fn collection<T>(&self, name: &str) -> Result<Collection<T>, Error>
    where T: Serialize + DeserializeOwned {
        Ok(Collection::new(PostgresCollection::with_schema(self.client.pool.clone(), &self.name, name)?))
    }
}
