//! Common utilities for Postgres collection tests
#![allow(dead_code)]

use anyhow::Result;
use mongres_ql::{Document, Filter, Update, Value};
use mongres_storage_postgres::{PoolConfig, PoolRegistry, PostgresCollection};
use std::str::FromStr;
use testcontainers::ContainerAsync;
use testcontainers_modules::{postgres, testcontainers::runners::AsyncRunner};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        tracing_subscriber::fmt().with_max_level(Level::from_str(&level).unwrap()).with_test_writer().init();
    } else {
        tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init();
    }
}

/// A throwaway Postgres server plus a registry pointed at it. The container stops on drop.
pub struct TestDatabase {
    pub container: ContainerAsync<postgres::Postgres>,
    pub target: String,
    pub registry: PoolRegistry,
}

impl TestDatabase {
    pub async fn start() -> Result<Self> {
        let container: ContainerAsync<postgres::Postgres> =
            postgres::Postgres::default().with_db_name("mongres").with_user("postgres").with_password("postgres").start().await?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432).await?;
        let target = format!("host={host} port={port} user=postgres password=postgres dbname=mongres");
        let registry = PoolRegistry::new(PoolConfig::default().max_size(4));

        Ok(Self { container, target, registry })
    }

    pub async fn collection(&self, name: &str) -> Result<PostgresCollection> {
        let pool = self.registry.acquire_pool(&self.target).await?;
        Ok(PostgresCollection::new(pool, name)?)
    }

    /// A connection outside the pool, for poking at tables directly.
    pub async fn raw_client(&self) -> Result<tokio_postgres::Client> {
        let (client, connection) = tokio_postgres::connect(&self.target, tokio_postgres::NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!("raw connection error: {err}");
            }
        });
        Ok(client)
    }
}

pub fn filter(json: serde_json::Value) -> Filter { Filter::try_from(json).expect("valid filter") }

pub fn update(json: serde_json::Value) -> Update { Update::try_from(json).expect("valid update") }

pub fn document(json: serde_json::Value) -> Document {
    Document::try_from(Value::try_from(json).expect("valid value")).expect("valid document")
}

/// Names of the documents matching `filter`, sorted.
pub async fn names(collection: &PostgresCollection, json: serde_json::Value) -> Result<Vec<String>> {
    let documents = collection.find(filter(json)).to_array().await?;
    let mut names: Vec<String> = documents.iter().filter_map(|d| d.get("name").and_then(Value::as_str).map(str::to_owned)).collect();
    names.sort();
    Ok(names)
}
