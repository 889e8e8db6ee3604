//! Common utilities for client tests
#![allow(dead_code)]

use anyhow::Result;
use mongres::{Client, PoolConfig, PoolRegistry};
use serde::{Deserialize, Serialize};
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

pub async fn create_postgres_container() -> Result<(ContainerAsync<postgres::Postgres>, String)> {
    let container: ContainerAsync<postgres::Postgres> =
        postgres::Postgres::default().with_db_name("mongres").with_user("postgres").with_password("postgres").start().await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    Ok((container, format!("postgres://postgres:postgres@{host}:{port}/mongres")))
}

/// A client on its own registry, so tests never share pools.
pub async fn client(target: &str) -> Result<(Client, PoolRegistry)> {
    let registry = PoolRegistry::new(PoolConfig::default().max_size(4));
    let client = Client::connect_with(&registry, target).await?;
    Ok((client, registry))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub age: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
}

impl Person {
    pub fn new(name: &str, age: u32) -> Self { Self { id: None, name: name.to_owned(), age, tags: Vec::new(), address: None } }

    pub fn tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }

    pub fn lives_in(mut self, city: &str, street: Option<&str>) -> Self {
        self.address = Some(Address { city: city.to_owned(), street: street.map(str::to_owned) });
        self
    }
}
