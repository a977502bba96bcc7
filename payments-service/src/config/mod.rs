use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub business: BusinessConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Seller identity printed on invoices and receipts.
#[derive(Deserialize, Clone, Debug)]
pub struct BusinessConfig {
    pub name: String,
    pub address: String,
    pub tax_id: String,
    pub email: String,
    pub phone: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("PAYMENTS_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PAYMENTS_SERVICE_PORT")
            .unwrap_or_else(|_| "3003".to_string())
            .parse()?;

        let db_url =
            env::var("PAYMENTS_DATABASE_URL").context("PAYMENTS_DATABASE_URL must be set")?;
        let max_connections = env::var("PAYMENTS_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("PAYMENTS_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            business: BusinessConfig {
                name: env::var("BUSINESS_NAME").unwrap_or_else(|_| "My Business".to_string()),
                address: env::var("BUSINESS_ADDRESS").unwrap_or_default(),
                tax_id: env::var("BUSINESS_TAX_ID").unwrap_or_default(),
                email: env::var("BUSINESS_EMAIL").unwrap_or_default(),
                phone: env::var("BUSINESS_PHONE").unwrap_or_default(),
            },
            service_name: "payments-service".to_string(),
        })
    }
}
