//! bqsync BigQuery - REST v2 store for the sync engine
//!
//! Implements [`bqsync_core::RemoteStore`] over the BigQuery REST API using
//! reqwest, with OAuth tokens from a service-account key (yup-oauth2) or a
//! pre-issued access token.

pub mod auth;
pub mod client;
pub mod connector;
pub mod error;
pub mod model;

pub use auth::{ServiceAccountTokens, StaticToken, TokenSource, BIGQUERY_SCOPE};
pub use client::BigQueryClient;
pub use connector::{BigQueryConnector, BigQuerySettings, DEFAULT_API_BASE};
