//! Ingestion of home energy telemetry.
//!
//! Readings arrive from sensor nodes over MQTT and from operators over HTTP.
//! Both producers feed one [`ingest::Pipeline`], which validates them with
//! origin-specific strictness and appends them to a [`store::Store`].

pub mod db;
pub mod health;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod store;
pub mod subscription;
pub mod telemetry;
pub mod validate;
