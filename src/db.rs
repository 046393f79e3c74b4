use std::time::Duration;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{
    store::{Store, StoreError},
    telemetry::{GasLevel, Reading, SensorValues, StoredReading},
};

const INSERT_READING: &str = r#"
    INSERT INTO readings (recorded_at, temperature, humidity, voltage, current_primary, current_secondary, current_rms, water_flow, gas_detected, gas_level, tank_level)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    RETURNING id, recorded_at, temperature, humidity, voltage, current_primary, current_secondary, current_rms, water_flow, gas_detected, gas_level, tank_level
    "#;

const INSERT_READINGS: &str = r#"
    INSERT INTO readings (recorded_at, temperature, humidity, voltage, current_primary, current_secondary, current_rms, water_flow, gas_detected, gas_level, tank_level)
    SELECT recorded_at, temperature, humidity, voltage, current_primary, current_secondary, current_rms, water_flow, gas_detected, gas_level, tank_level
    FROM UNNEST($1::TIMESTAMPTZ[], $2::FLOAT8[], $3::FLOAT8[], $4::FLOAT8[], $5::FLOAT8[], $6::FLOAT8[], $7::FLOAT8[], $8::FLOAT8[], $9::BOOL[], $10::FLOAT8[], $11::FLOAT8[])
        WITH ORDINALITY AS t(recorded_at, temperature, humidity, voltage, current_primary, current_secondary, current_rms, water_flow, gas_detected, gas_level, tank_level, ord)
    ORDER BY ord
    RETURNING id, recorded_at, temperature, humidity, voltage, current_primary, current_secondary, current_rms, water_flow, gas_detected, gas_level, tank_level
    "#;

const SELECT_RECENT: &str = r#"
    SELECT id, recorded_at, temperature, humidity, voltage, current_primary, current_secondary, current_rms, water_flow, gas_detected, gas_level, tank_level
    FROM readings
    ORDER BY recorded_at DESC, id DESC
    LIMIT $1
    "#;

pub async fn new_pool(database_url: &str, acquire_timeout: Duration) -> Result<PgPool> {
    PgPoolOptions::new()
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .context("failed to connect to database")
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run database migrations")
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    id: i64,
    recorded_at: DateTime<Utc>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    voltage: Option<f64>,
    current_primary: Option<f64>,
    current_secondary: Option<f64>,
    current_rms: Option<f64>,
    water_flow: Option<f64>,
    gas_detected: Option<bool>,
    gas_level: Option<f64>,
    tank_level: Option<f64>,
}

impl From<ReadingRow> for StoredReading {
    fn from(row: ReadingRow) -> Self {
        let gas_level = match (row.gas_detected, row.gas_level) {
            (Some(detected), _) => Some(GasLevel::Detected(detected)),
            (None, Some(level)) => Some(GasLevel::Level(level)),
            (None, None) => None,
        };

        StoredReading {
            id: row.id,
            timestamp: row.recorded_at,
            values: SensorValues {
                temperature: row.temperature,
                humidity: row.humidity,
                voltage: row.voltage,
                current_primary: row.current_primary,
                current_secondary: row.current_secondary,
                current_rms: row.current_rms,
                water_flow: row.water_flow,
                gas_level,
                tank_level: row.tank_level,
            },
        }
    }
}

fn gas_columns(gas_level: Option<GasLevel>) -> (Option<bool>, Option<f64>) {
    match gas_level {
        Some(GasLevel::Detected(detected)) => (Some(detected), None),
        Some(GasLevel::Level(level)) => (None, Some(level)),
        None => (None, None),
    }
}

impl Store for PgStore {
    async fn append(&self, reading: Reading) -> Result<StoredReading, StoreError> {
        // The id is assigned by the database.
        let stored = reading.into_stored(0, Utc::now());
        let v = &stored.values;
        let (gas_detected, gas_level) = gas_columns(v.gas_level);

        let row: ReadingRow = sqlx::query_as(INSERT_READING)
            .bind(stored.timestamp)
            .bind(v.temperature)
            .bind(v.humidity)
            .bind(v.voltage)
            .bind(v.current_primary)
            .bind(v.current_secondary)
            .bind(v.current_rms)
            .bind(v.water_flow)
            .bind(gas_detected)
            .bind(gas_level)
            .bind(v.tank_level)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.into())
    }

    async fn append_batch(&self, readings: Vec<Reading>) -> Result<Vec<StoredReading>, StoreError> {
        if readings.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let stored: Vec<StoredReading> = readings.into_iter().map(|r| r.into_stored(0, now)).collect();

        let recorded_ats: Vec<DateTime<Utc>> = stored.iter().map(|s| s.timestamp).collect();
        let column = |f: fn(&SensorValues) -> Option<f64>| -> Vec<Option<f64>> {
            stored.iter().map(|s| f(&s.values)).collect()
        };
        let temperatures = column(|v| v.temperature);
        let humidities = column(|v| v.humidity);
        let voltages = column(|v| v.voltage);
        let current_primaries = column(|v| v.current_primary);
        let current_secondaries = column(|v| v.current_secondary);
        let current_rmses = column(|v| v.current_rms);
        let water_flows = column(|v| v.water_flow);
        let tank_levels = column(|v| v.tank_level);
        let (gas_detecteds, gas_levels): (Vec<Option<bool>>, Vec<Option<f64>>) =
            stored.iter().map(|s| gas_columns(s.values.gas_level)).unzip();

        let mut tx = self.pool.begin().await?;

        let mut rows: Vec<ReadingRow> = sqlx::query_as(INSERT_READINGS)
            .bind(&recorded_ats)
            .bind(&temperatures)
            .bind(&humidities)
            .bind(&voltages)
            .bind(&current_primaries)
            .bind(&current_secondaries)
            .bind(&current_rmses)
            .bind(&water_flows)
            .bind(&gas_detecteds)
            .bind(&gas_levels)
            .bind(&tank_levels)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        // Ids are drawn in UNNEST ordinality order; RETURNING order is not guaranteed.
        rows.sort_unstable_by_key(|row| row.id);
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn recent(&self, limit: usize, cap: usize) -> Result<Vec<StoredReading>, StoreError> {
        let limit = i64::try_from(limit.min(cap)).unwrap_or(i64::MAX);

        let rows: Vec<ReadingRow> = sqlx::query_as(SELECT_RECENT)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
