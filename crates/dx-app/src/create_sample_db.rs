//! Create sample SQLite database with demo data

use std::path::Path;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection, Result};
use tracing::info;

/// Tables written by [`create_sample_database`]
pub const DEMO_TABLES: &[&str] = &["sensor_telemetry", "transactions"];

/// Create and populate a demo database with `rows` rows per table
pub fn create_sample_database(path: &Path, rows: usize) -> Result<()> {
    let mut conn = Connection::open(path)?;

    conn.execute_batch(
        "
        DROP TABLE IF EXISTS sensor_telemetry;
        DROP TABLE IF EXISTS transactions;

        -- Sensor telemetry data
        CREATE TABLE sensor_telemetry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            sensor_id TEXT,
            temperature REAL,
            humidity REAL,
            status TEXT
        );

        -- Financial transactions
        CREATE TABLE transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_date TEXT,
            merchant TEXT,
            category TEXT,
            amount REAL,
            location TEXT
        );
        ",
    )?;

    let mut rng = StdRng::seed_from_u64(42);
    let base_time = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();

    let tx = conn.transaction()?;
    {
        info!("Generating {} sensor telemetry rows", rows);
        let mut stmt = tx.prepare(
            "INSERT INTO sensor_telemetry (timestamp, sensor_id, temperature, humidity, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for i in 0..rows {
            let t = i as f64 * 0.01;
            let timestamp = base_time + Duration::seconds(i as i64 * 30);
            let temperature = 20.0 + 5.0 * t.sin() + rng.gen_range(-0.2..0.2);
            // Sensors drop out now and then
            let humidity = rng.gen_bool(0.97).then(|| 40.0 + 10.0 * t.cos() + rng.gen_range(-0.5..0.5));
            let status = match rng.gen_range(0..100) {
                0..=94 => "OK",
                95..=98 => "WARNING",
                _ => "ERROR",
            };

            stmt.execute(params![
                timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("SENSOR_{}", (i % 5) + 1),
                temperature,
                humidity,
                status,
            ])?;
        }
    }
    {
        info!("Generating {} transaction rows", rows);
        let merchants = ["Grocer", "Cafe", "Fuel Stop", "Bookshop", "Pharmacy", "Online Store"];
        let categories = ["Groceries", "Dining", "Transport", "Shopping", "Healthcare"];
        let locations = ["Harbor", "Old Town", "Airport", "Online"];

        let mut stmt = tx.prepare(
            "INSERT INTO transactions (transaction_date, merchant, category, amount, location)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for i in 0..rows {
            let date = base_time + Duration::hours(i as i64);
            let amount = rng.gen_range(100..50_000) as f64 / 100.0;
            stmt.execute(params![
                date.format("%Y-%m-%d").to_string(),
                merchants[rng.gen_range(0..merchants.len())],
                categories[rng.gen_range(0..categories.len())],
                amount,
                locations[rng.gen_range(0..locations.len())],
            ])?;
        }
    }
    tx.commit()?;

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_sensor_timestamp ON sensor_telemetry(timestamp);
        CREATE INDEX IF NOT EXISTS idx_transaction_date ON transactions(transaction_date);
        ",
    )?;

    info!("Sample database written to {}", path.display());
    Ok(())
}
