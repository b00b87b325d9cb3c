//! Analysis Persistence Store (SQLite)
//!
//! Ba loại record: runs, analyses (cascade theo run), credential usage.
//! Mọi thao tác ghi là insert hoặc upsert một dòng.

pub mod records;


use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

pub use records::{AnalysisRecord, AnalysisStats, MonitoringRun};

use super::ai_bridge::CredentialUsage;
use super::error::{CoreError, CoreResult};
use super::threat::AnalysisSource;

const ANALYSIS_COLUMNS: &str = "id, run_id, timestamp, source, processing_ms, is_anomalous, \
     anomaly_score, anomaly_type, explanation, confidence, recommendations, features, samples";

pub struct AnalysisStore {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC text, so string order equals time order
fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, text: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    text.map(|t| parse_ts(idx, &t)).transpose()
}

fn from_json<T: serde::de::DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|e| CoreError::Persistence(e.to_string()))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

impl AnalysisStore {
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // ========================================================================
    // RUNS
    // ========================================================================

    pub fn insert_run(&self, run: &MonitoringRun) -> CoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO runs (run_id, pid, command, start_time, end_time, exit_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.run_id,
                run.pid,
                run.command,
                ts(&run.start_time),
                run.end_time.as_ref().map(ts),
                run.exit_code
            ],
        )?;
        Ok(())
    }

    /// Returns false when the run is unknown or already closed
    pub fn close_run(&self, run_id: &str, exit_code: Option<i32>) -> CoreResult<bool> {
        let changed = self.conn.lock().execute(
            "UPDATE runs SET end_time = ?1, exit_code = ?2 WHERE run_id = ?3 AND end_time IS NULL",
            params![ts(&Utc::now()), exit_code, run_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_run(&self, run_id: &str) -> CoreResult<Option<MonitoringRun>> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT run_id, pid, command, start_time, end_time, exit_code FROM runs WHERE run_id = ?1",
                params![run_id],
                Self::map_run,
            )
            .optional()?;
        Ok(run)
    }

    pub fn latest_run(&self) -> CoreResult<Option<MonitoringRun>> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT run_id, pid, command, start_time, end_time, exit_code FROM runs
                 ORDER BY start_time DESC LIMIT 1",
                [],
                Self::map_run,
            )
            .optional()?;
        Ok(run)
    }

    fn map_run(row: &Row) -> rusqlite::Result<MonitoringRun> {
        let start: String = row.get(3)?;
        Ok(MonitoringRun {
            run_id: row.get(0)?,
            pid: row.get(1)?,
            command: row.get(2)?,
            start_time: parse_ts(3, &start)?,
            end_time: parse_opt_ts(4, row.get(4)?)?,
            exit_code: row.get(5)?,
        })
    }

    // ========================================================================
    // ANALYSES
    // ========================================================================

    pub fn insert_analysis(&self, record: &AnalysisRecord) -> CoreResult<i64> {
        let a = &record.analysis;
        let recommendations = to_json(&a.recommendations)?;
        let features = to_json(&record.features)?;
        let samples = to_json(&record.samples)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO analyses (run_id, timestamp, source, processing_ms, is_anomalous, anomaly_score,
                anomaly_type, explanation, confidence, recommendations, features, samples)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.run_id,
                ts(&record.timestamp),
                record.source.as_str(),
                record.processing_ms as i64,
                a.is_anomalous,
                a.anomaly_score,
                a.anomaly_type.as_str(),
                a.explanation,
                a.confidence,
                recommendations,
                features,
                samples
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent first
    pub fn recent_analyses(&self, limit: u32) -> CoreResult<Vec<AnalysisRecord>> {
        self.query_analyses(
            &format!("SELECT {} FROM analyses ORDER BY timestamp DESC, id DESC LIMIT ?1", ANALYSIS_COLUMNS),
            params![limit],
        )
    }

    /// Oldest first
    pub fn analyses_for_run(&self, run_id: &str) -> CoreResult<Vec<AnalysisRecord>> {
        self.query_analyses(
            &format!("SELECT {} FROM analyses WHERE run_id = ?1 ORDER BY timestamp ASC, id ASC", ANALYSIS_COLUMNS),
            params![run_id],
        )
    }

    /// Highest score first
    pub fn anomalous_analyses(&self, limit: u32) -> CoreResult<Vec<AnalysisRecord>> {
        self.query_analyses(
            &format!(
                "SELECT {} FROM analyses WHERE is_anomalous = 1
                 ORDER BY anomaly_score DESC, timestamp DESC LIMIT ?1",
                ANALYSIS_COLUMNS
            ),
            params![limit],
        )
    }

    fn query_analyses(&self, sql: &str, args: impl rusqlite::Params) -> CoreResult<Vec<AnalysisRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, Self::map_analysis)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn map_analysis(row: &Row) -> rusqlite::Result<AnalysisRecord> {
        let timestamp: String = row.get(2)?;
        let source: String = row.get(3)?;
        let anomaly_type: String = row.get(7)?;
        let recommendations: String = row.get(10)?;
        let features: String = row.get(11)?;
        let samples: String = row.get(12)?;

        Ok(AnalysisRecord {
            id: row.get(0)?,
            run_id: row.get(1)?,
            timestamp: parse_ts(2, &timestamp)?,
            source: source
                .parse::<AnalysisSource>()
                .map_err(|e| conversion_error(3, e))?,
            processing_ms: row.get::<_, i64>(4)?.max(0) as u64,
            analysis: crate::logic::threat::AnomalyAnalysis {
                is_anomalous: row.get(5)?,
                anomaly_score: row.get(6)?,
                anomaly_type: anomaly_type.parse().map_err(|e| conversion_error(7, e))?,
                explanation: row.get(8)?,
                confidence: row.get(9)?,
                recommendations: from_json(10, &recommendations)?,
            },
            features: from_json(11, &features)?,
            samples: from_json(12, &samples)?,
        })
    }

    pub fn stats(&self) -> CoreResult<AnalysisStats> {
        let conn = self.conn.lock();
        let (total, anomalous, avg_score, avg_ms): (i64, Option<i64>, Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT COUNT(*), SUM(is_anomalous), AVG(anomaly_score), AVG(processing_ms) FROM analyses",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let total = total.max(0) as u64;
        let anomalous = anomalous.unwrap_or(0).max(0) as u64;
        Ok(AnalysisStats {
            total,
            anomalous,
            anomaly_rate: if total > 0 { anomalous as f64 / total as f64 } else { 0.0 },
            avg_score: avg_score.unwrap_or(0.0),
            avg_processing_ms: avg_ms.unwrap_or(0.0),
        })
    }

    // ========================================================================
    // CREDENTIAL USAGE
    // ========================================================================

    pub fn upsert_credential_usage(&self, usage: &CredentialUsage) -> CoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO credential_usage
                (credential_id, provider, requests, successes, failures, rate_limited, last_used, cooldown_until)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(credential_id, provider) DO UPDATE SET
                requests = excluded.requests,
                successes = excluded.successes,
                failures = excluded.failures,
                rate_limited = excluded.rate_limited,
                last_used = excluded.last_used,
                cooldown_until = excluded.cooldown_until",
            params![
                usage.credential_id,
                usage.provider,
                usage.requests as i64,
                usage.successes as i64,
                usage.failures as i64,
                usage.rate_limited as i64,
                usage.last_used.as_ref().map(ts),
                usage.cooldown_until.as_ref().map(ts)
            ],
        )?;
        Ok(())
    }

    pub fn all_credential_usage(&self) -> CoreResult<Vec<CredentialUsage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT credential_id, provider, requests, successes, failures, rate_limited, last_used, cooldown_until
             FROM credential_usage ORDER BY provider, credential_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CredentialUsage {
                credential_id: row.get(0)?,
                provider: row.get(1)?,
                requests: row.get::<_, i64>(2)?.max(0) as u64,
                successes: row.get::<_, i64>(3)?.max(0) as u64,
                failures: row.get::<_, i64>(4)?.max(0) as u64,
                rate_limited: row.get::<_, i64>(5)?.max(0) as u64,
                last_used: parse_opt_ts(6, row.get(6)?)?,
                cooldown_until: parse_opt_ts(7, row.get(7)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Deletes runs started more than `days` ago, their analyses cascade
    /// A window reaching past the representable calendar purges nothing
    pub fn purge_older_than(&self, days: u32) -> CoreResult<usize> {
        match Utc::now().checked_sub_signed(chrono::Duration::days(i64::from(days))) {
            Some(cutoff) => self.purge_before(cutoff),
            None => Ok(0),
        }
    }

    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM runs WHERE start_time < ?1", params![ts(&cutoff)])?;
        if removed > 0 {
            log::info!("Purged {} runs started before {}", removed, cutoff);
        }
        Ok(removed)
    }
}
