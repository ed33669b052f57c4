use crate::error::PipelineError;
use crate::model::{BrandId, StatsPair, Summaries, Visitor, VisitorId};
use crate::store::{VisitFn, VisitorSource, ZscoreWriter};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Event for audit trail: one per pipeline run
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// CSV row for visitor imports: `id,brand_id,amt,trn`
#[derive(Debug, Deserialize)]
struct VisitorRow {
    #[serde(default)]
    id: String,
    brand_id: String,
    amt: f64,
    trn: u32,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Visitors Table (document-style: summaries and zscore are JSON objects)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS visitors (
            id TEXT PRIMARY KEY,
            brand_id TEXT NOT NULL,
            summaries TEXT NOT NULL,
            zscore TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visitors_brand ON visitors(brand_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<Visitor>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut visitors = Vec::new();

    for result in rdr.deserialize() {
        let row: VisitorRow = result.context("Failed to deserialize visitor")?;

        let id = if row.id.is_empty() {
            VisitorId::generate()
        } else {
            VisitorId(row.id)
        };

        visitors.push(Visitor {
            id,
            brand_id: BrandId(row.brand_id),
            summaries: Summaries {
                amt: row.amt,
                trn: row.trn,
            },
        });
    }

    Ok(visitors)
}

/// Insert or replace visitors. Replacing keeps no old z-score.
pub fn insert_visitors(conn: &Connection, visitors: &[Visitor]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO visitors (id, brand_id, summaries) VALUES (?1, ?2, ?3)",
    )?;

    let mut inserted = 0;
    for visitor in visitors {
        let summaries_json = serde_json::to_string(&visitor.summaries)?;
        stmt.execute(params![
            visitor.id.as_str(),
            visitor.brand_id.as_str(),
            summaries_json
        ])?;
        inserted += 1;
    }

    log::info!("Inserted {} visitors", inserted);
    Ok(inserted)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Visitor plus its stored z-score, if any
#[derive(Debug, Clone, Serialize)]
pub struct ScoredVisitor {
    #[serde(flatten)]
    pub visitor: Visitor,
    pub zscore: Option<StatsPair>,
}

/// All visitors of a brand (filtered or not), with their current z-scores
pub fn get_visitors_by_brand(conn: &Connection, brand: &BrandId) -> Result<Vec<ScoredVisitor>> {
    let mut stmt = conn.prepare(
        "SELECT id, brand_id, summaries, zscore
         FROM visitors
         WHERE brand_id = ?1
         ORDER BY id",
    )?;

    let mut rows = stmt.query([brand.as_str()])?;
    let mut visitors = Vec::new();

    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let summaries_json: String = row.get(2)?;
        let zscore_json: Option<String> = row.get(3)?;

        let summaries: Summaries = serde_json::from_str(&summaries_json)
            .with_context(|| format!("Invalid summaries for visitor {}", id))?;
        let zscore = match zscore_json {
            Some(json) => Some(
                serde_json::from_str(&json)
                    .with_context(|| format!("Invalid zscore for visitor {}", id))?,
            ),
            None => None,
        };

        visitors.push(ScoredVisitor {
            visitor: Visitor {
                id: VisitorId(id),
                brand_id: BrandId(row.get(1)?),
                summaries,
            },
            zscore,
        });
    }

    Ok(visitors)
}

pub fn get_visitor_zscore(conn: &Connection, id: &VisitorId) -> Result<Option<StatsPair>> {
    let zscore_json: Option<Option<String>> = conn
        .query_row(
            "SELECT zscore FROM visitors WHERE id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match zscore_json.flatten() {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Distinct brands, sorted
pub fn list_brands(conn: &Connection) -> Result<Vec<BrandId>> {
    let mut stmt = conn.prepare("SELECT DISTINCT brand_id FROM visitors ORDER BY brand_id")?;

    let brands = stmt
        .query_map([], |row| row.get::<_, String>(0).map(BrandId))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(brands)
}

pub fn count_visitors(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM visitors", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// Visitor store backed by a SQLite connection
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl VisitorSource for SqliteStore {
    fn scan(&self, brand: &BrandId, visit: &mut VisitFn<'_>) -> Result<(), PipelineError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, json_extract(summaries, '$.amt'), json_extract(summaries, '$.trn')
                 FROM visitors
                 WHERE brand_id = ?1 AND json_extract(summaries, '$.amt') > 0",
            )
            .context("Failed to prepare visitor scan")?;

        let mut rows = stmt
            .query([brand.as_str()])
            .context("Failed to query visitors")?;

        // Rows are stepped one at a time; only the current visitor is in memory
        while let Some(row) = rows.next().context("Failed to read visitor row")? {
            let id: String = row.get(0).context("Invalid visitor id")?;
            let amt: f64 = row
                .get(1)
                .with_context(|| format!("Invalid summaries.amt for visitor {}", id))?;
            let trn: Option<i64> = row
                .get(2)
                .with_context(|| format!("Invalid summaries.trn for visitor {}", id))?;
            let trn = u32::try_from(trn.unwrap_or(0))
                .map_err(|_| anyhow!("summaries.trn out of range for visitor {}", id))?;

            visit(Visitor {
                id: VisitorId(id),
                brand_id: brand.clone(),
                summaries: Summaries { amt, trn },
            })?;
        }

        Ok(())
    }
}

impl ZscoreWriter for SqliteStore {
    fn update_zscore(&self, id: &VisitorId, zscore: &StatsPair) -> Result<()> {
        let zscore_json = serde_json::to_string(zscore)?;

        // Only the zscore column changes, so an open scan over the brand is unaffected
        let updated = self
            .conn
            .prepare_cached("UPDATE visitors SET zscore = ?1 WHERE id = ?2")?
            .execute(params![zscore_json, id.as_str()])?;

        if updated == 0 {
            return Err(anyhow!("visitor {} not found", id));
        }
        Ok(())
    }
}
