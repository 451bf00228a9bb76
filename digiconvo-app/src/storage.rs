use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use digiconvo_core::ConversationSnapshot;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::settings::data_dir;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub scenario_id: String,
    pub started_at: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub created_at: String,
    pub emotion: Option<String>,
    pub intensity: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionCount {
    pub emotion: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPayload {
    pub range_days: usize,
    pub sessions: usize,
    pub user_messages: usize,
    pub ai_messages: usize,
    pub emotions: Vec<EmotionCount>,
}

/// SQLite history of finished practice sessions.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db_path: PathBuf,
}

impl LocalStore {
    pub fn default_db_path() -> PathBuf {
        data_dir().join("digiconvo.db")
    }

    pub fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, String> {
        let conn = Connection::open(&self.db_path).map_err(|e| e.to_string())?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| e.to_string())?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS sessions (
              id TEXT PRIMARY KEY,
              scenario_id TEXT NOT NULL,
              started_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
              id TEXT PRIMARY KEY,
              session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
              sender TEXT NOT NULL,
              content TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              emotion TEXT,
              intensity INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at);
            "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Persist a session transcript. Re-recording the same session only adds
    /// messages not stored yet. Returns the number of new messages.
    pub fn record_session(&self, snapshot: &ConversationSnapshot) -> Result<usize, String> {
        let Some(scenario_id) = snapshot.scenario_id.as_deref() else {
            return Ok(0);
        };
        let Some(first) = snapshot.messages.first() else {
            return Ok(0);
        };

        let mut conn = self.open()?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        tx.execute(
            "INSERT OR IGNORE INTO sessions (id, scenario_id, started_at) VALUES (?1, ?2, ?3)",
            params![snapshot.session_id, scenario_id, first.timestamp.timestamp()],
        )
        .map_err(|e| e.to_string())?;

        let mut inserted = 0usize;
        for msg in &snapshot.messages {
            inserted += tx
                .execute(
                    r#"
                    INSERT OR IGNORE INTO messages
                    (id, session_id, sender, content, created_at, emotion, intensity)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        msg.id,
                        snapshot.session_id,
                        msg.sender.as_str(),
                        msg.content,
                        msg.timestamp.timestamp(),
                        msg.emotion.as_ref().map(|e| e.tone.as_str()),
                        msg.emotion.as_ref().map(|e| e.intensity as i64),
                    ],
                )
                .map_err(|e| e.to_string())?;
        }
        tx.commit().map_err(|e| e.to_string())?;
        Ok(inserted)
    }

    /// Delete sessions started more than `retention_days` ago.
    pub fn prune_history(&self, retention_days: usize) -> Result<usize, String> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let conn = self.open()?;
        let changed = conn
            .execute(
                "DELETE FROM sessions WHERE started_at < ?1",
                params![cutoff.timestamp()],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed)
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, String> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.scenario_id, s.started_at, COUNT(m.id)
                 FROM sessions s LEFT JOIN messages m ON m.session_id = s.id
                 GROUP BY s.id ORDER BY s.started_at DESC LIMIT ?1",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query(params![limit.clamp(1, 500) as i64])
            .map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            out.push(SessionSummary {
                id: row.get(0).map_err(|e| e.to_string())?,
                scenario_id: row.get(1).map_err(|e| e.to_string())?,
                started_at: ts_to_rfc3339(row.get::<_, i64>(2).map_err(|e| e.to_string())?),
                message_count: row.get::<_, i64>(3).map_err(|e| e.to_string())? as usize,
            });
        }
        Ok(out)
    }

    pub fn session_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, String> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, sender, content, created_at, emotion, intensity
                 FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt.query(params![session_id]).map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            out.push(StoredMessage {
                id: row.get(0).map_err(|e| e.to_string())?,
                sender: row.get(1).map_err(|e| e.to_string())?,
                content: row.get(2).map_err(|e| e.to_string())?,
                created_at: ts_to_rfc3339(row.get::<_, i64>(3).map_err(|e| e.to_string())?),
                emotion: row.get(4).map_err(|e| e.to_string())?,
                intensity: row
                    .get::<_, Option<i64>>(5)
                    .map_err(|e| e.to_string())?
                    .map(|v| v.clamp(0, u8::MAX as i64) as u8),
            });
        }
        Ok(out)
    }

    pub fn get_stats(&self, range_days: usize) -> Result<StatsPayload, String> {
        let range_days = range_days.clamp(1, 365);
        let cutoff = (Utc::now() - Duration::days(range_days as i64)).timestamp();
        let conn = self.open()?;

        let sessions: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sessions WHERE started_at >= ?1",
                params![cutoff],
                |row| row.get(0),
            )
            .map_err(|e| e.to_string())?;

        let count_sender = |sender: &str| -> Result<usize, String> {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE sender = ?1 AND created_at >= ?2",
                params![sender, cutoff],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(|e| e.to_string())
        };
        let user_messages = count_sender("user")?;
        let ai_messages = count_sender("ai")?;

        let mut stmt = conn
            .prepare(
                "SELECT emotion, COUNT(*) AS n FROM messages
                 WHERE emotion IS NOT NULL AND created_at >= ?1
                 GROUP BY emotion ORDER BY n DESC, emotion ASC",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt.query(params![cutoff]).map_err(|e| e.to_string())?;
        let mut emotions = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            emotions.push(EmotionCount {
                emotion: row.get(0).map_err(|e| e.to_string())?,
                count: row.get::<_, i64>(1).map_err(|e| e.to_string())? as usize,
            });
        }

        Ok(StatsPayload {
            range_days,
            sessions: sessions as usize,
            user_messages,
            ai_messages,
            emotions,
        })
    }
}

fn ts_to_rfc3339(ts: i64) -> String {
    let dt: DateTime<Utc> = Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now);
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use digiconvo_core::conversation::ConversationState;
    use digiconvo_core::conversation::{scenario, EmotionAnalysis, EmotionLabel, Message};

    fn temp_store(tag: &str) -> (LocalStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "digiconvo-store-{tag}-{}-{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let store = LocalStore::new(dir.join("digiconvo.db")).unwrap();
        (store, dir)
    }

    fn finished_session() -> ConversationSnapshot {
        let mut state = ConversationState::new(true);
        state.begin_session(scenario::find("5").unwrap().clone());
        let user = Message::user("Can we split the work differently?");
        let user_id = user.id.clone();
        state.messages.push(user);
        state.messages.push(Message::ai("Fine, but show me the numbers."));
        state.apply_emotion(
            &user_id,
            EmotionAnalysis::new(EmotionLabel::Calm, 3.0, 75.0, vec![]),
        );
        state.snapshot()
    }

    #[test]
    fn records_sessions_once_and_reads_them_back() {
        let (store, dir) = temp_store("record");
        let snapshot = finished_session();

        assert_eq!(store.record_session(&snapshot).unwrap(), 2);
        assert_eq!(store.record_session(&snapshot).unwrap(), 0);

        let sessions = store.list_sessions(10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].scenario_id, "5");
        assert_eq!(sessions[0].message_count, 2);

        let messages = store.session_messages(&snapshot.session_id).unwrap();
        assert_eq!(messages[0].sender, "user");
        assert_eq!(messages[0].emotion.as_deref(), Some("Calm"));
        assert_eq!(messages[0].intensity, Some(3));
        assert_eq!(messages[1].emotion, None);

        let stats = store.get_stats(7).unwrap();
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.ai_messages, 1);
        assert_eq!(stats.emotions[0].emotion, "Calm");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_or_scenarioless_sessions_are_skipped() {
        let (store, dir) = temp_store("skip");
        let idle = ConversationState::new(true).snapshot();
        assert_eq!(store.record_session(&idle).unwrap(), 0);
        assert!(store.list_sessions(10).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn prune_drops_old_sessions_with_their_messages() {
        let (store, dir) = temp_store("prune");
        let snapshot = finished_session();
        store.record_session(&snapshot).unwrap();

        let conn = store.open().unwrap();
        let old = (Utc::now() - Duration::days(40)).timestamp();
        conn.execute("UPDATE sessions SET started_at = ?1", params![old])
            .unwrap();

        assert_eq!(store.prune_history(30).unwrap(), 1);
        assert!(store.session_messages(&snapshot.session_id).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }
}
