use crate::error::{StoreError, StoreResult};
use crate::models::{self, ActionsTaken, ExecutionRecord, Message, MessageFilter, PendingExecution};
use crate::predicates::{MILLIS_PER_DAY, StringPredicate};
use crate::rules::{Condition, MatchMode, Rule};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashSet;
use tracing::{debug, info};

const LABEL_SEPARATOR: char = '\u{1f}';

/// Unicode-lowercased copies of the text columns. Rule filters match against
/// these because SQLite's `lower()` and `LIKE` only fold ASCII.
const FOLDED_COLUMNS: [&str; 4] = ["from_folded", "to_folded", "subject_folded", "body_folded"];

const MESSAGE_SELECT: &str = "SELECT m.id, m.thread_id, m.snippet, m.from_address, m.to_address, m.subject, \
     m.internal_date, m.body_plain, m.is_read, m.raw_data, m.created_at, m.updated_at, \
     (SELECT GROUP_CONCAT(ml.label_id, char(31)) FROM message_labels ml WHERE ml.message_id = m.id) AS labels \
     FROM messages m";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        use sqlx::sqlite::SqliteConnectOptions;
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// A private in-memory database. One connection, never recycled, so the
    /// data lives as long as the pool.
    #[cfg(test)]
    pub async fn in_memory() -> StoreResult<Self> {
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        self.add_folded_columns().await
    }

    /// Stores created before the folded columns existed get them added and
    /// filled in.
    async fn add_folded_columns(&self) -> StoreResult<()> {
        let existing: HashSet<String> = sqlx::query("SELECT name FROM pragma_table_info('messages')")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| r.get(0))
            .collect();
        let missing: Vec<&str> = FOLDED_COLUMNS
            .into_iter()
            .filter(|column| !existing.contains(*column))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for column in &missing {
            sqlx::query(&format!("ALTER TABLE messages ADD COLUMN {} TEXT", column))
                .execute(&mut *tx)
                .await?;
        }
        let rows = sqlx::query("SELECT id, from_address, to_address, subject, body_plain FROM messages")
            .fetch_all(&mut *tx)
            .await?;
        for row in &rows {
            sqlx::query(
                "UPDATE messages SET from_folded = ?, to_folded = ?, subject_folded = ?, body_folded = ?
                 WHERE id = ?",
            )
            .bind(fold(row.get("from_address")))
            .bind(fold(row.get("to_address")))
            .bind(fold(row.get("subject")))
            .bind(fold(row.get("body_plain")))
            .bind(row.get::<String, _>("id"))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!("Added folded text columns, backfilled {} messages", rows.len());
        Ok(())
    }

    pub async fn upsert_labels(&self, labels: &[models::Label]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for label in labels {
            sqlx::query(
                "INSERT INTO labels (id, name, type) VALUES (?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET name=excluded.name, type=excluded.type",
            )
            .bind(&label.id)
            .bind(&label.name)
            .bind(&label.label_type)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Resolves a label given by id or (case-insensitive) name to its id.
    pub async fn find_label_id(&self, id_or_name: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query(
            "SELECT id FROM labels WHERE id = ? OR lower(name) = lower(?)
             ORDER BY (id = ?) DESC LIMIT 1",
        )
        .bind(id_or_name)
        .bind(id_or_name)
        .bind(id_or_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get(0)))
    }

    #[cfg(test)]
    pub async fn upsert_message(&self, message: &Message) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        write_message(&mut *tx, message, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Upserts a batch in one transaction. Remote state wins for read flag and
    /// labels; `created_at` survives updates.
    pub async fn upsert_messages(&self, messages: &[Message]) -> StoreResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for message in messages {
            write_message(&mut *tx, message, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn existing_message_ids(&self, ids: &[String]) -> StoreResult<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT id FROM messages WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    #[cfg(test)]
    pub async fn get_message(&self, id: &str) -> StoreResult<Option<Message>> {
        let row = sqlx::query(&format!("{} WHERE m.id = ?", MESSAGE_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    pub async fn query_by_filter(
        &self,
        filter: &MessageFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Message>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(MESSAGE_SELECT);
        qb.push(" WHERE 1 = 1");
        if let Some(from) = &filter.from_contains {
            qb.push(" AND m.from_folded LIKE ");
            qb.push_bind(like_pattern(from));
            qb.push(" ESCAPE '\\'");
        }
        if let Some(subject) = &filter.subject_contains {
            qb.push(" AND m.subject_folded LIKE ");
            qb.push_bind(like_pattern(subject));
            qb.push(" ESCAPE '\\'");
        }
        if let Some(is_read) = filter.is_read {
            qb.push(" AND m.is_read = ");
            qb.push_bind(is_read);
        }
        if let Some(label_id) = &filter.label_id {
            qb.push(
                " AND EXISTS (SELECT 1 FROM message_labels ml WHERE ml.message_id = m.id AND ml.label_id = ",
            );
            qb.push_bind(label_id.clone());
            qb.push(")");
        }
        qb.push(" ORDER BY m.internal_date DESC, m.id LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Messages this rule may apply to: those passing the SQL translation of
    /// the rule's conditions, minus those the rule has already acted on.
    ///
    /// Text conditions translate exactly through the folded columns. Date
    /// bounds may be wider than the matcher's, so callers must still run the
    /// matcher on every row.
    pub async fn query_for_rule(&self, rule: &Rule, now: DateTime<Utc>) -> StoreResult<Vec<Message>> {
        let combinator = match rule.mode {
            MatchMode::All => " AND ",
            MatchMode::Any => " OR ",
            MatchMode::Invalid(_) => return Ok(Vec::new()),
        };
        let live: Vec<&Condition> = rule.conditions.iter().filter(|c| !c.is_inert()).collect();
        let unsatisfiable = match rule.mode {
            MatchMode::All => live.len() < rule.conditions.len() || live.is_empty(),
            _ => live.is_empty(),
        };
        if unsatisfiable {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(MESSAGE_SELECT);
        qb.push(
            " WHERE NOT EXISTS (SELECT 1 FROM rule_executions re WHERE re.message_id = m.id AND re.rule_id = ",
        );
        qb.push_bind(rule.id.clone());
        qb.push(") AND (");
        // Inert conditions are false, so in `any` mode the live ones decide.
        for (i, condition) in live.iter().enumerate() {
            if i > 0 {
                qb.push(combinator);
            }
            push_condition(&mut qb, condition, now);
        }
        qb.push(") ORDER BY m.internal_date DESC, m.id");

        debug!(rule = %rule.id, conditions = live.len(), "Selecting candidates");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Commits executions in one transaction. Entries without actions are
    /// skipped; an entry already recorded for the same rule and message is
    /// left untouched. Returns how many rows were written.
    pub async fn record_executions(&self, batch: &[PendingExecution]) -> StoreResult<u64> {
        let executed_at = Utc::now();
        let mut written = 0;
        let mut tx = self.pool.begin().await?;
        for execution in batch.iter().filter(|e| !e.actions_taken.is_empty()) {
            let actions = serde_json::to_string(&execution.actions_taken).map_err(|source| {
                StoreError::Encode {
                    what: "actions_taken",
                    source,
                }
            })?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO rule_executions (message_id, rule_id, executed_at, actions_taken)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&execution.message_id)
            .bind(&execution.rule_id)
            .bind(executed_at)
            .bind(actions)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    pub async fn executions_for_message(&self, message_id: &str) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT id, message_id, rule_id, executed_at, actions_taken
             FROM rule_executions
             WHERE message_id = ?
             ORDER BY executed_at ASC, id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ExecutionRecord {
                id: row.get(0),
                message_id: row.get(1),
                rule_id: row.get(2),
                executed_at: row.get(3),
                actions_taken: serde_json::from_str::<ActionsTaken>(&row.get::<String, _>(4))
                    .unwrap_or_default(),
            })
            .collect())
    }

    pub async fn mark_message_as_read(&self, id: &str, is_read: bool) -> StoreResult<()> {
        sqlx::query("UPDATE messages SET is_read = ?, updated_at = ? WHERE id = ?")
            .bind(is_read)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_label_to_message(&self, message_id: &str, label_id: &str) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?, ?)")
            .bind(message_id)
            .bind(label_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_label_from_message(&self, message_id: &str, label_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM message_labels WHERE message_id = ? AND label_id = ?")
            .bind(message_id)
            .bind(label_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn write_message(
    conn: &mut SqliteConnection,
    msg: &Message,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (id, thread_id, snippet, from_address, to_address, subject, internal_date, body_plain, is_read, raw_data, created_at, updated_at,
         from_folded, to_folded, subject_folded, body_folded)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET thread_id=excluded.thread_id, snippet=excluded.snippet,
         from_address=excluded.from_address, to_address=excluded.to_address, subject=excluded.subject,
         internal_date=excluded.internal_date, body_plain=excluded.body_plain, is_read=excluded.is_read,
         raw_data=excluded.raw_data, updated_at=excluded.updated_at,
         from_folded=excluded.from_folded, to_folded=excluded.to_folded,
         subject_folded=excluded.subject_folded, body_folded=excluded.body_folded",
    )
    .bind(&msg.id)
    .bind(&msg.thread_id)
    .bind(&msg.snippet)
    .bind(&msg.from_address)
    .bind(&msg.to_address)
    .bind(&msg.subject)
    .bind(msg.internal_date)
    .bind(&msg.body_plain)
    .bind(msg.is_read)
    .bind(&msg.raw_data)
    .bind(now)
    .bind(now)
    .bind(fold(msg.from_address.as_deref()))
    .bind(fold(msg.to_address.as_deref()))
    .bind(fold(msg.subject.as_deref()))
    .bind(fold(msg.body_plain.as_deref()))
    .execute(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM message_labels WHERE message_id = ?")
        .bind(&msg.id)
        .execute(&mut *conn)
        .await?;
    for label_id in &msg.labels {
        sqlx::query("INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?, ?)")
            .bind(&msg.id)
            .bind(label_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn message_from_row(row: &SqliteRow) -> Message {
    let labels: Option<String> = row.get("labels");
    Message {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        snippet: row.get("snippet"),
        from_address: row.get("from_address"),
        to_address: row.get("to_address"),
        subject: row.get("subject"),
        internal_date: row.get("internal_date"),
        body_plain: row.get("body_plain"),
        is_read: row.get("is_read"),
        labels: labels
            .map(|l| l.split(LABEL_SEPARATOR).map(str::to_string).collect())
            .unwrap_or_default(),
        raw_data: row.get("raw_data"),
        created_at: row.try_get("created_at").ok(),
        updated_at: row.try_get("updated_at").ok(),
    }
}

/// The same folding the predicates apply before comparing.
fn fold(text: Option<&str>) -> Option<String> {
    text.map(str::to_lowercase)
}

fn like_pattern(value: &str) -> String {
    let escaped = value
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_condition(qb: &mut QueryBuilder<'_, Sqlite>, condition: &Condition, now: DateTime<Utc>) {
    match condition {
        Condition::Text {
            field,
            predicate,
            value,
        } => {
            let column = format!("m.{}", field.folded_column());
            match predicate {
                StringPredicate::Contains => {
                    qb.push(format!("{} LIKE ", column));
                    qb.push_bind(like_pattern(value));
                    qb.push(" ESCAPE '\\'");
                }
                StringPredicate::DoesNotContain => {
                    qb.push(format!("NOT ({} LIKE ", column));
                    qb.push_bind(like_pattern(value));
                    qb.push(" ESCAPE '\\')");
                }
                StringPredicate::Equals => {
                    qb.push(format!("{} = ", column));
                    qb.push_bind(value.to_lowercase());
                }
                StringPredicate::DoesNotEqual => {
                    qb.push(format!("{} <> ", column));
                    qb.push_bind(value.to_lowercase());
                }
            }
        }
        Condition::Received { predicate, amount } => {
            // `less than N days` is exact as `received > now - N days`. For
            // `greater than` the bound is a day wider than the floored count
            // needs, which keeps late-evaluated rows inside the result.
            let offset = predicate.threshold_days(*amount).saturating_mul(MILLIS_PER_DAY);
            let bound = now.timestamp_millis().saturating_sub(offset);
            if predicate.is_less_than() {
                qb.push("m.internal_date > ");
            } else {
                qb.push("m.internal_date < ");
            }
            qb.push_bind(bound);
        }
        Condition::Inert { .. } => {
            qb.push("0");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleDefinition, RuleSet};
    use crate::testing::message;
    use chrono::Duration;

    fn rule(json: &str) -> Rule {
        let def: RuleDefinition = serde_json::from_str(json).unwrap();
        RuleSet::from_definitions(vec![def]).iter().next().unwrap().clone()
    }

    fn pending(message_id: &str, rule_id: &str, action: &str) -> PendingExecution {
        let mut actions_taken = ActionsTaken::new();
        actions_taken.insert(action.to_string(), None);
        PendingExecution {
            message_id: message_id.to_string(),
            rule_id: rule_id.to_string(),
            actions_taken,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_state_and_keeps_created_at() {
        let db = Database::in_memory().await.unwrap();
        let mut msg = message("m1", "a@example.com", "Hello");
        msg.labels = vec!["INBOX".to_string(), "UNREAD".to_string()];
        db.upsert_message(&msg).await.unwrap();
        let first = db.get_message("m1").await.unwrap().unwrap();

        msg.is_read = true;
        msg.labels = vec!["INBOX".to_string()];
        db.upsert_messages(&[msg]).await.unwrap();
        let second = db.get_message("m1").await.unwrap().unwrap();

        assert!(second.is_read);
        assert_eq!(second.labels, vec!["INBOX".to_string()]);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_existing_message_ids() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("m1", "a@example.com", "One")).await.unwrap();

        let ids = vec!["m1".to_string(), "m2".to_string()];
        let existing = db.existing_message_ids(&ids).await.unwrap();
        assert!(existing.contains("m1"));
        assert!(!existing.contains("m2"));
    }

    #[tokio::test]
    async fn test_query_for_rule_excludes_recorded_messages() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("1", "boss@co.com", "urgent")).await.unwrap();
        db.upsert_message(&message("2", "boss@co.com", "urgent too")).await.unwrap();
        let r1 = rule(r#"{"id": "r1", "conditions": [{"field": "from", "predicate": "contains", "value": "boss"}]}"#);

        db.record_executions(&[pending("1", "r1", "mark_as_read")]).await.unwrap();

        let ids: Vec<String> = db
            .query_for_rule(&r1, Utc::now())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["2".to_string()]);

        // Other rules still see message 1.
        let r2 = rule(r#"{"id": "r2", "conditions": [{"field": "from", "predicate": "contains", "value": "boss"}]}"#);
        assert_eq!(db.query_for_rule(&r2, Utc::now()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_for_rule_pushes_down_conditions() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("1", "Boss@Co.com", "URGENT: reply")).await.unwrap();
        db.upsert_message(&message("2", "boss@co.com", "lunch?")).await.unwrap();
        db.upsert_message(&message("3", "news@shop.com", "50% off")).await.unwrap();

        let all = rule(
            r#"{"id": "all", "predicate": "all", "conditions": [
                {"field": "from", "predicate": "contains", "value": "boss@co"},
                {"field": "subject", "predicate": "contains", "value": "urgent"}
            ]}"#,
        );
        let found = db.query_for_rule(&all, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");

        let any = rule(
            r#"{"id": "any", "predicate": "any", "conditions": [
                {"field": "subject", "predicate": "contains", "value": "urgent"},
                {"field": "subject", "predicate": "contains", "value": "50%"}
            ]}"#,
        );
        let mut ids: Vec<String> = db
            .query_for_rule(&any, Utc::now())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1".to_string(), "3".to_string()]);
    }

    #[tokio::test]
    async fn test_text_conditions_fold_like_the_matcher() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("kelvin", "\u{212A}elvin@lab.org", "Temperatures")).await.unwrap();
        db.upsert_message(&message("turkish", "a@example.com", "İSTATİSTİK")).await.unwrap();
        db.upsert_message(&message("plain", "b@example.com", "Statistics")).await.unwrap();

        let kelvin = rule(r#"{"id": "k", "conditions": [{"field": "from", "predicate": "contains", "value": "kelvin@"}]}"#);
        let found = db.query_for_rule(&kelvin, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "kelvin");

        let equals = rule(r#"{"id": "e", "conditions": [{"field": "subject", "predicate": "equals", "value": "İstatİstİk"}]}"#);
        let found = db.query_for_rule(&equals, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "turkish");

        let negated = rule(r#"{"id": "n", "conditions": [{"field": "subject", "predicate": "does_not_contain", "value": "stati"}]}"#);
        let found = db.query_for_rule(&negated, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "kelvin");
    }

    #[tokio::test]
    async fn test_migrations_backfill_folded_columns() {
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE messages (
                id TEXT PRIMARY KEY, thread_id TEXT NOT NULL, snippet TEXT, from_address TEXT,
                to_address TEXT, subject TEXT, internal_date INTEGER NOT NULL, body_plain TEXT,
                is_read BOOLEAN NOT NULL DEFAULT 0, raw_data TEXT,
                created_at TEXT NOT NULL, updated_at TEXT NOT NULL
            );
            INSERT INTO messages (id, thread_id, from_address, subject, internal_date, created_at, updated_at)
            VALUES ('old', 't', 'Boss@Co.com', 'ÜBER urgent', 0, '2024-01-01', '2024-01-01');",
        )
        .execute(&pool)
        .await
        .unwrap();

        let db = Database { pool };
        db.run_migrations().await.unwrap();
        db.run_migrations().await.unwrap();

        let r = rule(r#"{"id": "r", "conditions": [{"field": "subject", "predicate": "contains", "value": "über"}]}"#);
        let found = db.query_for_rule(&r, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "old");
    }

    #[tokio::test]
    async fn test_like_wildcards_are_literal() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("1", "a@example.com", "100% done")).await.unwrap();
        db.upsert_message(&message("2", "a@example.com", "1000 done")).await.unwrap();
        let r = rule(r#"{"id": "r", "conditions": [{"field": "subject", "predicate": "contains", "value": "0%"}]}"#);

        let found = db.query_for_rule(&r, Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");
    }

    #[tokio::test]
    async fn test_query_for_rule_date_bounds() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let mut recent = message("recent", "a@example.com", "x");
        recent.internal_date = (now - Duration::days(2)).timestamp_millis();
        let mut old = message("old", "a@example.com", "x");
        old.internal_date = (now - Duration::days(40)).timestamp_millis();
        db.upsert_messages(&[recent, old]).await.unwrap();

        let newer = rule(r#"{"id": "n", "conditions": [{"field": "received_date", "predicate": "less_than_days", "value": "7"}]}"#);
        let found = db.query_for_rule(&newer, now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "recent");

        let older = rule(r#"{"id": "o", "conditions": [{"field": "received_date", "predicate": "greater_than_months", "value": "1"}]}"#);
        let found = db.query_for_rule(&older, now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "old");
    }

    #[tokio::test]
    async fn test_query_for_rule_without_conditions_is_empty() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("1", "a@example.com", "x")).await.unwrap();

        let empty = rule(r#"{"id": "e", "predicate": "any"}"#);
        assert!(db.query_for_rule(&empty, Utc::now()).await.unwrap().is_empty());

        let inert = rule(r#"{"id": "i", "conditions": [{"field": "cc", "predicate": "contains", "value": "a"}]}"#);
        assert!(db.query_for_rule(&inert, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_executions_is_idempotent_per_rule_and_message() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("1", "a@example.com", "x")).await.unwrap();

        let written = db
            .record_executions(&[pending("1", "r1", "mark_as_read"), pending("1", "r1", "mark_as_unread")])
            .await
            .unwrap();
        assert_eq!(written, 1);

        let empty = PendingExecution {
            message_id: "1".to_string(),
            rule_id: "r2".to_string(),
            actions_taken: ActionsTaken::new(),
        };
        assert_eq!(db.record_executions(&[empty]).await.unwrap(), 0);

        let history = db.executions_for_message("1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].rule_id, "r1");
        assert!(history[0].actions_taken.contains_key("mark_as_read"));
    }

    #[tokio::test]
    async fn test_record_executions_rolls_back_on_failure() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_message(&message("1", "a@example.com", "x")).await.unwrap();

        // Message "ghost" violates the foreign key, so the whole batch fails.
        let result = db
            .record_executions(&[pending("1", "r1", "mark_as_read"), pending("ghost", "r1", "mark_as_read")])
            .await;
        assert!(result.is_err());
        assert!(db.executions_for_message("1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_by_filter() {
        let db = Database::in_memory().await.unwrap();
        let mut read = message("1", "alice@example.com", "Invoice");
        read.is_read = true;
        read.labels = vec!["Receipts".to_string()];
        db.upsert_message(&read).await.unwrap();
        db.upsert_message(&message("2", "bob@example.com", "Invoice")).await.unwrap();

        let unread = MessageFilter {
            is_read: Some(false),
            ..Default::default()
        };
        let found = db.query_by_filter(&unread, 10, 0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "2");

        let labelled = MessageFilter {
            label_id: Some("Receipts".to_string()),
            subject_contains: Some("invoice".to_string()),
            ..Default::default()
        };
        let found = db.query_by_filter(&labelled, 10, 0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");

        let all = MessageFilter::default();
        assert_eq!(db.query_by_filter(&all, 1, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_label_id_by_name_or_id() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_labels(&[models::Label {
            id: "Label_42".to_string(),
            name: "Receipts".to_string(),
            label_type: "user".to_string(),
        }])
        .await
        .unwrap();

        assert_eq!(db.find_label_id("receipts").await.unwrap().as_deref(), Some("Label_42"));
        assert_eq!(db.find_label_id("Label_42").await.unwrap().as_deref(), Some("Label_42"));
        assert_eq!(db.find_label_id("Travel").await.unwrap(), None);
    }
}
