use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

const RULE: &str =
    "--------------------------------------------------------------------------------";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query> [database_url]", args[0]);
        eprintln!("Search query matches against Sender or Subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);
    let database_url = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("sqlite:gmail-rules.db");

    let pool = SqlitePoolOptions::new()
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let row = sqlx::query(
        "SELECT id, from_address, subject, internal_date, is_read, body_plain,
                (SELECT GROUP_CONCAT(label_id, ', ') FROM message_labels WHERE message_id = m.id) AS labels
         FROM messages m
         WHERE from_address LIKE ? OR subject LIKE ?
         ORDER BY internal_date DESC
         LIMIT 1",
    )
    .bind(&search_term)
    .bind(&search_term)
    .fetch_optional(&pool)
    .await?;

    let Some(row) = row else {
        println!("No messages found matching '{}'", query);
        return Ok(());
    };

    let id: String = row.get("id");
    let from: Option<String> = row.get("from_address");
    let subject: Option<String> = row.get("subject");
    let date: i64 = row.get("internal_date");
    let is_read: bool = row.get("is_read");
    let labels: Option<String> = row.get("labels");
    let body_plain: Option<String> = row.get("body_plain");

    let received = chrono::DateTime::from_timestamp_millis(date)
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| date.to_string());

    println!("Found Message:");
    println!("ID: {}", id);
    println!("From: {:?}", from);
    println!("Subject: {:?}", subject);
    println!("Received: {}", received);
    println!("Read: {}", is_read);
    println!("Labels: {}", labels.unwrap_or_default());
    println!("{}", RULE);
    println!("BODY PLAIN:");
    println!("{}", body_plain.as_deref().unwrap_or("(None)"));
    println!("{}", RULE);

    let executions = sqlx::query(
        "SELECT rule_id, executed_at, actions_taken FROM rule_executions
         WHERE message_id = ? ORDER BY executed_at, id",
    )
    .bind(&id)
    .fetch_all(&pool)
    .await?;

    println!("RULE EXECUTIONS ({}):", executions.len());
    for exec in executions {
        let rule_id: String = exec.get("rule_id");
        let executed_at: String = exec.get("executed_at");
        let actions: String = exec.get("actions_taken");
        println!("{}  {}  {}", executed_at, rule_id, actions);
    }

    Ok(())
}
