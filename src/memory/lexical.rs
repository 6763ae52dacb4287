//! Sparse retrieval over a collection's FTS5 table.
//!
//! Each collection has an `fts_<name>` table whose rowid is the entry's `seq`
//! in `memory_entries`. Inserts are incremental (one row per write). Scores
//! are negated FTS5 BM25 ranks, so larger is better.

use rusqlite::{params, Connection};

use crate::db::schema::fts_table;
use crate::error::Result;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on",
    "or", "our", "she", "so", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why", "will",
    "with", "you", "your",
];

/// Add one entry's text to the collection's index.
pub fn index(conn: &Connection, collection: &str, seq: i64, text: &str) -> Result<()> {
    let table = fts_table(collection);
    conn.execute(&format!("DELETE FROM {table} WHERE rowid = ?1"), params![seq])?;
    conn.execute(
        &format!("INSERT INTO {table} (rowid, text) VALUES (?1, ?2)"),
        params![seq, text],
    )?;
    Ok(())
}

pub fn remove(conn: &Connection, collection: &str, seq: i64) -> Result<()> {
    let table = fts_table(collection);
    conn.execute(&format!("DELETE FROM {table} WHERE rowid = ?1"), params![seq])?;
    Ok(())
}

/// BM25 search. Returns `(id, score)` best first; equal scores keep insertion order.
///
/// An empty query, or one made only of stop-words, yields an empty list.
pub fn search(conn: &Connection, collection: &str, query: &str, k: usize) -> Result<Vec<(String, f64)>> {
    let expr = build_match_expression(query);
    if expr.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let table = fts_table(collection);
    let sql = format!(
        "SELECT e.id, m.score FROM ( \
             SELECT rowid AS seq, -rank AS score FROM {table} \
             WHERE {table} MATCH ?1 ORDER BY rank, rowid LIMIT ?2 \
         ) m JOIN memory_entries e ON e.seq = m.seq \
         ORDER BY m.score DESC, m.seq ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(params![expr, k as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

/// Split on non-alphanumerics, lower-case, drop stop-words, and OR the quoted terms.
fn build_match_expression(query: &str) -> String {
    let mut seen = Vec::new();
    for token in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        if STOP_WORDS.contains(&token.as_str()) || seen.contains(&token) {
            continue;
        }
        seen.push(token);
    }
    seen.iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}
