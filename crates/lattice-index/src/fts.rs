//! Full-text index over tokenized STRING/URL objects, backed by SQLite
//! FTS5 (spec §4.6, §6). The sanitizer strips anything that could leak
//! into the underlying SQL or FTS5 query-expression grammar.

use rusqlite::{params, Connection};

const SQL_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "union", "exec", "execute", "alter", "create", "pragma",
];

/// Strip everything the FTS5 MATCH grammar or the surrounding SQL could
/// interpret beyond plain term matching, while preserving balanced quoted
/// phrases (spec §8: "balanced quotes preserved; unbalanced quotes,
/// semicolons, SQL keywords, column-filters, NEAR, caret, and block
/// comments are stripped").
pub fn sanitize_query(raw: &str) -> String {
    let mut without_comments = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    break;
                }
            }
            continue;
        }
        without_comments.push(c);
    }

    let quote_count = without_comments.matches('"').count();
    let stripped_quotes: String = if quote_count % 2 == 0 {
        without_comments.clone()
    } else {
        without_comments.chars().filter(|&c| c != '"').collect()
    };

    let no_semicolons: String = stripped_quotes.chars().filter(|&c| c != ';').collect();
    let no_caret: String = no_semicolons.replace('^', " ");
    let no_column_filter: String = no_caret.replace(':', " ");

    let mut out_tokens = Vec::new();
    let mut in_quote = false;
    let mut current = String::new();
    for c in no_column_filter.chars() {
        if c == '"' {
            in_quote = !in_quote;
            current.push(c);
            continue;
        }
        if c.is_whitespace() && !in_quote {
            if !current.is_empty() {
                out_tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        out_tokens.push(current);
    }

    out_tokens
        .into_iter()
        .filter(|tok| {
            let lower = tok.to_ascii_lowercase();
            let bare = lower.trim_matches('"');
            bare != "near" && !SQL_KEYWORDS.contains(&bare)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-predicate inverted index over document content (spec §4.6).
pub struct FtsIndex {
    conn: Connection,
}

impl FtsIndex {
    pub fn open(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS fts_index USING fts5(subject, predicate, content);",
        )?;
        Ok(Self { conn })
    }

    pub fn index_document(&self, subject: &str, predicate: &str, content: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO fts_index (subject, predicate, content) VALUES (?1, ?2, ?3)",
            params![subject, predicate, content],
        )?;
        Ok(())
    }

    /// `query` is sanitized before reaching FTS5; `predicate_filter`
    /// optionally restricts the match to one predicate.
    pub fn query(
        &self,
        query: &str,
        predicate_filter: Option<&str>,
        limit: u32,
    ) -> rusqlite::Result<Vec<String>> {
        let sanitized = sanitize_query(query);
        if sanitized.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sql = match predicate_filter {
            Some(_) => {
                "SELECT subject FROM fts_index WHERE predicate = ?2 AND fts_index MATCH ?1 LIMIT ?3"
            }
            None => "SELECT subject FROM fts_index WHERE fts_index MATCH ?1 LIMIT ?2",
        };
        let mut stmt = self.conn.prepare(sql)?;
        match predicate_filter {
            Some(p) => stmt
                .query_map(params![sanitized, p, limit], |row| row.get::<_, String>(0))?
                .collect(),
            None => stmt
                .query_map(params![sanitized, limit], |row| row.get::<_, String>(0))?
                .collect(),
        }
    }
}
