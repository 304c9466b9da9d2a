use sqlgate_core::config::DbEngine;

/// SQL dialect: placeholder style, identifier quoting, limit/offset form,
/// and how generated keys are read back after an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `$1, $2, ...` placeholders, double-quote quoting, `RETURNING`.
    Postgres,
    /// `?` placeholders, backtick quoting, `LAST_INSERT_ID()`.
    MySql,
    /// `:1, :2, ...` placeholders, double-quote quoting, `OFFSET ... FETCH`.
    Oracle,
}

impl Dialect {
    pub fn from_engine(engine: DbEngine) -> Dialect {
        match engine {
            DbEngine::Postgresql => Dialect::Postgres,
            DbEngine::Mysql => Dialect::MySql,
            DbEngine::Oracle => Dialect::Oracle,
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::MySql => "?".to_string(),
            Dialect::Oracle => format!(":{index}"),
        }
    }

    /// Quote an identifier or alias.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{ident}`"),
            Dialect::Postgres | Dialect::Oracle => format!("\"{ident}\""),
        }
    }

    /// Limit/offset clause, including the leading space when non-empty.
    pub fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match self {
            Dialect::Postgres | Dialect::MySql => {
                let mut clause = String::new();
                match (limit, offset) {
                    (Some(l), _) => clause.push_str(&format!(" LIMIT {l}")),
                    // MySQL has no bare OFFSET; an all-rows LIMIT carries it.
                    (None, Some(_)) if *self == Dialect::MySql => {
                        clause.push_str(" LIMIT 18446744073709551615")
                    }
                    _ => {}
                }
                if let Some(o) = offset {
                    clause.push_str(&format!(" OFFSET {o}"));
                }
                clause
            }
            Dialect::Oracle => {
                let mut clause = String::new();
                if let Some(o) = offset {
                    clause.push_str(&format!(" OFFSET {o} ROWS"));
                } else if limit.is_some() {
                    clause.push_str(" OFFSET 0 ROWS");
                }
                if let Some(l) = limit {
                    clause.push_str(&format!(" FETCH NEXT {l} ROWS ONLY"));
                }
                clause
            }
        }
    }

    /// Whether `INSERT ... RETURNING` yields the inserted row as a result
    /// set through the connection capability.
    pub fn supports_returning(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Follow-up query that reads the key generated by the last insert on
    /// this connection. `None` when the dialect returns rows directly.
    pub fn generated_key_query(&self, table: &str) -> Option<String> {
        match self {
            Dialect::Postgres => None,
            Dialect::MySql => Some("SELECT LAST_INSERT_ID()".to_string()),
            Dialect::Oracle => Some(format!("SELECT {table}_seq.CURRVAL FROM dual")),
        }
    }

    pub fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }
}
