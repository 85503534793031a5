//! `SET FMTONLY ON` discovery statements.
//!
//! A parameterized statement is rewritten into a `SELECT` over its tables
//! whose projection lists the select-list expressions followed by the
//! column each parameter is compared with or assigned to. Executing it in
//! FMTONLY mode returns the server-side shape of those columns without
//! running the statement itself. Parameters used directly as values have
//! no column and are left out of the projection.
//!
//! ```
//! use mssql_sql::FmtQuery;
//!
//! let query = FmtQuery::parse("INSERT INTO t (a, b, c) VALUES (?, '', ?)").unwrap();
//! assert_eq!(
//!     query.to_sql().unwrap(),
//!     "SET FMTONLY ON;SELECT a,c FROM t;SET FMTONLY OFF;"
//! );
//! ```

use crate::error::{Result, SqlError};
use crate::parser::{self, PLACEHOLDER, ParsedStatement, TableRef};

const FMTONLY_ON: &str = "SET FMTONLY ON;";
const FMTONLY_OFF: &str = ";SET FMTONLY OFF;";

/// A statement prepared for metadata discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtQuery {
    parsed: ParsedStatement,
}

impl FmtQuery {
    /// Parse the first statement of `sql`.
    pub fn parse(sql: &str) -> Result<Self> {
        let parsed = parser::parse(sql)?;
        Ok(Self { parsed })
    }

    /// Column targets in discovery order.
    ///
    /// `?` marks a parameter used directly as a value and an empty string a
    /// parameter whose column could not be determined.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.parsed.columns
    }

    /// Aliases declared in the select list.
    #[must_use]
    pub fn column_aliases(&self) -> &[String] {
        &self.parsed.column_aliases
    }

    /// Table references with their aliases, in source order.
    #[must_use]
    pub fn table_refs(&self) -> &[TableRef] {
        &self.parsed.tables
    }

    /// Referenced tables without aliases, deduplicated.
    ///
    /// A reference whose name is itself one of the declared aliases
    /// (`UPDATE x ... FROM Foo x`) is not a table and is left out.
    #[must_use]
    pub fn table_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for table in self.tables_excluding_aliases() {
            if !targets.contains(&table.name.as_str()) {
                targets.push(&table.name);
            }
        }
        targets
    }

    /// Aliases declared on table references.
    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.parsed.aliases
    }

    /// INSERT value tuples.
    #[must_use]
    pub fn values_list(&self) -> &[Vec<String>] {
        &self.parsed.values
    }

    /// Leading `WITH` clause, including a trailing space, or empty.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.parsed.prefix
    }

    fn tables_excluding_aliases(&self) -> impl Iterator<Item = &TableRef> {
        self.parsed.tables.iter().filter(|table| {
            !self
                .parsed
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(&table.name))
        })
    }

    /// Projection of the discovery statement.
    ///
    /// When any parameter is used directly as a value, placeholders are
    /// dropped since FMTONLY cannot bind them. Undetermined columns render
    /// as `NULL`. An empty projection renders as `*`.
    #[must_use]
    pub fn column_targets(&self) -> String {
        let drop_placeholders = self.parsed.columns.iter().any(|c| c == PLACEHOLDER);
        let rendered: Vec<&str> = self
            .parsed
            .columns
            .iter()
            .filter(|c| !(drop_placeholders && *c == PLACEHOLDER))
            .map(|c| if c.is_empty() { "NULL" } else { c.as_str() })
            .collect();

        if rendered.is_empty() && !drop_placeholders {
            "*".to_string()
        } else {
            rendered.join(",")
        }
    }

    /// FROM list of the discovery statement: `name alias` entries joined by
    /// commas, deduplicated.
    #[must_use]
    pub fn table_target_list(&self) -> String {
        let mut rendered: Vec<String> = Vec::new();
        for table in self.tables_excluding_aliases() {
            let entry = table.render();
            if !rendered.contains(&entry) {
                rendered.push(entry);
            }
        }
        rendered.join(",")
    }

    /// Build the complete discovery statement.
    pub fn to_sql(&self) -> Result<String> {
        let columns = self.column_targets();
        let tables = self.table_target_list();

        if columns.is_empty() {
            return Err(SqlError::EmptyProjection);
        }
        if tables.is_empty() && columns.split(',').any(|c| c == "*") {
            return Err(SqlError::EmptyProjection);
        }

        let mut sql = String::with_capacity(
            FMTONLY_ON.len() + self.parsed.prefix.len() + columns.len() + tables.len() + 32,
        );
        sql.push_str(FMTONLY_ON);
        sql.push_str(&self.parsed.prefix);
        sql.push_str("SELECT ");
        sql.push_str(&columns);
        if !tables.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&tables);
        }
        sql.push_str(FMTONLY_OFF);
        Ok(sql)
    }
}

/// Rewrite `sql` into its FMTONLY discovery statement.
///
/// An error means the statement cannot be described this way and the
/// caller should fall back to another discovery path.
pub fn rewrite(sql: &str) -> Result<String> {
    let result = FmtQuery::parse(sql).and_then(|query| query.to_sql());
    match &result {
        Ok(rewritten) => tracing::trace!(sql_len = sql.len(), rewritten_len = rewritten.len(), "rewrote statement"),
        Err(e) => tracing::debug!(error = %e, "rewrite rejected"),
    }
    result
}
