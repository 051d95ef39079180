//! Dump scripts: rendering, parsing and import.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::DatabaseKind;
use crate::error::{PortError, Result};
use crate::schema_ops::SchemaOperations;

/// Header line naming the target engine of a rendered script.
const HEADER_PREFIX: &str = "-- schemaport dump target=";

/// Fragment classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Ddl,
    Insert,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKind::Ddl => write!(f, "DDL"),
            FragmentKind::Insert => write!(f, "INSERT"),
        }
    }
}

/// One statement of a dump, without its terminating `;`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFragment {
    pub kind: FragmentKind,
    pub text: String,
}

/// Totals from [`DumpScript::import`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub statements: usize,
    pub rows_inserted: u64,
}

/// Ordered statements for one target engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpScript {
    pub target: DatabaseKind,
    pub fragments: Vec<ScriptFragment>,
}

impl DumpScript {
    pub fn new(target: DatabaseKind) -> Self {
        Self {
            target,
            fragments: Vec::new(),
        }
    }

    pub fn push_ddl(&mut self, text: impl Into<String>) {
        self.fragments.push(ScriptFragment {
            kind: FragmentKind::Ddl,
            text: text.into(),
        });
    }

    pub fn push_insert(&mut self, text: impl Into<String>) {
        self.fragments.push(ScriptFragment {
            kind: FragmentKind::Insert,
            text: text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Number of fragments of `kind`.
    pub fn count(&self, kind: FragmentKind) -> usize {
        self.fragments.iter().filter(|f| f.kind == kind).count()
    }

    /// Render as SQL text, one `;`-terminated statement per fragment.
    pub fn render(&self) -> String {
        let mut out = format!("{}{}\n\n", HEADER_PREFIX, self.target);
        for fragment in &self.fragments {
            out.push_str(&fragment.text);
            out.push_str(";\n\n");
        }
        out
    }

    /// Write the rendered script to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }

    /// Read a script written by [`DumpScript::write`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse rendered script text back into fragments.
    ///
    /// The target engine comes from the header line. Statements are split on
    /// `;` outside quoted literals and identifiers; `--` comment lines are dropped.
    pub fn parse(text: &str) -> Result<Self> {
        let header = text
            .lines()
            .find_map(|line| line.trim().strip_prefix(HEADER_PREFIX))
            .ok_or_else(|| PortError::Config("dump script has no target header".into()))?;
        let target = DatabaseKind::parse(header.trim())?;

        let mut script = Self::new(target);
        for statement in split_statements(text, target == DatabaseKind::Mysql) {
            let kind = if statement
                .get(..6)
                .is_some_and(|head| head.eq_ignore_ascii_case("INSERT"))
            {
                FragmentKind::Insert
            } else {
                FragmentKind::Ddl
            };
            script.fragments.push(ScriptFragment {
                kind,
                text: statement,
            });
        }
        Ok(script)
    }

    /// Execute every fragment against `ops`, in order.
    ///
    /// # Errors
    ///
    /// Fails with [`PortError::Config`] if `ops` is a different engine, and with
    /// the first failing statement's error otherwise; later fragments are not run.
    pub async fn import(&self, ops: &SchemaOperations) -> Result<ImportReport> {
        if ops.kind() != self.target {
            return Err(PortError::Config(format!(
                "dump targets {} but the database is {}",
                self.target,
                ops.kind()
            )));
        }

        let mut report = ImportReport::default();
        for (i, fragment) in self.fragments.iter().enumerate() {
            debug!("Import fragment {} ({})", i + 1, fragment.kind);
            let affected = ops.execute(&fragment.text).await?;
            report.statements += 1;
            if fragment.kind == FragmentKind::Insert {
                report.rows_inserted += affected;
            }
        }

        info!(
            "Imported {} statements ({} rows) into {}",
            report.statements, report.rows_inserted, self.target
        );
        Ok(report)
    }
}

/// Split SQL text into statements.
///
/// `backslash_escapes` enables MySQL's `\'` inside string literals.
fn split_statements(text: &str, backslash_escapes: bool) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' && q == '\'' && backslash_escapes {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else if c == q {
                    // A doubled quote is an escaped quote, not the end.
                    if chars.peek() == Some(&q) {
                        if let Some(next) = chars.next() {
                            current.push(next);
                        }
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            break;
                        }
                    }
                    current.push('\n');
                }
                ';' => {
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_parse() {
        let mut script = DumpScript::new(DatabaseKind::Postgres);
        script.push_ddl("CREATE TABLE \"t\" (\n    \"id\" BIGINT NOT NULL\n)");
        script.push_insert("INSERT INTO \"t\" (\"id\") VALUES\n    (1),\n    (2)");

        let text = script.render();
        assert!(text.starts_with("-- schemaport dump target=postgres\n"));
        assert!(text.contains("(2);\n"));

        let parsed = DumpScript::parse(&text).unwrap();
        assert_eq!(parsed, script);
        assert_eq!(parsed.count(FragmentKind::Insert), 1);
    }

    #[test]
    fn test_split_respects_literals() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s');\n-- note; here\nCREATE TABLE \"x;y\" (id INT);";
        let parts = split_statements(sql, false);
        assert_eq!(
            parts,
            vec![
                "INSERT INTO t VALUES ('a;b', 'it''s')".to_string(),
                "CREATE TABLE \"x;y\" (id INT)".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_mysql_backslash_escapes() {
        let sql = r"INSERT INTO t VALUES ('a\';b'); SELECT 1";
        let parts = split_statements(sql, true);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], r"INSERT INTO t VALUES ('a\';b')");

        // Without backslash escapes the same text splits differently.
        assert_eq!(split_statements(r"SELECT '\'; SELECT 2", false).len(), 2);
    }

    #[test]
    fn test_missing_header() {
        assert!(DumpScript::parse("SELECT 1;").is_err());
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.sql");
        let mut script = DumpScript::new(DatabaseKind::Mysql);
        script.push_insert("INSERT INTO `t` (`s`) VALUES\n    ('back\\\\slash')");
        script.write(&path).unwrap();
        assert_eq!(DumpScript::load(&path).unwrap(), script);
    }
}
