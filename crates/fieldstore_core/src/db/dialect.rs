//! Statement rendering with injected identifier quoting and read hints.
//!
//! Statement templates name every table and column as `{identifier}`; the
//! dialect replaces each with the configured quoted form. Read statements
//! additionally carry a `%HINT%` marker right after a table name, replaced by
//! the configured read table hint (or nothing).
//!
//! # Invariants
//! - The read hint is resolved once per dialect and never changes afterwards.
//! - `ORIGINAL` (any case) or an empty setting resolves to no hint.

use once_cell::sync::{Lazy, OnceCell};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Read hint setting value meaning "no hint".
pub const ORIGINAL_READ_HINT: &str = "ORIGINAL";

const HINT_MARKER: &str = "%HINT%";

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid identifier template regex")
});

/// Identifier quoting style of the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierQuoting {
    /// `"name"` (SQL standard).
    #[default]
    DoubleQuote,
    /// `[name]`.
    Bracket,
    /// `` `name` ``.
    Backtick,
}

impl IdentifierQuoting {
    pub fn quote(self, identifier: &str) -> String {
        match self {
            Self::DoubleQuote => format!("\"{identifier}\""),
            Self::Bracket => format!("[{identifier}]"),
            Self::Backtick => format!("`{identifier}`"),
        }
    }
}

/// SQL rendering settings shared by every repository of one store.
#[derive(Debug, Clone)]
pub struct SqlDialect {
    quoting: IdentifierQuoting,
    read_hint_setting: String,
    read_hint: OnceCell<String>,
}

impl Default for SqlDialect {
    fn default() -> Self {
        Self::new(IdentifierQuoting::default(), ORIGINAL_READ_HINT)
    }
}

impl SqlDialect {
    pub fn new(quoting: IdentifierQuoting, read_hint_setting: impl Into<String>) -> Self {
        Self {
            quoting,
            read_hint_setting: read_hint_setting.into(),
            read_hint: OnceCell::new(),
        }
    }

    pub fn quoting(&self) -> IdentifierQuoting {
        self.quoting
    }

    /// Returns the resolved read hint including its leading space, or `""`.
    pub fn read_hint(&self) -> &str {
        self.read_hint
            .get_or_init(|| resolve_read_hint(&self.read_hint_setting))
            .as_str()
    }

    /// Renders a write (or hint-free) statement template.
    pub fn render(&self, template: &str) -> String {
        IDENTIFIER_RE
            .replace_all(template, |caps: &Captures<'_>| self.quoting.quote(&caps[1]))
            .into_owned()
    }

    /// Renders a read statement template, substituting the read hint marker.
    pub fn render_read(&self, template: &str) -> String {
        self.render(template).replace(HINT_MARKER, self.read_hint())
    }
}

fn resolve_read_hint(setting: &str) -> String {
    let trimmed = setting.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ORIGINAL_READ_HINT) {
        return String::new();
    }
    format!(" {trimmed}")
}
