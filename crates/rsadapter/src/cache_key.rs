//! Statement cache keys.
//!
//! A key identifies a reusable driver statement by its SQL text and every
//! execution parameter that changes what the driver prepares. Two prepare
//! requests that build equal keys share a cached statement; a difference in
//! any field is a miss.

use std::fmt;

use crate::driver::{Concurrency, GeneratedKeys, Holdability, IsolationLevel, ResultSetType, StatementOptions};

/// Distinguishes prepared, callable and vendor SQL-module statements so they
/// never collide on equal SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Prepared,
    Callable,
    /// Statement prepared from a stored SQL-module section.
    Section {
        section: String,
        suffix: Option<String>,
    },
}

/// Connection-derived parameters folded into a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyContext<'a> {
    /// Holdability in effect when the statement is prepared.
    pub holdability: Holdability,
    /// Only set when isolation is configured to be part of keys.
    pub isolation: Option<IsolationLevel>,
    pub schema: Option<&'a str>,
}

/// Identity of a cached statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementCacheKey {
    sql: String,
    result_set_type: ResultSetType,
    concurrency: Concurrency,
    holdability: Holdability,
    generated_keys: GeneratedKeys,
    isolation: Option<IsolationLevel>,
    schema: Option<String>,
    kind: StatementKind,
}

impl StatementCacheKey {
    fn build(
        kind: StatementKind,
        sql: impl Into<String>,
        options: &StatementOptions,
        ctx: KeyContext<'_>,
    ) -> Self {
        Self {
            sql: sql.into(),
            result_set_type: options.result_set_type,
            concurrency: options.concurrency,
            holdability: options.holdability.unwrap_or(ctx.holdability),
            generated_keys: options.generated_keys,
            isolation: ctx.isolation,
            schema: ctx.schema.map(str::to_owned),
            kind,
        }
    }

    #[must_use]
    pub fn prepared(sql: impl Into<String>, options: &StatementOptions, ctx: KeyContext<'_>) -> Self {
        Self::build(StatementKind::Prepared, sql, options, ctx)
    }

    #[must_use]
    pub fn callable(sql: impl Into<String>, options: &StatementOptions, ctx: KeyContext<'_>) -> Self {
        Self::build(StatementKind::Callable, sql, options, ctx)
    }

    /// Key for a SQL-module section.
    ///
    /// Returns `None` when the module requires a suffix and none was given;
    /// such statements cannot be told apart and must not be cached.
    #[must_use]
    pub fn section(
        sql: impl Into<String>,
        options: &StatementOptions,
        ctx: KeyContext<'_>,
        section: impl Into<String>,
        suffix: Option<String>,
        suffix_required: bool,
    ) -> Option<Self> {
        if suffix_required && suffix.is_none() {
            return None;
        }
        let kind = StatementKind::Section {
            section: section.into(),
            suffix,
        };
        Some(Self::build(kind, sql, options, ctx))
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub const fn kind(&self) -> &StatementKind {
        &self.kind
    }

    #[must_use]
    pub const fn holdability(&self) -> Holdability {
        self.holdability
    }

    #[must_use]
    pub const fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    #[must_use]
    pub const fn is_callable(&self) -> bool {
        matches!(self.kind, StatementKind::Callable)
    }
}

impl fmt::Display for StatementCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            StatementKind::Prepared => "prepared",
            StatementKind::Callable => "callable",
            StatementKind::Section { .. } => "section",
        };
        write!(
            f,
            "{kind}:{:?}/{:?}/{:?}/{:?}",
            self.result_set_type, self.concurrency, self.holdability, self.generated_keys
        )?;
        if let Some(isolation) = self.isolation {
            write!(f, "/{isolation}")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "/{schema}")?;
        }
        if let StatementKind::Section { section, suffix } = &self.kind {
            write!(f, "/{section}")?;
            if let Some(suffix) = suffix {
                write!(f, "+{suffix}")?;
            }
        }
        write!(f, ":{}", self.sql)
    }
}
