//! OpenTelemetry implementation of the hook contract.

use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::config::{Config, HookOption};
use crate::hook::{ContextHook, Hook, HookError};

/// Suffix of every span name, identifying the SeaORM integration.
pub const SPAN_NAME_SUFFIX: &str = "sea-orm-db";

/// Attribute key naming the object mapping library.
pub const ORM_KEY: &str = "rust.orm";

/// Value of [`ORM_KEY`].
pub const ORM_NAME: &str = "sea-orm";

/// Attribute key for the rendered statement.
pub const DB_STATEMENT: &str = "db.statement";

/// Hook that records every database operation as a client span.
///
/// The hook only reads its configuration, so a single instance can serve any
/// number of concurrent operations. All per-operation state travels in the
/// [`ContextHook`].
///
/// # Example
///
/// ```rust
/// use sea_orm_otel::{with_db_name, with_db_system, TracingHook};
///
/// let hook = TracingHook::new([with_db_system("postgresql"), with_db_name("orders")]);
/// assert_eq!(hook.span_name(), "orders-sea-orm-db");
/// ```
#[derive(Debug)]
pub struct TracingHook {
    config: Config,
}

impl TracingHook {
    /// Build a hook from the given options.
    pub fn new(options: impl IntoIterator<Item = HookOption>) -> Self {
        Self::with_config(Config::new(options))
    }

    /// Build a hook from an already resolved configuration.
    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Name given to every span opened by this hook.
    pub fn span_name(&self) -> String {
        match self.config.db_name() {
            Some(name) if !name.is_empty() => format!("{name}-{SPAN_NAME_SUFFIX}"),
            _ => SPAN_NAME_SUFFIX.to_string(),
        }
    }

    /// Attributes applied to the span when an operation finishes.
    fn attributes(&self, c: &ContextHook<'_>) -> Vec<KeyValue> {
        let mut attrs = Vec::with_capacity(self.config.attributes().len() + 2);
        attrs.extend(self.config.attributes().iter().cloned());
        attrs.push(KeyValue::new(ORM_KEY, ORM_NAME));
        attrs.push(KeyValue::new(DB_STATEMENT, self.config.format_sql(c.sql, c.args)));
        attrs
    }
}

impl Default for TracingHook {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl Hook for TracingHook {
    fn before_process(&self, c: &ContextHook<'_>) -> Result<Context, HookError> {
        let tracer = self.config.tracer();
        let span_name = self.span_name();
        tracing::trace!(span_name = %span_name, sql = c.sql, "opening database span");

        let mut builder = tracer.span_builder(span_name);
        builder.span_kind = Some(SpanKind::Client);
        let span = tracer.build_with_context(builder, &c.cx);
        Ok(c.cx.with_span(span))
    }

    fn after_process(&self, c: &ContextHook<'_>) -> Result<(), HookError> {
        let span = c.cx.span();
        if !span.span_context().is_valid() {
            tracing::debug!(sql = c.sql, "no valid span in context, annotating a no-op span");
        }

        let attrs = self.attributes(c);
        if let Some(err) = c.err {
            span.record_error(err);
            span.set_status(Status::error(err.to_string()));
        }
        span.set_attributes(attrs);

        tracing::trace!(
            execute_time_ms = c.execute_time.as_millis() as u64,
            failed = c.err.is_some(),
            "closing database span"
        );
        span.end();
        Ok(())
    }
}
