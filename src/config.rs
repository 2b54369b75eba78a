//! Configuration for the tracing hook and the options that build it.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use opentelemetry::global::{self, BoxedTracer, ObjectSafeTracerProvider};
use opentelemetry::trace::{Span, Tracer, TracerProvider};
use opentelemetry::{InstrumentationScope, KeyValue};

use crate::arg::Arg;
use crate::format::{default_format_sql, format_sql_replace, SqlFormatter};
use crate::version::sem_version;

/// Instrumentation scope name of every tracer derived by this crate.
pub const INSTRUMENTATION_NAME: &str = "sea-orm-otel";

/// Attribute key for the database system.
pub const DB_SYSTEM: &str = "db.system";

/// Attribute key for the database name.
pub const DB_NAME: &str = "db.name";

type SharedTracerProvider = Arc<dyn ObjectSafeTracerProvider + Send + Sync>;

/// Resolved configuration of a [`TracingHook`](crate::TracingHook).
///
/// Built once from a list of [`HookOption`]s and never modified afterwards.
///
/// # Example
///
/// ```rust
/// use sea_orm_otel::{with_db_name, with_db_system, with_format_sql_replace, Config};
///
/// let config = Config::new([
///     with_db_system("postgresql"),
///     with_db_name("orders"),
///     with_format_sql_replace(),
/// ]);
/// assert_eq!(config.db_name(), Some("orders"));
/// assert_eq!(config.attributes().len(), 2);
/// ```
pub struct Config {
    tracer_provider: Option<SharedTracerProvider>,
    tracer: OnceCell<BoxedTracer>,
    db_name: Option<String>,
    db_system: Option<String>,
    attributes: Vec<KeyValue>,
    format_sql: SqlFormatter,
}

impl Config {
    /// Start from the defaults and apply the options in order.
    pub fn new(options: impl IntoIterator<Item = HookOption>) -> Self {
        let mut config = Self {
            tracer_provider: None,
            tracer: OnceCell::new(),
            db_name: None,
            db_system: None,
            attributes: Vec::new(),
            format_sql: Arc::new(default_format_sql),
        };
        for option in options {
            option.apply(&mut config);
        }
        config
    }

    /// The tracer used for every span.
    ///
    /// Derived on first use from the configured provider, or from the
    /// process-wide global provider when none was configured. The global is
    /// read here and nowhere else.
    pub fn tracer(&self) -> &BoxedTracer {
        self.tracer.get_or_init(|| {
            let scope = InstrumentationScope::builder(INSTRUMENTATION_NAME)
                .with_version(sem_version())
                .build();
            match &self.tracer_provider {
                Some(provider) => BoxedTracer::new(provider.boxed_tracer(scope)),
                None => {
                    tracing::debug!("no tracer provider configured, using the global provider");
                    global::tracer_provider().tracer_with_scope(scope)
                }
            }
        })
    }

    /// Whether a tracer provider was supplied explicitly.
    pub fn has_tracer_provider(&self) -> bool {
        self.tracer_provider.is_some()
    }

    /// Database name set by [`with_db_name`].
    pub fn db_name(&self) -> Option<&str> {
        self.db_name.as_deref()
    }

    /// Database system set by [`with_db_system`].
    pub fn db_system(&self) -> Option<&str> {
        self.db_system.as_deref()
    }

    /// Attributes merged into every span, in insertion order.
    pub fn attributes(&self) -> &[KeyValue] {
        &self.attributes
    }

    /// Render a statement with the configured formatter.
    pub fn format_sql(&self, sql: &str, args: &[Arg]) -> String {
        (self.format_sql)(sql, args)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new([])
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("tracer_provider", &self.tracer_provider.is_some())
            .field("tracer", &self.tracer.get().is_some())
            .field("db_name", &self.db_name)
            .field("db_system", &self.db_system)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// A single configuration directive, applied in the order given.
pub struct HookOption(Box<dyn FnOnce(&mut Config) + Send>);

impl HookOption {
    fn new(apply: impl FnOnce(&mut Config) + Send + 'static) -> Self {
        Self(Box::new(apply))
    }

    fn apply(self, config: &mut Config) {
        (self.0)(config)
    }
}

impl fmt::Debug for HookOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HookOption")
    }
}

/// Use `provider` to create the tracer.
pub fn with_tracer_provider<P, T, S>(provider: P) -> HookOption
where
    S: Span + Send + Sync + 'static,
    T: Tracer<Span = S> + Send + Sync + 'static,
    P: TracerProvider<Tracer = T> + Send + Sync + 'static,
{
    HookOption::new(move |config| {
        config.tracer_provider = Some(Arc::new(provider));
    })
}

/// Use `tracer` directly instead of deriving one from a provider.
pub fn with_tracer(tracer: BoxedTracer) -> HookOption {
    HookOption::new(move |config| {
        config.tracer = OnceCell::with_value(tracer);
    })
}

/// Record the database system and add a `db.system` attribute.
pub fn with_db_system(system: impl Into<String>) -> HookOption {
    let system = system.into();
    HookOption::new(move |config| {
        config.attributes.push(KeyValue::new(DB_SYSTEM, system.clone()));
        config.db_system = Some(system);
    })
}

/// Record the database name and add a `db.name` attribute.
///
/// The name also prefixes every span name.
pub fn with_db_name(name: impl Into<String>) -> HookOption {
    let name = name.into();
    HookOption::new(move |config| {
        config.attributes.push(KeyValue::new(DB_NAME, name.clone()));
        config.db_name = Some(name);
    })
}

/// Add attributes to every span.
pub fn with_attributes(attributes: impl IntoIterator<Item = KeyValue>) -> HookOption {
    let attributes: Vec<KeyValue> = attributes.into_iter().collect();
    HookOption::new(move |config| config.attributes.extend(attributes))
}

/// Render statements with `format_sql`.
pub fn with_format_sql<F>(format_sql: F) -> HookOption
where
    F: Fn(&str, &[Arg]) -> String + Send + Sync + 'static,
{
    HookOption::new(move |config| {
        config.format_sql = Arc::new(format_sql);
    })
}

/// Render statements with placeholders replaced by their quoted arguments.
///
/// See [`format_sql_replace`] for the limits of the substitution.
pub fn with_format_sql_replace() -> HookOption {
    with_format_sql(format_sql_replace)
}
