//! # sea-orm-otel
//!
//! OpenTelemetry instrumentation for SeaORM database operations, built on a
//! two-phase hook contract.
//!
//! Every operation executed through a [`HookedConnection`] runs the
//! `before_process` phase of each registered [`Hook`], then the operation, then
//! the `after_process` phase with the outcome. [`TracingHook`] implements the
//! contract by opening one client span per operation and closing it with the
//! statement, the configured attributes and, on failure, the error.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm::Database;
//! use sea_orm_otel::{with_db_name, with_db_system, with_tracer_provider, HookExt};
//!
//! let db = Database::connect("postgres://localhost/mydb").await?;
//! let db = db.with_tracing([
//!     with_tracer_provider(provider),
//!     with_db_system("postgresql"),
//!     with_db_name("mydb"),
//! ]);
//!
//! // Use it exactly like a normal DatabaseConnection
//! let users = Users::find().all(&db).await?;
//! ```
//!
//! Without [`with_tracer_provider`], the global provider from
//! `opentelemetry::global` is used. It is read when the first span is opened,
//! so it may be installed after the connection is wrapped.
//!
//! ## Statements
//!
//! The `db.statement` attribute is produced by the configured formatter:
//!
//! - [`default_format_sql`] appends the JSON form of the arguments:
//!   `SELECT * FROM users WHERE id = $1 [7]`
//! - [`format_sql_replace`] (via [`with_format_sql_replace`]) substitutes
//!   placeholders: `SELECT * FROM users WHERE id = '7'`
//! - anything else through [`with_format_sql`]
//!
//! ## Span Attributes
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `db.system` | Set by [`with_db_system`] |
//! | `db.name` | Set by [`with_db_name`] |
//! | `rust.orm` | Always "sea-orm" |
//! | `db.statement` | Rendered statement |
//!
//! Failed operations get an `exception` event and an error status whose
//! description is the error message.

mod arg;
mod config;
mod connection;
mod format;
mod hook;
mod otel;
mod version;

pub use arg::Arg;
pub use config::{
    with_attributes, with_db_name, with_db_system, with_format_sql, with_format_sql_replace,
    with_tracer, with_tracer_provider, Config, HookOption, DB_NAME, DB_SYSTEM,
    INSTRUMENTATION_NAME,
};
pub use connection::{wrap_connection, HookExt, HookedConnection, BEGIN_TRANSACTION};
pub use format::{default_format_sql, format_sql_replace, SqlFormatter};
pub use hook::{ContextHook, Hook, HookError, Hooks, OperationError};
pub use otel::{TracingHook, DB_STATEMENT, ORM_KEY, ORM_NAME, SPAN_NAME_SUFFIX};
pub use version::{sem_version, VERSION};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        with_db_name, with_db_system, with_format_sql_replace, with_tracer_provider, Arg, Hook,
        HookExt, HookedConnection, TracingHook,
    };
}
