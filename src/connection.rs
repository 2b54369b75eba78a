//! SeaORM connection wrapper that runs registered hooks around every operation.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use opentelemetry::context::FutureExt;
use opentelemetry::Context;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    ExecResult, IsolationLevel, QueryResult, Statement, StreamTrait, TransactionError,
    TransactionTrait,
};
use thiserror::Error;

use crate::arg::Arg;
use crate::config::HookOption;
use crate::hook::{ContextHook, Hook, HookError, Hooks, OperationError};
use crate::otel::TracingHook;

/// SQL reported to hooks when a transaction is opened.
pub const BEGIN_TRANSACTION: &str = "BEGIN TRANSACTION";

const NO_ARGS: &[Arg] = &[];

/// A wrapper around SeaORM's `DatabaseConnection` that invokes hooks.
///
/// The wrapper implements `ConnectionTrait`, `StreamTrait`, and
/// `TransactionTrait`, so it can be used anywhere a `DatabaseConnection` is.
/// Every operation runs `before_process` on all registered hooks, then the
/// operation, then `after_process` with the outcome. Results and errors of
/// the underlying connection are returned unchanged. The context returned by
/// the before phase is the current context while the operation runs.
///
/// The wrapper is not `Clone`; share it behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::Database;
/// use sea_orm_otel::{with_db_name, with_db_system, HookExt};
///
/// let db = Database::connect("postgres://localhost/mydb").await?;
/// let db = db.with_tracing([with_db_system("postgresql"), with_db_name("mydb")]);
///
/// // Every query now produces a client span
/// let users = Users::find().all(&db).await?;
/// ```
#[derive(Debug)]
pub struct HookedConnection {
    inner: DatabaseConnection,
    hooks: Hooks,
}

impl HookedConnection {
    /// Wrap a connection with no hooks registered.
    pub fn new(connection: DatabaseConnection) -> Self {
        Self {
            inner: connection,
            hooks: Hooks::new(),
        }
    }

    /// Register a hook. Hooks run in the order they were added.
    pub fn add_hook(&mut self, hook: impl Hook + 'static) {
        self.hooks.add_hook(hook);
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Consume the wrapper and return the inner `DatabaseConnection`.
    pub fn into_inner(self) -> DatabaseConnection {
        self.inner
    }

    /// Run `operation` between the before and after phases of every hook.
    async fn hooked<T, F>(&self, sql: &str, args: &[Arg], operation: F) -> Result<T, DbErr>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        let mut c = ContextHook::new(Context::current(), sql, args);
        c.cx = self.hooks.before_process(&c).map_err(|e| {
            tracing::debug!(error = %e, sql, "hook rejected database operation");
            hook_err(e)
        })?;

        let result = operation.with_context(c.cx.clone()).await;

        let outcome = {
            let c = c.finish(result.as_ref().err().map(|e| e as &OperationError));
            self.hooks.after_process(&c)
        };
        match (result, outcome) {
            (Ok(_), Err(e)) => {
                tracing::warn!(error = %e, sql, "hook failed after database operation");
                Err(hook_err(e))
            }
            (result, _) => result,
        }
    }
}

fn hook_err(e: HookError) -> DbErr {
    DbErr::Custom(e.to_string())
}

/// The error a transaction failed with, as seen by hooks.
#[derive(Debug, Error)]
#[error("{0}")]
struct TransactionFailure(String);

fn transaction_err<E: std::fmt::Display>(e: &TransactionError<E>) -> TransactionFailure {
    match e {
        TransactionError::Connection(e) => TransactionFailure(e.to_string()),
        TransactionError::Transaction(e) => TransactionFailure(e.to_string()),
    }
}

impl From<DatabaseConnection> for HookedConnection {
    fn from(connection: DatabaseConnection) -> Self {
        Self::new(connection)
    }
}

impl AsRef<DatabaseConnection> for HookedConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

/// Wrap `connection` and register a [`TracingHook`] built from `options`.
pub fn wrap_connection(
    connection: DatabaseConnection,
    options: impl IntoIterator<Item = HookOption>,
) -> HookedConnection {
    let mut hooked = HookedConnection::new(connection);
    hooked.add_hook(TracingHook::new(options));
    hooked
}

#[async_trait]
impl ConnectionTrait for HookedConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let sql = stmt.sql.clone();
        let args = Arg::from_values(stmt.values.as_ref());
        self.hooked(&sql, &args, self.inner.execute(stmt)).await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        self.hooked(sql, NO_ARGS, self.inner.execute_unprepared(sql)).await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        let args = Arg::from_values(stmt.values.as_ref());
        self.hooked(&sql, &args, self.inner.query_one(stmt)).await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        let args = Arg::from_values(stmt.values.as_ref());
        self.hooked(&sql, &args, self.inner.query_all(stmt)).await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

impl StreamTrait for HookedConnection {
    type Stream<'a> = <DatabaseConnection as StreamTrait>::Stream<'a>;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        Box::pin(async move {
            let sql = stmt.sql.clone();
            let args = Arg::from_values(stmt.values.as_ref());
            // The after phase runs once the stream is open, not when it is drained.
            self.hooked(&sql, &args, self.inner.stream(stmt)).await
        })
    }
}

#[async_trait]
impl TransactionTrait for HookedConnection {
    async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        self.hooked(BEGIN_TRANSACTION, NO_ARGS, self.inner.begin()).await
    }

    async fn begin_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<DatabaseTransaction, DbErr> {
        self.hooked(
            BEGIN_TRANSACTION,
            NO_ARGS,
            self.inner.begin_with_config(isolation_level, access_mode),
        )
        .await
    }

    async fn transaction<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let mut c = ContextHook::new(Context::current(), BEGIN_TRANSACTION, NO_ARGS);
        c.cx = self
            .hooks
            .before_process(&c)
            .map_err(|e| TransactionError::Connection(hook_err(e)))?;

        let result = self
            .inner
            .transaction(callback)
            .with_context(c.cx.clone())
            .await;

        let err = result.as_ref().err().map(transaction_err);
        let outcome = {
            let c = c.finish(err.as_ref().map(|e| e as &OperationError));
            self.hooks.after_process(&c)
        };
        match (result, outcome) {
            (Ok(_), Err(e)) => Err(TransactionError::Connection(hook_err(e))),
            (result, _) => result,
        }
    }

    async fn transaction_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        let mut c = ContextHook::new(Context::current(), BEGIN_TRANSACTION, NO_ARGS);
        c.cx = self
            .hooks
            .before_process(&c)
            .map_err(|e| TransactionError::Connection(hook_err(e)))?;

        let result = self
            .inner
            .transaction_with_config(callback, isolation_level, access_mode)
            .with_context(c.cx.clone())
            .await;

        let err = result.as_ref().err().map(transaction_err);
        let outcome = {
            let c = c.finish(err.as_ref().map(|e| e as &OperationError));
            self.hooks.after_process(&c)
        };
        match (result, outcome) {
            (Ok(_), Err(e)) => Err(TransactionError::Connection(hook_err(e))),
            (result, _) => result,
        }
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait HookExt {
    /// Wrap this connection with no hooks registered.
    fn with_hooks(self) -> HookedConnection;

    /// Wrap this connection and register a [`TracingHook`] built from `options`.
    fn with_tracing(self, options: impl IntoIterator<Item = HookOption>) -> HookedConnection;
}

impl HookExt for DatabaseConnection {
    fn with_hooks(self) -> HookedConnection {
        HookedConnection::new(self)
    }

    fn with_tracing(self, options: impl IntoIterator<Item = HookOption>) -> HookedConnection {
        wrap_connection(self, options)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use std::sync::Arc;

    use opentelemetry::trace::{Status, TraceContextExt};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
    use sea_orm::{MockDatabase, MockExecResult, Value};

    use super::*;
    use crate::config::{with_db_name, with_format_sql_replace, with_tracer_provider};
    use crate::otel::DB_STATEMENT;

    fn test_provider() -> (SdkTracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    fn statement(span: &SpanData) -> Option<String> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == DB_STATEMENT)
            .map(|kv| kv.value.as_str().into_owned())
    }

    struct Reject;

    impl Hook for Reject {
        fn before_process(&self, _: &ContextHook<'_>) -> Result<Context, HookError> {
            Err(HookError::Rejected("read only".to_string()))
        }

        fn after_process(&self, _: &ContextHook<'_>) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_query_produces_span() {
        let (provider, exporter) = test_provider();
        let db = MockDatabase::new(DbBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([("id", Value::from(7_i32))])]])
            .into_connection()
            .with_tracing([
                with_tracer_provider(provider),
                with_db_name("orders"),
                with_format_sql_replace(),
            ]);

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT id FROM users WHERE id = $1",
            [Value::from(7_i32)],
        );
        let rows = db.query_all(stmt).await.unwrap();
        assert_eq!(rows.len(), 1);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "orders-sea-orm-db");
        assert_eq!(
            statement(&spans[0]),
            Some("SELECT id FROM users WHERE id = '7'".to_string())
        );
        assert_eq!(spans[0].status, Status::Unset);
    }

    #[tokio::test]
    async fn test_error_passes_through_and_is_recorded() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres)
                .append_exec_errors([DbErr::Custom("disk full".to_string())])
                .into_connection(),
            [with_tracer_provider(provider)],
        );

        let err = db
            .execute(Statement::from_string(DbBackend::Postgres, "DELETE FROM users"))
            .await
            .unwrap_err();
        assert_eq!(err, DbErr::Custom("disk full".to_string()));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Status::error(err.to_string()));
        assert_eq!(statement(&spans[0]), Some("DELETE FROM users []".to_string()));
    }

    #[tokio::test]
    async fn test_exec_with_args_uses_default_formatter() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .into_connection(),
            [with_tracer_provider(provider)],
        );

        let result = db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "UPDATE users SET name = $1 WHERE id = $2",
                [Value::from("bob"), Value::from(7_i32)],
            ))
            .await
            .unwrap();
        assert_eq!(result.rows_affected(), 1);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(
            statement(&spans[0]),
            Some(r#"UPDATE users SET name = $1 WHERE id = $2 ["bob",7]"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_rejecting_hook_aborts_operation() {
        let (provider, exporter) = test_provider();
        let mut db = MockDatabase::new(DbBackend::Postgres)
            .append_query_results([Vec::<BTreeMap<&str, Value>>::new()])
            .into_connection()
            .with_hooks();
        db.add_hook(Reject);
        db.add_hook(TracingHook::new([with_tracer_provider(provider)]));
        assert_eq!(db.hooks().len(), 2);

        let err = db
            .query_one(Statement::from_string(DbBackend::Postgres, "SELECT 1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DbErr::Custom("operation rejected by hook: read only".to_string())
        );
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_begin_is_traced() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres).into_connection(),
            [with_tracer_provider(provider)],
        );

        let txn = db.begin().await.unwrap();
        txn.commit().await.unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(statement(&spans[0]), Some("BEGIN TRANSACTION []".to_string()));
    }

    #[tokio::test]
    async fn test_rejection_closes_span_opened_by_earlier_hook() {
        let (provider, exporter) = test_provider();
        let mut db = MockDatabase::new(DbBackend::Postgres)
            .into_connection()
            .with_tracing([with_tracer_provider(provider)]);
        db.add_hook(Reject);

        let err = db
            .execute(Statement::from_string(DbBackend::Postgres, "DELETE FROM users"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DbErr::Custom("operation rejected by hook: read only".to_string())
        );

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(statement(&spans[0]), Some("DELETE FROM users []".to_string()));
        assert_eq!(
            spans[0].status,
            Status::error("operation rejected by hook: read only")
        );
    }

    #[tokio::test]
    async fn test_operation_runs_inside_hook_context() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres).into_connection(),
            [with_tracer_provider(provider)],
        );

        let seen = db
            .hooked("SELECT 1", NO_ARGS, async {
                Ok(Context::current().span().span_context().span_id())
            })
            .await
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(seen, spans[0].span_context.span_id());
    }

    #[tokio::test]
    async fn test_stream_produces_one_span() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres)
                .append_query_results([vec![BTreeMap::from([("id", Value::from(1_i32))])]])
                .into_connection(),
            [with_tracer_provider(provider), with_format_sql_replace()],
        );

        let stream = db
            .stream(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT id FROM users WHERE id > $1",
                [Value::from(0_i32)],
            ))
            .await
            .unwrap();
        drop(stream);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            statement(&spans[0]),
            Some("SELECT id FROM users WHERE id > '0'".to_string())
        );
        assert_eq!(spans[0].status, Status::Unset);
    }

    #[tokio::test]
    async fn test_transaction_runs_callback_inside_span() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres).into_connection(),
            [with_tracer_provider(provider)],
        );

        let seen = db
            .transaction::<_, _, DbErr>(|_txn| {
                Box::pin(async move { Ok(Context::current().span().span_context().span_id()) })
            })
            .await
            .unwrap();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(statement(&spans[0]), Some("BEGIN TRANSACTION []".to_string()));
        assert_eq!(spans[0].status, Status::Unset);
        assert_eq!(seen, spans[0].span_context.span_id());
    }

    #[tokio::test]
    async fn test_failed_transaction_is_recorded() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres).into_connection(),
            [with_tracer_provider(provider)],
        );

        let err = db
            .transaction::<_, (), DbErr>(|_txn| {
                Box::pin(async move { Err(DbErr::Custom("constraint violated".to_string())) })
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Transaction(DbErr::Custom(ref msg)) if msg == "constraint violated"
        ));

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].status,
            Status::error(DbErr::Custom("constraint violated".to_string()).to_string())
        );
    }

    #[tokio::test]
    async fn test_rejected_transaction_never_starts() {
        let (provider, exporter) = test_provider();
        let mut db = MockDatabase::new(DbBackend::Postgres)
            .into_connection()
            .with_hooks();
        db.add_hook(Reject);
        db.add_hook(TracingHook::new([with_tracer_provider(provider)]));

        let err = db
            .transaction::<_, (), DbErr>(|_txn| Box::pin(async move { Ok(()) }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Connection(DbErr::Custom(ref msg))
                if msg == "operation rejected by hook: read only"
        ));
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_transactions_are_traced() {
        let (provider, exporter) = test_provider();
        let db = wrap_connection(
            MockDatabase::new(DbBackend::Postgres).into_connection(),
            [with_tracer_provider(provider), with_db_name("orders")],
        );

        let txn = db.begin_with_config(None, None).await.unwrap();
        txn.commit().await.unwrap();
        let value = db
            .transaction_with_config::<_, _, DbErr>(
                |_txn| Box::pin(async move { Ok(7) }),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, 7);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        for span in &spans {
            assert_eq!(span.name, "orders-sea-orm-db");
            assert_eq!(statement(span), Some("BEGIN TRANSACTION []".to_string()));
        }
    }

    #[tokio::test]
    async fn test_connection_is_shared_behind_arc() {
        let (provider, exporter) = test_provider();
        let db = Arc::new(wrap_connection(
            MockDatabase::new(DbBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                ])
                .into_connection(),
            [with_tracer_provider(provider)],
        ));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let db = Arc::clone(&db);
                tokio::spawn(async move {
                    db.execute_unprepared("UPDATE users SET active = true")
                        .await
                        .map(|r| r.rows_affected())
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }

        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
    }
}
