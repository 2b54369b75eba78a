//! Basic example showing how to use sea-orm-otel.
//!
//! Run with: cargo run --example basic

use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};
use sea_orm::{ConnectionTrait, DbBackend, MockDatabase, Statement, Value};
use sea_orm_otel::prelude::*;
use sea_orm_otel::with_attributes;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for the crate's own diagnostics
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_otel=trace".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Spans are collected in memory so the example needs no collector
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();

    // A mock database stands in for a real connection
    let db = MockDatabase::new(DbBackend::Postgres)
        .append_query_results([vec![BTreeMap::from([
            ("id", Value::from(7_i32)),
            ("name", Value::from("bob")),
        ])]])
        .into_connection();

    // Option 1: Using the extension trait
    let traced_db = db.with_tracing([
        with_tracer_provider(provider),
        with_db_system("postgresql"),
        with_db_name("demo"),
        with_format_sql_replace(),
        with_attributes([KeyValue::new("service.name", "basic-example")]),
    ]);

    // Option 2: Register the hook yourself
    // let mut traced_db = HookedConnection::from(db);
    // traced_db.add_hook(TracingHook::new([with_db_name("demo")]));

    let rows = traced_db
        .query_all(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT id, name FROM users WHERE id = $1",
            [Value::from(7_i32)],
        ))
        .await?;
    tracing::info!(rows = rows.len(), "query finished");

    for span in exporter.get_finished_spans().unwrap_or_default() {
        println!("span: {}", span.name);
        for kv in &span.attributes {
            println!("  {} = {}", kv.key.as_str(), kv.value.as_str());
        }
    }

    Ok(())
}
