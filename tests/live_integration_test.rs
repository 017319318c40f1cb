// ABOUTME: Live tests against a real SQL Server and BigQuery dataset
// ABOUTME: Ignored by default; run with --ignored once the TEST_* variables are set

use ct_replicator::bigquery::BigQueryTarget;
use ct_replicator::config::{SourceConfig, TargetConfig, DEFAULT_BQ_API_URL};
use ct_replicator::mssql::SqlServerSource;
use ct_replicator::sync::{CheckpointStore, SyncOptions, SyncOrchestrator, TableOutcome};
use ct_replicator::{SourceDatabase, TargetWarehouse};
use std::env;
use tempfile::TempDir;

/// Connection settings from the environment, or None to skip.
fn live_configs() -> Option<(SourceConfig, TargetConfig)> {
    let source = SourceConfig {
        host: env::var("TEST_SQL_SERVER").ok()?,
        port: env::var("TEST_SQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1433),
        database: env::var("TEST_SQL_DATABASE").ok()?,
        username: env::var("TEST_SQL_USERNAME").ok()?,
        password: env::var("TEST_SQL_PASSWORD").ok()?,
        trust_cert: true,
    };
    let target = TargetConfig {
        project_id: env::var("TEST_BQ_PROJECT_ID").ok()?,
        dataset: env::var("TEST_BQ_DATASET").ok()?,
        location: env::var("TEST_BQ_LOCATION").unwrap_or_else(|_| "US".to_string()),
        credentials: env::var("GOOGLE_APPLICATION_CREDENTIALS").ok().map(Into::into),
        access_token: env::var("BQ_ACCESS_TOKEN").ok(),
        api_base_url: DEFAULT_BQ_API_URL.to_string(),
    };
    Some((source, target))
}

fn test_table_name(suffix: &str) -> String {
    format!("ct_live_{}_{}", suffix, std::process::id())
}

async fn setup_source_table(source: &mut SqlServerSource, table: &str) -> anyhow::Result<()> {
    source
        .execute(&format!(
            "IF OBJECT_ID('dbo.{t}') IS NOT NULL DROP TABLE dbo.{t};
             CREATE TABLE dbo.{t} (
                 id INT NOT NULL PRIMARY KEY,
                 name NVARCHAR(100) NOT NULL,
                 amount DECIMAL(18, 2) NULL,
                 created_at DATETIME2 NOT NULL DEFAULT SYSUTCDATETIME()
             );
             ALTER TABLE dbo.{t} ENABLE CHANGE_TRACKING;
             INSERT INTO dbo.{t} (id, name, amount) VALUES (1, N'alpha', 10.50), (2, N'beta', NULL), (3, N'gamma', 7.25);",
            t = table
        ))
        .await?;
    Ok(())
}

async fn cleanup(source: &mut SqlServerSource, target: &BigQueryTarget, table: &str) {
    let _ = source
        .execute(&format!("DROP TABLE IF EXISTS dbo.{}", table))
        .await;
    let _ = target
        .execute_query(&format!("DROP TABLE IF EXISTS {}", target.qualified_table(table)))
        .await;
}

#[tokio::test]
#[ignore]
async fn test_live_initial_then_incremental() {
    let Some((source_config, target_config)) = live_configs() else {
        println!("Skipping live test: TEST_SQL_* / TEST_BQ_* not set");
        return;
    };
    let table = test_table_name("orders");

    let mut source = SqlServerSource::connect(&source_config).await.unwrap();
    let target = BigQueryTarget::connect(&target_config).await.unwrap();
    setup_source_table(&mut source, &table).await.unwrap();

    let dir = TempDir::new().unwrap();
    let checkpoints = CheckpointStore::open(dir.path().join("state.json"))
        .await
        .unwrap();
    let mut sync = SyncOrchestrator::new(
        source,
        target,
        checkpoints,
        SyncOptions {
            batch_size: 2,
            show_progress: false,
        },
    );

    let outcome = sync.sync_table(&table).await.unwrap();
    assert!(matches!(outcome, TableOutcome::InitialLoad { rows: 3, .. }));
    assert!(sync.target().table_exists(&table).await.unwrap());

    sync.source_mut()
        .execute(&format!(
            "INSERT INTO dbo.{t} (id, name) VALUES (4, N'delta');
             UPDATE dbo.{t} SET amount = 99.00 WHERE id = 1;
             DELETE FROM dbo.{t} WHERE id = 2;",
            t = table
        ))
        .await
        .unwrap();

    let outcome = sync.sync_table(&table).await.unwrap();
    match outcome {
        TableOutcome::Incremental { upserts, deletes, from, to } => {
            assert_eq!(upserts, 2);
            assert_eq!(deletes, 1);
            assert!(to > from);
        }
        other => panic!("expected incremental pass, got {:?}", other),
    }

    let outcome = sync.sync_table(&table).await.unwrap();
    assert!(matches!(outcome, TableOutcome::UpToDate { .. }));

    let (mut source, target, _) = sync.into_parts();
    cleanup(&mut source, &target, &table).await;
}

#[tokio::test]
#[ignore]
async fn test_live_source_introspection() {
    let Some((source_config, _)) = live_configs() else {
        println!("Skipping live test: TEST_SQL_* not set");
        return;
    };
    let table = test_table_name("describe");

    let mut source = SqlServerSource::connect(&source_config).await.unwrap();
    setup_source_table(&mut source, &table).await.unwrap();

    assert!(source.change_tracking_enabled(&table).await.unwrap());
    let descriptor = source.describe_table(&table).await.unwrap();
    assert_eq!(descriptor.primary_key, vec!["id"]);
    assert_eq!(descriptor.columns.len(), 4);
    assert_eq!(source.count_rows(&table).await.unwrap(), 3);
    assert!(source.current_version().await.unwrap() > 0);

    let _ = source
        .execute(&format!("DROP TABLE IF EXISTS dbo.{}", table))
        .await;
}
