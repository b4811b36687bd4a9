use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::types::vector_index::{IndexConfig, IndexMeasure, IndexMethod, VectorTableName};

const INDEX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// HNSW build parameters when the request carries none.
const DEFAULT_EFC: u64 = 100;
const DEFAULT_M: u64 = 8;
/// MTREE node capacity when an IVF-Flat request carries no `lists` argument.
const DEFAULT_CAPACITY: u64 = 40;

fn distance_clause(measure: IndexMeasure) -> &'static str {
    match measure {
        IndexMeasure::Cosine => "COSINE",
        IndexMeasure::L2 => "EUCLIDEAN",
        // Embeddings are stored unit-normalized; inner product then ranks
        // identically to cosine.
        IndexMeasure::InnerProduct => "COSINE",
    }
}

/// Render the DDL for a validated index request. `index_name` and the column
/// were identifier-checked in `IndexConfig::validate`.
pub fn index_definition(config: &IndexConfig, dimension: usize) -> String {
    let dist = distance_clause(config.index_measure);
    let options = match config.index_method {
        IndexMethod::Hnsw => {
            let efc = config.argument("ef_construction").unwrap_or(DEFAULT_EFC);
            let m = config.argument("m").unwrap_or(DEFAULT_M);
            format!("HNSW DIMENSION {dimension} DIST {dist} TYPE F32 EFC {efc} M {m}")
        }
        IndexMethod::IvfFlat => {
            let capacity = config.argument("lists").unwrap_or(DEFAULT_CAPACITY);
            format!("MTREE DIMENSION {dimension} DIST {dist} TYPE F32 CAPACITY {capacity}")
        }
    };
    let concurrent = if config.concurrently {
        " CONCURRENTLY"
    } else {
        ""
    };

    format!(
        "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} FIELDS {column} {options}{concurrent};",
        index = config.index_name,
        table = config.table_name.target_table(),
        column = config.column(),
    )
}

pub fn index_removal(table_name: VectorTableName, index_name: &str) -> String {
    format!(
        "REMOVE INDEX IF EXISTS {index_name} ON TABLE {table};",
        table = table_name.target_table(),
    )
}

/// Create the index structure and wait for the build to finish. Underlying
/// rows are never touched. Idempotent thanks to `IF NOT EXISTS`.
pub async fn build_index(
    db: &SurrealDbClient,
    config: &IndexConfig,
    dimension: usize,
) -> Result<(), AppError> {
    build_index_inner(db, config, dimension)
        .await
        .map_err(|err| AppError::InternalError(err.to_string()))
}

async fn build_index_inner(
    db: &SurrealDbClient,
    config: &IndexConfig,
    dimension: usize,
) -> Result<()> {
    let table = config.table_name.target_table();
    let expected_total = count_table_rows(db, table).await.with_context(|| {
        format!(
            "counting rows in {table} for index {} progress",
            config.index_name
        )
    })?;

    let definition = index_definition(config, dimension);
    let res = db
        .client
        .query(definition)
        .await
        .with_context(|| format!("creating index {} on table {table}", config.index_name))?;
    res.check()
        .with_context(|| format!("index definition failed for {} on {table}", config.index_name))?;

    info!(
        index = %config.index_name,
        table = %table,
        expected_rows = expected_total,
        concurrently = config.concurrently,
        "Index definition submitted"
    );

    if config.concurrently {
        poll_index_build_status(
            db,
            &config.index_name,
            table,
            Some(expected_total),
            INDEX_POLL_INTERVAL,
        )
        .await?;
    }

    Ok(())
}

/// Drop the index structure, leaving the table's rows intact.
pub async fn drop_index(
    db: &SurrealDbClient,
    table_name: VectorTableName,
    index_name: &str,
) -> Result<(), AppError> {
    let removal = index_removal(table_name, index_name);
    let res = db.client.query(removal).await?;
    res.check()
        .map_err(AppError::Database)?;

    info!(
        index = %index_name,
        table = %table_name.target_table(),
        "Index removed"
    );
    Ok(())
}

async fn poll_index_build_status(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
    total_rows: Option<u64>,
    poll_every: Duration,
) -> Result<()> {
    let started_at = std::time::Instant::now();

    loop {
        tokio::time::sleep(poll_every).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db.client.query(info_query).await.with_context(|| {
            format!("checking index build status for {index_name} on {table}")
        })?;

        let info: Option<Value> = info_res
            .take(0)
            .context("failed to deserialize INFO FOR INDEX result")?;

        let Some(snapshot) = parse_index_build_info(info, total_rows) else {
            warn!(
                index = %index_name,
                table = %table,
                "INFO FOR INDEX returned no data; assuming index definition might be missing"
            );
            break;
        };

        match snapshot.progress_pct {
            Some(pct) => info!(
                index = %index_name,
                table = %table,
                status = snapshot.status,
                initial = snapshot.initial,
                pending = snapshot.pending,
                updated = snapshot.updated,
                processed = snapshot.processed,
                total = snapshot.total_rows,
                progress_pct = format_args!("{pct:.1}"),
                "Index build status"
            ),
            None => info!(
                index = %index_name,
                table = %table,
                status = snapshot.status,
                initial = snapshot.initial,
                pending = snapshot.pending,
                updated = snapshot.updated,
                processed = snapshot.processed,
                "Index build status"
            ),
        }

        if snapshot.is_ready() {
            info!(
                index = %index_name,
                table = %table,
                elapsed = ?started_at.elapsed(),
                processed = snapshot.processed,
                total = snapshot.total_rows,
                "Index is ready"
            );
            break;
        }

        if snapshot.status.eq_ignore_ascii_case("error") {
            warn!(
                index = %index_name,
                table = %table,
                status = snapshot.status,
                "Index build reported error status; stopping polling"
            );
            break;
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
struct IndexBuildSnapshot {
    status: String,
    initial: u64,
    pending: u64,
    updated: u64,
    processed: u64,
    total_rows: Option<u64>,
    progress_pct: Option<f64>,
}

impl IndexBuildSnapshot {
    fn is_ready(&self) -> bool {
        self.status.eq_ignore_ascii_case("ready")
    }
}

fn parse_index_build_info(
    info: Option<Value>,
    total_rows: Option<u64>,
) -> Option<IndexBuildSnapshot> {
    let info = info?;
    let building = info.get("building");

    let status = building
        .and_then(|b| b.get("status"))
        .and_then(|s| s.as_str())
        // No `building` block at all means the index is not building anymore.
        .unwrap_or("ready")
        .to_string();

    let initial = building
        .and_then(|b| b.get("initial"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let pending = building
        .and_then(|b| b.get("pending"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let updated = building
        .and_then(|b| b.get("updated"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    // `initial` is the number of rows seen when the build started; `updated`
    // accounts for writes that landed afterwards.
    let processed = initial.saturating_add(updated);

    let progress_pct = total_rows.map(|total| {
        if total == 0 {
            0.0
        } else {
            ((processed as f64 / total as f64).min(1.0)) * 100.0
        }
    });

    Some(IndexBuildSnapshot {
        status,
        initial,
        pending,
        updated,
        processed,
        total_rows,
        progress_pct,
    })
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

async fn count_table_rows(db: &SurrealDbClient, table: &str) -> Result<u64> {
    let query = format!("SELECT count() AS count FROM {table} GROUP ALL;");
    let mut response = db
        .client
        .query(query)
        .await
        .with_context(|| format!("counting rows in {table}"))?;
    let rows: Vec<CountRow> = response
        .take(0)
        .context("failed to deserialize count() response")?;
    Ok(rows.first().map(|r| r.count).unwrap_or(0))
}
