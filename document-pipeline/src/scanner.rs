use std::sync::Arc;

use async_stream::try_stream;
use futures::{pin_mut, Stream, StreamExt};
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::document::{Document, IngestionStatus, KgExtractionStatus},
    },
};

use crate::{coordinator::PipelineCoordinator, runner::ExtractionSettings};

/// Composite failure predicates over `(ingestion_status, extraction_status)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Both ingestion and extraction failed.
    AllFailed,
    /// Ingestion failed.
    IngestionFailed,
    /// Extraction failed.
    ExtractionFailed,
}

impl StatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::AllFailed => "all_failed",
            StatusFilter::IngestionFailed => "ingestion_failed",
            StatusFilter::ExtractionFailed => "extraction_failed",
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        let ingestion_failed = document.ingestion_status == IngestionStatus::Failed;
        let extraction_failed = document.extraction_status == KgExtractionStatus::Failed;

        match self {
            StatusFilter::AllFailed => ingestion_failed && extraction_failed,
            StatusFilter::IngestionFailed => ingestion_failed,
            StatusFilter::ExtractionFailed => extraction_failed,
        }
    }
}

impl std::str::FromStr for StatusFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_failed" => Ok(StatusFilter::AllFailed),
            "ingestion_failed" => Ok(StatusFilter::IngestionFailed),
            "extraction_failed" => Ok(StatusFilter::ExtractionFailed),
            other => Err(AppError::Validation(format!(
                "unknown status filter '{other}'; expected all_failed, ingestion_failed or extraction_failed"
            ))),
        }
    }
}

/// Aggregate result of a corrective scan, in the shape operators read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub matching: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Pages through the document catalogue and drives corrective re-runs.
pub struct BatchStatusScanner {
    db: Arc<SurrealDbClient>,
    batch_size: usize,
}

impl BatchStatusScanner {
    pub fn new(db: Arc<SurrealDbClient>, batch_size: usize) -> Self {
        Self {
            db,
            batch_size: batch_size.max(1),
        }
    }

    /// Lazily yield the documents matching `filter`, fetching the catalogue
    /// one fixed-size batch at a time.
    pub fn scan(
        &self,
        filter: StatusFilter,
    ) -> impl Stream<Item = Result<Document, AppError>> + '_ {
        try_stream! {
            let mut offset = 0usize;
            loop {
                let (batch, total) =
                    Document::list_paginated(&self.db, offset, self.batch_size).await?;
                if batch.is_empty() {
                    break;
                }
                let batch_len = batch.len();
                for document in batch {
                    if filter.matches(&document) {
                        yield document;
                    }
                }
                offset += batch_len;
                if offset as u64 >= total {
                    break;
                }
            }
        }
    }

    /// Scan and, when `trigger` is set, submit a corrective extraction for
    /// every match. One document's failure never aborts the batch; an
    /// aggregate error is returned at the end only when a submission failed
    /// non-recoverably.
    pub async fn scan_and_correct(
        &self,
        coordinator: &PipelineCoordinator,
        filter: StatusFilter,
        trigger: bool,
    ) -> Result<ScanReport, AppError> {
        let mut report = ScanReport::default();
        let mut non_recoverable = 0usize;

        let stream = self.scan(filter);
        pin_mut!(stream);

        while let Some(document) = stream.next().await {
            let document = document?;
            report.matching += 1;
            info!(
                document_id = %document.id,
                ingestion_status = document.ingestion_status.as_str(),
                extraction_status = document.extraction_status.as_str(),
                "document matches corrective filter"
            );

            if !trigger {
                continue;
            }

            report.processed += 1;
            let settings = ExtractionSettings {
                automatic_deduplication: true,
            };
            match coordinator
                .trigger_extraction(&document.id, settings, true)
                .await
            {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    report.failed += 1;
                    if !err.is_recoverable_submission() {
                        non_recoverable += 1;
                    }
                    warn!(
                        document_id = %document.id,
                        error = %err,
                        "corrective extraction submission failed"
                    );
                }
            }
        }

        info!(
            filter = filter.as_str(),
            matching = report.matching,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "corrective scan finished"
        );

        if non_recoverable > 0 {
            return Err(AppError::Processing(format!(
                "{non_recoverable} corrective submissions failed non-recoverably \
                 (matching={}, processed={}, succeeded={}, failed={})",
                report.matching, report.processed, report.succeeded, report.failed
            )));
        }

        Ok(report)
    }
}
