//! Sequential batch processing with per-document failure isolation.

use serde::Serialize;

use super::RoundOrchestrator;
use crate::sink::DocumentOutcome;
use crate::RuntimeError;
use recast_core::Document;

/// Counts for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    /// Documents whose final text passed as authentic.
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs documents through an orchestrator one at a time.
///
/// A document that fails is written as an error row and the batch moves
/// on. Only a failure to write a result row stops the batch.
pub struct BatchRunner<'a> {
    orchestrator: &'a RoundOrchestrator,
}

impl<'a> BatchRunner<'a> {
    pub fn new(orchestrator: &'a RoundOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn run<I>(&self, documents: I) -> Result<BatchSummary, RuntimeError>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut summary = BatchSummary::default();

        for document in documents {
            let (id, title, text) = (
                document.id.clone(),
                document.original_title.clone(),
                document.original_text.clone(),
            );

            let outcome = match self.orchestrator.run_document(document).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(document = %id, error = %e, "document failed");
                    DocumentOutcome::failed(id, title, text, &e)
                }
            };

            summary.processed += 1;
            if outcome.is_failure() {
                summary.failed += 1;
            } else if outcome.success {
                summary.succeeded += 1;
            }
            self.orchestrator.sink().write_result(&outcome)?;
        }

        tracing::info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }
}
