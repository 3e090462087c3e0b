//! Reconcile chunks whose vector was written but whose lexical document
//! may be missing.
//!
//! Walks the unlinked ledger rows. A row whose lexical document already
//! exists with the same `embedding_id` is only marked linked; otherwise the
//! document is re-indexed from the content stored in the ledger. Running it
//! twice in a row does nothing the second time.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::error::RagResult;
use crate::services::Services;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub checked: usize,
    pub relinked: usize,
    pub already_present: usize,
}

pub async fn repair(services: &Services) -> RagResult<RepairReport> {
    let pending = services.ledger.pending().await?;
    let mut report = RepairReport {
        checked: pending.len(),
        ..Default::default()
    };

    for link in pending {
        let existing = services.lexical.get_by_id(&link.doc_id).await?;
        match existing {
            Some(doc) if doc.embedding_id == link.embedding_id => {
                report.already_present += 1;
            }
            _ => {
                services
                    .lexical
                    .index_document(
                        &link.doc_id,
                        &link.content,
                        serde_json::json!({ "source": link.document_name }),
                        link.embedding_id,
                    )
                    .await?;
                report.relinked += 1;
                tracing::info!(doc_id = %link.doc_id, embedding_id = link.embedding_id, "chunk relinked");
            }
        }
        services.ledger.mark_linked(&link.doc_id).await?;
    }

    tracing::info!(
        checked = report.checked,
        relinked = report.relinked,
        already_present = report.already_present,
        "repair complete"
    );
    Ok(report)
}

/// CLI entry.
pub async fn run_repair(config: &Config) -> Result<()> {
    let services = Services::from_config(config).await?;
    let report = repair(&services).await?;
    let counts = services.ledger.counts().await?;

    println!("repair");
    println!("  checked: {}", report.checked);
    println!("  relinked: {}", report.relinked);
    println!("  already present: {}", report.already_present);
    println!("  linked chunks: {}", counts.linked);
    println!("  pending chunks: {}", counts.pending);
    println!("ok");
    Ok(())
}
