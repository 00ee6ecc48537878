//! Extraction: source document → raw text.
//!
//! A single call to the extraction service. Any failure, including an empty
//! result, is terminal for this run.

use anyhow::Result;

use lectern_core::models::{Document, Stage};

use super::{claim, finish, Claimed, StageContext, StageRun};

pub async fn run(ctx: &StageContext, document_id: &str) -> Result<StageRun> {
    let doc = match claim(ctx, document_id, Stage::Extraction).await? {
        Claimed::Run(doc) => doc,
        Claimed::Skip(claim) => return Ok(StageRun::Skipped(claim)),
    };

    let outcome = match extract(ctx, &doc).await {
        Ok(text) => {
            ctx.store.complete_extraction(document_id, &text).await?;
            Ok(())
        }
        Err(message) => Err(message),
    };
    finish(ctx, document_id, Stage::Extraction, outcome).await
}

async fn extract(ctx: &StageContext, doc: &Document) -> std::result::Result<String, String> {
    let extraction = ctx
        .extractor
        .extract(&doc.source_ref, doc.content_type.as_deref())
        .await
        .map_err(|e| e.to_string())?;

    if extraction.text.trim().is_empty() {
        return Err("no text extracted".to_string());
    }
    tracing::debug!(
        doc_id = %doc.id,
        chars = extraction.text.len(),
        pages = ?extraction.page_count,
        "text extracted"
    );
    Ok(extraction.text)
}
