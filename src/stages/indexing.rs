//! Indexing: raw extracted text → external index under the document's
//! isolation key.
//!
//! The overlap chunker runs first so that text producing no chunks fails
//! before any external call. The chunks travel with the full text; indexers
//! that chunk on their own only read the text.

use anyhow::Result;

use lectern_core::chunk::chunk_for_index;
use lectern_core::models::{Document, Stage};
use lectern_core::services::IndexRequest;

use super::{claim, finish, Claimed, StageContext, StageRun};

pub async fn run(ctx: &StageContext, document_id: &str) -> Result<StageRun> {
    let doc = match claim(ctx, document_id, Stage::Indexing).await? {
        Claimed::Run(doc) => doc,
        Claimed::Skip(claim) => return Ok(StageRun::Skipped(claim)),
    };

    let outcome = match index(ctx, &doc).await {
        Ok(chunk_count) => {
            ctx.store
                .complete_indexing(document_id, chunk_count)
                .await?;
            Ok(())
        }
        Err(message) => Err(message),
    };
    finish(ctx, document_id, Stage::Indexing, outcome).await
}

async fn index(ctx: &StageContext, doc: &Document) -> std::result::Result<i64, String> {
    let text = doc.extracted_text.clone().unwrap_or_default();
    let chunks = chunk_for_index(&text, ctx.settings.index_chunks);
    if chunks.is_empty() {
        return Err("no chunks produced from extracted text".to_string());
    }
    let chunk_count = chunks.len() as i64;

    let receipt = ctx
        .indexer
        .index(&IndexRequest {
            isolation_key: doc.isolation_key(),
            title: doc.title.clone(),
            text,
            chunks,
        })
        .await
        .map_err(|e| e.to_string())?;

    tracing::debug!(doc_id = %doc.id, chunks = chunk_count, status = %receipt.status, "indexed");
    Ok(chunk_count)
}
