use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::application::services::realtime::audit_log::{AuditEntry, read_audit_log};
use crate::bootstrap::app_context::AppContext;
use crate::domain::documents::delta::DeltaLogEntry;
use crate::presentation::http::auth::{self, Bearer};

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentContentResponse {
    pub id: String,
    pub sequence: i64,
    pub snapshot_sequence: i64,
    pub skipped: usize,
    pub content: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckpointResponse {
    pub sequence: i64,
    pub saved: bool,
    pub truncated: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeltaItem {
    pub seq: i64,
    pub deleted: bool,
    /// Stored operation payload; absent for tombstones.
    pub op: Option<String>,
}

impl From<DeltaLogEntry> for DeltaItem {
    fn from(entry: DeltaLogEntry) -> Self {
        Self {
            seq: entry.seq,
            deleted: entry.is_tombstone(),
            op: entry.live_op().map(str::to_owned),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeltaListResponse {
    pub snapshot_sequence: i64,
    pub items: Vec<DeltaItem>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DuplicateRequest {
    pub target_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DuplicateResponse {
    pub target_id: String,
    pub sequence: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    pub items: Vec<AuditEntry>,
}

pub fn routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/documents/:id/content", get(get_content))
        .route("/documents/:id/checkpoint", post(checkpoint_document))
        .route("/documents/:id/deltas", get(list_deltas))
        .route("/documents/:id/deltas/:seq", delete(delete_delta))
        .route("/documents/:id/duplicate", post(duplicate_document))
        .route("/documents/:id/audit", get(get_audit_log))
        .with_state(ctx)
}

fn internal<'a>(
    doc_id: &'a str,
    event: &'static str,
) -> impl FnOnce(anyhow::Error) -> StatusCode + 'a {
    move |e| {
        tracing::error!(document_id = doc_id, error = ?e, "{event}");
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[utoipa::path(get, path = "/api/documents/{id}/content", tag = "Documents",
    params(("id" = String, Path, description = "Document ID")),
    responses((status = 200, body = DocumentContentResponse), (status = 404)))]
pub async fn get_content(
    State(ctx): State<AppContext>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> Result<Json<DocumentContentResponse>, StatusCode> {
    auth::authorize_document(&ctx, &bearer.0, &id).await?;
    let assembled = ctx
        .assembler()
        .assemble(&id)
        .await
        .map_err(internal(&id, "document_assemble_failed"))?;
    Ok(Json(DocumentContentResponse {
        content: assembled.document.render(),
        id,
        sequence: assembled.sequence,
        snapshot_sequence: assembled.snapshot_sequence,
        skipped: assembled.skipped,
    }))
}

#[utoipa::path(post, path = "/api/documents/{id}/checkpoint", tag = "Documents",
    params(("id" = String, Path, description = "Document ID")),
    responses((status = 200, body = CheckpointResponse)))]
pub async fn checkpoint_document(
    State(ctx): State<AppContext>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> Result<Json<CheckpointResponse>, StatusCode> {
    auth::authorize_document(&ctx, &bearer.0, &id).await?;
    let outcome = ctx
        .assembler()
        .checkpoint(&id)
        .await
        .map_err(internal(&id, "document_checkpoint_failed"))?;
    Ok(Json(CheckpointResponse {
        sequence: outcome.sequence,
        saved: outcome.saved,
        truncated: outcome.truncated,
    }))
}

#[utoipa::path(get, path = "/api/documents/{id}/deltas", tag = "Documents",
    params(("id" = String, Path, description = "Document ID")),
    responses((status = 200, body = DeltaListResponse)))]
pub async fn list_deltas(
    State(ctx): State<AppContext>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> Result<Json<DeltaListResponse>, StatusCode> {
    auth::authorize_document(&ctx, &bearer.0, &id).await?;
    let assembler = ctx.assembler();
    let snapshot_sequence = assembler
        .snapshots()
        .latest_sequence(&id)
        .await
        .map_err(internal(&id, "delta_list_snapshot_failed"))?;
    let entries = assembler
        .delta_log()
        .read(&id, snapshot_sequence, None)
        .await
        .map_err(internal(&id, "delta_list_failed"))?;
    Ok(Json(DeltaListResponse {
        snapshot_sequence,
        items: entries.into_iter().map(DeltaItem::from).collect(),
    }))
}

#[utoipa::path(delete, path = "/api/documents/{id}/deltas/{seq}", tag = "Documents",
    params(
        ("id" = String, Path, description = "Document ID"),
        ("seq" = i64, Path, description = "Sequence number to tombstone")
    ),
    responses((status = 204), (status = 404)))]
pub async fn delete_delta(
    State(ctx): State<AppContext>,
    bearer: Bearer,
    Path((id, seq)): Path<(String, i64)>,
) -> Result<StatusCode, StatusCode> {
    auth::authorize_document(&ctx, &bearer.0, &id).await?;
    let replaced = ctx
        .assembler()
        .delta_log()
        .delete(&id, seq)
        .await
        .map_err(internal(&id, "delta_delete_failed"))?;
    if replaced {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

#[utoipa::path(post, path = "/api/documents/{id}/duplicate", tag = "Documents",
    params(("id" = String, Path, description = "Source document ID")),
    request_body = DuplicateRequest,
    responses((status = 200, body = DuplicateResponse), (status = 400), (status = 404)))]
pub async fn duplicate_document(
    State(ctx): State<AppContext>,
    bearer: Bearer,
    Path(id): Path<String>,
    Json(req): Json<DuplicateRequest>,
) -> Result<Json<DuplicateResponse>, StatusCode> {
    let target_id = req.target_id.trim().to_string();
    if target_id.is_empty() || target_id == id {
        return Err(StatusCode::BAD_REQUEST);
    }
    auth::authorize_document(&ctx, &bearer.0, &id).await?;
    auth::authorize_document(&ctx, &bearer.0, &target_id).await?;
    let sequence = ctx
        .assembler()
        .duplicate(&id, &target_id)
        .await
        .map_err(internal(&id, "document_duplicate_failed"))?;
    Ok(Json(DuplicateResponse {
        target_id,
        sequence,
    }))
}

#[utoipa::path(get, path = "/api/documents/{id}/audit", tag = "Documents",
    params(("id" = String, Path, description = "Document ID")),
    responses((status = 200, body = AuditLogResponse)))]
pub async fn get_audit_log(
    State(ctx): State<AppContext>,
    bearer: Bearer,
    Path(id): Path<String>,
) -> Result<Json<AuditLogResponse>, StatusCode> {
    auth::authorize_document(&ctx, &bearer.0, &id).await?;
    let items = read_audit_log(ctx.object_store().as_ref(), &id)
        .await
        .map_err(internal(&id, "audit_log_read_failed"))?;
    Ok(Json(AuditLogResponse { items }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_map_to_internal_error() {
        let doc_id = String::from("doc");
        let map = internal(&doc_id, "document_assemble_failed");
        assert_eq!(
            map(anyhow::anyhow!("object store down")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn tombstones_list_without_payload() {
        let item = DeltaItem::from(DeltaLogEntry::from_stored(4, "deleted-4".to_string()));
        assert!(item.deleted);
        assert_eq!(item.op, None);
        let item = DeltaItem::from(DeltaLogEntry::from_stored(5, "AQID".to_string()));
        assert_eq!(item.op.as_deref(), Some("AQID"));
    }
}
