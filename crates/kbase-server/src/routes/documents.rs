//! Document routes: list, upload, delete, content, reindex.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use kbase_ingest::Upload;

/// Upper bound on one multipart upload.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents", get(list_documents))
        .route(
            "/documents/upload",
            post(upload_document).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/documents/{id}", delete(delete_document))
        .route("/documents/{id}/content", get(document_content))
        .route("/documents/{id}/reindex", post(reindex_document))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    all: bool,
}

/// GET /api/documents: visible documents; `?all=true` lists every workspace (admin).
async fn list_documents(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let documents = if q.all {
        state.ingester.list_all(&p)?
    } else {
        state.ingester.list(&p)?
    };
    Ok(Json(json!({
        "total": documents.len(),
        "documents": documents,
    })))
}

/// POST /api/documents/upload: multipart `file` plus optional `is_global`.
async fn upload_document(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut upload = None;
    let mut is_global = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read upload: {}", e)))?;
                upload = Some(Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            "is_global" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read is_global: {}", e)))?;
                is_global = parse_flag(&value)?;
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("missing 'file' field"))?;
    let filename = upload.filename.clone();
    let outcome = state.ingester.ingest(&p, upload, is_global).await?;

    let (status, label) = if outcome.is_created() {
        (StatusCode::CREATED, "created")
    } else {
        (StatusCode::OK, "deduplicated")
    };
    Ok((
        status,
        Json(json!({
            "status": label,
            "id": outcome.document_id(),
            "filename": filename,
        })),
    ))
}

/// Form checkbox values. Anything unrecognised is rejected.
fn parse_flag(value: &str) -> ApiResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        other => Err(ApiError::bad_request(format!("invalid is_global value '{}'", other))),
    }
}

/// DELETE /api/documents/{id}
async fn delete_document(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let doc = state.ingester.delete(&p, id).await?;
    Ok(Json(json!({ "deleted": doc.id, "filename": doc.filename })))
}

/// GET /api/documents/{id}/content: the original bytes.
async fn document_content(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let (doc, bytes) = state.ingester.fetch(&p, id).await?;
    let content_type = doc
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let disposition = format!("inline; filename=\"{}\"", header_safe(&doc.filename));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// POST /api/documents/{id}/reindex
async fn reindex_document(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let chunks = state.ingester.reindex(&p, id).await?;
    Ok(Json(json!({ "id": id, "chunks": chunks })))
}

/// ASCII-only filename for a quoted header parameter.
fn header_safe(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{header_safe, parse_flag};

    #[test]
    fn test_header_safe() {
        assert_eq!(header_safe("leave policy.pdf"), "leave policy.pdf");
        assert_eq!(header_safe("年假\".txt"), "___.txt");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag(" On ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(!parse_flag("").unwrap());
        assert_eq!(parse_flag("maybe").unwrap_err().status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
