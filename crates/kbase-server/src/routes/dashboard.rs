//! Dashboard summary for the signed-in user.
//!
//! Admins see every document and session; everyone else sees what their
//! visibility scope admits and their own sessions.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;
use kbase_ingest::file::extension;
use kbase_store::DocumentListing;

const ACTIVITY_DAYS: i64 = 7;
const RECENT_DOCS: usize = 5;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/dashboard/stats", get(dashboard_stats))
}

/// GET /api/dashboard/stats
async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    AuthUser(p): AuthUser,
) -> ApiResult<Json<Value>> {
    let store = &state.store;
    let session_owner = if p.is_admin() { None } else { Some(p.user_id) };

    let (documents, user_count) = if p.is_admin() {
        (store.list_all_documents()?, store.stats()?.total_users)
    } else {
        let scope = store.resolve_visibility_scope(&p)?;
        (store.list_documents(&scope)?, 0)
    };
    let total_chats = store.count_sessions(session_owner)?;
    let dept_name = match p.workspace_id.as_deref() {
        Some(id) => store.get_workspace(id)?.map(|w| w.name),
        None => None,
    }
    .unwrap_or_else(|| "Global".to_string());

    let first_day = Utc::now().date_naive() - Duration::days(ACTIVITY_DAYS - 1);
    let since = first_day.and_time(NaiveTime::default()).and_utc().timestamp_millis();
    let starts = store.session_starts_since(session_owner, since)?;
    let (dates, counts) = activity(first_day, &starts);

    let recent_docs: Vec<Value> = documents
        .iter()
        .take(RECENT_DOCS)
        .map(|d| {
            json!({
                "id": d.document.id,
                "name": d.document.filename,
                "date": format_day(d.document.uploaded_at),
                "uploader": d.uploader_name,
            })
        })
        .collect();

    Ok(Json(json!({
        "metrics": {
            "total_docs": documents.len(),
            "total_chats": total_chats,
            "user_count": user_count,
            "dept_name": dept_name,
        },
        "charts": {
            "file_types": file_type_breakdown(&documents),
            "activity": { "dates": dates, "counts": counts },
        },
        "recent_docs": recent_docs,
    })))
}

/// Counts per coarse file family; empty families are omitted.
fn file_type_breakdown(documents: &[DocumentListing]) -> Vec<Value> {
    let mut counts = [("PDF", 0usize), ("Word", 0), ("Text", 0), ("Other", 0)];
    for d in documents {
        let slot = match extension(&d.document.filename).as_deref() {
            Some("pdf") => 0,
            Some("doc" | "docx") => 1,
            Some("txt" | "md") => 2,
            _ => 3,
        };
        counts[slot].1 += 1;
    }
    counts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(name, n)| json!({ "name": name, "value": n }))
        .collect()
}

/// Sessions started per day over the window beginning at `first_day`.
fn activity(first_day: NaiveDate, starts: &[i64]) -> (Vec<String>, Vec<usize>) {
    let dates = (0..ACTIVITY_DAYS)
        .map(|i| (first_day + Duration::days(i)).format("%m-%d").to_string())
        .collect();
    let mut counts = vec![0usize; ACTIVITY_DAYS as usize];
    for &ms in starts {
        if let Some(ts) = DateTime::from_timestamp_millis(ms) {
            let offset = (ts.date_naive() - first_day).num_days();
            if (0..ACTIVITY_DAYS).contains(&offset) {
                counts[offset as usize] += 1;
            }
        }
    }
    (dates, counts)
}

fn format_day(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|ts| ts.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbase_store::Document;

    fn listing(filename: &str) -> DocumentListing {
        DocumentListing {
            document: Document {
                id: 1,
                filename: filename.into(),
                size: 1,
                content_type: None,
                workspace_id: "hr".into(),
                is_global: false,
                content_hash: "h".into(),
                locator: "hr/h".into(),
                uploader_id: None,
                uploaded_at: 0,
            },
            workspace_name: None,
            uploader_name: None,
        }
    }

    #[test]
    fn test_file_type_breakdown() {
        let docs = [
            listing("a.pdf"),
            listing("b.PDF"),
            listing("c.docx"),
            listing("d.md"),
            listing("e.xlsx"),
        ];
        let chart = file_type_breakdown(&docs);
        assert_eq!(
            chart,
            vec![
                json!({"name": "PDF", "value": 2}),
                json!({"name": "Word", "value": 1}),
                json!({"name": "Text", "value": 1}),
                json!({"name": "Other", "value": 1}),
            ]
        );
        assert!(file_type_breakdown(&[]).is_empty());
    }

    #[test]
    fn test_activity_buckets_by_day() {
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day = |d: u32, h: u32| {
            NaiveDate::from_ymd_opt(2024, 3, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp_millis()
        };
        let (dates, counts) = activity(first, &[day(1, 9), day(1, 23), day(7, 0), day(8, 1)]);
        assert_eq!(dates.first().map(String::as_str), Some("03-01"));
        assert_eq!(dates.last().map(String::as_str), Some("03-07"));
        assert_eq!(counts, vec![2, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_format_day() {
        assert_eq!(format_day(0), "1970-01-01");
    }
}
