//! Integration tests for HTTP API endpoints.

mod common;

use axum::http::StatusCode;
use bytes::Bytes;
use casebook_core::attachment::{AttachmentOwner, OwnerKind};
use common::TestServer;
use serde_json::{Value, json};
use uuid::Uuid;

fn assert_error(body: &Value, code: &str) {
    assert_eq!(body["code"], code, "unexpected body: {body}");
    assert!(body["message"].is_string(), "missing message: {body}");
}

// =============================================================================
// Health and metrics
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;
    let (status, body) = server.json("GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_backend"], "memory");
}

#[tokio::test]
async fn test_health_reports_unavailable_storage() {
    let server = TestServer::new().await;
    server.memory().set_failing(true);
    let (status, body) = server.json("GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["storage"], "unavailable");
    assert_eq!(body["metadata"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    server
        .json(
            "POST",
            "/v1/attachments/upload",
            Some(json!({ "file_name": "a.txt", "file_size": 10, "file_type": "text/plain" })),
        )
        .await;

    let (status, _, body) = server.raw("GET", "/metrics", Bytes::new()).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("casebook_uploads_initialized_total"));
}

#[tokio::test]
async fn test_metrics_can_be_disabled() {
    let server = TestServer::with_config(|c| c.server.metrics_enabled = false).await;
    let (status, _, _) = server.raw("GET", "/metrics", Bytes::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Projects and sequence ids
// =============================================================================

#[tokio::test]
async fn test_project_crud() {
    let server = TestServer::new().await;
    let project_id = server.project("WEB").await;

    let (status, body) = server
        .json("GET", &format!("/v1/projects/{project_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project_key"], "WEB");

    let (status, body) = server
        .json(
            "POST",
            "/v1/projects",
            Some(json!({ "project_key": "WEB", "name": "Again" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "validation_error");

    let (status, body) = server.json("GET", "/v1/projects", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sequential_test_case_ids() {
    let server = TestServer::new().await;
    let project_id = server.project("APP").await;
    let uri = format!("/v1/projects/{project_id}/testcases");

    let mut ids = Vec::new();
    for title in ["Login", "Logout", "Reset password"] {
        let (status, body) = server.json("POST", &uri, Some(json!({ "title": title }))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["priority"], "MEDIUM");
        ids.push(body["tc_id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids, ["tc1", "tc2", "tc3"]);

    let (status, body) = server.json("GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_deleted_test_case_id_not_reused() {
    let server = TestServer::new().await;
    let project_id = server.project("APP").await;
    let uri = format!("/v1/projects/{project_id}/testcases");

    let (_, first) = server.json("POST", &uri, Some(json!({ "title": "One" }))).await;
    let first_id = first["id"].as_str().unwrap();

    let (status, _) = server
        .json("DELETE", &format!("/v1/testcases/{first_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = server
        .json("GET", &format!("/v1/testcases/{first_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "not_found");

    let (_, second) = server.json("POST", &uri, Some(json!({ "title": "Two" }))).await;
    assert_eq!(second["tc_id"], "tc2");
}

#[tokio::test]
async fn test_defect_ids() {
    let server = TestServer::new().await;
    let project_id = server.project("APP").await;

    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/projects/{project_id}/defects"),
            Some(json!({ "title": "Crash", "severity": "HIGH" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["defect_id"], "DEF-1");
    assert_eq!(body["severity"], "HIGH");
    assert_eq!(body["status"], "NEW");

    let id = body["id"].as_str().unwrap();
    let (status, body) = server.json("GET", &format!("/v1/defects/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Crash");
}

#[tokio::test]
async fn test_test_case_input_errors() {
    let server = TestServer::new().await;
    let project_id = server.project("APP").await;

    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/projects/{}/testcases", Uuid::new_v4()),
            Some(json!({ "title": "Orphan" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "not_found");

    let (status, body) = server
        .json(
            "POST",
            "/v1/projects/not-a-uuid/testcases",
            Some(json!({ "title": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "bad_request");

    let (status, _, bytes) = server
        .raw(
            "POST",
            &format!("/v1/projects/{project_id}/testcases"),
            Bytes::from_static(b"{\"title\":"),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_error(&body, "bad_request");

    let (status, body) = server
        .json(
            "POST",
            &format!("/v1/projects/{project_id}/testcases"),
            Some(json!({ "title": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "validation_error");
}

// =============================================================================
// Uploads
// =============================================================================

#[tokio::test]
async fn test_upload_lifecycle() {
    let server = TestServer::new().await;
    let owner_id = Uuid::new_v4();

    let (status, init) = server
        .json(
            "POST",
            "/v1/attachments/upload",
            Some(json!({
                "file_name": "log.txt",
                "file_size": 150,
                "file_type": "text/plain",
                "owner": { "type": "test_case", "id": owner_id },
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{init}");
    assert_eq!(init["part_count"], 3);
    assert_eq!(init["part_urls"].as_array().unwrap().len(), 3);

    let upload_id = init["upload_id"].as_str().unwrap();
    let storage_key = init["storage_key"].as_str().unwrap();
    let data = vec![42u8; 150];
    let parts: Vec<Value> = data
        .chunks(64)
        .zip(1u32..)
        .map(|(chunk, n)| {
            let etag = server
                .memory()
                .put_part(storage_key, upload_id, n, Bytes::copy_from_slice(chunk))
                .unwrap();
            json!({ "part_number": n, "etag": etag })
        })
        .collect();

    // Leaving out part 2 names it in the error.
    let without_second = vec![parts[0].clone(), parts[2].clone()];
    let (status, body) = server
        .json(
            "POST",
            "/v1/attachments/upload/complete",
            Some(json!({
                "upload_id": upload_id,
                "storage_key": storage_key,
                "parts": without_second,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("missing part 2"), "{body}");

    let (status, record) = server
        .json(
            "POST",
            "/v1/attachments/upload/complete",
            Some(json!({ "upload_id": upload_id, "storage_key": storage_key, "parts": parts })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{record}");
    assert_eq!(record["status"], "active");
    assert_eq!(record["file_size"], 150);
    assert_eq!(record["owner"]["type"], "test_case");
    assert_eq!(record["owner"]["id"], owner_id.to_string());

    let (status, listed) = server
        .json(
            "GET",
            &format!("/v1/attachments?owner_type=test_case&owner_id={owner_id}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_validation_errors() {
    let server = TestServer::new().await;

    for body in [
        json!({ "file_name": "a.txt", "file_size": 0, "file_type": "text/plain" }),
        json!({ "file_name": "", "file_size": 10, "file_type": "text/plain" }),
        json!({ "file_name": "a.exe", "file_size": 10, "file_type": "application/x-msdownload" }),
        json!({ "file_name": "big.txt", "file_size": 10u64 << 30, "file_type": "text/plain" }),
    ] {
        let (status, reply) = server
            .json("POST", "/v1/attachments/upload", Some(body))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_error(&reply, "validation_error");
    }

    let (status, reply) = server
        .json(
            "POST",
            "/v1/attachments/upload/complete",
            Some(json!({ "upload_id": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(reply["message"].as_str().unwrap().contains("missing required parameters"));
}

#[tokio::test]
async fn test_abort_with_zero_parts() {
    let server = TestServer::new().await;
    let (_, init) = server
        .json(
            "POST",
            "/v1/attachments/upload",
            Some(json!({ "file_name": "a.txt", "file_size": 10, "file_type": "text/plain" })),
        )
        .await;

    let (status, body) = server
        .json(
            "POST",
            "/v1/attachments/upload/abort",
            Some(json!({ "upload_id": init["upload_id"], "storage_key": init["storage_key"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(server.memory().pending_uploads(), 0);
}

// =============================================================================
// Attachments
// =============================================================================

#[tokio::test]
async fn test_download_and_link() {
    let server = TestServer::new().await;
    let record = server.seed_attachment(None).await;
    let uri = format!("/v1/attachments/{}", record.id);

    let (status, body) = server.json("GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attachment"]["file_name"], "report.pdf");
    assert_eq!(body["download_url"]["method"], "GET");
    assert!(body["download_url"]["url"].as_str().unwrap().contains(&record.storage_key));

    let defect = Uuid::new_v4();
    let (status, body) = server
        .json(
            "PATCH",
            &uri,
            Some(json!({ "owner": { "type": "defect", "id": defect } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"]["type"], "defect");

    let (status, body) = server.json("PATCH", &uri, Some(json!({ "owner": null }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["owner"].is_null());

    let (status, body) = server
        .json("GET", &format!("/v1/attachments/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "not_found");
}

#[tokio::test]
async fn test_list_attachments_requires_owner() {
    let server = TestServer::new().await;
    let (status, body) = server.json("GET", "/v1/attachments", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "bad_request");

    let (status, _) = server
        .json(
            "GET",
            &format!("/v1/attachments?owner_type=project&owner_id={}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_two_phase_delete() {
    let server = TestServer::new().await;
    let owner = AttachmentOwner::new(OwnerKind::TestStep, Uuid::new_v4());
    let record = server.seed_attachment(Some(owner)).await;
    let uri = format!("/v1/attachments/{}", record.id);

    let (status, body) = server.json("DELETE", &format!("{uri}?step=prepare"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "prepare");
    assert!(body["delete_url"].is_string());
    assert!(body["token"].is_string());

    // Still readable after prepare.
    let (status, body) = server.json("GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attachment"]["status"], "pending_delete");

    let (status, body) = server.json("DELETE", &format!("{uri}?step=confirm"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "deleted");
    assert!(server.memory().object(&record.storage_key).is_none());

    let (status, body) = server.json("DELETE", &format!("{uri}?step=confirm"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "not_found");
    assert_eq!(server.memory().delete_calls(), 1);
}

#[tokio::test]
async fn test_delete_requires_valid_step() {
    let server = TestServer::new().await;
    let record = server.seed_attachment(None).await;

    for query in ["", "?step=now"] {
        let (status, body) = server
            .json("DELETE", &format!("/v1/attachments/{}{query}", record.id), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_error(&body, "bad_request");
    }
}

#[tokio::test]
async fn test_storage_fault_hides_details() {
    let server = TestServer::new().await;
    let record = server.seed_attachment(None).await;
    server.memory().set_failing(true);

    let (status, body) = server
        .json(
            "DELETE",
            &format!("/v1/attachments/{}?step=prepare", record.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_error(&body, "storage_error");
    assert!(!body["message"].as_str().unwrap().contains("injected"));
}

#[tokio::test]
async fn test_admin_reconcile() {
    let server = TestServer::new().await;
    let (status, body) = server.json("POST", "/v1/admin/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletions_examined"], 0);
    assert_eq!(body["errors"], 0);
}
