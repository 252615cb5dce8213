use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use scanmint::commit::RetryPolicy;
use scanmint::core::{EntityId, QueryResponse, find_tag};
use scanmint::publish::{
    AssetPublisher, PROFILES_BY_DELEGATE_ACTION, ProfileDirectory, PublishSettings,
};
use scanmint::remote::{AddressOnlySigner, InMemoryBackend, ProcessBlueprint, RemoteContext};
use scanmint::web::{AppState, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "scanmint-test-boundary";
const REGISTRY: &str = "registry-1";
const PROFILE: &str = "profile-1";
const COLLECTION: &str = "collection-1";

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).expect("valid id")
}

async fn backend_with_profile() -> Arc<InMemoryBackend> {
    let backend = Arc::new(
        InMemoryBackend::new()
            .with_spawn_ids(["proc-abc"])
            .with_entity(id(COLLECTION), "collection-owner")
            .with_entity(id(REGISTRY), "registry-owner")
            .with_entity(id(PROFILE), "wallet-1"),
    );
    backend
        .set_query_response(
            id(REGISTRY),
            PROFILES_BY_DELEGATE_ACTION,
            QueryResponse::Json(json!([{ "ProfileId": PROFILE, "CallerAddress": "wallet-1" }])),
        )
        .await;
    backend
}

fn app(backend: &Arc<InMemoryBackend>, max_image_bytes: usize) -> axum::Router {
    let ctx = RemoteContext::new(backend.clone(), Arc::new(AddressOnlySigner::new("wallet-1")));
    let mut settings = PublishSettings::new(ProcessBlueprint::new("module", "scheduler"))
        .with_collection(id(COLLECTION))
        .with_retry_policy(RetryPolicy::bounded(5).with_delay(Duration::from_millis(1)));
    settings.max_image_bytes = max_image_bytes;

    let profiles = ProfileDirectory::new(ctx.clone(), id(REGISTRY));
    let publisher = AssetPublisher::new(ctx, Arc::new(settings), profiles);
    build_router(AppState::new(publisher))
}

enum Part<'a> {
    File {
        name: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
    Text {
        name: &'a str,
        value: &'a str,
    },
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File {
                name,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"scan.jpg\"\r\nContent-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn full_upload<'a>(image: &'a [u8], name: &'a str) -> Vec<Part<'a>> {
    vec![
        Part::File {
            name: "image",
            content_type: "image/jpeg",
            bytes: image,
        },
        Part::Text {
            name: "location",
            value: "52.5163,13.3777",
        },
        Part::Text {
            name: "walletAddress",
            value: "wallet-1",
        },
        Part::Text { name: "name", value: name },
    ]
}

async fn send_upload(app: &axum::Router, parts: &[Part<'_>]) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .expect("request should build");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("response expected");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");

    if body.is_empty() {
        return (status, Value::Null);
    }

    let json = serde_json::from_slice::<Value>(&body).expect("body should be valid JSON");
    (status, json)
}

#[tokio::test]
async fn root_says_hello() {
    let backend = backend_with_profile().await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/")
        .body(Body::empty())
        .expect("request should build");

    let response = app(&backend, 1024).oneshot(request).await.expect("response expected");
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Hello World!");
}

#[tokio::test]
async fn upload_publishes_and_registers_asset() {
    let backend = backend_with_profile().await;
    let app = app(&backend, 1024);

    let (status, body) = send_upload(&app, &full_upload(b"\xff\xd8\xffjpeg", "Gate")).await;

    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
    assert_eq!(body["message"], "Upload received successfully");
    assert_eq!(body["id"], "proc-abc");
    assert_eq!(body["walletAddress"], "wallet-1");
    assert_eq!(body["profileId"], PROFILE);
    assert_eq!(body["name"], "Gate");
    assert_eq!(body["location"], "52.5163,13.3777");
    assert_eq!(body["contentType"], "image/jpeg");
    assert!(body["timestamp"].as_str().is_some_and(|ts| ts.ends_with('Z')));

    let record = backend.entity(&id("proc-abc")).await.expect("asset spawned");
    assert_eq!(record.data, b"\xff\xd8\xffjpeg".to_vec());
    assert_eq!(find_tag(&record.tags, "Title"), Some("Gate"));
    assert_eq!(find_tag(&record.tags, "Profile-Creator"), Some(PROFILE));
    assert_eq!(record.evaluated.len(), 1);
    assert!(record.evaluated[0].contains("['wallet-1'] = '1'"));
    assert_eq!(backend.members(&id(COLLECTION)).await, vec![id("proc-abc")]);
}

#[tokio::test]
async fn quoted_name_stays_inside_the_lua_literal() {
    let backend = backend_with_profile().await;
    let app = app(&backend, 1024);
    let name = "x' Balances = { ['attacker'] = '1000000' } Owner = 'attacker' --";

    let (status, body) = send_upload(&app, &full_upload(b"img", name)).await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {body}");
    assert_eq!(body["name"], name);

    let record = backend.entity(&id("proc-abc")).await.expect("asset spawned");
    assert_eq!(find_tag(&record.tags, "Title"), Some(name));
    let source = &record.evaluated[0];
    assert!(source.contains(
        r"Name = Name or 'x\' Balances = { [\'attacker\'] = \'1000000\' } Owner = \'attacker\' --'"
    ));
    assert!(source.contains("Balances = Balances or { ['wallet-1'] = '1' }"));
    assert!(!source.contains("['attacker'] = '1000000'"));
}

#[tokio::test]
async fn missing_fields_are_rejected_in_order() {
    let backend = backend_with_profile().await;
    let app = app(&backend, 1024);

    let (status, body) = send_upload(
        &app,
        &[Part::Text {
            name: "name",
            value: "Gate",
        }],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "No image file provided" }));

    let mut parts = full_upload(b"img", "Gate");
    parts.remove(1);
    let (status, body) = send_upload(&app, &parts).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Location is required");

    let (status, body) = send_upload(&app, &full_upload(b"img", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Name is required");

    assert_eq!(backend.entity_count().await, 3, "nothing may be spawned");
}

#[tokio::test]
async fn oversized_image_is_rejected() {
    let backend = backend_with_profile().await;
    let app = app(&backend, 16);

    let (status, body) = send_upload(&app, &full_upload(&[7u8; 64], "Gate")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Image exceeds the 16 byte limit");
}

#[tokio::test]
async fn unknown_wallet_has_no_profile() {
    let backend = Arc::new(InMemoryBackend::new().with_entity(id(REGISTRY), "registry-owner"));
    let app = app(&backend, 1024);

    let (status, body) = send_upload(&app, &full_upload(b"img", "Gate")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Profile not found");
}

#[tokio::test]
async fn spawn_failure_answers_internal_error() {
    let backend = backend_with_profile().await;
    backend.fail_next_spawns(1).await;
    let app = app(&backend, 1024);

    let (status, body) = send_upload(&app, &full_upload(b"img", "Gate")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
    assert!(
        body["details"]
            .as_str()
            .is_some_and(|details| details.starts_with("Spawn step failed after 1 attempt(s)"))
    );
}

#[tokio::test]
async fn exhausted_registration_answers_internal_error() {
    let backend = backend_with_profile().await;
    backend.fail_next_action("Update-Assets", 100).await;
    let app = app(&backend, 1024);

    let (status, body) = send_upload(&app, &full_upload(b"img", "Gate")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        body["details"]
            .as_str()
            .is_some_and(|details| details.contains("registration failed"))
    );
    // The asset stays spawned.
    assert!(backend.entity(&id("proc-abc")).await.is_some());
}

#[tokio::test]
async fn concurrent_uploads_get_distinct_entities() {
    let backend = backend_with_profile().await;
    let app = app(&backend, 1024);

    let names: Vec<String> = (0..5).map(|i| format!("scan-{i}")).collect();
    let uploads = names
        .iter()
        .map(|name| full_upload(b"img", name.as_str()))
        .collect::<Vec<_>>();
    let responses =
        futures::future::join_all(uploads.iter().map(|parts| send_upload(&app, parts))).await;

    let ids: BTreeSet<String> = responses
        .iter()
        .map(|(status, body)| {
            assert_eq!(*status, StatusCode::OK, "unexpected body: {body}");
            body["id"].as_str().expect("id").to_string()
        })
        .collect();
    assert_eq!(ids.len(), 5);

    let members: BTreeSet<String> = backend
        .members(&id(COLLECTION))
        .await
        .into_iter()
        .map(|member| member.as_str().to_string())
        .collect();
    assert_eq!(members, ids);
}
