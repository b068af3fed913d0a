//! Mutating Admission Webhook for Carrier
//!
//! The API server sends an `AdmissionReview` for every GameServer,
//! GameServerSet, Squad and Pod change. This module owns the HTTP side:
//! envelope checks, review decoding and turning a [`Decision`] back into an
//! `AdmissionResponse`. Routing by kind lives in [`dispatch`].

pub mod dispatch;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::response::{StatusCause, StatusDetails};
use tracing::{debug, error};

pub use dispatch::{
    AdmissionObject, Decision, Dispatcher, MutationRequest, ObjectDecoder, ResourceKind,
    Transition,
};

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Admission dispatcher
    pub dispatcher: Dispatcher,
}

impl WebhookState {
    /// Create a new webhook state around a dispatcher
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Create the webhook router
///
/// - POST /mutate - admission reviews for all supported kinds
/// - GET /healthz - liveness
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Handle a mutating admission review
///
/// Empty bodies are answered with 400 and non-JSON bodies with 415 before
/// any decoding happens. A body that is not a valid review yields an
/// `invalid` review response rather than an HTTP error.
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        error!("empty body");
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !is_json(content_type) {
        error!(content_type, "unexpected content type");
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid Content-Type, expect `application/json`",
        )
            .into_response();
    }

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "failed to decode admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review()).into_response();
        }
    };
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review()).into_response();
        }
    };

    let mutation = match mutation_request(&req) {
        Ok(mutation) => mutation,
        Err(e) => {
            let decision = Decision::reject(&crate::Error::from(e));
            return Json(admission_response(&req, decision).into_review()).into_response();
        }
    };
    let decision = state.dispatcher.dispatch(&mutation).await;
    Json(admission_response(&req, decision).into_review()).into_response()
}

/// `application/json`, optionally with parameters such as a charset
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}

fn mutation_request(
    req: &AdmissionRequest<DynamicObject>,
) -> Result<MutationRequest, serde_json::Error> {
    Ok(MutationRequest {
        group: req.kind.group.clone(),
        kind: req.kind.kind.clone(),
        namespace: req.namespace.clone().unwrap_or_default(),
        name: req.name.clone(),
        operation: req.operation.clone(),
        object: req.object.as_ref().map(serde_json::to_value).transpose()?,
        old_object: req.old_object.as_ref().map(serde_json::to_value).transpose()?,
    })
}

/// Build the review response for a decision
///
/// The status always names the object; rejections add the code, message and
/// one cause per field error.
fn admission_response(req: &AdmissionRequest<DynamicObject>, decision: Decision) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(req);
    if !decision.allowed {
        response = response.deny(&decision.reason);
    }
    response.result.code = decision.code;
    response.result.details = Some(StatusDetails {
        name: req.name.clone(),
        group: req.kind.group.clone(),
        kind: req.kind.kind.clone(),
        uid: req.uid.clone(),
        causes: decision
            .causes
            .iter()
            .map(|e| StatusCause {
                reason: e.kind.reason().to_string(),
                message: e.body(),
                field: e.field.to_string(),
            })
            .collect(),
        retry_after_seconds: 0,
    });

    match decision.patch {
        Some(patch) => {
            debug!(uid = %req.uid, operations = patch.0.len(), "returning patch");
            match response.with_patch(patch) {
                Ok(patched) => patched,
                Err(e) => {
                    error!(uid = %req.uid, error = %e, "failed to serialize patch");
                    AdmissionResponse::from(req).deny(format!("patch serialization error: {e}"))
                }
            }
        }
        None => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_quantity;
    use crate::config::SidecarConfig;
    use crate::rbac::{MockAccessControlBackend, Provisioner};
    use crate::validation::StructuralPodValidator;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        let mut backend = MockAccessControlBackend::new();
        backend
            .expect_service_account_exists()
            .returning(|_, _| Ok(true));
        backend
            .expect_role_binding_exists()
            .returning(|_, _| Ok(true));
        let dispatcher = Dispatcher::new(
            Provisioner::new(Arc::new(backend)),
            Arc::new(StructuralPodValidator),
            SidecarConfig {
                image: "carrier/sidecar:v1".to_string(),
                cpu: parse_quantity("100m", "cpu").unwrap(),
                memory: parse_quantity("100M", "memory").unwrap(),
                http_port: 9021,
                grpc_port: 9020,
            },
        );
        webhook_router(Arc::new(WebhookState::new(dispatcher)))
    }

    fn review(operation: &str, object: Value, old_object: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "carrier.ocgi.dev", "version": "v1alpha1", "kind": "GameServer"},
                "resource": {"group": "carrier.ocgi.dev", "version": "v1alpha1", "resource": "gameservers"},
                "name": "arena",
                "namespace": "games",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old_object,
                "dryRun": false
            }
        })
    }

    fn gameserver(container: &str) -> Value {
        json!({
            "apiVersion": "carrier.ocgi.dev/v1alpha1",
            "kind": "GameServer",
            "metadata": {"name": "arena", "namespace": "games"},
            "spec": {
                "ports": [{"name": "udp", "containerPort": 7777}],
                "template": {"spec": {"containers": [{"name": container, "image": "arena:1.0"}]}}
            }
        })
    }

    async fn post(body: Vec<u8>, content_type: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method("POST").uri("/mutate");
        if let Some(ct) = content_type {
            request = request.header(CONTENT_TYPE, ct);
        }
        let response = router()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    // =========================================================================
    // Unit Tests
    // =========================================================================

    #[test]
    fn json_content_type_allows_parameters() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(!is_json("text/plain"));
        assert!(!is_json(""));
    }

    #[tokio::test]
    async fn empty_body_is_bad_request() {
        let (status, _) = post(vec![], Some("application/json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_json_content_type_is_unsupported() {
        let (status, _) = post(b"{}".to_vec(), Some("text/plain")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let (status, _) = post(b"{}".to_vec(), None).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn undecodable_review_is_answered_in_band() {
        let (status, body) = post(b"{not json".to_vec(), Some("application/json")).await;
        assert_eq!(status, StatusCode::OK);
        let review: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(review["response"]["allowed"], false);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let response = router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: creating a GameServer returns a JSON patch and names the object
    #[tokio::test]
    async fn story_create_returns_patch_with_object_details() {
        let body = review("CREATE", gameserver("server"), Value::Null);
        let (status, bytes) = post(serde_json::to_vec(&body).unwrap(), Some("application/json")).await;
        assert_eq!(status, StatusCode::OK);

        let review: Value = serde_json::from_slice(&bytes).unwrap();
        let response = &review["response"];
        assert_eq!(response["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(response["allowed"], true);
        assert_eq!(response["patchType"], "JSONPatch");
        assert!(response["patch"].is_string());
        assert_eq!(response["status"]["details"]["kind"], "GameServer");
        assert_eq!(response["status"]["details"]["group"], "carrier.ocgi.dev");
        assert_eq!(response["status"]["details"]["name"], "arena");
    }

    /// Story: a forbidden update is refused with code 400 and a field cause
    #[tokio::test]
    async fn story_forbidden_update_reports_causes() {
        let body = review("UPDATE", gameserver("renamed"), gameserver("server"));
        let (_, bytes) = post(serde_json::to_vec(&body).unwrap(), Some("application/json")).await;

        let review: Value = serde_json::from_slice(&bytes).unwrap();
        let response = &review["response"];
        assert_eq!(response["allowed"], false);
        assert_eq!(response["status"]["code"], 400);
        assert!(response["status"]["message"]
            .as_str()
            .unwrap()
            .starts_with("spec.template.spec: Forbidden"));
        let cause = &response["status"]["details"]["causes"][0];
        assert_eq!(cause["reason"], "FieldValueForbidden");
        assert_eq!(cause["field"], "spec.template.spec");
        assert!(response.get("patch").is_none());
    }
}
