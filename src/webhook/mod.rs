//! Admission webhook for NdbCluster
//!
//! The API server calls two endpoints on every create/update of the managed
//! resource:
//! - `POST /<prefix>/mutate` - defaulting, answered with a JSONPatch
//! - `POST /<prefix>/validate` - accept, reject, or reject-with-retry
//!
//! Decisions come from an [`AdmissionController`]; this module only decodes
//! reviews and encodes responses. Anything it cannot decode is denied.

mod ndb;

pub use ndb::NdbClusterAdmission;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use json_patch::PatchOperation;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    Resource,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Error;

/// HTTP status code carried by a conflict denial
pub const CONFLICT_CODE: u16 = 429;
/// Status reason carried by a conflict denial
pub const CONFLICT_REASON: &str = "TooManyRequests";

/// Outcome of validating an admission request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Persist the object
    Allow,
    /// Reject; the request itself is wrong
    Deny(Vec<String>),
    /// Reject for now; an earlier change is still being applied
    Conflict(String),
}

impl AdmissionDecision {
    /// Deny if any reasons were collected, allow otherwise
    pub fn from_problems(problems: Vec<String>) -> Self {
        if problems.is_empty() {
            Self::Allow
        } else {
            Self::Deny(problems)
        }
    }

    /// True for [`AdmissionDecision::Allow`]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Admission decisions for one resource kind.
///
/// Implementations are pure: they see only the objects in the request and
/// never talk to the API server.
pub trait AdmissionController: Send + Sync + 'static {
    /// The resource this controller admits
    type Object: Resource<DynamicType = ()> + DeserializeOwned + Send + Sync;

    /// URL path segment the endpoints are mounted under
    fn path_prefix(&self) -> &'static str;

    /// Validate a new object
    fn validate_create(&self, new: &Self::Object) -> AdmissionDecision;

    /// Validate a change from `old` to `new`
    fn validate_update(&self, old: &Self::Object, new: &Self::Object) -> AdmissionDecision;

    /// Defaulting patch for `object`, `None` when nothing needs to change
    fn mutate(&self, object: &Self::Object) -> Option<Vec<PatchOperation>>;
}

/// Build the response for a validation request
pub fn validate_review<C: AdmissionController>(
    controller: &C,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if let Err(reason) = check_kind::<C::Object>(request) {
        return deny(request, reason);
    }
    // Status writes carry no spec change
    if request.sub_resource.is_some() {
        return AdmissionResponse::from(request);
    }

    let decision = match request.operation {
        Operation::Create => match decode::<C::Object>(request.object.as_ref(), "object") {
            Ok(new) => controller.validate_create(&new),
            Err(e) => return deny(request, e.to_string()),
        },
        Operation::Update => {
            let old = decode::<C::Object>(request.old_object.as_ref(), "oldObject");
            let new = decode::<C::Object>(request.object.as_ref(), "object");
            match (old, new) {
                (Ok(old), Ok(new)) => controller.validate_update(&old, &new),
                (Err(e), _) | (_, Err(e)) => return deny(request, e.to_string()),
            }
        }
        ref op => return deny(request, format!("operation {op:?} is not supported")),
    };

    match &decision {
        AdmissionDecision::Allow => {
            debug!(uid = %request.uid, name = %request.name, "Admission allowed")
        }
        AdmissionDecision::Deny(reasons) => {
            info!(uid = %request.uid, name = %request.name, ?reasons, "Admission denied")
        }
        AdmissionDecision::Conflict(message) => {
            info!(uid = %request.uid, name = %request.name, %message, "Admission deferred")
        }
    }
    respond(request, decision)
}

/// Build the response for a mutation request
pub fn mutate_review<C: AdmissionController>(
    controller: &C,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    if let Err(reason) = check_kind::<C::Object>(request) {
        return deny(request, reason);
    }
    if !matches!(request.operation, Operation::Create | Operation::Update) {
        return deny(
            request,
            format!("operation {:?} is not supported", request.operation),
        );
    }

    let object = match decode::<C::Object>(request.object.as_ref(), "object") {
        Ok(object) => object,
        Err(e) => return deny(request, e.to_string()),
    };

    let Some(ops) = controller.mutate(&object) else {
        return AdmissionResponse::from(request);
    };

    debug!(uid = %request.uid, name = %request.name, ops = ops.len(), "Defaulting object");
    match AdmissionResponse::from(request).with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize patch");
            deny(request, format!("patch serialization error: {e}"))
        }
    }
}

fn respond(
    request: &AdmissionRequest<DynamicObject>,
    decision: AdmissionDecision,
) -> AdmissionResponse {
    match decision {
        AdmissionDecision::Allow => AdmissionResponse::from(request),
        AdmissionDecision::Deny(reasons) => deny(request, reasons.join("; ")),
        AdmissionDecision::Conflict(message) => {
            let mut response = deny(request, message);
            response.result.code = CONFLICT_CODE;
            response.result.reason = CONFLICT_REASON.to_string();
            response
        }
    }
}

fn deny(request: &AdmissionRequest<DynamicObject>, reason: impl ToString) -> AdmissionResponse {
    AdmissionResponse::from(request).deny(reason)
}

fn check_kind<K: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<DynamicObject>,
) -> Result<(), String> {
    let gvk = &request.kind;
    if gvk.group == K::group(&()) && gvk.version == K::version(&()) && gvk.kind == K::kind(&()) {
        Ok(())
    } else {
        warn!(
            uid = %request.uid,
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            "Unsupported kind"
        );
        Err(format!(
            "unsupported resource {}/{} {}",
            gvk.group, gvk.version, gvk.kind
        ))
    }
}

fn decode<K: DeserializeOwned>(object: Option<&DynamicObject>, field: &str) -> Result<K, Error> {
    let object =
        object.ok_or_else(|| Error::serialization(format!("admission request has no {field}")))?;
    let value = serde_json::to_value(object)?;
    serde_json::from_value(value)
        .map_err(|e| Error::serialization(format!("failed to decode {field}: {e}")))
}

async fn validate_handler<C: AdmissionController>(
    State(controller): State<Arc<C>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate_review(controller.as_ref(), &request).into_review())
}

async fn mutate_handler<C: AdmissionController>(
    State(controller): State<Arc<C>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(mutate_review(controller.as_ref(), &request).into_review())
}

/// Create the webhook router for one admission controller
pub fn webhook_router<C: AdmissionController>(controller: Arc<C>) -> Router {
    let prefix = controller.path_prefix();
    Router::new()
        .route(&format!("/{prefix}/validate"), post(validate_handler::<C>))
        .route(&format!("/{prefix}/mutate"), post(mutate_handler::<C>))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(controller)
}

/// Listener settings for the webhook server
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Address to listen on
    pub addr: SocketAddr,
    /// PEM certificate; plain HTTP when absent
    pub tls_cert: Option<PathBuf>,
    /// PEM private key
    pub tls_key: Option<PathBuf>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_WEBHOOK_PORT)),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl WebhookConfig {
    /// Reject half-configured TLS
    pub fn validate(&self) -> Result<(), Error> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) | (None, Some(_)) => Err(Error::config(
                "both --tls-cert and --tls-key must be set to enable TLS",
            )),
            _ => Ok(()),
        }
    }
}

/// Serve `router` until `shutdown` is cancelled
pub async fn serve(
    config: &WebhookConfig,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    config.validate()?;

    let handle = axum_server::Handle::new();
    let signal = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        signal.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    let service = router.into_make_service();
    let result = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| Error::config(format!("failed to load TLS material: {e}")))?;
            info!(addr = %config.addr, "Starting HTTPS admission webhook");
            axum_server::bind_rustls(config.addr, tls)
                .handle(handle)
                .serve(service)
                .await
        }
        _ => {
            warn!(addr = %config.addr, "Starting admission webhook without TLS");
            axum_server::bind(config.addr).handle(handle).serve(service).await
        }
    };

    result.map_err(|e| Error::internal(format!("webhook server failed: {e}")))
}
