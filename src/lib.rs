//! Carrier webhook - mutating admission control for game-server workloads
//!
//! The webhook sits between the Kubernetes API server and its datastore. For
//! every GameServer, GameServerSet, Squad and Pod admission it decides whether
//! the change is allowed and, on creation, rewrites the object with defaults
//! or an injected SDK sidecar.
//!
//! # Pipeline
//!
//! ```text
//! AdmissionReview -> decode -> route by kind
//!   Create: provision service identity -> defaults -> validate -> diff
//!   Update: decode old object -> immutable-field validation
//!   Pod Create: resolve SDK ports -> inject sidecar -> diff
//! ```
//!
//! # Modules
//!
//! - [`crd`] - GameServer, GameServerSet and Squad resource types
//! - [`defaults`] - Idempotent defaulting per resource kind
//! - [`sidecar`] - SDK sidecar injection for game-server pods
//! - [`validation`] - Field errors, create and update validation
//! - [`patch`] - RFC 6902 patch generation
//! - [`rbac`] - Default service account / role binding provisioning
//! - [`webhook`] - Admission dispatcher and HTTP router
//! - [`config`] - Command-line configuration
//! - [`error`] - Error types for the webhook

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod defaults;
pub mod error;
pub mod patch;
pub mod rbac;
pub mod sidecar;
pub mod validation;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known Names
// =============================================================================
// Labels, annotations and object names shared with the carrier controller and
// the SDK sidecar. Changing any of them breaks compatibility with deployed
// clusters.

/// API group of the carrier resources
pub const CARRIER_GROUP: &str = "carrier.ocgi.dev";

/// Pod label marking a pod as a game server (value is the GameServer name)
pub const GAMESERVER_LABEL: &str = "carrier.ocgi.dev/gameserver";

/// Label identifying the owning GameServerSet
pub const GAMESERVERSET_LABEL: &str = "carrier.ocgi.dev/gameserverset";

/// Label identifying the owning Squad
pub const SQUAD_LABEL: &str = "carrier.ocgi.dev/squad";

/// Annotation selecting an external network type (enables the LB readiness gate)
pub const EXTERNAL_NETWORK_ANNOTATION: &str = "carrier.ocgi.dev/external-network-type";

/// Pod annotation overriding the SDK gRPC port
pub const GRPC_PORT_ANNOTATION: &str = "carrier.ocgi.dev/grpc-port";

/// Pod annotation overriding the SDK HTTP port
pub const HTTP_PORT_ANNOTATION: &str = "carrier.ocgi.dev/http-port";

/// Readiness gate set once the external load balancer is ready
pub const LB_READY_GATE: &str = "externalnetwork.ocgi.dev/lb-ready";

/// Name of the default service account, cluster role and role binding
pub const DEFAULT_SERVICE_ACCOUNT: &str = "carrier-sdk";

/// Name of the injected SDK sidecar container
pub const SIDECAR_NAME: &str = "carrier-gameserver-sidecar";

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default listen port for admission requests
pub const DEFAULT_WEBHOOK_PORT: u16 = 8080;

/// Default SDK HTTP port
pub const DEFAULT_SDK_HTTP_PORT: i32 = 9021;

/// Default SDK gRPC port
pub const DEFAULT_SDK_GRPC_PORT: i32 = 9020;

/// Revision history retained for every Squad
pub const SQUAD_REVISION_HISTORY_LIMIT: i32 = 10;

/// Default rolling-update surge and unavailability bound
pub const DEFAULT_ROLLING_UPDATE_BOUND: &str = "25%";
