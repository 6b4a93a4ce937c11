//! hello-gitops: a hello-world HTTP service and the GitOps promotion
//! workflow that ships it.
//!
//! The service answers `GET /` with a fixed JSON message. The workflow turns
//! a push on the trigger branch into an immutable container image and a
//! review request that points the deployment descriptor at that image. An
//! external reconciler applies merged descriptors; [`reconcile`] only
//! observes it.

pub mod artifact;
pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod error;
pub mod http;
pub mod manifest;
pub mod middleware;
pub mod pipeline;
pub mod publish;
pub mod reconcile;
pub mod routes;
pub mod state;
