//! # paramstore — CICD bridge
//!
//! Publishes a project's applied parameters as encrypted GitHub Actions
//! secrets, dispatches workflow reruns, keeps a local workflow catalog in
//! sync and tracks rerun attempts to completion.
//!
//! | Module | Role |
//! |--------|------|
//! | [`repo_url`] | `<host>/<owner>/<name>` coordinate parsing |
//! | [`sealed`] | sealed-box secret envelopes |
//! | [`github`] | provider client and the [`github::CicdProvider`] seam |
//! | [`db`] | PostgreSQL store and the [`db::CicdStore`] seam |
//! | [`cicd`] | propagator, rerun dispatcher, reconciler, poller |
//! | [`api`] | axum HTTP surface |
//! | [`prom_metrics`] | Prometheus registry |
//! | [`config`] | resolved runtime settings |

pub mod api;
pub mod cicd;
pub mod config;
pub mod db;
pub mod github;
pub mod prom_metrics;
pub mod repo_url;
pub mod sealed;
