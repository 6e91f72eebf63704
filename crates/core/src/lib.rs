//! # XDW Core
//!
//! Core business logic for the XDW clinical workflow engine.
//!
//! This crate owns every state transition of a workflow instance:
//! - registering pathway definitions and their XDS metadata companions
//! - creating one current instance per patient and pathway, deprecating the previous one
//! - reconciling external clinical events into the instance document
//! - evaluating completion behaviour and computing timing and dashboard state
//!
//! **No transport concerns**: persistence and the notification broker are reached through the
//! [`WorkflowStore`](store::WorkflowStore) and [`SubscriptionService`](subscription::SubscriptionService)
//! traits. Wire formats live in the `xdw` crate.

pub mod clock;
pub mod condition;
pub mod config;
pub mod constants;
pub mod dashboard;
pub mod error;
pub mod lifecycle;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod subscription;
pub mod timing;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::CoreConfig;
pub use dashboard::Dashboard;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use lifecycle::{
    ConsumeReport, LifecycleManager, RegistrationReport, Requester, UpdateReport, XdwRequest,
    XdwResponse,
};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use store::InMemoryStore;
pub use store::{WorkflowKey, WorkflowStore};
pub use subscription::{InMemorySubscriptions, SubscriptionService};
pub use timing::{TaskState, WorkflowState};
