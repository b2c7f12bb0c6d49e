//! Polling provisioner for configuration-management fleets.
//!
//! The provisioner repeatedly discovers nodes that still need onboarding and
//! drives each one through an ordered, individually switchable list of
//! remote steps: locking, certificate cleanup, CSR submission and signing,
//! configuration runs and tagging. The master a node is provisioned against
//! is chosen by comparing configured facts.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use provisioner::config::Settings;
//! use provisioner::context::ProvisionContext;
//! use provisioner::remote::mco::McoFleet;
//! use provisioner::supervisor::Supervisor;
//!
//! let settings = Settings::load("/etc/provisioner/provisioner.yaml".as_ref())?;
//! let fleet = Arc::new(McoFleet::new(settings.mco.clone()));
//! let notifier = Arc::new(notify::Notifier::from_env());
//! let ctx = Arc::new(ProvisionContext::new(settings, fleet.clone(), notifier));
//!
//! Supervisor::new(ctx, fleet).run().await;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod error;
pub mod inventory;
pub mod pipeline;
pub mod remote;
pub mod selector;
pub mod steps;
pub mod supervisor;

pub use config::Settings;
pub use context::{EventSink, ProvisionContext};
pub use error::{CycleError, ProvisionError};
pub use inventory::{Facts, Inventory};
pub use pipeline::{Outcome, Pipeline};
pub use remote::{MasterDirectory, NodeDiscovery, RemoteError, RemoteMaster, RemoteNode};
pub use selector::{select_master, MasterCandidate};
pub use steps::{Step, StepFlags};
pub use supervisor::{CycleReport, Supervisor};
