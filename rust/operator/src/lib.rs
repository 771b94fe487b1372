//! The curation engine shared by the controller and the pipeline worker.
//!
//! The controller uses [`launcher`], [`rbac`], [`topology`] and the
//! [`driver`]'s upgrade check; every other module runs inside a pipeline
//! container through [`stage::run`].

pub mod ansible;
pub mod driver;
pub mod error;
pub mod hive;
pub mod hypershift;
pub mod import;
pub mod launcher;
pub mod rbac;
pub mod recorder;
pub mod retry;
pub mod secrets;
pub mod stage;
pub mod topology;
pub mod upgrade;
