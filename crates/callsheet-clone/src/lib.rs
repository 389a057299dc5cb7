//! # callsheet-clone
//!
//! Entity-graph cloning engine: copies a demo project and every document
//! that belongs to it into a new owner's namespace, rewriting all foreign
//! keys so the copy is internally consistent and shares no ids with the
//! source.
//!
//! ## Guarantees
//!
//! - Collections are cloned in the topological order of the [`CloneSchema`],
//!   so every reference target is mapped before it is needed.
//! - A namespace receives at most one clone (duplicate guard).
//! - There is no cross-collection transaction. Each batch is atomic; a
//!   failed job leaves its committed batches in place and reports exactly
//!   where it stopped. With checkpoints enabled it can be resumed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use callsheet_clone::{CloneConfig, CloneOrchestrator};
//! use callsheet_core::CloneSchema;
//!
//! let orchestrator = CloneOrchestrator::new(store, CloneSchema::production()?, CloneConfig::from_env());
//! match orchestrator.clone_template_for(owner_id, owner_namespace).await {
//!     Ok(outcome) => println!("cloned {} documents", outcome.total_documents()),
//!     Err(e) if e.is_noop() => {}
//!     Err(e) => eprintln!("demo clone failed: {e}"),
//! }
//! ```
//!
//! [`CloneSchema`]: callsheet_core::CloneSchema

pub mod cloner;
pub mod error;
pub mod guard;
pub mod identity;
pub mod job;
pub mod membership;
pub mod orchestrator;
pub mod reader;
pub mod reconcile;
pub mod resolver;

pub use cloner::{BatchObserver, CloneTarget, CollectionCloner, CollectionReport, NoopObserver};
pub use error::{CloneError, Result};
pub use guard::DuplicateGuard;
pub use identity::IdentityMapper;
pub use job::{CloneJob, CloneState};
pub use membership::MembershipProvisioner;
pub use orchestrator::{CloneConfig, CloneOrchestrator, CloneOutcome};
pub use reader::SourceGraphReader;
pub use reconcile::{OrphanReconciler, ReconcilerConfig, ReconcilerHandle, SweepReport, SweptRoot};
pub use resolver::resolve_references;
