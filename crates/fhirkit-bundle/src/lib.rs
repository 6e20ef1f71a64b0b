//! # fhirkit-bundle
//!
//! Server-side processing of `batch` and `transaction` bundles.
//!
//! [`BundleHandler`] partitions entries into verb buckets, runs the buckets in
//! [`EXECUTION_ORDER`], resolves bundle-local `urn:uuid:` / `urn:oid:`
//! references, coalesces identical reads and reassembles the responses in the
//! order of the requests. Route resolution and single-request execution are
//! supplied by the caller through [`RouteResolver`] and [`RequestDispatcher`].

pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod references;
pub mod route;
pub mod verb;

pub use dedup::{DedupCandidate, DispatchUnit, ExecutionPlan, RouteDeduplicator};
pub use dispatch::{
    ConditionalHeaders, DispatchContext, DispatchError, RequestDispatcher, ResponseEnvelope,
    SharedTransaction,
};
pub use error::BundleError;
pub use handler::{BundleConfig, BundleHandler};
pub use references::{
    Dependency, EntryRef, ReferenceError, ReferencePlan, ReferenceResolver, Resolution,
    is_placeholder, resolved_identity,
};
pub use route::{ResolvedRoute, RouteDescriptor, RouteKind, RouteNotFound, RouteResolver};
pub use verb::{EXECUTION_ORDER, HttpVerb, UnsupportedVerb};
