//! Canonical error taxonomy and cross-protocol mapping
//!
//! Every Marquee service reports failures as [`CanonicalError`] values looked
//! up by symbolic code in an [`ErrorRegistry`]. The [`ErrorMapper`] reduces
//! whatever was observed ([`ServiceError`]) to one of those values and moves
//! it across gRPC boundaries without losing its identity.
//!
//! ## Failure origins
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Local policy        │  Remote, classified  │  Remote, bare  │
//! │  • CIRCUIT_OPEN      │  detail decoded,     │  no detail,    │
//! │  • DEADLINE_EXCEEDED │  passed through      │  downgraded,   │
//! │  • CANCELED          │  unchanged           │  logged: error │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod canonical;
pub mod catalog;
pub mod grpc;
pub mod mapper;
pub mod registry;
pub mod types;

pub use canonical::{CanonicalError, FieldViolation};
pub use catalog::codes;
pub use grpc::{to_wire_grpc, ErrorDetail};
pub use mapper::ErrorMapper;
pub use registry::ErrorRegistry;
pub use types::{ErrorContext, ServiceError, ServiceResult};
