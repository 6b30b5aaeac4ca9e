//! gRPC wire form of canonical errors
//!
//! A bare gRPC code is too coarse to carry a canonical identity
//! (`CIRCUIT_OPEN` and `UNAVAILABLE` share `Code::Unavailable`), so every
//! status produced here carries a `google.rpc.Status` in its binary details
//! with one [`ErrorDetail`] packed as an `Any`.

use std::sync::Arc;

use bytes::Bytes;
use prost::Message;
use tonic::{Code, Status};

use super::canonical::CanonicalError;

/// Type URL of [`ErrorDetail`] inside the `Any` wrapper
pub const ERROR_DETAIL_TYPE_URL: &str = "type.googleapis.com/marquee.errors.v1.ErrorDetail";

/// `marquee.errors.v1.ErrorDetail`
#[derive(Clone, PartialEq, Message)]
pub struct ErrorDetail {
    #[prost(string, tag = "1")]
    pub code: String,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(int32, tag = "3")]
    pub http_code: i32,
    #[prost(int32, tag = "4")]
    pub grpc_code: i32,
}

/// `google.protobuf.Any`
#[derive(Clone, PartialEq, Message)]
pub struct AnyDetail {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// `google.rpc.Status`, the conventional payload of `grpc-status-details-bin`
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<AnyDetail>,
}

impl From<&CanonicalError> for ErrorDetail {
    fn from(error: &CanonicalError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.message().to_string(),
            http_code: i32::from(error.http_code()),
            grpc_code: error.grpc_code() as i32,
        }
    }
}

impl ErrorDetail {
    /// Rebuild a canonical error from a decoded detail
    ///
    /// An `http_code` outside `u16` is replaced with 500.
    pub fn to_canonical(&self) -> CanonicalError {
        let http_code = u16::try_from(self.http_code).unwrap_or(500);
        CanonicalError::new(
            self.code.clone(),
            http_code,
            Code::from(self.grpc_code),
            self.message.clone(),
        )
    }
}

/// Build the status sent for `error`
///
/// Only the user-facing message and the detail cross the wire. The canonical
/// value itself rides along as the status source, which lets a receiver in the
/// same process skip decoding.
pub fn to_wire_grpc(error: &Arc<CanonicalError>) -> Status {
    let detail = ErrorDetail::from(error.as_ref());
    let envelope = RpcStatus {
        code: error.grpc_code() as i32,
        message: error.message().to_string(),
        details: vec![AnyDetail {
            type_url: ERROR_DETAIL_TYPE_URL.to_string(),
            value: detail.encode_to_vec(),
        }],
    };

    let mut status = Status::with_details(
        error.grpc_code(),
        error.message(),
        Bytes::from(envelope.encode_to_vec()),
    );
    status.set_source(Arc::clone(error) as Arc<dyn std::error::Error + Send + Sync>);
    status
}

/// Decode the [`ErrorDetail`] carried by `status`, if any
pub fn decode_detail(status: &Status) -> Option<ErrorDetail> {
    let details = status.details();
    if details.is_empty() {
        return None;
    }

    let envelope = RpcStatus::decode(details).ok()?;
    envelope
        .details
        .iter()
        .find(|any| any.type_url == ERROR_DETAIL_TYPE_URL)
        .and_then(|any| ErrorDetail::decode(any.value.as_slice()).ok())
}

/// Look for a canonical error in the in-process source chain of `status`
pub(crate) fn local_canonical(status: &Status) -> Option<Arc<CanonicalError>> {
    let mut current = std::error::Error::source(status);
    while let Some(error) = current {
        if let Some(canonical) = error.downcast_ref::<CanonicalError>() {
            return Some(Arc::new(canonical.clone()));
        }
        current = error.source();
    }
    None
}

/// Copy of `status` without any in-process source, as a remote peer sees it
pub fn strip_local_source(status: &Status) -> Status {
    Status::with_details_and_metadata(
        status.code(),
        status.message(),
        Bytes::copy_from_slice(status.details()),
        status.metadata().clone(),
    )
}
