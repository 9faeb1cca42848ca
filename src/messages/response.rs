//! Provides the main [`Response`] struct and related types.

use crate::{Key, LatticeType, MeldError};

/// A response to a [`Request`][super::Request].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Response {
    /// The `request_id` specified in the corresponding request. Used to
    /// associate asynchronous requests and responses.
    pub response_id: Option<String>,
    /// The type of response being sent back to the client.
    pub ty: ResponseType,
    /// Any errors associated with the whole request. Individual tuple errors are
    /// captured in the corresponding [`ResponseTuple`]. This will only be set if the whole
    /// request times out.
    pub error: Result<(), MeldError>,
    /// The individual response pairs associated with this request. There is a
    /// 1-to-1 mapping between these and the tuples in the corresponding
    /// request.
    pub tuples: Vec<ResponseTuple>,
}

/// Specifies the type of operation that we executed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum ResponseType {
    /// Response to a request to retrieve data from the store.
    Get,
    /// Response to a request to put data into the store.
    Put,
}

/// The per-key result of a request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseTuple {
    /// The key name for this response.
    pub key: Key,
    /// The lattice type of the payload, if any.
    pub lattice_type: Option<LatticeType>,
    /// The serialized lattice value for this key.
    pub payload: Option<Vec<u8>>,
    /// The error the server encountered for this key, if any.
    pub error: Option<MeldError>,
    /// Set by the server if the client's `address_cache_size` does not
    /// match the replication metadata stored by the server.
    pub invalidate: bool,
}
