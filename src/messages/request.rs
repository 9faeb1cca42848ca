//! Provides the main [`Request`] struct and related types.

use super::response::{Response, ResponseType};
use crate::{ClientKey, Key, LatticeType};
use std::collections::HashMap;

/// An individual GET or PUT request; each request can batch multiple keys.
///
/// The target node responds with a [`Response`][super::Response]. Gossip between replica
/// peers uses the same message type, with an empty response address.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Request {
    /// A client-specific ID used to match asynchronous requests with responses.
    pub request_id: Option<String>,
    /// The zenoh topic at which the sender is waiting for the response.
    ///
    /// Gossip and other fire-and-forget PUTs leave this unset.
    pub response_address: Option<String>,
    /// The number of server addresses the client is aware of for a particular
    /// key; used for detecting stale client address caches.
    pub address_cache_size: HashMap<ClientKey, usize>,
    /// The type and data of this request.
    pub request: RequestData,
}

impl Request {
    /// Constructs a new [`Response`] for the request.
    ///
    /// Sets the [`response_id`][Response::response_id] and [`ty`][Response::ty] fields
    /// accordingly. The [`error`][Response::error] field is initialized with `Ok(())` and
    /// the [`tuples`][Response::tuples] field with an empty list.
    pub fn new_response(&self) -> Response {
        Response {
            response_id: self.request_id.clone(),
            ty: self.request.ty(),
            tuples: Default::default(),
            error: Ok(()),
        }
    }
}

/// Specifies the request type and associated data.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RequestData {
    /// Request the stored values for a set of keys.
    Get {
        /// The list of keys that we want to get the values for.
        keys: Vec<Key>,
    },
    /// Performs the given updates in the key value store.
    Put {
        /// A list of updates batched in this request.
        tuples: Vec<PutTuple>,
    },
}

impl RequestData {
    /// Splits the request into a list of operations.
    ///
    /// For GET requests, this returns a list of [`KeyOperation::Get`] variants. For PUT
    /// requests, it returns a list of [`KeyOperation::Put`] variants.
    pub fn into_tuples(self) -> Vec<KeyOperation> {
        match self {
            RequestData::Get { keys } => keys.into_iter().map(KeyOperation::Get).collect(),
            RequestData::Put { tuples } => tuples.into_iter().map(KeyOperation::Put).collect(),
        }
    }

    /// Returns the suitable [`ResponseType`] for this request.
    pub fn ty(&self) -> ResponseType {
        match self {
            RequestData::Get { .. } => ResponseType::Get,
            RequestData::Put { .. } => ResponseType::Put,
        }
    }
}

/// Describes a merge operation on a specific key.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PutTuple {
    /// The key that should be updated.
    pub key: Key,
    /// The lattice type that the payload is an encoding of.
    pub lattice_type: LatticeType,
    /// The serialized lattice value that should be merged into the current one.
    pub payload: Vec<u8>,
}

/// Abstraction for a single key operation.
#[derive(Debug)]
pub enum KeyOperation {
    /// Get the value of a key.
    Get(Key),
    /// Merge a new value into a key.
    Put(PutTuple),
}

impl KeyOperation {
    /// Returns the key that this operation reads/writes.
    pub fn key(&self) -> &Key {
        match self {
            KeyOperation::Get(key) => key,
            KeyOperation::Put(t) => &t.key,
        }
    }

    /// Returns the suitable [`ResponseType`] for the operation.
    pub fn response_ty(&self) -> ResponseType {
        match self {
            KeyOperation::Get(_) => ResponseType::Get,
            KeyOperation::Put(_) => ResponseType::Put,
        }
    }

    /// Returns the declared lattice type and payload if this is a PUT operation.
    pub fn into_parts(self) -> (Option<LatticeType>, Option<Vec<u8>>) {
        match self {
            KeyOperation::Get(_) => (None, None),
            KeyOperation::Put(t) => (Some(t.lattice_type), Some(t.payload)),
        }
    }
}
