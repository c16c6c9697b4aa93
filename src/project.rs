//! Named interfaces for the collaborators this crate never implements
//! itself: the interface-description grammar/parser, AST, and code
//! generators that produce a `Project`, and the `Project`/`Device`
//! model itself. The core only ever consumes a fully-resolved,
//! immutable project handed to it by the embedder or decoded by
//! whatever implements [`ProjectDecoder`] — it never parses the
//! interface description language itself.
//!
//! Modeled as trait objects rather than generics so [`crate::fwt::FwtClient`]
//! and [`crate::ground_control::GroundControl`] stay free of a project-model
//! type parameter threaded through every actor message.

use std::fmt;

use crate::error::CoreError;

/// A single addressable device described by a [`Project`].
pub trait Device: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
}

/// The embedder's fully-resolved interface description. Immutable once
/// decoded.
pub trait Project: fmt::Debug + Send + Sync {
    /// Looks up a device by name, as emitted by the firmware hash
    /// response.
    fn device_with_name(&self, name: &str) -> Option<std::sync::Arc<dyn Device>>;

    /// Re-encodes the project to bytes, used by [`crate::fwt::FwtClient::on_project_set`]
    /// to check whether an externally supplied project still matches
    /// the last downloaded firmware hash.
    fn encode(&self) -> Vec<u8>;
}

/// Decodes a firmware image's embedded project bytes into a [`Project`].
pub trait ProjectDecoder: Send + Sync {
    fn decode_from_memory(&self, bytes: &[u8]) -> Result<std::sync::Arc<dyn Project>, CoreError>;
}

/// An external collaborator fed every payload delivered on the CmdTelem
/// stream. [`crate::ground_control::GroundControl`] wires one in without
/// implementing what it does with the bytes.
pub trait StreamClient: fmt::Debug + Send + Sync {
    fn on_payload(&self, body: &[u8]);
}
