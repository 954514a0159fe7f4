// FlowCover: Flow-Level Traffic Accounting with Minimal Switch Polling
// Copyright (C) 2022  FlowCover Developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Module containing all error types

use crate::controller::TransportError;
use crate::net::{FlowId, NetError};
use thiserror::Error;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// The requested number of flows exceeds the number of distinct non-trivial paths the
    /// topology can support. Raised before any randomized work is attempted.
    #[error("cannot generate {requested} flows: the topology supports at most {bound}")]
    Infeasible {
        /// Number of flows that was requested
        requested: usize,
        /// Number of distinct paths the topology supports (clamped to the requested count)
        bound: u64,
    },
    /// The generator used up its attempt budget without producing the requested number of
    /// distinct paths.
    #[error("flow generation stalled after producing {generated} of {requested} flows")]
    GenerationStalled {
        /// Number of flows that was requested
        requested: usize,
        /// Number of flows that were generated before the budget ran out
        generated: usize,
    },
    /// A flow has no covering switch at all and can never be polled.
    #[error("flow {0} does not traverse any switch in the index")]
    UncoverableFlow(FlowId),
    /// Error propagated from the topology and flow model
    #[error("Network Error: {0}")]
    Net(#[from] NetError),
    /// Error propagated from the switch-control transport
    #[error("Transport Error: {0}")]
    Transport(#[from] TransportError),
    /// Error while reading or writing a run artifact
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// Error while serializing or deserializing a run artifact
    #[error("Serialization Error: {0}")]
    Json(#[from] serde_json::Error),
}
