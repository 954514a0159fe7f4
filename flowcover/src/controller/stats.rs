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

//! Run artifacts
//!
//! Two JSON files connect a run to the outside world: the flow handoff (flow id to switch path),
//! written once before any traffic starts so the collaborator knows what to generate, and the
//! counter snapshot (flow id to byte count), rewritten after every polling cycle for offline
//! inspection. Both are flat mappings, not append-only logs.

use crate::net::{FlowId, FlowTable};
use crate::Error;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Rewrite the counter snapshot at `path`. The parent directory is created if necessary.
pub fn write_snapshot(path: &Path, counters: &BTreeMap<FlowId, u64>) -> Result<(), Error> {
    write_json(path, counters)
}

/// Write the flow handoff at `path`, to notify the traffic collaborator of the generated flows.
pub fn write_flow_handoff(path: &Path, flows: &FlowTable) -> Result<(), Error> {
    write_json(path, flows)
}

fn write_json<S: serde::Serialize>(path: &Path, value: &S) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
