// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::preset::{is_choking, ChokeGroup, PadId};

/// Tracks which pads are ringing in each choke group.
///
/// A pad is only ever listed under one group, and groups without ringing pads are
/// dropped.
#[derive(Debug, Default)]
pub struct ChokeGroups {
    groups: HashMap<ChokeGroup, BTreeSet<PadId>>,
}

impl ChokeGroups {
    pub fn new() -> ChokeGroups {
        ChokeGroups::default()
    }

    /// Marks the pad as ringing in the given group. Non-choking groups are ignored.
    pub fn register_playing(&mut self, pad_id: PadId, group: ChokeGroup) {
        if !is_choking(group) {
            return;
        }

        // Pads move between groups when a preset reassigns them.
        self.groups.retain(|other, pads| {
            if *other != group {
                pads.remove(&pad_id);
            }
            !pads.is_empty()
        });
        self.groups.entry(group).or_default().insert(pad_id);
        debug!(pad = pad_id, choke_group = group, "Registered ringing pad");
    }

    /// Removes the pad from the group, dropping the group once it's empty.
    pub fn unregister(&mut self, pad_id: PadId, group: ChokeGroup) {
        if let Some(pads) = self.groups.get_mut(&group) {
            if pads.remove(&pad_id) {
                debug!(pad = pad_id, choke_group = group, "Unregistered pad");
            }
            if pads.is_empty() {
                self.groups.remove(&group);
            }
        }
    }

    /// The ringing pads of the group other than `excluding`.
    pub fn pads_to_choke(&self, group: ChokeGroup, excluding: PadId) -> Vec<PadId> {
        if !is_choking(group) {
            return Vec::new();
        }
        self.groups
            .get(&group)
            .map(|pads| {
                pads.iter()
                    .copied()
                    .filter(|pad_id| *pad_id != excluding)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The ringing pads of the group, sorted.
    pub fn ringing(&self, group: ChokeGroup) -> Vec<PadId> {
        self.groups
            .get(&group)
            .map(|pads| pads.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Keeps only the pads for which `is_active` returns true.
    pub fn retain_active<F>(&mut self, mut is_active: F)
    where
        F: FnMut(PadId) -> bool,
    {
        self.groups.retain(|_, pads| {
            pads.retain(|pad_id| is_active(*pad_id));
            !pads.is_empty()
        });
    }

    /// Drops all group state.
    pub fn clear_all(&mut self) {
        self.groups.clear();
    }

    /// Number of groups with ringing pads.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
