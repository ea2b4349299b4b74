//! Preference store boundary
//!
//! Per-peer priorities, codec priorities and adapter-wide flags live in a
//! persistent store owned by the surrounding service. The machines only read
//! from it.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::codec::{CodecPriorityTable, CodecType};
use crate::types::{ConnectionPriority, PeerId};

pub trait PreferenceStore: Send + Sync {
    fn priority(&self, peer: PeerId) -> ConnectionPriority;

    fn codec_priorities(&self) -> CodecPriorityTable;

    fn is_bond_known(&self, peer: PeerId) -> bool;

    fn is_quiet_mode(&self) -> bool;
}

/// Volatile store, useful for embedding and tests
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    priorities: RwLock<HashMap<PeerId, ConnectionPriority>>,
    codec_priorities: RwLock<CodecPriorityTable>,
    bonded: RwLock<HashSet<PeerId>>,
    quiet_mode: RwLock<bool>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_priority(&self, peer: PeerId, priority: ConnectionPriority) {
        self.priorities.write().insert(peer, priority);
    }

    pub fn set_codec_priority(&self, codec_type: CodecType, priority: i32) {
        self.codec_priorities.write().insert(codec_type, priority);
    }

    pub fn set_bonded(&self, peer: PeerId, bonded: bool) {
        let mut set = self.bonded.write();
        if bonded {
            set.insert(peer);
        } else {
            set.remove(&peer);
        }
    }

    pub fn set_quiet_mode(&self, quiet: bool) {
        *self.quiet_mode.write() = quiet;
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn priority(&self, peer: PeerId) -> ConnectionPriority {
        self.priorities
            .read()
            .get(&peer)
            .copied()
            .unwrap_or(ConnectionPriority::Undefined)
    }

    fn codec_priorities(&self) -> CodecPriorityTable {
        self.codec_priorities.read().clone()
    }

    fn is_bond_known(&self, peer: PeerId) -> bool {
        self.bonded.read().contains(&peer)
    }

    fn is_quiet_mode(&self) -> bool {
        *self.quiet_mode.read()
    }
}
