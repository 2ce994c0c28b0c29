use faststr::FastStr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized group metadata as stored under `groups/<key>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(default)]
    pub name:    FastStr,
    // Membership is a key -> true marker map, the denormalized-index shape.
    #[serde(default)]
    pub members: BTreeMap<FastStr, bool>,
}

impl GroupRecord {
    /// Decode a value snapshot; an absent node is an empty record, the
    /// `snap.val() || {}` convention of push-based stores.
    pub fn from_snapshot(value: Option<serde_json::Value>) -> crate::error::Result<Self> {
        match value {
            Some(raw) => Ok(serde_json::from_value(raw)?),
            None => Ok(Self::default()),
        }
    }

    pub fn member_keys(&self) -> impl Iterator<Item = &FastStr> {
        self.members
            .iter()
            .filter(|(_, joined)| **joined)
            .map(|(k, _)| k)
    }
}
