use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::ObjectMeta;

/// An opaque bag of named byte strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn value(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }
}
