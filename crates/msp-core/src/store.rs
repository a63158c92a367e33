//! ---
//! msp_section: "04-engine"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Latest decoded record per command code."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::collections::HashMap;

use msp_schema::Record;
use msp_wire::CommandCode;
use parking_lot::RwLock;

/// Latest-value cache. Writers overwrite, readers never wait on I/O.
#[derive(Debug, Default)]
pub struct StateStore {
    records: RwLock<HashMap<CommandCode, Record>>,
}

impl StateStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for its code.
    pub fn insert(&self, record: Record) {
        self.records.write().insert(record.code, record);
    }

    /// Clone of the latest record for `code`.
    pub fn get(&self, code: CommandCode) -> Option<Record> {
        self.records.read().get(&code).cloned()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Number of codes with a record.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing has been decoded yet.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use msp_schema::{codes, Registry};

    use super::*;

    #[test]
    fn keeps_only_the_latest_record() {
        let registry = Registry::builtin();
        let store = StateStore::new();
        assert!(store.get(codes::MSP_ATTITUDE).is_none());

        for yaw in [10u8, 20] {
            let record = registry
                .decode(codes::MSP_ATTITUDE, Bytes::from(vec![0, 0, 0, 0, yaw, 0]))
                .unwrap();
            store.insert(record);
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(codes::MSP_ATTITUDE).unwrap().get("yaw"), Some(20));

        store.clear();
        assert!(store.is_empty());
    }
}
