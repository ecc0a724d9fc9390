//! Newline-delimited JSON trace of the final forward pass. Each line is one
//! `state_update` record; lines are flushed as they are written so a
//! truncated run still yields valid partial output. Tracing is observability
//! only: any I/O failure disables it for the remainder of the run and the
//! computation proceeds unaffected.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use log::error;
use serde::{Serialize, Serializer};

use multirando_game::{ItemCount, PlayerId};

use crate::settings::TraceSettings;

/// Index of a trace line: a whole round, or the k-th item (1-based)
/// collected within a round. Serialized as `N` or `"N.k"` respectively.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SphereIndex {
    Round(usize),
    Item(usize, usize),
}

impl Serialize for SphereIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            SphereIndex::Round(n) => serializer.serialize_u64(n as u64),
            SphereIndex::Item(n, k) => serializer.serialize_str(&format!("{n}.{k}")),
        }
    }
}

#[derive(Serialize)]
pub struct StateUpdate {
    #[serde(rename = "type")]
    pub record_type: &'static str,
    pub sphere_index: SphereIndex,
    pub sphere_locations: Vec<String>,
    pub player_data: BTreeMap<PlayerId, PlayerTraceData>,
}

#[derive(Serialize)]
pub struct PlayerTraceData {
    pub inventory_details: InventoryDetails,
    pub accessible_locations: Vec<String>,
    pub accessible_regions: Vec<String>,
}

#[derive(Serialize, Default)]
pub struct InventoryDetails {
    pub prog_items: BTreeMap<String, ItemCount>,
    /// Reserved field, always emitted empty: non-progression inventory is
    /// not tracked by this engine.
    pub non_prog_items: BTreeMap<String, ItemCount>,
}

pub struct TraceLogger {
    writer: Option<BufWriter<File>>,
    pub per_item_updates: bool,
    pub per_sphere_updates: bool,
}

impl TraceLogger {
    pub fn open(settings: &TraceSettings) -> Self {
        let mut logger = TraceLogger {
            writer: None,
            per_item_updates: settings.per_item_updates,
            per_sphere_updates: settings.per_sphere_updates,
        };
        if !logger.per_item_updates && !logger.per_sphere_updates {
            return logger;
        }
        let Some(path) = &settings.log_path else {
            return logger;
        };
        match File::create(path) {
            Ok(file) => logger.writer = Some(BufWriter::new(file)),
            Err(e) => error!(
                "Unable to open trace log {}: {e} (trace logging disabled)",
                path.display()
            ),
        }
        logger
    }

    pub fn enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn write_update(&mut self, record: &StateUpdate) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                error!("Unable to serialize trace record: {e} (trace logging disabled)");
                self.writer = None;
                return;
            }
        };
        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            error!("Trace log write failed: {e} (trace logging disabled)");
            self.writer = None;
        }
    }

    /// Flushes and closes the log. Safe to call when logging never started;
    /// runs independently of the restoration step.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                error!("Trace log flush failed on close: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_index_serialization() {
        assert_eq!(serde_json::to_string(&SphereIndex::Round(0)).unwrap(), "0");
        assert_eq!(serde_json::to_string(&SphereIndex::Round(3)).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&SphereIndex::Item(0, 2)).unwrap(),
            "\"0.2\""
        );
        assert_eq!(
            serde_json::to_string(&SphereIndex::Item(4, 1)).unwrap(),
            "\"4.1\""
        );
    }

    #[test]
    fn test_state_update_shape() {
        let mut prog_items = BTreeMap::new();
        prog_items.insert("Boots".to_string(), 1);
        let mut player_data = BTreeMap::new();
        player_data.insert(
            1,
            PlayerTraceData {
                inventory_details: InventoryDetails {
                    prog_items,
                    non_prog_items: BTreeMap::new(),
                },
                accessible_locations: vec!["Chest".to_string()],
                accessible_regions: vec!["Menu".to_string()],
            },
        );
        let record = StateUpdate {
            record_type: "state_update",
            sphere_index: SphereIndex::Round(1),
            sphere_locations: vec!["Chest".to_string()],
            player_data,
        };
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(
            line,
            "{\"type\":\"state_update\",\"sphere_index\":1,\
             \"sphere_locations\":[\"Chest\"],\"player_data\":{\"1\":{\
             \"inventory_details\":{\"prog_items\":{\"Boots\":1},\
             \"non_prog_items\":{}},\"accessible_locations\":[\"Chest\"],\
             \"accessible_regions\":[\"Menu\"]}}}"
        );
    }

    #[test]
    fn test_disabled_logger_is_inert() {
        let mut logger = TraceLogger::open(&TraceSettings::default());
        assert!(!logger.enabled());
        logger.write_update(&StateUpdate {
            record_type: "state_update",
            sphere_index: SphereIndex::Round(0),
            sphere_locations: vec![],
            player_data: BTreeMap::new(),
        });
        logger.close();
    }
}
