use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PlaythroughSettings {
    #[serde(default)]
    pub trace: TraceSettings,
    /// Derive the entrance chain from each participant's origin to every
    /// required location's region, included in the playthrough output.
    #[serde(default)]
    pub compute_paths: bool,
}

#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TraceSettings {
    pub log_path: Option<PathBuf>,
    /// Emit one fractional-index line ("N.k") per collected item.
    #[serde(default)]
    pub per_item_updates: bool,
    /// Emit one integer-index line per finalized round.
    #[serde(default)]
    pub per_sphere_updates: bool,
}
