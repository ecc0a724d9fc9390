// The changes suggested by this lint usually make the code more cluttered and less clear:
#![allow(clippy::needless_range_loop)]

pub mod worlddef;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use strum_macros::{EnumString, VariantNames};

pub type PlayerId = usize; // Participant number, 1-based; stable for the lifetime of a run
pub type ItemId = usize; // Index into World.items: one entry per placed or precollected item instance
pub type ItemNameId = usize; // Index into World.item_name_isv.keys: distinct (player, item name) pairs
pub type LocationId = usize; // Index into World.locations
pub type RegionId = usize; // Index into World.regions
pub type EntranceId = usize; // Index into World.entrances
pub type ItemCount = i32; // Data type used to represent collected-item counts

#[derive(Default, Clone)]
pub struct IndexedVec<T: Hash + Eq> {
    pub keys: Vec<T>,
    pub index_by_key: HashMap<T, usize>,
}

impl<T: Hash + Eq + Clone> IndexedVec<T> {
    pub fn add(&mut self, key: &T) -> usize {
        if let Some(&idx) = self.index_by_key.get(key) {
            idx
        } else {
            let idx = self.keys.len();
            self.index_by_key.insert(key.clone(), idx);
            self.keys.push(key.clone());
            idx
        }
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    VariantNames,
    Serialize,
    Deserialize,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemClassification {
    #[default]
    Progression,
    Useful,
    Filler,
    Trap,
}

impl ItemClassification {
    pub fn is_progression(self) -> bool {
        self == ItemClassification::Progression
    }
}

/// Per-participant accessibility strictness. `Minimal` permits progression
/// items of that participant to remain permanently unreachable instead of
/// treating an exhausted reachability round as a world-construction defect.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, EnumString, VariantNames, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    #[default]
    Full,
    Minimal,
}

/// Boolean access predicate evaluated against a collection state. Rules are
/// always scoped to the participant whose location, entrance, or completion
/// condition carries them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    Free,
    Never,
    Has(ItemNameId, ItemCount),
    CanReachRegion(RegionId),
    And(Vec<Rule>),
    Or(Vec<Rule>),
}

#[derive(Clone, Debug)]
pub struct ItemData {
    pub name_id: ItemNameId,
    pub player: PlayerId,
    pub classification: ItemClassification,
}

impl ItemData {
    pub fn is_progression(&self) -> bool {
        self.classification.is_progression()
    }
}

#[derive(Clone, Debug)]
pub struct RegionData {
    pub name: String,
    pub player: PlayerId,
    pub exits: Vec<EntranceId>,
    pub locations: Vec<LocationId>,
}

#[derive(Clone, Debug)]
pub struct EntranceData {
    pub name: String,
    pub player: PlayerId,
    pub parent: RegionId,
    pub target: RegionId,
    pub access_rule: Rule,
}

/// A location's item reference is exclusive and nullable: it is `None` only
/// while a pruning trial is in flight or after a removal that the restoration
/// ledger will undo at teardown.
#[derive(Clone, Debug)]
pub struct LocationData {
    pub name: String,
    pub player: PlayerId,
    pub region: RegionId,
    pub item: Option<ItemId>,
    pub access_rule: Rule,
}

/// The populated multi-participant world graph. Built by
/// [`World::from_def`]; the playthrough engine borrows it exclusively and
/// returns it to its original or intentionally-minimized shape.
pub struct World {
    pub player_names: Vec<String>,
    pub item_name_isv: IndexedVec<(PlayerId, String)>,
    pub items: Vec<ItemData>,
    pub regions: Vec<RegionData>,
    pub entrances: Vec<EntranceData>,
    pub locations: Vec<LocationData>,
    pub origins: Vec<RegionId>,
    pub completion_rules: Vec<Rule>,
    pub accessibility: Vec<Accessibility>,
    pub precollected: Vec<Vec<ItemId>>,
    pub excess_pool: Vec<ItemId>,
}

impl World {
    pub fn num_players(&self) -> usize {
        self.player_names.len()
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerId> {
        1..=self.player_names.len()
    }

    pub fn player_name(&self, player: PlayerId) -> &str {
        &self.player_names[player - 1]
    }

    pub fn accessibility_of(&self, player: PlayerId) -> Accessibility {
        self.accessibility[player - 1]
    }

    pub fn origin_of(&self, player: PlayerId) -> RegionId {
        self.origins[player - 1]
    }

    pub fn completion_of(&self, player: PlayerId) -> &Rule {
        &self.completion_rules[player - 1]
    }

    pub fn precollected_of(&self, player: PlayerId) -> &[ItemId] {
        &self.precollected[player - 1]
    }

    pub fn item_name(&self, item: ItemId) -> &str {
        &self.item_name_isv.keys[self.items[item].name_id].1
    }

    pub fn item_name_of(&self, name_id: ItemNameId) -> &str {
        &self.item_name_isv.keys[name_id].1
    }

    /// Display form used in playthrough output and trace lines: the plain
    /// name for a single-participant world, otherwise "Name (PlayerName)".
    pub fn item_display(&self, item: ItemId) -> String {
        self.name_with_player(self.item_name(item), self.items[item].player)
    }

    pub fn location_display(&self, location: LocationId) -> String {
        let loc = &self.locations[location];
        self.name_with_player(&loc.name, loc.player)
    }

    pub fn region_display(&self, region: RegionId) -> String {
        let reg = &self.regions[region];
        self.name_with_player(&reg.name, reg.player)
    }

    fn name_with_player(&self, name: &str, player: PlayerId) -> String {
        if self.num_players() == 1 {
            name.to_string()
        } else {
            format!("{} ({})", name, self.player_name(player))
        }
    }

    /// Locations currently holding a progression item. Order follows the
    /// location arena; callers sort by [`World::location_sort_key`] before
    /// fixed-point iteration.
    pub fn progression_locations(&self) -> Vec<LocationId> {
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, loc)| {
                loc.item
                    .map(|item| self.items[item].is_progression())
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub fn location_sort_key(&self, location: LocationId) -> (PlayerId, &str) {
        let loc = &self.locations[location];
        (loc.player, &loc.name)
    }

    /// Removes one instance of `item` from its owner's starting inventory.
    /// Returns false if the item was not precollected.
    pub fn remove_precollected(&mut self, item: ItemId) -> bool {
        let player = self.items[item].player;
        let list = &mut self.precollected[player - 1];
        if let Some(pos) = list.iter().position(|&i| i == item) {
            list.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn push_precollected(&mut self, item: ItemId) {
        let player = self.items[item].player;
        self.precollected[player - 1].push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_vec_dedup() {
        let mut isv: IndexedVec<(PlayerId, String)> = IndexedVec::default();
        let a = isv.add(&(1, "Sword".to_string()));
        let b = isv.add(&(1, "Shield".to_string()));
        let c = isv.add(&(1, "Sword".to_string()));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(isv.keys.len(), 2);
    }

    #[test]
    fn test_item_classification_parse() {
        use std::str::FromStr;
        assert_eq!(
            ItemClassification::from_str("Progression").unwrap(),
            ItemClassification::Progression
        );
        assert!(ItemClassification::from_str("Junk").is_err());
    }
}
