use hashbrown::{HashMap, HashSet};
use multirando_game::{
    EntranceId, ItemCount, ItemId, ItemNameId, LocationId, PlayerId, RegionId, Rule, World,
};

/// Mutable snapshot of everything collected so far, per participant, plus
/// the derived reachability caches. `Clone` is the deep-copy operation:
/// copies share nothing, so mutating one never affects another.
#[derive(Clone, Debug)]
pub struct CollectionState {
    /// Collected progression-item counts, indexed by participant - 1.
    pub prog_items: Vec<HashMap<ItemNameId, ItemCount>>,
    /// Locations whose items have been consumed by a collection round.
    pub advancements: HashSet<LocationId>,
    reachable_regions: HashSet<RegionId>,
    // Entrance through which each region was first reached, for path output.
    reachable_paths: HashMap<RegionId, EntranceId>,
    stale: bool,
}

impl CollectionState {
    pub fn new(world: &World) -> Self {
        CollectionState {
            prog_items: vec![HashMap::new(); world.num_players()],
            advancements: HashSet::new(),
            reachable_regions: HashSet::new(),
            reachable_paths: HashMap::new(),
            stale: true,
        }
    }

    /// Collects one item instance. Only progression items affect the state;
    /// non-progression inventory is not tracked by this engine.
    pub fn collect(&mut self, world: &World, item: ItemId) {
        let data = &world.items[item];
        if data.is_progression() {
            *self.prog_items[data.player - 1].entry(data.name_id).or_insert(0) += 1;
            self.stale = true;
        }
    }

    /// Consumes a location: marks it as checked and collects its item.
    pub fn collect_location(&mut self, world: &World, location: LocationId) {
        self.advancements.insert(location);
        if let Some(item) = world.locations[location].item {
            self.collect(world, item);
        }
    }

    /// Removes one previously collected instance of the item.
    pub fn remove(&mut self, world: &World, item: ItemId) {
        let data = &world.items[item];
        if !data.is_progression() {
            return;
        }
        if let Some(count) = self.prog_items[data.player - 1].get_mut(&data.name_id) {
            *count -= 1;
            if *count <= 0 {
                self.prog_items[data.player - 1].remove(&data.name_id);
            }
            self.stale = true;
        }
    }

    pub fn count_of(&self, player: PlayerId, name_id: ItemNameId) -> ItemCount {
        self.prog_items[player - 1].get(&name_id).copied().unwrap_or(0)
    }

    pub fn has(&self, player: PlayerId, name_id: ItemNameId, count: ItemCount) -> bool {
        self.count_of(player, name_id) >= count
    }

    pub fn prog_items_of(&self, player: PlayerId) -> &HashMap<ItemNameId, ItemCount> {
        &self.prog_items[player - 1]
    }

    /// Evaluates a rule against the current caches. Callers must refresh
    /// the region cache first (see [`CollectionState::satisfies`]).
    pub fn rule_satisfied(&self, rule: &Rule, player: PlayerId) -> bool {
        match rule {
            Rule::Free => true,
            Rule::Never => false,
            Rule::Has(name_id, count) => self.has(player, *name_id, *count),
            Rule::CanReachRegion(region) => self.reachable_regions.contains(region),
            Rule::And(rules) => rules.iter().all(|r| self.rule_satisfied(r, player)),
            Rule::Or(rules) => rules.iter().any(|r| self.rule_satisfied(r, player)),
        }
    }

    pub fn satisfies(&mut self, world: &World, rule: &Rule, player: PlayerId) -> bool {
        self.update_reachable_regions(world);
        self.rule_satisfied(rule, player)
    }

    /// Recomputes the reachable-region set to a fixed point. Entrances are
    /// scanned in index order every pass, so the predecessor recorded for
    /// each region is deterministic.
    pub fn update_reachable_regions(&mut self, world: &World) {
        if !self.stale {
            return;
        }
        self.reachable_regions.clear();
        self.reachable_paths.clear();
        for player in world.players() {
            self.reachable_regions.insert(world.origin_of(player));
        }
        let mut changed = true;
        while changed {
            changed = false;
            for (eid, entrance) in world.entrances.iter().enumerate() {
                if !self.reachable_regions.contains(&entrance.parent)
                    || self.reachable_regions.contains(&entrance.target)
                {
                    continue;
                }
                if self.rule_satisfied(&entrance.access_rule, entrance.player) {
                    self.reachable_regions.insert(entrance.target);
                    self.reachable_paths.insert(entrance.target, eid);
                    changed = true;
                }
            }
        }
        self.stale = false;
    }

    pub fn can_reach_region(&mut self, world: &World, region: RegionId) -> bool {
        self.update_reachable_regions(world);
        self.reachable_regions.contains(&region)
    }

    pub fn can_reach_location(&mut self, world: &World, location: LocationId) -> bool {
        self.update_reachable_regions(world);
        let loc = &world.locations[location];
        self.reachable_regions.contains(&loc.region) && self.rule_satisfied(&loc.access_rule, loc.player)
    }

    /// Chain of entrances leading from the owning participant's origin to
    /// the region, following the predecessors recorded by the sweep.
    /// `None` if the region is not currently reachable.
    pub fn entrance_chain(&mut self, world: &World, region: RegionId) -> Option<Vec<EntranceId>> {
        self.update_reachable_regions(world);
        if !self.reachable_regions.contains(&region) {
            return None;
        }
        let mut chain = Vec::new();
        let mut current = region;
        while let Some(&entrance) = self.reachable_paths.get(&current) {
            chain.push(entrance);
            current = world.entrances[entrance].parent;
        }
        chain.reverse();
        Some(chain)
    }
}

/// Answers "is this reachable" and "can the game still be completed" for the
/// playthrough engine. Implementations must be referentially transparent
/// with respect to the state passed in; the `&mut` on queries exists only so
/// the state may refresh its internal reachability caches.
pub trait ReachabilityOracle {
    fn can_reach_location(
        &self,
        world: &World,
        state: &mut CollectionState,
        location: LocationId,
    ) -> bool;
    fn can_reach_region(
        &self,
        world: &World,
        state: &mut CollectionState,
        region: RegionId,
    ) -> bool;
    fn can_complete(&self, world: &World, state: &CollectionState) -> bool;
}

/// Reference oracle: walks the world's region graph and evaluates access
/// rules directly.
pub struct LogicOracle;

impl ReachabilityOracle for LogicOracle {
    fn can_reach_location(
        &self,
        world: &World,
        state: &mut CollectionState,
        location: LocationId,
    ) -> bool {
        state.can_reach_location(world, location)
    }

    fn can_reach_region(
        &self,
        world: &World,
        state: &mut CollectionState,
        region: RegionId,
    ) -> bool {
        state.can_reach_region(world, region)
    }

    /// Completability from a snapshot: sweep the not-yet-consumed progression
    /// placements one reachability round at a time, checking every
    /// participant's completion condition after each round.
    fn can_complete(&self, world: &World, state: &CollectionState) -> bool {
        let mut state = state.clone();
        if completion_satisfied(world, &mut state) {
            return true;
        }
        let mut candidates: Vec<(LocationId, ItemId)> = world
            .locations
            .iter()
            .enumerate()
            .filter_map(|(lid, loc)| {
                if state.advancements.contains(&lid) {
                    return None;
                }
                let item = loc.item?;
                world.items[item].is_progression().then_some((lid, item))
            })
            .collect();
        while !candidates.is_empty() {
            let mut rest = Vec::new();
            let mut reachable = Vec::new();
            for &(lid, item) in &candidates {
                if state.can_reach_location(world, lid) {
                    reachable.push((lid, item));
                } else {
                    rest.push((lid, item));
                }
            }
            if reachable.is_empty() {
                return false;
            }
            for (lid, item) in reachable {
                state.advancements.insert(lid);
                state.collect(world, item);
            }
            candidates = rest;
            if completion_satisfied(world, &mut state) {
                return true;
            }
        }
        false
    }
}

fn completion_satisfied(world: &World, state: &mut CollectionState) -> bool {
    world
        .players()
        .all(|p| state.satisfies(world, world.completion_of(p), p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use multirando_game::worlddef::WorldDef;

    fn chained_world() -> World {
        // Menu -> Field gated on Boots; Boots in Menu, Victory in Field.
        let def: WorldDef = serde_json::from_str(
            r#"{
                "players": [
                    {
                        "name": "Alice",
                        "origin": "Menu",
                        "completion": {"type": "has", "item": "Victory"},
                        "regions": [
                            {
                                "name": "Menu",
                                "exits": [{"to": "Field", "rule": {"type": "has", "item": "Boots"}}],
                                "locations": [{"name": "Chest", "item": {"name": "Boots"}}]
                            },
                            {
                                "name": "Field",
                                "locations": [{"name": "Altar", "item": {"name": "Victory"}}]
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        World::from_def(&def).unwrap()
    }

    #[test]
    fn test_collect_and_remove_counts() {
        let world = chained_world();
        let mut state = CollectionState::new(&world);
        let boots = 0;
        assert_eq!(world.item_name(boots), "Boots");
        state.collect(&world, boots);
        state.collect(&world, boots);
        assert_eq!(state.count_of(1, world.items[boots].name_id), 2);
        state.remove(&world, boots);
        assert_eq!(state.count_of(1, world.items[boots].name_id), 1);
        state.remove(&world, boots);
        assert!(!state.has(1, world.items[boots].name_id, 1));
    }

    #[test]
    fn test_clone_is_independent() {
        let world = chained_world();
        let mut state = CollectionState::new(&world);
        let copy = state.clone();
        state.collect(&world, 0);
        assert_eq!(state.count_of(1, world.items[0].name_id), 1);
        assert_eq!(copy.count_of(1, world.items[0].name_id), 0);
    }

    #[test]
    fn test_reachability_refreshes_after_collect() {
        let world = chained_world();
        let mut state = CollectionState::new(&world);
        let field = 1;
        assert_eq!(world.regions[field].name, "Field");
        assert!(!state.can_reach_region(&world, field));
        assert!(state.can_reach_location(&world, 0));
        assert!(!state.can_reach_location(&world, 1));
        state.collect(&world, 0);
        assert!(state.can_reach_region(&world, field));
        assert!(state.can_reach_location(&world, 1));
    }

    #[test]
    fn test_entrance_chain() {
        let world = chained_world();
        let mut state = CollectionState::new(&world);
        assert_eq!(state.entrance_chain(&world, 1), None);
        state.collect(&world, 0);
        let chain = state.entrance_chain(&world, 1).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(world.entrances[chain[0]].name, "Menu -> Field");
        assert_eq!(state.entrance_chain(&world, 0), Some(vec![]));
    }

    #[test]
    fn test_can_complete_sweeps_chain() {
        let world = chained_world();
        let state = CollectionState::new(&world);
        assert!(LogicOracle.can_complete(&world, &state));
    }

    #[test]
    fn test_can_complete_fails_without_placement() {
        let mut world = chained_world();
        world.locations[1].item = None;
        let state = CollectionState::new(&world);
        assert!(!LogicOracle.can_complete(&world, &state));
    }
}
