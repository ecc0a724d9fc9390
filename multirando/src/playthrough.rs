//! The playthrough engine: sphere construction, pruning down to the minimal
//! required placement set, starting-inventory minimization, and the final
//! re-derivation pass that produces the externally consumed playthrough and
//! its trace. The world graph is borrowed exclusively for the duration of a
//! call and returned to its original or intentionally-minimized shape on
//! every exit path.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use log::{debug, info};
use serde::Serialize;

use multirando_game::{Accessibility, ItemCount, ItemId, LocationId, PlayerId, RegionId, World};
use multirando_logic::{CollectionState, ReachabilityOracle};

use crate::settings::PlaythroughSettings;
use crate::trace::{InventoryDetails, PlayerTraceData, SphereIndex, StateUpdate, TraceLogger};

/// One round of the forward reachability expansion: the locations whose
/// items became collectible together, sorted by (participant, location name).
#[derive(Clone, Debug)]
pub struct Sphere {
    pub locations: Vec<LocationId>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SphereEntry {
    /// Key "0": the sorted starting progression item names.
    Precollected(Vec<String>),
    /// Keys "1"...: location display string to item display string.
    Placements(BTreeMap<String, String>),
}

#[derive(Debug, Serialize)]
pub struct Playthrough {
    pub spheres: BTreeMap<String, SphereEntry>,
    /// Progression placements deliberately left unreachable under relaxed
    /// accessibility.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unreachable: Vec<String>,
    /// Starting items culled by minimization and returned to general
    /// circulation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excess_precollected: Vec<String>,
    /// Entrance chain from the owning participant's origin to each required
    /// location's region.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<String, Vec<String>>,
}

/// Undo log for all destructive mutation performed during a run: items
/// detached from locations by pruning trials, and items removed from
/// starting inventories by minimization. Drained exactly once at teardown.
#[derive(Default)]
pub struct RestorationLedger {
    detached: Vec<(LocationId, ItemId)>,
    removed_precollected: Vec<ItemId>,
}

impl RestorationLedger {
    fn record_detached(&mut self, location: LocationId, item: ItemId) {
        self.detached.push((location, item));
    }

    fn pop_detached(&mut self) -> Option<(LocationId, ItemId)> {
        self.detached.pop()
    }

    fn record_removed_precollected(&mut self, item: ItemId) {
        self.removed_precollected.push(item);
    }

    /// Reattaches every detached item. Precollected removals are final on a
    /// successful run (the items move to the world's excess pool); on an
    /// aborted run they return to their starting inventories. Draining an
    /// empty ledger is a no-op.
    pub fn restore(&mut self, world: &mut World, success: bool) {
        for (location, item) in self.detached.drain(..) {
            world.locations[location].item = Some(item);
        }
        for item in self.removed_precollected.drain(..) {
            if success {
                world.excess_pool.push(item);
            } else {
                world.push_precollected(item);
            }
        }
    }
}

struct SphereBuild {
    spheres: Vec<Sphere>,
    /// Slot i holds the state before sphere i was collected; slot 0 is the
    /// seeded initial state.
    state_cache: Vec<CollectionState>,
    unreachable: Vec<LocationId>,
}

pub struct PlaythroughBuilder<'a, O: ReachabilityOracle> {
    pub world: &'a mut World,
    pub oracle: &'a O,
    pub settings: &'a PlaythroughSettings,
}

impl<'a, O: ReachabilityOracle> PlaythroughBuilder<'a, O> {
    pub fn new(world: &'a mut World, oracle: &'a O, settings: &'a PlaythroughSettings) -> Self {
        PlaythroughBuilder {
            world,
            oracle,
            settings,
        }
    }

    /// Runs all phases and unconditionally undoes the destructive mutation
    /// they performed, whether the computation succeeded or aborted.
    pub fn create_playthrough(&mut self) -> Result<Playthrough> {
        let mut trace = TraceLogger::open(&self.settings.trace);
        let mut ledger = RestorationLedger::default();
        let result = self.run(&mut ledger, &mut trace);
        // The log is closed before restoration resolves; a tracing failure
        // must never block restoration.
        trace.close();
        let success = result.is_ok();
        ledger.restore(self.world, success);
        result
    }

    fn run(&mut self, ledger: &mut RestorationLedger, trace: &mut TraceLogger) -> Result<Playthrough> {
        info!("Building collection spheres");
        let mut build = self.build_spheres()?;
        info!("Pruning {} spheres down to the required placements", build.spheres.len());
        self.prune_spheres(&mut build.spheres, &build.state_cache, ledger);
        let culled = self.minimize_precollected(ledger);
        self.final_pass(&build.spheres, &build.unreachable, &culled, trace)
    }

    /// Forward fixed point: each round resolves the progression locations
    /// reachable under the current state, collects their items, and caches a
    /// snapshot. An empty round with candidates remaining is fatal unless
    /// every leftover item's owner runs with relaxed accessibility.
    fn build_spheres(&self) -> Result<SphereBuild> {
        let world = &*self.world;
        let oracle = self.oracle;

        let mut candidates = world.progression_locations();
        candidates.sort_by(|&a, &b| world.location_sort_key(a).cmp(&world.location_sort_key(b)));

        let mut state = CollectionState::new(world);
        for player in world.players() {
            for &item in world.precollected_of(player) {
                state.collect(world, item);
            }
        }
        let mut state_cache = vec![state.clone()];
        let mut spheres: Vec<Sphere> = Vec::new();
        let mut unreachable: Vec<LocationId> = Vec::new();

        while !candidates.is_empty() {
            let mut sphere: Vec<LocationId> = Vec::new();
            let mut rest: Vec<LocationId> = Vec::new();
            for &location in &candidates {
                if oracle.can_reach_location(world, &mut state, location) {
                    sphere.push(location);
                } else {
                    rest.push(location);
                }
            }
            if sphere.is_empty() {
                let all_minimal = candidates.iter().all(|&location| {
                    let owner = owner_of_placement(world, location);
                    world.accessibility_of(owner) == Accessibility::Minimal
                });
                if all_minimal {
                    debug!(
                        "{} progression locations remain unreachable under relaxed accessibility",
                        candidates.len()
                    );
                    unreachable = candidates;
                    break;
                }
                let stranded: Vec<String> = candidates
                    .iter()
                    .map(|&l| world.location_display(l))
                    .collect();
                bail!(
                    "Not all progression locations are reachable at sphere {}: {}",
                    spheres.len() + 1,
                    stranded.join(", ")
                );
            }
            for &location in &sphere {
                state.collect_location(world, location);
            }
            debug!(
                "Sphere {}: {} of {} progression locations",
                spheres.len() + 1,
                sphere.len(),
                sphere.len() + rest.len()
            );
            spheres.push(Sphere { locations: sphere });
            state_cache.push(state.clone());
            candidates = rest;
        }

        Ok(SphereBuild {
            spheres,
            state_cache,
            unreachable,
        })
    }

    /// Reverse pass reducing each sphere to the placements whose removal
    /// breaks completability from that sphere's pre-snapshot. Removals
    /// shrink the trace, not the world: detached items are reattached by the
    /// restoration ledger at teardown.
    fn prune_spheres(
        &mut self,
        spheres: &mut [Sphere],
        state_cache: &[CollectionState],
        ledger: &mut RestorationLedger,
    ) {
        for num in (0..spheres.len()).rev() {
            let mut kept: Vec<LocationId> = Vec::new();
            for i in 0..spheres[num].locations.len() {
                let location = spheres[num].locations[i];
                let Some(item) = self.world.locations[location].item.take() else {
                    continue;
                };
                debug!(
                    "Checking if {} is required to beat the game",
                    self.world.item_display(item)
                );
                ledger.record_detached(location, item);
                if !self.oracle.can_complete(self.world, &state_cache[num]) {
                    // Still required; put it back immediately.
                    ledger.pop_detached();
                    self.world.locations[location].item = Some(item);
                    kept.push(location);
                }
            }
            spheres[num].locations = kept;
        }
    }

    /// Greedy single-pass minimization of each participant's starting
    /// inventory, one item at a time in (participant, name) order. Each
    /// trial removes the item from both the starting set and the live state,
    /// then asks whether completion is still derivable over the placements
    /// that survived pruning. Only local minimality is attempted: with
    /// mutually substitutable starting items the encounter order decides
    /// which survives.
    fn minimize_precollected(&mut self, ledger: &mut RestorationLedger) -> Vec<ItemId> {
        let mut live_state = CollectionState::new(self.world);
        for player in 1..=self.world.num_players() {
            for &item in self.world.precollected_of(player) {
                live_state.collect(self.world, item);
            }
        }
        let mut culled: Vec<ItemId> = Vec::new();
        for player in 1..=self.world.num_players() {
            let mut items: Vec<ItemId> = self
                .world
                .precollected_of(player)
                .iter()
                .copied()
                .filter(|&item| self.world.items[item].is_progression())
                .collect();
            items.sort_by(|&a, &b| {
                self.world
                    .item_name(a)
                    .cmp(self.world.item_name(b))
                    .then(a.cmp(&b))
            });
            for item in items {
                self.world.remove_precollected(item);
                live_state.remove(self.world, item);
                if self.oracle.can_complete(self.world, &live_state) {
                    debug!(
                        "Starting item {} is not required to beat the game",
                        self.world.item_display(item)
                    );
                    ledger.record_removed_precollected(item);
                    culled.push(item);
                } else {
                    self.world.push_precollected(item);
                    live_state.collect(self.world, item);
                }
            }
        }
        culled
    }

    /// Re-derives the collection order over the minimized required set from
    /// a fresh state, emitting trace lines and assembling the playthrough.
    fn final_pass(
        &self,
        spheres: &[Sphere],
        unreachable: &[LocationId],
        culled: &[ItemId],
        trace: &mut TraceLogger,
    ) -> Result<Playthrough> {
        let world = &*self.world;
        let oracle = self.oracle;
        let mut state = CollectionState::new(world);

        // Round 0: the minimized starting inventories, one item at a time.
        let mut starting: Vec<ItemId> = world
            .players()
            .flat_map(|p| world.precollected_of(p).iter().copied())
            .filter(|&item| world.items[item].is_progression())
            .collect();
        starting.sort_by(|&a, &b| {
            let ka = (world.items[a].player, world.item_name(a), a);
            let kb = (world.items[b].player, world.item_name(b), b);
            ka.cmp(&kb)
        });
        for (k, &item) in starting.iter().enumerate() {
            state.collect(world, item);
            if trace.per_item_updates {
                self.emit_update(trace, &mut state, SphereIndex::Item(0, k + 1), Vec::new());
            }
        }
        if trace.per_sphere_updates {
            self.emit_update(trace, &mut state, SphereIndex::Round(0), Vec::new());
        }

        let mut sphere_map: BTreeMap<String, SphereEntry> = BTreeMap::new();
        let mut starting_names: Vec<String> =
            starting.iter().map(|&item| world.item_display(item)).collect();
        starting_names.sort();
        sphere_map.insert("0".to_string(), SphereEntry::Precollected(starting_names));

        let mut required: Vec<LocationId> = spheres
            .iter()
            .flat_map(|s| s.locations.iter().copied())
            .collect();
        required.sort_by(|&a, &b| world.location_sort_key(a).cmp(&world.location_sort_key(b)));

        let mut round = 0;
        while !required.is_empty() {
            round += 1;
            let mut reachable: Vec<LocationId> = Vec::new();
            let mut rest: Vec<LocationId> = Vec::new();
            for &location in &required {
                if oracle.can_reach_location(world, &mut state, location) {
                    reachable.push(location);
                } else {
                    rest.push(location);
                }
            }
            if reachable.is_empty() {
                let stranded: Vec<String> =
                    rest.iter().map(|&l| world.location_display(l)).collect();
                bail!(
                    "Required locations are unreachable at sphere {round}: {}",
                    stranded.join(", ")
                );
            }
            let mut placements: BTreeMap<String, String> = BTreeMap::new();
            for (k, &location) in reachable.iter().enumerate() {
                let item = match world.locations[location].item {
                    Some(item) => item,
                    None => bail!(
                        "Required location {} no longer holds an item",
                        world.location_display(location)
                    ),
                };
                state.collect_location(world, location);
                placements.insert(world.location_display(location), world.item_display(item));
                if trace.per_item_updates {
                    self.emit_update(
                        trace,
                        &mut state,
                        SphereIndex::Item(round, k + 1),
                        vec![world.location_display(location)],
                    );
                }
            }
            if trace.per_sphere_updates {
                let mut locations: Vec<String> =
                    reachable.iter().map(|&l| world.location_display(l)).collect();
                locations.sort();
                self.emit_update(trace, &mut state, SphereIndex::Round(round), locations);
            }
            sphere_map.insert(round.to_string(), SphereEntry::Placements(placements));
            required = rest;
        }

        let mut paths: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if self.settings.compute_paths {
            let mut regions: Vec<RegionId> = spheres
                .iter()
                .flat_map(|s| s.locations.iter().map(|&l| world.locations[l].region))
                .collect();
            regions.sort();
            regions.dedup();
            for region in regions {
                if let Some(chain) = state.entrance_chain(world, region) {
                    if chain.is_empty() {
                        continue;
                    }
                    let names: Vec<String> = chain
                        .iter()
                        .map(|&e| world.entrances[e].name.clone())
                        .collect();
                    paths.insert(world.region_display(region), names);
                }
            }
        }

        let mut unreachable_names: Vec<String> = unreachable
            .iter()
            .map(|&l| world.location_display(l))
            .collect();
        unreachable_names.sort();
        let mut excess_names: Vec<String> =
            culled.iter().map(|&item| world.item_display(item)).collect();
        excess_names.sort();

        Ok(Playthrough {
            spheres: sphere_map,
            unreachable: unreachable_names,
            excess_precollected: excess_names,
            paths,
        })
    }

    fn emit_update(
        &self,
        trace: &mut TraceLogger,
        state: &mut CollectionState,
        sphere_index: SphereIndex,
        sphere_locations: Vec<String>,
    ) {
        if !trace.enabled() {
            return;
        }
        let record = StateUpdate {
            record_type: "state_update",
            sphere_index,
            sphere_locations,
            player_data: self.player_trace_data(state),
        };
        trace.write_update(&record);
    }

    fn player_trace_data(&self, state: &mut CollectionState) -> BTreeMap<PlayerId, PlayerTraceData> {
        let world = &*self.world;
        let oracle = self.oracle;
        let mut out = BTreeMap::new();
        for player in world.players() {
            let mut prog_items: BTreeMap<String, ItemCount> = BTreeMap::new();
            for (&name_id, &count) in state.prog_items_of(player) {
                prog_items.insert(world.item_name_of(name_id).to_string(), count);
            }
            let mut accessible_locations: Vec<String> = Vec::new();
            for location in 0..world.locations.len() {
                if world.locations[location].player == player
                    && oracle.can_reach_location(world, state, location)
                {
                    accessible_locations.push(world.locations[location].name.clone());
                }
            }
            accessible_locations.sort();
            let mut accessible_regions: Vec<String> = Vec::new();
            for region in 0..world.regions.len() {
                if world.regions[region].player == player
                    && oracle.can_reach_region(world, state, region)
                {
                    accessible_regions.push(world.regions[region].name.clone());
                }
            }
            accessible_regions.sort();
            out.insert(
                player,
                PlayerTraceData {
                    inventory_details: InventoryDetails {
                        prog_items,
                        non_prog_items: BTreeMap::new(),
                    },
                    accessible_locations,
                    accessible_regions,
                },
            );
        }
        out
    }
}

/// Accessibility strictness is decided by the owner of the stranded item,
/// not of the location holding it.
fn owner_of_placement(world: &World, location: LocationId) -> PlayerId {
    match world.locations[location].item {
        Some(item) => world.items[item].player,
        None => world.locations[location].player,
    }
}
