//! Serde-facing world definition format, resolved into a [`World`] with
//! interned ids. This is the interface boundary with the catalog/fill
//! tooling: the engine itself never sees names, only indices.

use anyhow::{Context, Result, ensure};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::{
    Accessibility, EntranceData, IndexedVec, ItemClassification, ItemCount, ItemData, ItemId,
    LocationData, PlayerId, RegionData, RegionId, Rule, World,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorldDef {
    pub players: Vec<PlayerDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerDef {
    pub name: String,
    #[serde(default)]
    pub accessibility: Accessibility,
    /// Region where traversal starts (conventionally "Menu").
    pub origin: String,
    pub completion: RuleDef,
    #[serde(default)]
    pub regions: Vec<RegionDef>,
    #[serde(default)]
    pub precollected: Vec<ItemDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionDef {
    pub name: String,
    #[serde(default)]
    pub exits: Vec<ExitDef>,
    #[serde(default)]
    pub locations: Vec<LocationDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExitDef {
    pub to: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rule: RuleDef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationDef {
    pub name: String,
    #[serde(default)]
    pub rule: RuleDef,
    #[serde(default)]
    pub item: Option<ItemDef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemDef {
    pub name: String,
    /// Owning participant by name; defaults to the participant whose world
    /// definition the item appears in.
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub classification: ItemClassification,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleDef {
    #[default]
    Free,
    Never,
    Has {
        item: String,
        #[serde(default = "default_count")]
        count: ItemCount,
    },
    CanReach {
        region: String,
    },
    All {
        rules: Vec<RuleDef>,
    },
    Any {
        rules: Vec<RuleDef>,
    },
}

fn default_count() -> ItemCount {
    1
}

impl World {
    pub fn from_def(def: &WorldDef) -> Result<World> {
        ensure!(!def.players.is_empty(), "world definition has no participants");
        let mut player_by_name: HashMap<&str, PlayerId> = HashMap::new();
        for (i, p) in def.players.iter().enumerate() {
            ensure!(
                player_by_name.insert(&p.name, i + 1).is_none(),
                "duplicate participant name {:?}",
                p.name
            );
        }

        let mut world = World {
            player_names: def.players.iter().map(|p| p.name.clone()).collect(),
            item_name_isv: IndexedVec::default(),
            items: Vec::new(),
            regions: Vec::new(),
            entrances: Vec::new(),
            locations: Vec::new(),
            origins: Vec::new(),
            completion_rules: Vec::new(),
            accessibility: def.players.iter().map(|p| p.accessibility).collect(),
            precollected: vec![Vec::new(); def.players.len()],
            excess_pool: Vec::new(),
        };

        // First pass creates every region so that exits, origins, and rules
        // can refer to regions defined later in the file.
        let mut region_by_name: HashMap<(PlayerId, String), RegionId> = HashMap::new();
        for (pi, p) in def.players.iter().enumerate() {
            let player = pi + 1;
            for r in &p.regions {
                let id = world.regions.len();
                ensure!(
                    region_by_name.insert((player, r.name.clone()), id).is_none(),
                    "duplicate region {:?} for participant {:?}",
                    r.name,
                    p.name
                );
                world.regions.push(RegionData {
                    name: r.name.clone(),
                    player,
                    exits: Vec::new(),
                    locations: Vec::new(),
                });
            }
        }

        let mut location_names: HashSet<(PlayerId, String)> = HashSet::new();
        for (pi, p) in def.players.iter().enumerate() {
            let player = pi + 1;
            let origin = *region_by_name
                .get(&(player, p.origin.clone()))
                .with_context(|| {
                    format!("unknown origin region {:?} for participant {:?}", p.origin, p.name)
                })?;
            world.origins.push(origin);
            let completion = resolve_rule(&p.completion, player, &mut world, &region_by_name)
                .with_context(|| format!("completion condition of participant {:?}", p.name))?;
            world.completion_rules.push(completion);

            for r in &p.regions {
                let region_id = region_by_name[&(player, r.name.clone())];
                for x in &r.exits {
                    let target = *region_by_name.get(&(player, x.to.clone())).with_context(|| {
                        format!("unknown exit target {:?} from region {:?}", x.to, r.name)
                    })?;
                    let name = x
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{} -> {}", r.name, x.to));
                    let access_rule = resolve_rule(&x.rule, player, &mut world, &region_by_name)
                        .with_context(|| format!("rule of entrance {name:?}"))?;
                    let eid = world.entrances.len();
                    world.entrances.push(EntranceData {
                        name,
                        player,
                        parent: region_id,
                        target,
                        access_rule,
                    });
                    world.regions[region_id].exits.push(eid);
                }
                for l in &r.locations {
                    ensure!(
                        location_names.insert((player, l.name.clone())),
                        "duplicate location {:?} for participant {:?}",
                        l.name,
                        p.name
                    );
                    let item = match &l.item {
                        Some(d) => Some(create_item(&mut world, d, player, &player_by_name)?),
                        None => None,
                    };
                    let access_rule = resolve_rule(&l.rule, player, &mut world, &region_by_name)
                        .with_context(|| format!("rule of location {:?}", l.name))?;
                    let lid = world.locations.len();
                    world.locations.push(LocationData {
                        name: l.name.clone(),
                        player,
                        region: region_id,
                        item,
                        access_rule,
                    });
                    world.regions[region_id].locations.push(lid);
                }
            }
            for d in &p.precollected {
                let item = create_item(&mut world, d, player, &player_by_name)?;
                world.precollected[player - 1].push(item);
            }
        }
        Ok(world)
    }
}

fn create_item(
    world: &mut World,
    def: &ItemDef,
    enclosing: PlayerId,
    player_by_name: &HashMap<&str, PlayerId>,
) -> Result<ItemId> {
    let player = match &def.player {
        Some(name) => *player_by_name
            .get(name.as_str())
            .with_context(|| format!("unknown participant {name:?} as owner of item {:?}", def.name))?,
        None => enclosing,
    };
    let name_id = world.item_name_isv.add(&(player, def.name.clone()));
    let id = world.items.len();
    world.items.push(ItemData {
        name_id,
        player,
        classification: def.classification,
    });
    Ok(id)
}

fn resolve_rule(
    def: &RuleDef,
    player: PlayerId,
    world: &mut World,
    region_by_name: &HashMap<(PlayerId, String), RegionId>,
) -> Result<Rule> {
    Ok(match def {
        RuleDef::Free => Rule::Free,
        RuleDef::Never => Rule::Never,
        RuleDef::Has { item, count } => {
            ensure!(*count > 0, "item rule for {item:?} requires a positive count");
            let name_id = world.item_name_isv.add(&(player, item.clone()));
            Rule::Has(name_id, *count)
        }
        RuleDef::CanReach { region } => {
            let id = *region_by_name
                .get(&(player, region.clone()))
                .with_context(|| format!("unknown region {region:?} in reach rule"))?;
            Rule::CanReachRegion(id)
        }
        RuleDef::All { rules } => Rule::And(
            rules
                .iter()
                .map(|r| resolve_rule(r, player, world, region_by_name))
                .collect::<Result<Vec<Rule>>>()?,
        ),
        RuleDef::Any { rules } => Rule::Or(
            rules
                .iter()
                .map(|r| resolve_rule(r, player, world, region_by_name))
                .collect::<Result<Vec<Rule>>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_small_world() {
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
                                "locations": [
                                    {"name": "Chest", "item": {"name": "Boots"}}
                                ]
                            },
                            {
                                "name": "Field",
                                "locations": [
                                    {"name": "Altar", "item": {"name": "Victory"}}
                                ]
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        let world = World::from_def(&def).unwrap();
        assert_eq!(world.num_players(), 1);
        assert_eq!(world.regions.len(), 2);
        assert_eq!(world.entrances.len(), 1);
        assert_eq!(world.locations.len(), 2);
        assert_eq!(world.items.len(), 2);
        assert_eq!(world.location_display(0), "Chest");
        let entrance = &world.entrances[0];
        assert_eq!(entrance.name, "Menu -> Field");
        assert!(matches!(entrance.access_rule, Rule::Has(_, 1)));
    }

    #[test]
    fn test_duplicate_location_rejected() {
        let def: WorldDef = serde_json::from_str(
            r#"{
                "players": [
                    {
                        "name": "Alice",
                        "origin": "Menu",
                        "completion": {"type": "free"},
                        "regions": [
                            {
                                "name": "Menu",
                                "locations": [{"name": "Chest"}, {"name": "Chest"}]
                            }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        assert!(World::from_def(&def).is_err());
    }

    #[test]
    fn test_cross_player_item_owner() {
        let def: WorldDef = serde_json::from_str(
            r#"{
                "players": [
                    {
                        "name": "Alice",
                        "origin": "Menu",
                        "completion": {"type": "free"},
                        "regions": [
                            {
                                "name": "Menu",
                                "locations": [
                                    {"name": "Chest", "item": {"name": "Hammer", "player": "Bob"}}
                                ]
                            }
                        ]
                    },
                    {
                        "name": "Bob",
                        "origin": "Menu2",
                        "completion": {"type": "free"},
                        "regions": [{"name": "Menu2"}]
                    }
                ]
            }"#,
        )
        .unwrap();
        let world = World::from_def(&def).unwrap();
        assert_eq!(world.items[0].player, 2);
        assert_eq!(world.item_display(0), "Hammer (Bob)");
        assert_eq!(world.location_display(0), "Chest (Alice)");
    }
}
