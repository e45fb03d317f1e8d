//! One game, one ROM: pick a single title from every parent/clone family.

use crate::catalog::{Game, RomStatus};
use crate::config::OrganizeConfig;
use crate::naming::{self, NameInfo};
use crate::storage::models::CatalogGameRecord;
use ahash::AHashMap;
use serde::Serialize;
use tracing::debug;

/// How well a title fits the configured preferences. Fields compare in
/// declaration order, so a better region always beats a better language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Score {
    /// `len - index` of the best listed region, 0 when none is listed.
    pub region: usize,
    pub language: usize,
    pub is_parent: bool,
    pub is_verified: bool,
    /// Parsed from `(Rev N)` / `(vN.M)`; empty when the name carries none.
    pub revision: Vec<u32>,
}

/// The winner of one family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub family: String,
    pub game_id: i64,
    pub game_name: String,
    pub score: Score,
    /// Other candidates of the family, in catalog order.
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FamilyResolution {
    pub selections: Vec<Selection>,
    /// Titles dropped by category before scoring.
    pub excluded: Vec<String>,
}

impl FamilyResolution {
    pub fn is_selected(&self, game_id: i64) -> bool {
        self.selections.iter().any(|s| s.game_id == game_id)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn regions_of(game: &Game, info: &NameInfo) -> Vec<String> {
    match game.region.as_deref() {
        Some(region) if !region.trim().is_empty() => split_list(region),
        _ => info.regions.clone(),
    }
}

fn languages_of(game: &Game, info: &NameInfo) -> Vec<String> {
    match game.languages.as_deref() {
        Some(languages) if !languages.trim().is_empty() => split_list(languages),
        _ => info.languages.clone(),
    }
}

/// `len - index` of the first entry of `priority` any value matches.
fn rank(priority: &[String], values: &[String]) -> usize {
    priority
        .iter()
        .position(|wanted| values.iter().any(|v| v.eq_ignore_ascii_case(wanted)))
        .map_or(0, |index| priority.len() - index)
}

/// True when a category of the title is on the exclusion list.
pub fn is_excluded(game: &Game, exclude: &[String]) -> bool {
    let info = naming::parse_name(&game.name);
    let declared = game.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
    exclude.iter().any(|excluded| {
        info.categories.iter().any(|c| c.eq_ignore_ascii_case(excluded))
            || declared.map_or(false, |c| c.eq_ignore_ascii_case(excluded))
    })
}

pub fn score(game: &Game, config: &OrganizeConfig) -> Score {
    let info = naming::parse_name(&game.name);
    Score {
        region: rank(&config.region_priority, &regions_of(game, &info)),
        language: rank(&config.language_priority, &languages_of(game, &info)),
        is_parent: !game.is_clone(),
        is_verified: !game.roms.is_empty() && game.roms.iter().all(|r| r.status == RomStatus::Verified),
        revision: info.revision.unwrap_or_default(),
    }
}

/// Index and score of the best candidate. Equal scores keep the earliest
/// candidate; excluded titles are never chosen.
pub fn select_one(candidates: &[&Game], config: &OrganizeConfig) -> Option<(usize, Score)> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, game)| !is_excluded(game, &config.exclude_categories))
        .map(|(i, game)| (i, score(game, config)))
        .fold(None, |best, (i, s)| match best {
            Some((best_index, best_score)) if s <= best_score => Some((best_index, best_score)),
            _ => Some((i, s)),
        })
}

/// Group `games` into parent/clone families and choose one title per family.
///
/// Families come out in the catalog order of their first member. A family
/// whose titles are all excluded yields no selection.
pub fn resolve_families(games: &[CatalogGameRecord], config: &OrganizeConfig) -> FamilyResolution {
    let mut ordered: Vec<&CatalogGameRecord> = games.iter().collect();
    ordered.sort_by_key(|g| (g.catalog_id, g.ordinal));

    let mut family_order: Vec<(i64, String)> = Vec::new();
    let mut families: AHashMap<(i64, String), Vec<&CatalogGameRecord>> = AHashMap::new();
    for record in ordered {
        let key = (record.catalog_id, record.game.family().to_string());
        let members = families.entry(key.clone()).or_default();
        if members.is_empty() {
            family_order.push(key);
        }
        members.push(record);
    }

    let mut resolution = FamilyResolution::default();
    for key in family_order {
        let members = &families[&key];
        let (kept, excluded): (Vec<&CatalogGameRecord>, Vec<&CatalogGameRecord>) = members
            .iter()
            .copied()
            .partition(|r| !is_excluded(&r.game, &config.exclude_categories));
        resolution
            .excluded
            .extend(excluded.iter().map(|r| r.game.name.clone()));

        let candidates: Vec<&Game> = kept.iter().map(|r| &r.game).collect();
        let Some((index, score)) = select_one(&candidates, config) else {
            debug!("Family '{}' has no eligible titles", key.1);
            continue;
        };
        let winner = kept[index];
        resolution.selections.push(Selection {
            family: key.1.clone(),
            game_id: winner.id,
            game_name: winner.game.name.clone(),
            score,
            rejected: kept
                .iter()
                .filter(|r| r.id != winner.id)
                .map(|r| r.game.name.clone())
                .collect(),
        });
    }
    resolution
}
