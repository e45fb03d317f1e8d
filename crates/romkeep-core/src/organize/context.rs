use super::template::Placeholder;
use crate::catalog::Game;
use crate::naming;
use crate::storage::models::{CatalogRecord, ScannedFile};

/// Values available to a template. Fields left `None` are derived from the
/// title name where possible, otherwise they render empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateContext {
    pub system: Option<String>,
    pub system_short: Option<String>,
    pub region: Option<String>,
    pub languages: Option<String>,
    pub name: Option<String>,
    pub clean_name: Option<String>,
    pub first_letter: Option<String>,
    pub year: Option<String>,
    pub publisher: Option<String>,
    pub extension: Option<String>,
    pub parent: Option<String>,
    pub category: Option<String>,
    pub catalog_name: Option<String>,
    pub provider: Option<String>,
    pub crc: Option<String>,
    pub rom_name: Option<String>,
    pub file_name: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// `Nintendo - Nintendo Entertainment System` -> `NES`, `Nintendo - Game Boy` -> `GB`.
pub fn system_short(system: &str) -> String {
    let platform = system.rsplit(" - ").next().unwrap_or(system).trim();
    let words: Vec<&str> = platform.split_whitespace().collect();
    if words.len() < 2 {
        return platform.to_string();
    }
    words
        .iter()
        .filter_map(|w| w.chars().next())
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

fn extension_of(name: &str) -> Option<String> {
    let leaf = name.rsplit(['/', '\\']).next().unwrap_or(name);
    leaf.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

impl TemplateContext {
    /// Context for one scanned file matched to `game` of `catalog`.
    ///
    /// An archive member organizes as its archive, so the extension comes from
    /// the archive and the original name is the archive's.
    pub fn for_file(catalog: &CatalogRecord, game: &Game, rom_name: &str, file: &ScannedFile) -> Self {
        let disk_name = file.disk_relative_path();
        let disk_name = disk_name.rsplit('/').next().unwrap_or(disk_name).to_string();
        Self {
            system: Some(catalog.system.clone()),
            system_short: None,
            region: non_empty(&game.region),
            languages: non_empty(&game.languages),
            name: Some(game.name.clone()),
            clean_name: None,
            first_letter: None,
            year: non_empty(&game.year),
            publisher: non_empty(&game.publisher),
            extension: extension_of(&disk_name),
            parent: non_empty(&game.clone_of),
            category: non_empty(&game.category),
            catalog_name: Some(catalog.name.clone()),
            provider: Some(catalog.provider.clone()),
            crc: file.hashes.crc32.clone(),
            rom_name: Some(rom_name.to_string()),
            file_name: Some(disk_name),
        }
    }

    /// Every field filled, for previews and validation.
    pub fn sample() -> Self {
        Self {
            system: Some("Nintendo - Nintendo Entertainment System".to_string()),
            system_short: None,
            region: Some("USA".to_string()),
            languages: Some("En".to_string()),
            name: Some("Super Mario Bros. (World)".to_string()),
            clean_name: None,
            first_letter: None,
            year: Some("1985".to_string()),
            publisher: Some("Nintendo".to_string()),
            extension: Some("nes".to_string()),
            parent: Some("Super Mario Bros. (World)".to_string()),
            category: Some("Games".to_string()),
            catalog_name: Some("Nintendo - Nintendo Entertainment System".to_string()),
            provider: Some("No-Intro".to_string()),
            crc: Some("d445f698".to_string()),
            rom_name: Some("Super Mario Bros. (World).nes".to_string()),
            file_name: Some("smb.nes".to_string()),
        }
    }

    pub fn value(&self, placeholder: Placeholder) -> Option<String> {
        let name = non_empty(&self.name);
        let info = || name.as_deref().map(naming::parse_name).unwrap_or_default();
        let regions = || -> Vec<String> {
            match non_empty(&self.region) {
                Some(region) => region
                    .split(',')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect(),
                None => info().regions,
            }
        };
        let joined = |values: Vec<String>, sep: &str| (!values.is_empty()).then(|| values.join(sep));

        match placeholder {
            Placeholder::System => non_empty(&self.system),
            Placeholder::SystemShort => non_empty(&self.system_short)
                .or_else(|| non_empty(&self.system).map(|s| system_short(&s))),
            Placeholder::Region => joined(regions(), ", "),
            Placeholder::RegionShort => joined(
                regions().iter().map(|r| naming::region_short(r)).collect(),
                "-",
            ),
            Placeholder::Languages => non_empty(&self.languages).or_else(|| joined(info().languages, ",")),
            Placeholder::Name => name.clone(),
            Placeholder::CleanName => non_empty(&self.clean_name)
                .or_else(|| name.as_deref().map(naming::clean_name)),
            Placeholder::FirstLetter => non_empty(&self.first_letter)
                .or_else(|| name.as_deref().map(naming::first_letter)),
            Placeholder::Year => non_empty(&self.year),
            Placeholder::Publisher => non_empty(&self.publisher),
            Placeholder::Extension => non_empty(&self.extension),
            Placeholder::Parent => non_empty(&self.parent).or_else(|| name.clone()),
            Placeholder::Category => non_empty(&self.category)
                .or_else(|| info().categories.into_iter().next()),
            Placeholder::CatalogName => non_empty(&self.catalog_name),
            Placeholder::Provider => non_empty(&self.provider),
            Placeholder::Crc => non_empty(&self.crc),
            Placeholder::RomName => non_empty(&self.rom_name),
            Placeholder::FileName => non_empty(&self.file_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_short() {
        assert_eq!(system_short("Nintendo - Nintendo Entertainment System"), "NES");
        assert_eq!(system_short("Nintendo - Game Boy Advance"), "GBA");
        assert_eq!(system_short("Sega - Mega Drive - Genesis"), "Genesis");
    }

    #[test]
    fn test_values_derived_from_name() {
        let context = TemplateContext {
            name: Some("Legend of Zelda, The (USA, Europe) (En,Fr) (Beta)".to_string()),
            ..Default::default()
        };
        assert_eq!(context.value(Placeholder::CleanName).as_deref(), Some("Legend of Zelda, The"));
        assert_eq!(context.value(Placeholder::Region).as_deref(), Some("USA, Europe"));
        assert_eq!(context.value(Placeholder::RegionShort).as_deref(), Some("US-EU"));
        assert_eq!(context.value(Placeholder::Languages).as_deref(), Some("En,Fr"));
        assert_eq!(context.value(Placeholder::FirstLetter).as_deref(), Some("L"));
        assert_eq!(context.value(Placeholder::Category).as_deref(), Some("Beta"));
        assert_eq!(context.value(Placeholder::Year), None);
    }

    #[test]
    fn test_declared_values_win() {
        let context = TemplateContext {
            name: Some("Game (Japan)".to_string()),
            region: Some("Asia".to_string()),
            ..Default::default()
        };
        assert_eq!(context.value(Placeholder::Region).as_deref(), Some("Asia"));
        assert_eq!(context.value(Placeholder::Parent).as_deref(), Some("Game (Japan)"));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("dir/Game.NES").as_deref(), Some("nes"));
        assert_eq!(extension_of("noext"), None);
    }
}
