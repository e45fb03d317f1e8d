//! Metadata carried in catalog title names, e.g.
//! `Legend of Zelda, The (USA, Europe) (En,Fr) (Rev 1) (Beta)`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"[(\[]([^)\]]*)[)\]]").unwrap();
    static ref LANGUAGE: Regex = Regex::new(r"^[A-Z][a-z](-[A-Z][a-z]+)?$").unwrap();
    static ref REVISION: Regex = Regex::new(r"^Rev ([0-9A-Z]+(?:\.[0-9]+)*)$").unwrap();
    static ref VERSION: Regex = Regex::new(r"^v([0-9]+(?:\.[0-9]+)*)[a-z]?$").unwrap();
    static ref CATEGORY: Regex = Regex::new(
        r"^(Beta|Proto|Prototype|Demo|Sample|Kiosk|Pirate|Unl|Aftermarket|Program|Promo|Debug|Alt)(?: [0-9A-Za-z.]+)?$"
    )
    .unwrap();
}

/// Known region names with their short codes.
pub const REGIONS: &[(&str, &str)] = &[
    ("World", "W"),
    ("USA", "US"),
    ("Europe", "EU"),
    ("Japan", "JP"),
    ("Asia", "AS"),
    ("Australia", "AU"),
    ("Brazil", "BR"),
    ("Canada", "CA"),
    ("China", "CN"),
    ("France", "FR"),
    ("Germany", "DE"),
    ("Hong Kong", "HK"),
    ("Italy", "IT"),
    ("Korea", "KR"),
    ("Latin America", "LA"),
    ("Netherlands", "NL"),
    ("Russia", "RU"),
    ("Scandinavia", "SC"),
    ("Spain", "ES"),
    ("Sweden", "SE"),
    ("Taiwan", "TW"),
    ("UK", "UK"),
    ("Unknown", "UNK"),
];

pub fn region_short(region: &str) -> String {
    REGIONS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(region))
        .map(|(_, short)| short.to_string())
        .unwrap_or_else(|| region.to_string())
}

fn is_region(s: &str) -> bool {
    REGIONS.iter().any(|(name, _)| *name == s)
}

/// Everything extracted from one title name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameInfo {
    pub clean_name: String,
    pub regions: Vec<String>,
    pub languages: Vec<String>,
    /// `Rev 1` -> `[1]`, `Rev A` -> `[1]`, `Rev 1.1` -> `[1, 1]`, `v1.2` -> `[1, 2]`.
    pub revision: Option<Vec<u32>>,
    /// Development/release state tags such as `Beta` or `Proto`, first word only.
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

fn parse_revision(text: &str) -> Vec<u32> {
    text.split('.')
        .map(|part| match part.parse::<u32>() {
            Ok(n) => n,
            Err(_) => part
                .chars()
                .next()
                .filter(|c| c.is_ascii_uppercase())
                .map(|c| c as u32 - 'A' as u32 + 1)
                .unwrap_or(0),
        })
        .collect()
}

pub fn parse_name(name: &str) -> NameInfo {
    let mut info = NameInfo {
        clean_name: clean_name(name),
        ..Default::default()
    };

    for cap in TAG.captures_iter(name) {
        let tag = cap[1].trim();
        info.tags.push(tag.to_string());

        let parts: Vec<&str> = tag.split(',').map(str::trim).collect();
        if parts.iter().all(|p| is_region(p)) {
            info.regions.extend(parts.iter().map(|p| p.to_string()));
        } else if parts.iter().all(|p| LANGUAGE.is_match(p)) {
            info.languages.extend(parts.iter().map(|p| p.to_string()));
        } else if let Some(rev) = REVISION.captures(tag) {
            info.revision = Some(parse_revision(&rev[1]));
        } else if let Some(ver) = VERSION.captures(tag) {
            if info.revision.is_none() {
                info.revision = Some(parse_revision(&ver[1]));
            }
        } else if let Some(cat) = CATEGORY.captures(tag) {
            let word = match &cat[1] {
                "Prototype" => "Proto",
                other => other,
            };
            info.categories.push(word.to_string());
        }
    }
    info
}

/// Title with every `(...)`/`[...]` tag removed.
pub fn clean_name(name: &str) -> String {
    let cut = name
        .find(|c| c == '(' || c == '[')
        .map_or(name, |pos| &name[..pos]);
    cut.trim().to_string()
}

/// Upper-cased first letter with a leading article dropped, `#` when the
/// name does not start with a letter.
pub fn first_letter(name: &str) -> String {
    let trimmed = name.trim_start();
    let mut rest = trimmed;
    for article in ["The ", "A ", "An "] {
        let head = trimmed.get(..article.len()).unwrap_or_default();
        if trimmed.len() > article.len() && head.eq_ignore_ascii_case(article) {
            rest = trimmed[article.len()..].trim_start();
            break;
        }
    }
    match rest.chars().next() {
        Some(c) if c.is_alphabetic() => c.to_uppercase().collect(),
        _ => "#".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_name() {
        let info = parse_name("Legend of Zelda, The (USA, Europe) (En,Fr) (Rev 1) (Beta 2)");
        assert_eq!(info.clean_name, "Legend of Zelda, The");
        assert_eq!(info.regions, vec!["USA", "Europe"]);
        assert_eq!(info.languages, vec!["En", "Fr"]);
        assert_eq!(info.revision, Some(vec![1]));
        assert_eq!(info.categories, vec!["Beta"]);
    }

    #[test]
    fn test_revision_letters_and_versions() {
        assert_eq!(parse_name("Game (USA) (Rev A)").revision, Some(vec![1]));
        assert_eq!(parse_name("Game (USA) (Rev 1.1)").revision, Some(vec![1, 1]));
        assert_eq!(parse_name("Game (Japan) (v1.2)").revision, Some(vec![1, 2]));
        assert_eq!(parse_name("Game (Japan)").revision, None);
    }

    #[test]
    fn test_first_letter() {
        assert_eq!(first_letter("The Legend of Zelda"), "L");
        assert_eq!(first_letter("an example"), "E");
        assert_eq!(first_letter("Anticipation"), "A");
        assert_eq!(first_letter("1942"), "#");
        assert_eq!(first_letter(""), "#");
    }

    #[test]
    fn test_region_short() {
        assert_eq!(region_short("Europe"), "EU");
        assert_eq!(region_short("Atlantis"), "Atlantis");
    }
}
