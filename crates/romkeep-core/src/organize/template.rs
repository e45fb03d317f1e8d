//! Path templates: `{Placeholder}` tokens rendered from a [`TemplateContext`].

use super::context::TemplateContext;
use crate::config::OrganizeConfig;
use crate::error::{Error, Result};
use crate::storage::models::OrganizationTemplate;
use crate::storage::Database;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"\{([^{}]*)\}").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    System,
    SystemShort,
    Region,
    RegionShort,
    Languages,
    Name,
    CleanName,
    FirstLetter,
    Year,
    Publisher,
    Extension,
    Parent,
    Category,
    CatalogName,
    Provider,
    Crc,
    RomName,
    FileName,
}

impl Placeholder {
    pub const ALL: [Placeholder; 18] = [
        Placeholder::System,
        Placeholder::SystemShort,
        Placeholder::Region,
        Placeholder::RegionShort,
        Placeholder::Languages,
        Placeholder::Name,
        Placeholder::CleanName,
        Placeholder::FirstLetter,
        Placeholder::Year,
        Placeholder::Publisher,
        Placeholder::Extension,
        Placeholder::Parent,
        Placeholder::Category,
        Placeholder::CatalogName,
        Placeholder::Provider,
        Placeholder::Crc,
        Placeholder::RomName,
        Placeholder::FileName,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Placeholder::System => "System",
            Placeholder::SystemShort => "SystemShort",
            Placeholder::Region => "Region",
            Placeholder::RegionShort => "RegionShort",
            Placeholder::Languages => "Languages",
            Placeholder::Name => "Name",
            Placeholder::CleanName => "CleanName",
            Placeholder::FirstLetter => "FirstLetter",
            Placeholder::Year => "Year",
            Placeholder::Publisher => "Publisher",
            Placeholder::Extension => "Extension",
            Placeholder::Parent => "Parent",
            Placeholder::Category => "Category",
            Placeholder::CatalogName => "CatalogName",
            Placeholder::Provider => "Provider",
            Placeholder::Crc => "Crc",
            Placeholder::RomName => "RomName",
            Placeholder::FileName => "FileName",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.as_str())
    }
}

impl FromStr for Placeholder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Placeholder::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::validation(format!("unknown placeholder '{{{}}}'", s)))
    }
}

/// Remove characters no file system accepts in a single name, then trim
/// surrounding spaces and trailing dots.
pub fn sanitize_segment(segment: &str) -> String {
    let stripped: String = segment
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') && !c.is_control())
        .collect();
    stripped
        .trim()
        .trim_end_matches(|c: char| c == '.' || c == ' ')
        .to_string()
}

/// Replace every token with its value and sanitize each path segment.
///
/// `/` and `\` in the pattern separate folders; separators inside a value do
/// not. Unknown tokens and missing values render as empty, and segments that
/// end up empty are dropped.
pub fn render(pattern: &str, context: &TemplateContext) -> String {
    pattern
        .split(['/', '\\'])
        .map(|segment| {
            let filled = TOKEN.replace_all(segment, |caps: &regex::Captures| {
                caps[1]
                    .parse::<Placeholder>()
                    .ok()
                    .and_then(|p| context.value(p))
                    .unwrap_or_default()
            });
            sanitize_segment(&filled)
        })
        .filter(|segment| !segment.is_empty() && segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateValidation {
    pub unknown_placeholders: Vec<String>,
    /// Unbalanced or nested braces, with their byte offset.
    pub brace_errors: Vec<String>,
}

impl TemplateValidation {
    pub fn is_valid(&self) -> bool {
        self.unknown_placeholders.is_empty() && self.brace_errors.is_empty()
    }

    pub fn problems(&self) -> Vec<String> {
        self.unknown_placeholders
            .iter()
            .map(|p| format!("unknown placeholder {{{}}}", p))
            .chain(self.brace_errors.iter().cloned())
            .collect()
    }
}

/// Report problems in a pattern without failing.
pub fn validate(pattern: &str) -> TemplateValidation {
    let mut result = TemplateValidation::default();

    let mut open: Option<usize> = None;
    for (pos, c) in pattern.char_indices() {
        match c {
            '{' => {
                if let Some(start) = open {
                    result
                        .brace_errors
                        .push(format!("nested '{{' at {} inside token opened at {}", pos, start));
                }
                open = Some(pos);
            }
            '}' => {
                if open.take().is_none() {
                    result.brace_errors.push(format!("unmatched '}}' at {}", pos));
                }
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        result.brace_errors.push(format!("unclosed '{{' at {}", start));
    }

    for caps in TOKEN.captures_iter(pattern) {
        let name = caps[1].to_string();
        if name.parse::<Placeholder>().is_err() && !result.unknown_placeholders.contains(&name) {
            result.unknown_placeholders.push(name);
        }
    }
    result
}

/// Both patterns of a template, folder first.
pub fn validate_template(template: &OrganizationTemplate) -> TemplateValidation {
    let folder = validate(&template.folder_pattern);
    let file = validate(&template.file_pattern);
    let mut merged = folder;
    for name in file.unknown_placeholders {
        if !merged.unknown_placeholders.contains(&name) {
            merged.unknown_placeholders.push(name);
        }
    }
    merged.brace_errors.extend(file.brace_errors);
    merged
}

fn builtin(name: &str, folder: &str, file: &str, use_1g1r: bool) -> OrganizationTemplate {
    let defaults = OrganizeConfig::default();
    OrganizationTemplate {
        id: 0,
        name: name.to_string(),
        folder_pattern: folder.to_string(),
        file_pattern: file.to_string(),
        use_1g1r,
        region_priority: defaults.region_priority,
        language_priority: defaults.language_priority,
        exclude_categories: defaults.exclude_categories,
        is_builtin: true,
    }
}

pub fn builtin_templates() -> Vec<OrganizationTemplate> {
    vec![
        builtin("Default", "{System}", "{Name}.{Extension}", false),
        builtin("By Region", "{System}/{Region}", "{Name}.{Extension}", false),
        builtin("Alphabetical", "{System}/{FirstLetter}", "{Name}.{Extension}", false),
        builtin("One Game One ROM", "{System} (1G1R)", "{CleanName} ({RegionShort}).{Extension}", true),
        builtin("Flat", "", "{Name}.{Extension}", false),
    ]
}

pub fn is_builtin_name(name: &str) -> bool {
    builtin_templates().iter().any(|t| t.name.eq_ignore_ascii_case(name))
}

/// Built-in and user templates. Built-ins live in code and cannot be
/// changed or removed.
pub struct TemplateStore {
    db: Arc<Database>,
}

impl TemplateStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn list(&self) -> Result<Vec<OrganizationTemplate>> {
        let mut templates = builtin_templates();
        templates.extend(self.db.list_templates()?);
        Ok(templates)
    }

    pub fn get(&self, name: &str) -> Result<OrganizationTemplate> {
        if let Some(template) = builtin_templates()
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
        {
            return Ok(template);
        }
        self.db
            .get_template_by_name(name)?
            .ok_or_else(|| Error::not_found(format!("template '{}'", name)))
    }

    fn check(&self, template: &OrganizationTemplate) -> Result<()> {
        if template.name.trim().is_empty() {
            return Err(Error::validation("template name is empty"));
        }
        if template.file_pattern.trim().is_empty() {
            return Err(Error::validation("file pattern is empty"));
        }
        let validation = validate_template(template);
        if !validation.is_valid() {
            return Err(Error::validation(format!(
                "template '{}': {}",
                template.name,
                validation.problems().join("; ")
            )));
        }
        Ok(())
    }

    pub fn add(&self, template: &OrganizationTemplate) -> Result<OrganizationTemplate> {
        self.check(template)?;
        if is_builtin_name(&template.name) || self.db.get_template_by_name(&template.name)?.is_some() {
            return Err(Error::conflict(format!("template '{}' already exists", template.name)));
        }
        let mut stored = template.clone();
        stored.is_builtin = false;
        stored.id = self.db.insert_template(&stored)?;
        info!("Added template '{}'", stored.name);
        Ok(stored)
    }

    pub fn update(&self, template: &OrganizationTemplate) -> Result<OrganizationTemplate> {
        if template.is_builtin || is_builtin_name(&template.name) {
            return Err(Error::conflict(format!(
                "built-in template '{}' cannot be changed",
                template.name
            )));
        }
        self.check(template)?;
        if !self.db.update_template(template)? {
            return Err(Error::not_found(format!("template {}", template.id)));
        }
        self.get(&template.name)
    }

    pub fn remove(&self, name: &str) -> Result<OrganizationTemplate> {
        if is_builtin_name(name) {
            return Err(Error::conflict(format!("built-in template '{}' cannot be removed", name)));
        }
        let template = self.get(name)?;
        self.db.delete_template(template.id)?;
        info!("Removed template '{}'", name);
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_every_placeholder() {
        let pattern = Placeholder::ALL
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("/");
        let rendered = render(&pattern, &TemplateContext::sample());
        assert!(!rendered.contains('{') && !rendered.contains('}'), "{}", rendered);
        for segment in rendered.split('/') {
            assert!(!segment.is_empty());
            assert_eq!(sanitize_segment(segment), segment);
        }
    }

    #[test]
    fn test_render_sanitizes_values() {
        let mut context = TemplateContext::default();
        context.name = Some("What? A: Game / Part 2...".to_string());
        context.extension = Some("nes".to_string());
        assert_eq!(render("{Name}.{Extension}", &context), "What A Game  Part 2....nes");
        assert_eq!(render("x/{Name}", &context), "x/What A Game  Part 2");
    }

    #[test]
    fn test_missing_values_and_unknown_tokens_render_empty() {
        let mut context = TemplateContext::default();
        context.name = Some("Zelda".to_string());
        assert_eq!(render("{Year}/{Bogus}/{Name}", &context), "Zelda");
        assert_eq!(render("{Publisher} - {Name}", &context), "- Zelda");
    }

    #[test]
    fn test_validate_reports_without_failing() {
        assert!(validate("{System}/{Name}.{Extension}").is_valid());

        let v = validate("{System}/{Nmae}/{Name");
        assert_eq!(v.unknown_placeholders, vec!["Nmae"]);
        assert_eq!(v.brace_errors.len(), 1);

        let v = validate("Name}");
        assert_eq!(v.brace_errors, vec!["unmatched '}' at 4"]);
        assert!(!validate("{{Name}}").is_valid());
    }

    #[test]
    fn test_builtins_are_valid() {
        let builtins = builtin_templates();
        assert_eq!(builtins.len(), 5);
        for template in &builtins {
            assert!(validate_template(template).is_valid(), "{}", template.name);
        }
        assert!(is_builtin_name("flat"));
    }

    #[test]
    fn test_store_protects_builtins() {
        let store = TemplateStore::new(Arc::new(Database::open_in_memory().unwrap()));
        assert!(matches!(store.remove("Default"), Err(Error::Conflict(_))));
        let mut flat = store.get("Flat").unwrap();
        flat.folder_pattern = "x".into();
        assert!(matches!(store.update(&flat), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_store_crud() {
        let store = TemplateStore::new(Arc::new(Database::open_in_memory().unwrap()));
        let mut mine = builtin("Mine", "{Provider}/{System}", "{RomName}", false);
        mine.is_builtin = false;
        let added = store.add(&mine).unwrap();
        assert!(added.id > 0);
        assert!(matches!(store.add(&mine), Err(Error::Conflict(_))));
        assert_eq!(store.list().unwrap().len(), 6);

        let mut changed = added.clone();
        changed.folder_pattern = "{CatalogName}".into();
        assert_eq!(store.update(&changed).unwrap().folder_pattern, "{CatalogName}");

        let mut broken = added.clone();
        broken.file_pattern = "{Nope}".into();
        assert!(matches!(store.update(&broken), Err(Error::Validation(_))));

        store.remove("Mine").unwrap();
        assert!(store.get("Mine").unwrap_err().is_not_found());
    }
}
