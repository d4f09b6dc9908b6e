use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::constants::{DEFAULT_THEME, FINAL_LEVEL, FIRST_LEVEL};
use crate::perks::PerkKind;

const BUNDLED_CONTENT: &str = include_str!("../assets/content.json");

const THEME_ORDER: [&str; 5] = ["General SaaS", "MedTech", "Web3", "FinTech", "ClimateTech"];

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Level {0} persona is missing")]
    MissingLevel(u8),
    #[error("No startup themes defined")]
    NoThemes,
}

/// The investor a level is played against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub level: u8,
    pub title: String,
    pub role: String,
    pub style: String,
    pub win_condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct PersonaNoLevel {
    title: String,
    role: String,
    style: String,
    win_condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub description: String,
    pub focus_areas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct ThemeNoName {
    description: String,
    #[serde(default)]
    focus_areas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerkInfo {
    pub kind: PerkKind,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct PerkNoKind {
    name: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    levels: HashMap<String, PersonaNoLevel>,
    themes: HashMap<String, ThemeNoName>,
    #[serde(default)]
    perks: HashMap<String, PerkNoKind>,
}

/// Static game content: level personas, startup themes, perk catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameContent {
    personas: Vec<Persona>,
    themes: Vec<Theme>,
    perks: Vec<PerkInfo>,
}

impl GameContent {
    /// Load content from a JSON document.
    ///
    /// Themes keep the canonical order; unknown theme names follow alphabetically.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, a level is missing, or no
    /// themes are defined.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        let raw: RawContent = serde_json::from_str(json)?;

        let mut personas = Vec::with_capacity(usize::from(FINAL_LEVEL));
        for level in FIRST_LEVEL..=FINAL_LEVEL {
            let p = raw
                .levels
                .get(&level.to_string())
                .ok_or(ContentError::MissingLevel(level))?;
            personas.push(Persona {
                level,
                title: p.title.clone(),
                role: p.role.clone(),
                style: p.style.clone(),
                win_condition: p.win_condition.clone(),
            });
        }

        let mut names: Vec<&String> = raw.themes.keys().collect();
        names.sort_by_key(|name| {
            (
                THEME_ORDER
                    .iter()
                    .position(|known| *known == name.as_str())
                    .unwrap_or(THEME_ORDER.len()),
                (*name).clone(),
            )
        });
        let themes: Vec<Theme> = names
            .into_iter()
            .filter_map(|name| {
                raw.themes.get(name).map(|t| Theme {
                    name: name.clone(),
                    description: t.description.clone(),
                    focus_areas: t.focus_areas.clone(),
                })
            })
            .collect();
        if themes.is_empty() {
            return Err(ContentError::NoThemes);
        }

        let perks = PerkKind::ALL
            .into_iter()
            .map(|kind| {
                raw.perks.get(kind.as_str()).map_or_else(
                    || PerkInfo {
                        kind,
                        name: kind.as_str().to_string(),
                        description: String::new(),
                    },
                    |p| PerkInfo {
                        kind,
                        name: p.name.clone(),
                        description: p.description.clone(),
                    },
                )
            })
            .collect();

        Ok(Self {
            personas,
            themes,
            perks,
        })
    }

    /// Content shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns an error only if the bundled asset is corrupt.
    pub fn bundled() -> Result<Self, ContentError> {
        Self::from_json(BUNDLED_CONTENT)
    }

    #[must_use]
    pub fn persona(&self, level: u8) -> Option<&Persona> {
        self.personas.iter().find(|p| p.level == level)
    }

    #[must_use]
    pub fn theme(&self, name: &str) -> Option<&Theme> {
        self.themes.iter().find(|t| t.name == name)
    }

    /// Theme by name, falling back to the default and then the first theme.
    #[must_use]
    pub fn theme_or_default(&self, name: &str) -> &Theme {
        self.theme(name)
            .or_else(|| self.theme(DEFAULT_THEME))
            .unwrap_or(&self.themes[0])
    }

    #[must_use]
    pub fn perk(&self, kind: PerkKind) -> Option<&PerkInfo> {
        self.perks.iter().find(|p| p.kind == kind)
    }

    pub fn personas(&self) -> std::slice::Iter<'_, Persona> {
        self.personas.iter()
    }

    pub fn themes(&self) -> std::slice::Iter<'_, Theme> {
        self.themes.iter()
    }

    pub fn perks(&self) -> std::slice::Iter<'_, PerkInfo> {
        self.perks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_content_has_five_levels_and_themes() {
        let content = GameContent::bundled().unwrap();
        assert_eq!(content.personas().count(), 5);
        assert_eq!(content.themes().count(), 5);
        let ids: Vec<_> = content.themes().map(|t| t.name.as_str()).collect();
        assert_eq!(ids, THEME_ORDER.to_vec());
        assert!(content.persona(3).unwrap().title.contains("Penny Pincher"));
        assert_eq!(
            content.perk(PerkKind::TechShield).unwrap().name,
            "Technical Cofounder Shield"
        );
    }

    #[test]
    fn missing_level_is_rejected() {
        let json = r#"{
            "levels": {
                "1": {"title": "t", "role": "r", "style": "s", "win_condition": "w"}
            },
            "themes": {"General SaaS": {"description": "d"}}
        }"#;
        let err = GameContent::from_json(json).unwrap_err();
        assert!(matches!(err, ContentError::MissingLevel(2)));
    }

    #[test]
    fn unknown_theme_falls_back_to_default() {
        let content = GameContent::bundled().unwrap();
        assert_eq!(content.theme_or_default("Space Mining").name, "General SaaS");
        assert_eq!(content.theme_or_default("Web3").name, "Web3");
    }

    #[test]
    fn perks_default_when_catalogue_is_absent() {
        let mut levels = String::new();
        for level in 1..=5 {
            if level > 1 {
                levels.push(',');
            }
            levels.push_str(&format!(
                r#""{level}": {{"title": "t", "role": "r", "style": "s", "win_condition": "w"}}"#
            ));
        }
        let json = format!(
            r#"{{"levels": {{{levels}}}, "themes": {{"Zeta": {{"description": "z"}}, "Alpha": {{"description": "a"}}}}}}"#
        );
        let content = GameContent::from_json(&json).unwrap();
        assert_eq!(content.perk(PerkKind::Charisma).unwrap().name, "charisma");
        let names: Vec<_> = content.themes().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
        assert_eq!(content.theme_or_default("nope").name, "Alpha");
    }
}
