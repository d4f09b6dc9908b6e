//! Perks and the damage resolver layered over the model's raw judgment.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

use crate::constants::{CHARISMA_MULTIPLIER, NEUTRAL_MULTIPLIER};
use crate::numbers::trunc_f64_to_i32;

const SHIELD_NAME: &str = "Technical Cofounder Shield";
const CHARISMA_NAME: &str = "Charisma Buff";

/// Progression perk offered between levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PerkKind {
    #[serde(rename = "charisma")]
    Charisma,
    #[serde(rename = "tech_shield")]
    TechShield,
    #[default]
    #[serde(rename = "none")]
    NoPerk,
}

impl PerkKind {
    pub const ALL: [Self; 3] = [Self::Charisma, Self::TechShield, Self::NoPerk];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Charisma => "charisma",
            Self::TechShield => "tech_shield",
            Self::NoPerk => "none",
        }
    }
}

impl fmt::Display for PerkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerkKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "charisma" => Ok(Self::Charisma),
            "tech_shield" | "shield" => Ok(Self::TechShield),
            "none" | "no_perk" => Ok(Self::NoPerk),
            _ => Err(()),
        }
    }
}

/// One perk selection recorded for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerkPick {
    pub level: u8,
    pub perk_key: PerkKind,
    pub perk_name: String,
}

/// Perk effects waiting to be consumed by the next resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivePerks {
    #[serde(rename = "next_round_damage_multiplier", default = "neutral_multiplier")]
    pub damage_multiplier: f32,
    #[serde(default)]
    pub shield_charges: u32,
}

const fn neutral_multiplier() -> f32 {
    NEUTRAL_MULTIPLIER
}

impl Default for ActivePerks {
    fn default() -> Self {
        Self {
            damage_multiplier: NEUTRAL_MULTIPLIER,
            shield_charges: 0,
        }
    }
}

/// Outcome of running the resolver over one turn's raw damage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub raw_damage: i32,
    pub effective_damage: i32,
    pub notes: SmallVec<[String; 2]>,
}

impl ActivePerks {
    /// Apply a freshly chosen perk.
    pub fn grant(&mut self, perk: PerkKind) {
        match perk {
            PerkKind::Charisma => self.damage_multiplier = CHARISMA_MULTIPLIER,
            PerkKind::TechShield => self.shield_charges = self.shield_charges.saturating_add(1),
            PerkKind::NoPerk => {}
        }
    }

    #[must_use]
    pub fn multiplier_armed(&self) -> bool {
        self.damage_multiplier < NEUTRAL_MULTIPLIER
    }

    /// Clamp values read from an untrusted source back into range.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let damage_multiplier = if self.damage_multiplier.is_finite() {
            self.damage_multiplier.clamp(0.0, NEUTRAL_MULTIPLIER)
        } else {
            NEUTRAL_MULTIPLIER
        };
        Self {
            damage_multiplier,
            shield_charges: self.shield_charges,
        }
    }

    /// Resolve one turn of damage against the active perks.
    ///
    /// Positive damage is floored to zero. A shield charge absorbs one
    /// negative-damage event. An armed multiplier is always consumed, scaling
    /// any remaining damage toward zero without rounding it away entirely.
    pub fn resolve(&mut self, raw_damage: i32) -> Resolution {
        let base = raw_damage.min(0);
        let mut effective = base;
        let mut notes = SmallVec::new();

        if effective < 0 && self.shield_charges > 0 {
            self.shield_charges -= 1;
            effective = 0;
            notes.push(format!("{SHIELD_NAME} blocked all damage this turn."));
        }

        if self.multiplier_armed() {
            let multiplier = self.damage_multiplier;
            self.damage_multiplier = NEUTRAL_MULTIPLIER;

            if effective < 0 {
                let mut reduced = trunc_f64_to_i32(f64::from(effective) * f64::from(multiplier));
                if reduced == 0 {
                    reduced = -1;
                }
                notes.push(format!(
                    "{CHARISMA_NAME} reduced damage from {} to {}.",
                    effective.unsigned_abs(),
                    reduced.unsigned_abs()
                ));
                effective = reduced;
            } else {
                notes.push(format!(
                    "{CHARISMA_NAME} was consumed this round (no incoming damage)."
                ));
            }
        }

        Resolution {
            raw_damage: base,
            effective_damage: effective,
            notes,
        }
    }

    /// Human-readable lines describing armed perks.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.shield_charges > 0 {
            lines.push(format!("{SHIELD_NAME}: {} charge(s)", self.shield_charges));
        }
        if self.multiplier_armed() {
            lines.push(format!("{CHARISMA_NAME}: active for next round"));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_perks_pass_damage_through() {
        let mut perks = ActivePerks::default();
        let res = perks.resolve(-20);
        assert_eq!(res.effective_damage, -20);
        assert!(res.notes.is_empty());
    }

    #[test]
    fn positive_damage_is_floored() {
        let mut perks = ActivePerks::default();
        let res = perks.resolve(15);
        assert_eq!(res.raw_damage, 0);
        assert_eq!(res.effective_damage, 0);
    }

    #[test]
    fn shield_blocks_once_and_is_consumed() {
        let mut perks = ActivePerks {
            shield_charges: 1,
            ..ActivePerks::default()
        };
        let first = perks.resolve(-10);
        assert_eq!(first.effective_damage, 0);
        assert_eq!(first.notes.len(), 1);
        assert_eq!(perks.shield_charges, 0);

        let second = perks.resolve(-10);
        assert_eq!(second.effective_damage, -10);
    }

    #[test]
    fn shield_survives_a_harmless_turn() {
        let mut perks = ActivePerks {
            shield_charges: 1,
            ..ActivePerks::default()
        };
        let res = perks.resolve(0);
        assert_eq!(res.effective_damage, 0);
        assert!(res.notes.is_empty());
        assert_eq!(perks.shield_charges, 1);
    }

    #[test]
    fn multiplier_halves_and_is_consumed() {
        let mut perks = ActivePerks::default();
        perks.grant(PerkKind::Charisma);
        let res = perks.resolve(-20);
        assert_eq!(res.effective_damage, -10);
        assert!(res.notes[0].contains("from 20 to 10"));
        assert!(!perks.multiplier_armed());
    }

    #[test]
    fn multiplier_never_rounds_damage_away() {
        let mut perks = ActivePerks {
            damage_multiplier: 0.01,
            ..ActivePerks::default()
        };
        let res = perks.resolve(-10);
        assert_eq!(res.effective_damage, -1);
    }

    #[test]
    fn multiplier_consumed_without_damage() {
        let mut perks = ActivePerks::default();
        perks.grant(PerkKind::Charisma);
        let res = perks.resolve(0);
        assert_eq!(res.effective_damage, 0);
        assert!(res.notes[0].contains("consumed"));
        assert!(!perks.multiplier_armed());
    }

    #[test]
    fn shield_and_multiplier_stack_in_order() {
        let mut perks = ActivePerks::default();
        perks.grant(PerkKind::TechShield);
        perks.grant(PerkKind::Charisma);
        let res = perks.resolve(-20);
        assert_eq!(res.effective_damage, 0);
        assert_eq!(res.notes.len(), 2);
        assert_eq!(perks.shield_charges, 0);
        assert!(!perks.multiplier_armed());
    }

    #[test]
    fn sanitize_recovers_bad_multipliers() {
        let perks = ActivePerks {
            damage_multiplier: f32::NAN,
            shield_charges: 2,
        }
        .sanitized();
        assert!((perks.damage_multiplier - 1.0).abs() < f32::EPSILON);
        let perks = ActivePerks {
            damage_multiplier: -3.0,
            shield_charges: 0,
        }
        .sanitized();
        assert!(perks.damage_multiplier.abs() < f32::EPSILON);
    }

    #[test]
    fn perk_kind_parses_and_displays() {
        assert_eq!("tech_shield".parse::<PerkKind>(), Ok(PerkKind::TechShield));
        assert_eq!("NONE".parse::<PerkKind>(), Ok(PerkKind::NoPerk));
        assert!("laser".parse::<PerkKind>().is_err());
        assert_eq!(PerkKind::Charisma.to_string(), "charisma");
    }
}
