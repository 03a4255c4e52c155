//! Penalty table and resolution of a ROI's issue flags into a weight multiplier.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QflagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyEntry {
    /// Flag value assumed when a record does not carry the flag.
    #[serde(default)]
    pub value: bool,
    /// Share of the weight removed while the flag is set, in [0, 1].
    #[serde(alias = "penality_value")]
    pub penalty_value: f64,
}

/// Flag name (`iflag_*`) to penalty entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PenaltyTable {
    entries: BTreeMap<String, PenaltyEntry>,
}

impl PenaltyTable {
    pub fn new(entries: BTreeMap<String, PenaltyEntry>) -> Result<Self> {
        let table = Self { entries };
        table.validate()?;
        Ok(table)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let table: Self = serde_yaml::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading penalty table from {}", path.display());
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    fn validate(&self) -> Result<()> {
        for (name, entry) in &self.entries {
            if !(0.0..=1.0).contains(&entry.penalty_value) {
                return Err(QflagError::Validation(format!(
                    "penalty_value for '{name}' is {}, expected a value in [0, 1]",
                    entry.penalty_value
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, flag: &str) -> Option<&PenaltyEntry> {
        self.entries.get(flag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PenaltyEntry)> {
        self.entries.iter()
    }
}

/// How several active penalties combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyCombine {
    /// Multiply the remaining shares of every penalizing flag.
    #[default]
    Product,
    /// Keep only the harshest flag.
    Minimum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPenalty {
    /// Weight multiplier in [0, 1]; 1.0 means no penalty.
    pub multiplier: f64,
    /// Every flag that was set, including skipped and unpenalized ones.
    pub active_flags: Vec<String>,
}

pub struct PenaltyResolver<'a> {
    table: &'a PenaltyTable,
    skip_flags: &'a [String],
    combine: PenaltyCombine,
    weighting_enabled: bool,
}

impl<'a> PenaltyResolver<'a> {
    pub fn new(table: &'a PenaltyTable, skip_flags: &'a [String]) -> Self {
        Self {
            table,
            skip_flags,
            combine: PenaltyCombine::default(),
            weighting_enabled: true,
        }
    }

    pub fn with_combine(mut self, combine: PenaltyCombine) -> Self {
        self.combine = combine;
        self
    }

    /// With weighting disabled every penalty counts as zero. Active flags are
    /// still reported.
    pub fn with_weighting(mut self, enabled: bool) -> Self {
        self.weighting_enabled = enabled;
        self
    }

    /// `flags` is keyed by flag name without the ROI prefix.
    pub fn resolve(&self, flags: &BTreeMap<String, bool>) -> ResolvedPenalty {
        let mut active_flags = Vec::new();
        let mut factors = Vec::new();

        for (name, entry) in self.table.iter() {
            if !flags.contains_key(name) && entry.value {
                active_flags.push(name.clone());
                factors.push(self.factor(name, Some(entry)));
            }
        }
        for (name, &set) in flags {
            if set {
                active_flags.push(name.clone());
                factors.push(self.factor(name, self.table.get(name)));
            }
        }
        active_flags.sort();

        let multiplier: f64 = match self.combine {
            PenaltyCombine::Product => factors.iter().product(),
            PenaltyCombine::Minimum => factors.iter().copied().fold(1.0, f64::min),
        };

        ResolvedPenalty {
            multiplier,
            active_flags,
        }
    }

    fn factor(&self, name: &str, entry: Option<&PenaltyEntry>) -> f64 {
        if !self.weighting_enabled || self.skip_flags.iter().any(|s| s == name) {
            return 1.0;
        }
        match entry {
            Some(entry) => 1.0 - entry.penalty_value,
            None => {
                log::debug!("flag '{name}' has no penalty entry");
                1.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TABLE_YAML: &str = r#"
iflag_shadows:
  value: false
  penalty_value: 0.5
iflag_fog:
  value: false
  penalty_value: 0.2
iflag_disable_for_processing:
  value: false
  penalty_value: 1
iflag_sunny:
  value: false
  penality_value: 0.3
"#;

    fn flags(set: &[&str]) -> BTreeMap<String, bool> {
        let mut map: BTreeMap<String, bool> = ["iflag_shadows", "iflag_fog", "iflag_sunny"]
            .iter()
            .map(|f| (f.to_string(), false))
            .collect();
        for f in set {
            map.insert(f.to_string(), true);
        }
        map
    }

    fn table() -> PenaltyTable {
        PenaltyTable::from_yaml_str(TABLE_YAML).unwrap()
    }

    #[test]
    fn test_load_accepts_legacy_key() {
        let t = table();
        assert_eq!(t.len(), 4);
        assert_relative_eq!(t.get("iflag_sunny").unwrap().penalty_value, 0.3);
    }

    #[test]
    fn test_out_of_range_penalty_rejected() {
        let err = PenaltyTable::from_yaml_str("iflag_x:\n  value: false\n  penalty_value: 1.5\n");
        assert!(matches!(err, Err(QflagError::Validation(_))));
    }

    #[test]
    fn test_no_active_flags_means_no_penalty() {
        let t = table();
        let r = PenaltyResolver::new(&t, &[]).resolve(&flags(&[]));
        assert_relative_eq!(r.multiplier, 1.0);
        assert!(r.active_flags.is_empty());
    }

    #[test]
    fn test_product_and_minimum() {
        let t = table();
        let set = flags(&["iflag_shadows", "iflag_fog"]);

        let product = PenaltyResolver::new(&t, &[]).resolve(&set);
        assert_relative_eq!(product.multiplier, 0.5 * 0.8);

        let minimum = PenaltyResolver::new(&t, &[])
            .with_combine(PenaltyCombine::Minimum)
            .resolve(&set);
        assert_relative_eq!(minimum.multiplier, 0.5);
        assert_eq!(minimum.active_flags, vec!["iflag_fog", "iflag_shadows"]);
    }

    #[test]
    fn test_skipped_flags_do_not_penalize() {
        let t = table();
        let skip = vec!["iflag_sunny".to_string()];
        let r = PenaltyResolver::new(&t, &skip).resolve(&flags(&["iflag_sunny"]));
        assert_relative_eq!(r.multiplier, 1.0);
        assert_eq!(r.active_flags, vec!["iflag_sunny"]);
    }

    #[test]
    fn test_disabled_weighting_keeps_audit_trail() {
        let t = table();
        let mut set = flags(&["iflag_shadows"]);
        set.insert("iflag_disable_for_processing".into(), true);
        let r = PenaltyResolver::new(&t, &[]).with_weighting(false).resolve(&set);
        assert_relative_eq!(r.multiplier, 1.0);
        assert_eq!(r.active_flags.len(), 2);

        let r = PenaltyResolver::new(&t, &[]).resolve(&set);
        assert_relative_eq!(r.multiplier, 0.0);
    }

    #[test]
    fn test_missing_flag_takes_table_default() {
        let mut entries = BTreeMap::new();
        entries.insert(
            "iflag_lens_water_drops".to_string(),
            PenaltyEntry {
                value: true,
                penalty_value: 0.25,
            },
        );
        let t = PenaltyTable::new(entries).unwrap();
        let r = PenaltyResolver::new(&t, &[]).resolve(&BTreeMap::new());
        assert_relative_eq!(r.multiplier, 0.75);
        assert_eq!(r.active_flags, vec!["iflag_lens_water_drops"]);
    }

    #[test]
    fn test_unknown_flag_is_recorded_without_penalty() {
        let t = table();
        let mut set = BTreeMap::new();
        set.insert("iflag_new_issue".to_string(), true);
        let r = PenaltyResolver::new(&t, &[]).resolve(&set);
        assert_relative_eq!(r.multiplier, 1.0);
        assert_eq!(r.active_flags, vec!["iflag_new_issue"]);
    }
}
