//! Named symbol groups.
//!
//! `major` is built in. More groups come from the `[groups]` table of the
//! settings file and may also redefine `major`.

use crate::config::{ConfigError, Settings};
use crate::domain::ForexSymbol;
use std::collections::BTreeMap;

pub const MAJOR: &str = "major";

const MAJOR_PAIRS: [(&str, &str); 7] = [
    ("EUR", "USD"),
    ("GBP", "USD"),
    ("USD", "JPY"),
    ("USD", "CHF"),
    ("AUD", "USD"),
    ("USD", "CAD"),
    ("NZD", "USD"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolGroup {
    pub name: String,
    pub symbols: Vec<ForexSymbol>,
}

impl SymbolGroup {
    pub fn major() -> Self {
        let symbols = MAJOR_PAIRS
            .iter()
            .filter_map(|(base, quote)| ForexSymbol::new(base, quote).ok())
            .collect();
        Self {
            name: MAJOR.into(),
            symbols,
        }
    }

    /// Parse a group from its configured symbol strings (`EURUSD`, `XAU/USD`, ...).
    pub fn parse(name: &str, symbols: &[String]) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidGroup {
            group: name.to_string(),
            reason,
        };
        if symbols.is_empty() {
            return Err(invalid("no symbols".into()));
        }

        let mut parsed: Vec<ForexSymbol> = Vec::with_capacity(symbols.len());
        for raw in symbols {
            let symbol = raw
                .parse::<ForexSymbol>()
                .map_err(|e| invalid(format!("'{raw}': {e}")))?;
            if !parsed.contains(&symbol) {
                parsed.push(symbol);
            }
        }

        Ok(Self {
            name: name.to_string(),
            symbols: parsed,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Groups {
    groups: BTreeMap<String, SymbolGroup>,
}

impl Default for Groups {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(MAJOR.to_string(), SymbolGroup::major());
        Self { groups }
    }
}

impl Groups {
    /// Built-in groups plus the ones from `settings`, all validated.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut groups = Self::default();
        for (name, symbols) in &settings.groups {
            groups
                .groups
                .insert(name.clone(), SymbolGroup::parse(name, symbols)?);
        }
        Ok(groups)
    }

    pub fn get(&self, name: &str) -> Option<&SymbolGroup> {
        self.groups.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, name: &str) -> Result<Vec<ForexSymbol>, ConfigError> {
        self.get(name)
            .map(|g| g.symbols.clone())
            .ok_or_else(|| ConfigError::InvalidGroup {
                group: name.to_string(),
                reason: format!("unknown group (known: {})", self.names().join(", ")),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_group_has_seven_pairs() {
        let major = Groups::default().resolve(MAJOR).unwrap();
        let names: Vec<String> = major.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec!["EURUSD", "GBPUSD", "USDJPY", "USDCHF", "AUDUSD", "USDCAD", "NZDUSD"]
        );
    }

    #[test]
    fn config_groups_are_added() {
        let mut settings = Settings::default();
        settings
            .groups
            .insert("metals".into(), vec!["XAUUSD".into(), "XAG/USD".into(), "xau_usd".into()]);

        let groups = Groups::from_settings(&settings).unwrap();
        assert_eq!(groups.names(), vec!["major", "metals"]);
        let metals = groups.resolve("metals").unwrap();
        assert_eq!(metals.len(), 2);
        assert_eq!(metals[1].to_string(), "XAGUSD");
    }

    #[test]
    fn invalid_symbols_are_rejected_on_load() {
        let mut settings = Settings::default();
        settings.groups.insert("bad".into(), vec!["EURXYZ".into()]);
        let err = Groups::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGroup { ref group, .. } if group == "bad"));

        settings.groups.insert("bad".into(), Vec::new());
        assert!(Groups::from_settings(&settings).is_err());
    }

    #[test]
    fn unknown_group_lists_known_ones() {
        let err = Groups::default().resolve("exotic").unwrap_err();
        assert!(err.to_string().contains("known: major"), "{err}");
    }
}
