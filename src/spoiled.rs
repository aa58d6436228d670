//! Spoiled reference handling
//!
//! A reference is "spoiled" when its processing ended in an invalid
//! `CrawlState`. The strategizer maps each invalid state to what should
//! happen to the previously committed document.

use crate::state::CrawlState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What to do with a reference that ended in an invalid state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpoiledReferenceStrategy {
    /// Leave the committed document alone
    Ignore,

    /// Remove the committed document
    Delete,

    /// Keep it this time; delete if it is still spoiled on the next run
    GraceOnce,
}

impl SpoiledReferenceStrategy {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            SpoiledReferenceStrategy::Ignore => "ignore",
            SpoiledReferenceStrategy::Delete => "delete",
            SpoiledReferenceStrategy::GraceOnce => "grace-once",
        }
    }
}

impl fmt::Display for SpoiledReferenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Resolves the strategy to apply for an invalid crawl state
///
/// States without an explicit mapping use the fallback strategy, which is
/// `GraceOnce` unless set otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StrategizerDef", into = "StrategizerDef")]
pub struct SpoiledReferenceStrategizer {
    mappings: BTreeMap<CrawlState, SpoiledReferenceStrategy>,
    fallback: SpoiledReferenceStrategy,
}

impl Default for SpoiledReferenceStrategizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpoiledReferenceStrategizer {
    /// Creates a strategizer with no mappings and a `GraceOnce` fallback
    pub fn new() -> Self {
        Self {
            mappings: BTreeMap::new(),
            fallback: SpoiledReferenceStrategy::GraceOnce,
        }
    }

    /// Creates the strategizer used when nothing is configured
    ///
    /// Missing documents are deleted right away; bad statuses and errors get
    /// one run of grace.
    pub fn with_standard_mappings() -> Self {
        let mut strategizer = Self::new();
        strategizer
            .add_mapping(CrawlState::NotFound, SpoiledReferenceStrategy::Delete)
            .add_mapping(CrawlState::BadStatus, SpoiledReferenceStrategy::GraceOnce)
            .add_mapping(CrawlState::Error, SpoiledReferenceStrategy::GraceOnce);
        strategizer
    }

    /// Maps `state` to `strategy`, replacing any earlier mapping
    pub fn add_mapping(
        &mut self,
        state: CrawlState,
        strategy: SpoiledReferenceStrategy,
    ) -> &mut Self {
        self.mappings.insert(state, strategy);
        self
    }

    pub fn set_fallback_strategy(&mut self, strategy: SpoiledReferenceStrategy) -> &mut Self {
        self.fallback = strategy;
        self
    }

    pub fn fallback_strategy(&self) -> SpoiledReferenceStrategy {
        self.fallback
    }

    pub fn mappings(&self) -> &BTreeMap<CrawlState, SpoiledReferenceStrategy> {
        &self.mappings
    }

    /// Gets the strategy for `state`
    pub fn strategy_for(&self, state: CrawlState) -> SpoiledReferenceStrategy {
        self.mappings.get(&state).copied().unwrap_or(self.fallback)
    }
}

/// Serialized form: `{ fallback = "...", mapping = [{ state, strategy }] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StrategizerDef {
    #[serde(default = "default_fallback")]
    fallback: SpoiledReferenceStrategy,

    #[serde(default)]
    mapping: Vec<StrategyMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StrategyMapping {
    state: CrawlState,
    strategy: SpoiledReferenceStrategy,
}

fn default_fallback() -> SpoiledReferenceStrategy {
    SpoiledReferenceStrategy::GraceOnce
}

impl From<StrategizerDef> for SpoiledReferenceStrategizer {
    fn from(def: StrategizerDef) -> Self {
        let mut strategizer = Self::new();
        strategizer.set_fallback_strategy(def.fallback);
        for entry in def.mapping {
            strategizer.add_mapping(entry.state, entry.strategy);
        }
        strategizer
    }
}

impl From<SpoiledReferenceStrategizer> for StrategizerDef {
    fn from(strategizer: SpoiledReferenceStrategizer) -> Self {
        Self {
            fallback: strategizer.fallback,
            mapping: strategizer
                .mappings
                .into_iter()
                .map(|(state, strategy)| StrategyMapping { state, strategy })
                .collect(),
        }
    }
}
