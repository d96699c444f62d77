//! Item Feature Builder
//!
//! Derives categorical feature tokens from raw item metadata: one token per
//! genre, a release decade bin and a popularity band.

use crate::error::{RecommenderError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const POPULARITY_HIGH_THRESHOLD: f64 = 75.0;
const POPULARITY_MID_THRESHOLD: f64 = 25.0;

/// Raw item metadata record as supplied with a training request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(rename = "itemId")]
    pub item_id: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
}

impl ItemMetadata {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            genres: Vec::new(),
            release_date: None,
            popularity: None,
        }
    }

    pub fn with_genres<I, S>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genres = genres.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_release_date(mut self, release_date: impl Into<String>) -> Self {
        self.release_date = Some(release_date.into());
        self
    }

    pub fn with_popularity(mut self, popularity: f64) -> Self {
        self.popularity = Some(popularity);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PopularityBand {
    High,
    Mid,
    Low,
}

impl PopularityBand {
    pub fn from_score(popularity: f64) -> Self {
        if popularity > POPULARITY_HIGH_THRESHOLD {
            PopularityBand::High
        } else if popularity > POPULARITY_MID_THRESHOLD {
            PopularityBand::Mid
        } else {
            PopularityBand::Low
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            PopularityBand::High => "high",
            PopularityBand::Mid => "mid",
            PopularityBand::Low => "low",
        }
    }
}

/// Categorical tag attached to an item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureToken {
    Genre(String),
    /// First year of the decade, e.g. 1990
    Decade(i64),
    Popularity(PopularityBand),
}

impl fmt::Display for FeatureToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureToken::Genre(genre) => write!(f, "genre_{}", genre),
            FeatureToken::Decade(decade) => write!(f, "decade_{}s", decade),
            FeatureToken::Popularity(band) => write!(f, "popularity_{}", band.as_str()),
        }
    }
}

/// An item paired with the tokens derived from its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFeatureSet {
    pub item_id: String,
    pub tokens: Vec<FeatureToken>,
}

impl ItemFeatureSet {
    pub fn token_strings(&self) -> Vec<String> {
        self.tokens.iter().map(ToString::to_string).collect()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t.to_string() == token)
    }
}

pub struct FeatureBuilder;

impl FeatureBuilder {
    /// Build the token set of every item, in input order
    pub fn build(items: &[ItemMetadata]) -> Result<Vec<ItemFeatureSet>> {
        items.iter().map(Self::build_item).collect()
    }

    pub fn build_item(item: &ItemMetadata) -> Result<ItemFeatureSet> {
        let mut tokens: Vec<FeatureToken> = item
            .genres
            .iter()
            .map(|g| FeatureToken::Genre(g.clone()))
            .collect();

        if let Some(decade) = Self::decade(item)? {
            tokens.push(FeatureToken::Decade(decade));
        }

        let popularity = item.popularity.unwrap_or(0.0);
        tokens.push(FeatureToken::Popularity(PopularityBand::from_score(
            popularity,
        )));

        Ok(ItemFeatureSet {
            item_id: item.item_id.clone(),
            tokens,
        })
    }

    /// Decade bin of the release year; `None` when no release date is given
    fn decade(item: &ItemMetadata) -> Result<Option<i64>> {
        let release_date = match item.release_date.as_deref().map(str::trim) {
            Some(date) if !date.is_empty() => date,
            _ => return Ok(None),
        };

        let year_part = release_date.split('-').next().unwrap_or_default().trim();
        let year: i64 = year_part
            .parse()
            .map_err(|_| RecommenderError::FeatureBuild {
                item_id: item.item_id.clone(),
                value: release_date.to_string(),
            })?;

        Ok(Some(year.div_euclid(10) * 10))
    }
}
