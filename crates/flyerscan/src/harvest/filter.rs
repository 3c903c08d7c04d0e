use std::collections::HashSet;

use regex::Regex;

use crate::config::HarvestConfig;
use crate::error::ConfigError;
use crate::model::ImageRef;

/// Keeps only CDN-hosted content images, deduplicated and capped.
#[derive(Debug, Clone)]
pub struct ImageFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    max_images: usize,
}

fn compile(field: &'static str, patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::InvalidPattern {
                field,
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl ImageFilter {
    pub fn new(
        include: &[String],
        exclude: &[String],
        max_images: usize,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            include: compile("harvest.includePatterns", include)?,
            exclude: compile("harvest.excludePatterns", exclude)?,
            max_images,
        })
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self, ConfigError> {
        Self::new(
            &config.include_patterns,
            &config.exclude_patterns,
            config.max_images,
        )
    }

    pub fn accepts(&self, url: &str) -> bool {
        let scheme_ok = url::Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false);
        scheme_ok
            && self.include.iter().any(|re| re.is_match(url))
            && !self.exclude.iter().any(|re| re.is_match(url))
    }

    /// Filters raw `src` values in discovery order. Ordinals are assigned
    /// after filtering, so they are dense.
    pub fn apply<I>(&self, sources: I) -> Vec<ImageRef>
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let mut images = Vec::new();

        for src in sources {
            if images.len() >= self.max_images {
                break;
            }
            let src = src.trim();
            if !self.accepts(src) || !seen.insert(src.to_string()) {
                continue;
            }
            images.push(ImageRef::new(src, images.len()));
        }

        images
    }
}
