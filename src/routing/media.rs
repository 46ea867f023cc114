//! Media type parsing and content negotiation.
//!
//! # Responsibilities
//! - Parse `Content-Type` and `Accept` style values (`type/subtype;k=v;q=0.5`)
//! - Match declared `consumes` types against the request content type
//! - Pick the best declared `produces` type for an `Accept` header
//!
//! # Design Decisions
//! - Matching ignores parameters except `q`; wildcards (`*`) match any component
//! - Accept entries are ranked by weight, then specificity, then position
//! - `q=0` marks a type as unacceptable

use std::cmp::Ordering;
use std::fmt;

use crate::routing::error::RouterError;

/// A parsed media range.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    component: String,
    sub_component: String,
    params: Vec<(String, String)>,
    weight: f32,
}

impl MediaType {
    /// Parse a single media type. The bare `*` is accepted as `*/*`.
    pub fn parse(raw: &str) -> Result<Self, RouterError> {
        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (component, sub_component) = match essence.split_once('/') {
            Some((c, s)) if !c.trim().is_empty() && !s.trim().is_empty() => {
                (c.trim().to_ascii_lowercase(), s.trim().to_ascii_lowercase())
            }
            _ if essence == "*" => ("*".to_string(), "*".to_string()),
            _ => return Err(RouterError::InvalidMediaType(raw.to_string())),
        };

        let mut params = Vec::new();
        let mut weight = 1.0;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().trim_matches('"').to_string();
            if key == "q" {
                weight = value.parse::<f32>().unwrap_or(1.0).clamp(0.0, 1.0);
            } else {
                params.push((key, value));
            }
        }

        Ok(Self {
            component,
            sub_component,
            params,
            weight,
        })
    }

    /// Parse a comma separated header, skipping malformed entries, sorted by
    /// preference.
    pub fn parse_list(header: &str) -> Vec<MediaType> {
        let mut ranked: Vec<MediaType> = header
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .filter_map(|v| MediaType::parse(v).ok())
            .collect();
        ranked.sort_by(|a, b| a.preference(b));
        ranked
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn sub_component(&self) -> &str {
        &self.sub_component
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `type/subtype` without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.component, self.sub_component)
    }

    /// True when either side's wildcards cover the other.
    pub fn is_match(&self, other: &MediaType) -> bool {
        fn part(a: &str, b: &str) -> bool {
            a == "*" || b == "*" || a == b
        }
        part(&self.component, &other.component) && part(&self.sub_component, &other.sub_component)
    }

    fn specificity(&self) -> u8 {
        match (self.component.as_str(), self.sub_component.as_str()) {
            ("*", _) => 0,
            (_, "*") => 1,
            _ if self.params.is_empty() => 2,
            _ => 3,
        }
    }

    fn preference(&self, other: &MediaType) -> Ordering {
        other
            .weight
            .partial_cmp(&self.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.specificity().cmp(&self.specificity()))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.sub_component)?;
        for (k, v) in &self.params {
            write!(f, ";{k}={v}")?;
        }
        Ok(())
    }
}

/// Find the declared type that can consume `content_type`.
pub fn find_consumable<'a>(content_type: &MediaType, consumes: &'a [MediaType]) -> Option<&'a MediaType> {
    consumes.iter().find(|c| c.is_match(content_type))
}

/// Pick the declared type best matching the ranked `accepted` list.
pub fn negotiate<'a>(accepted: &[MediaType], produces: &'a [MediaType]) -> Option<&'a MediaType> {
    accepted
        .iter()
        .filter(|a| a.weight > 0.0)
        .find_map(|a| produces.iter().find(|p| a.is_match(p)))
}
