//! Per-type lists of downloadable bundle URLs.
//!
//! A stored list is always deduplicated, sorted newest first (version
//! descending, then `createdAt` descending) and capped.

use std::collections::HashSet;

use edgefleet_core::ValidationError;
use edgefleet_core::time::parse_timestamp;
use edgefleet_core::validate::check_count;
use regex::Regex;
use serde::{Deserialize, Serialize};

const URL_MAX_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareUrl {
    #[serde(rename = "type", default)]
    pub software_type: String,
    pub url: String,
    pub version: String,
    #[serde(default)]
    pub created_at: String,
}

impl SoftwareUrl {
    /// An entry without `createdAt` matches every timestamp.
    fn matches(&self, stored: &SoftwareUrl) -> bool {
        self.software_type == stored.software_type
            && self.url == stored.url
            && self.version == stored.version
            && (self.created_at.is_empty() || self.created_at == stored.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlListReq {
    pub software_type: String,
    pub urls: Vec<SoftwareUrl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareTypeReq {
    pub software_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlOp {
    Add,
    Delete,
    Sync,
}

impl UrlOp {
    pub fn apply(self, stored: Vec<SoftwareUrl>, incoming: Vec<SoftwareUrl>, max: usize) -> Vec<SoftwareUrl> {
        match self {
            UrlOp::Add => {
                let mut all = stored;
                all.extend(incoming);
                normalize(all, max)
            }
            UrlOp::Delete => {
                let mut kept = stored;
                kept.retain(|u| !incoming.iter().any(|r| r.matches(u)));
                kept
            }
            UrlOp::Sync => normalize(incoming, max),
        }
    }
}

pub fn normalize(mut list: Vec<SoftwareUrl>, max: usize) -> Vec<SoftwareUrl> {
    let mut seen = HashSet::new();
    list.retain(|u| seen.insert(u.clone()));
    list.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    list.truncate(max);
    list
}

pub struct UrlRules {
    software_type: Regex,
    version: Regex,
}

impl UrlRules {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            software_type: Regex::new(r"^[a-z][a-z0-9-]{0,31}$")?,
            version: Regex::new(r"^[0-9A-Za-z][0-9A-Za-z._-]{0,63}$")?,
        })
    }

    pub fn check_type(&self, software_type: &str) -> Result<(), ValidationError> {
        if self.software_type.is_match(software_type) {
            Ok(())
        } else {
            Err(ValidationError::new(
                "softwareType",
                format!("{software_type:?} is not a valid software type"),
            ))
        }
    }

    pub fn check(&self, req: &UrlListReq, max: usize) -> Result<(), ValidationError> {
        self.check_type(&req.software_type)?;
        if req.urls.is_empty() {
            return Err(ValidationError::new("urls", "list must not be empty"));
        }
        check_count("urls", req.urls.len(), max)?;
        for entry in &req.urls {
            if !entry.software_type.is_empty() && entry.software_type != req.software_type {
                return Err(ValidationError::new(
                    "type",
                    format!("{} does not match {}", entry.software_type, req.software_type),
                ));
            }
            let scheme_ok = entry.url.starts_with("https://") || entry.url.starts_with("http://");
            if !scheme_ok || entry.url.len() > URL_MAX_LEN || entry.url.chars().any(char::is_whitespace) {
                return Err(ValidationError::new("url", format!("{:?} is not a valid url", entry.url)));
            }
            if !self.version.is_match(&entry.version) {
                return Err(ValidationError::new(
                    "version",
                    format!("{:?} is not a valid version", entry.version),
                ));
            }
            if !entry.created_at.is_empty() && parse_timestamp(&entry.created_at).is_none() {
                return Err(ValidationError::new("createdAt", "not a timestamp"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(version: &str, created_at: &str) -> SoftwareUrl {
        SoftwareUrl {
            software_type: "edgecore".into(),
            url: format!("https://repo.example.com/edgecore-{version}.tar.gz"),
            version: version.into(),
            created_at: created_at.into(),
        }
    }

    #[test]
    fn normalize_sorts_dedups_and_caps() {
        let list = vec![
            url("1.0.0", "2024-01-01 00:00:00"),
            url("1.2.0", "2024-01-01 00:00:00"),
            url("1.0.0", "2024-03-01 00:00:00"),
            url("1.2.0", "2024-01-01 00:00:00"),
        ];
        let out = normalize(list, 16);
        assert_eq!(
            out,
            vec![
                url("1.2.0", "2024-01-01 00:00:00"),
                url("1.0.0", "2024-03-01 00:00:00"),
                url("1.0.0", "2024-01-01 00:00:00"),
            ]
        );

        let many: Vec<_> = (0..20).map(|i| url(&format!("1.{i:02}"), "")).collect();
        let capped = normalize(many, 16);
        assert_eq!(capped.len(), 16);
        assert_eq!(capped[0].version, "1.19");
    }

    #[test]
    fn add_then_delete_restores_the_original() {
        let original = normalize(
            vec![url("1.0.0", "2024-01-01 00:00:00"), url("1.0.0", "2024-01-01 00:00:00")],
            16,
        );
        let added = vec![url("2.0.0", "2024-05-01 00:00:00"), url("0.9.0", "2023-01-01 00:00:00")];
        let grown = UrlOp::Add.apply(original.clone(), added.clone(), 16);
        assert_eq!(grown.len(), 3);
        assert_eq!(grown[0].version, "2.0.0");
        assert_eq!(UrlOp::Delete.apply(grown, added, 16), original);
    }

    #[test]
    fn delete_without_timestamp_matches_any() {
        let stored = vec![url("1.0.0", "2024-01-01 00:00:00"), url("1.0.0", "2024-02-01 00:00:00")];
        assert!(UrlOp::Delete.apply(stored, vec![url("1.0.0", "")], 16).is_empty());
    }

    #[test]
    fn sync_replaces_the_list() {
        let stored = vec![url("1.0.0", "")];
        let out = UrlOp::Sync.apply(stored, vec![url("3.0.0", ""), url("3.0.0", "")], 16);
        assert_eq!(out, vec![url("3.0.0", "")]);
    }

    #[test]
    fn rules_reject_malformed_entries() {
        let rules = UrlRules::new().unwrap();
        let req = |entry: SoftwareUrl| UrlListReq {
            software_type: "edgecore".into(),
            urls: vec![entry],
        };
        assert!(rules.check(&req(url("1.0.0", "")), 16).is_ok());
        assert!(rules.check(&req(SoftwareUrl { url: "ftp://x".into(), ..url("1.0.0", "") }), 16).is_err());
        assert!(rules.check(&req(SoftwareUrl { version: "".into(), ..url("1.0.0", "") }), 16).is_err());
        assert!(rules.check(&req(url("1.0.0", "yesterday")), 16).is_err());
        assert!(
            rules
                .check(&req(SoftwareUrl { software_type: "other".into(), ..url("1.0.0", "") }), 16)
                .is_err()
        );
        assert!(rules.check_type("auth_info").is_err());
        assert!(rules.check(&UrlListReq { software_type: "edgecore".into(), urls: vec![] }, 16).is_err());
    }
}
