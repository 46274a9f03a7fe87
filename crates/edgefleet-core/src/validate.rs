//! Input validation applied before any database write.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use regex::Regex;
use thiserror::Error;

pub const COMMAND_MAX_COUNT: usize = 16;
pub const ARGS_MAX_COUNT: usize = 16;
pub const ENV_MAX_COUNT: usize = 256;
pub const PORT_MAP_MAX_COUNT: usize = 16;
pub const CONFIGMAP_CONTENT_MAX_COUNT: usize = 64;
pub const CONFIGMAP_VALUE_MAX_LEN: usize = 1024;
pub const CONTAINER_MAX_COUNT: usize = 10;
pub const BATCH_MAX_COUNT: usize = 1024;
pub const DESCRIPTION_MAX_LEN: usize = 512;

pub const ID_RANGE: std::ops::RangeInclusive<u32> = 1..=65535;
pub const CONTAINER_PORT_RANGE: std::ops::RangeInclusive<u32> = 1..=65535;
pub const HOST_PORT_RANGE: std::ops::RangeInclusive<u32> = 1024..=65535;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type ValidationResult = Result<(), ValidationError>;

/// User-facing fields that carry a format rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    AppName,
    ContainerName,
    Image,
    ImageVersion,
    ContainerCommand,
    ContainerEnvName,
    ContainerEnvValue,
    ContainerPortName,
    NodeName,
    NodeGroupName,
    Description,
    ConfigmapName,
    ConfigmapContentKey,
}

impl Field {
    const ALL: [Field; 13] = [
        Field::AppName,
        Field::ContainerName,
        Field::Image,
        Field::ImageVersion,
        Field::ContainerCommand,
        Field::ContainerEnvName,
        Field::ContainerEnvValue,
        Field::ContainerPortName,
        Field::NodeName,
        Field::NodeGroupName,
        Field::Description,
        Field::ConfigmapName,
        Field::ConfigmapContentKey,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::AppName => "appName",
            Field::ContainerName => "containerName",
            Field::Image => "image",
            Field::ImageVersion => "imageVersion",
            Field::ContainerCommand => "command",
            Field::ContainerEnvName => "envName",
            Field::ContainerEnvValue => "envValue",
            Field::ContainerPortName => "portName",
            Field::NodeName => "nodeName",
            Field::NodeGroupName => "nodeGroupName",
            Field::Description => "description",
            Field::ConfigmapName => "configmapName",
            Field::ConfigmapContentKey => "configmapContentKey",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            Field::AppName => r"^[a-z]([a-z0-9-]{0,30}[a-z0-9])?$",
            Field::ContainerName | Field::ContainerPortName => {
                r"^[a-z0-9]([a-z0-9-]{0,30}[a-z0-9])?$"
            }
            Field::Image => r"^[a-z0-9]([a-z0-9_./-]{0,30}[a-z0-9])?$",
            Field::ImageVersion => r"^[a-zA-Z0-9_.-]{1,32}$",
            Field::ContainerCommand => r"^[a-zA-Z0-9 _./-]{0,31}[a-zA-Z0-9]$",
            Field::ContainerEnvName => r"^[a-zA-Z][a-zA-Z0-9._-]{0,30}[a-zA-Z0-9]$",
            Field::ContainerEnvValue => r"^[a-zA-Z0-9 _./-]{0,512}$",
            Field::NodeName => r"^[a-zA-Z][-_a-zA-Z0-9]{0,62}[a-zA-Z0-9]$",
            Field::NodeGroupName => r"^[a-zA-Z]([_a-zA-Z0-9]{0,30}[a-zA-Z0-9])?$",
            // Length is bounded in `check`.
            Field::Description => r"^[\S ]*$",
            Field::ConfigmapName => r"^[a-zA-Z0-9][a-zA-Z0-9_-]{0,61}[a-zA-Z0-9]$",
            Field::ConfigmapContentKey => r"^[a-zA-Z-]([a-zA-Z0-9_.-]){0,62}$",
        }
    }
}

/// Compiled format rules, built once per manager.
#[derive(Debug, Clone)]
pub struct Validator {
    patterns: HashMap<Field, Regex>,
}

impl Validator {
    pub fn new() -> Result<Self, regex::Error> {
        let mut patterns = HashMap::new();
        for field in Field::ALL {
            patterns.insert(field, Regex::new(field.pattern())?);
        }
        Ok(Self { patterns })
    }

    pub fn check(&self, field: Field, value: &str) -> ValidationResult {
        if field == Field::Description && value.chars().count() > DESCRIPTION_MAX_LEN {
            return Err(ValidationError::new(
                field.name(),
                format!("longer than {DESCRIPTION_MAX_LEN} characters"),
            ));
        }
        let matched = self
            .patterns
            .get(&field)
            .is_some_and(|re| re.is_match(value));
        if matched {
            Ok(())
        } else {
            Err(ValidationError::new(
                field.name(),
                format!("{value:?} does not match the required format"),
            ))
        }
    }

    pub fn check_all<'a>(
        &self,
        field: Field,
        values: impl IntoIterator<Item = &'a String>,
    ) -> ValidationResult {
        values
            .into_iter()
            .try_for_each(|value| self.check(field, value))
    }
}

pub fn check_range(field: &str, value: u32, range: std::ops::RangeInclusive<u32>) -> ValidationResult {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{value} is outside {}..={}", range.start(), range.end()),
        ))
    }
}

pub fn check_count(field: &str, count: usize, max: usize) -> ValidationResult {
    if count <= max {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{count} entries exceed the maximum of {max}"),
        ))
    }
}

/// A host IP must parse as IPv4 and must not be the wildcard or broadcast address.
pub fn check_host_ip(value: &str) -> ValidationResult {
    let ip: Ipv4Addr = value
        .parse()
        .map_err(|_| ValidationError::new("hostIp", format!("{value:?} is not an IPv4 address")))?;
    if ip.is_unspecified() || ip.is_broadcast() {
        return Err(ValidationError::new(
            "hostIp",
            format!("{value} is not a usable host address"),
        ));
    }
    Ok(())
}

/// Ids in a batch request: non-empty, bounded, no duplicates.
pub fn check_id_batch(field: &str, ids: &[u64]) -> ValidationResult {
    if ids.is_empty() {
        return Err(ValidationError::new(field, "list must not be empty"));
    }
    check_count(field, ids.len(), BATCH_MAX_COUNT)?;
    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
        return Err(ValidationError::new(field, format!("duplicate id {dup}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new().unwrap()
    }

    #[test]
    fn test_app_name() {
        let v = validator();
        assert!(v.check(Field::AppName, "face-check").is_ok());
        assert!(v.check(Field::AppName, "a").is_ok());
        assert!(v.check(Field::AppName, "1app").is_err());
        assert!(v.check(Field::AppName, "app-").is_err());
        assert!(v.check(Field::AppName, &"a".repeat(33)).is_err());
    }

    #[test]
    fn test_node_and_group_names() {
        let v = validator();
        assert!(v.check(Field::NodeName, "edge-01").is_ok());
        assert!(v.check(Field::NodeName, "e").is_err());
        assert!(v.check(Field::NodeGroupName, "g1").is_ok());
        assert!(v.check(Field::NodeGroupName, "group-1").is_err());
    }

    #[test]
    fn test_description_allows_spaces_not_newlines() {
        let v = validator();
        assert!(v.check(Field::Description, "").is_ok());
        assert!(v.check(Field::Description, "edge box in hall 3").is_ok());
        assert!(v.check(Field::Description, "line\nbreak").is_err());
        assert!(v.check(Field::Description, &"x".repeat(513)).is_err());
    }

    #[test]
    fn test_env_and_configmap_keys() {
        let v = validator();
        assert!(v.check(Field::ContainerEnvName, "LOG_LEVEL").is_ok());
        assert!(v.check(Field::ContainerEnvName, "_x").is_err());
        assert!(v.check(Field::ConfigmapContentKey, "app.conf").is_ok());
        assert!(v.check(Field::ConfigmapName, "cm-1").is_ok());
    }

    #[test]
    fn test_host_ip() {
        assert!(check_host_ip("192.168.1.10").is_ok());
        assert!(check_host_ip("0.0.0.0").is_err());
        assert!(check_host_ip("255.255.255.255").is_err());
        assert!(check_host_ip("::1").is_err());
        assert!(check_host_ip("host").is_err());
    }

    #[test]
    fn test_ranges_and_batches() {
        assert!(check_range("hostPort", 1024, HOST_PORT_RANGE).is_ok());
        assert!(check_range("hostPort", 80, HOST_PORT_RANGE).is_err());
        assert!(check_id_batch("nodeIds", &[1, 2, 3]).is_ok());
        assert!(check_id_batch("nodeIds", &[]).is_err());
        let err = check_id_batch("nodeIds", &[1, 2, 1]).unwrap_err();
        assert!(err.reason.contains("duplicate id 1"));
    }
}
