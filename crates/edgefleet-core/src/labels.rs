//! Cluster label keys shared with edge agents.
//!
//! Group membership is expressed as a node label `<prefix><groupId base 16>`
//! with an empty value; workloads select their group through the same key.

use std::collections::BTreeMap;

use crate::config::LabelsConfig;

pub const APP_NAME_LABEL: &str = "appname";
pub const APP_ID_LABEL: &str = "appid";
pub const APP_MANAGER_VALUE: &str = "v1";

impl LabelsConfig {
    pub fn group_label(&self, group_id: u64) -> String {
        format!("{}{:x}", self.group_prefix, group_id)
    }

    /// Group id encoded in a label key, if the key is a group label.
    pub fn parse_group_label(&self, key: &str) -> Option<u64> {
        let digits = key.strip_prefix(&self.group_prefix)?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(digits, 16).ok()
    }

    pub fn is_group_label(&self, key: &str) -> bool {
        self.parse_group_label(key).is_some()
    }

    /// Labels carried by every workload and pod this system creates.
    pub fn app_labels(&self, app_name: &str, app_id: u64) -> BTreeMap<String, String> {
        BTreeMap::from([
            (self.app_manager_key.clone(), APP_MANAGER_VALUE.to_string()),
            (APP_NAME_LABEL.to_string(), app_name.to_string()),
            (APP_ID_LABEL.to_string(), format!("{app_id:x}")),
        ])
    }

    /// Selector matching everything this system manages.
    pub fn managed_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(self.app_manager_key.clone(), APP_MANAGER_VALUE.to_string())])
    }

    pub fn is_managed(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.app_manager_key).map(String::as_str) == Some(APP_MANAGER_VALUE)
    }

    /// Serial number an edge agent stamped on its node, if any.
    pub fn serial_number<'a>(&self, labels: &'a BTreeMap<String, String>) -> Option<&'a str> {
        labels
            .get(&self.serial_number_label)
            .map(String::as_str)
            .filter(|sn| !sn.is_empty())
    }

    pub fn is_master(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.contains_key(&self.master_label)
    }
}

/// `(appName, appId)` from workload or pod labels.
pub fn parse_app_labels(labels: &BTreeMap<String, String>) -> Option<(String, u64)> {
    let name = labels.get(APP_NAME_LABEL)?;
    let id = u64::from_str_radix(labels.get(APP_ID_LABEL)?, 16).ok()?;
    Some((name.clone(), id))
}
