//! Cluster resource quantities.
//!
//! A [`Quantity`] stores an amount in milli-units so that fractional CPU
//! (`"500m"`, `"0.5"`) and large memory values (`"1024M"`, `"2Gi"`) share
//! one integer representation. [`ResourceList`] maps resource names
//! (`cpu`, `memory`, the accelerator key) to quantities.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid quantity {0:?}")]
    Invalid(String),
    #[error("quantity {0:?} overflows")]
    Overflow(String),
}

/// A non-negative resource amount in milli-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i64);

const DECIMAL_SUFFIXES: [(&str, i128); 6] = [
    ("E", 1_000_000_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("k", 1_000),
];

const BINARY_SUFFIXES: [(&str, i128); 6] = [
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.max(0))
    }

    /// Whole units (cores, bytes, devices).
    pub fn from_units(units: i64) -> Self {
        Self(units.max(0).saturating_mul(1000))
    }

    /// Fractional units rounded to the nearest milli-unit.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Self::ZERO;
        }
        Self((value * 1000.0).round() as i64)
    }

    /// Megabytes, the unit application definitions use for memory.
    pub fn from_megabytes(mb: u64) -> Self {
        Self::from_units((mb as i64).saturating_mul(1_000_000))
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0).max(0))
    }

    pub fn saturating_mul(self, factor: u64) -> Quantity {
        Quantity(self.0.saturating_mul(factor.min(i64::MAX as u64) as i64))
    }

    /// Integer division; dividing by zero yields zero.
    pub fn div(self, divisor: u64) -> Quantity {
        if divisor == 0 {
            return Quantity::ZERO;
        }
        Quantity(self.0 / divisor.min(i64::MAX as u64) as i64)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let invalid = || QuantityError::Invalid(s.to_string());
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        if number.is_empty() {
            return Err(invalid());
        }

        // (numerator, denominator) that scales units into milli-units.
        let (multiplier, divisor): (i128, i128) = match suffix {
            "" => (1000, 1),
            "m" => (1, 1),
            other => {
                let factor = DECIMAL_SUFFIXES
                    .iter()
                    .chain(BINARY_SUFFIXES.iter())
                    .find(|(name, _)| *name == other)
                    .map(|(_, factor)| *factor)
                    .ok_or_else(invalid)?;
                (factor * 1000, 1)
            }
        };

        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if fraction.len() > 9 || fraction.contains('.') {
            return Err(invalid());
        }
        let digits = format!("{whole}{fraction}");
        let mantissa: i128 = digits.parse().map_err(|_| invalid())?;
        let scale: i128 = 10i128.pow(fraction.len() as u32) * divisor;

        let numerator = mantissa
            .checked_mul(multiplier)
            .ok_or_else(|| QuantityError::Overflow(s.to_string()))?;
        // Round fractional milli-units up, as cluster quantities do.
        let millis = (numerator + scale - 1) / scale;
        let millis =
            i64::try_from(millis).map_err(|_| QuantityError::Overflow(s.to_string()))?;
        Ok(Quantity(millis))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 != 0 {
            return write!(f, "{}m", self.0);
        }
        let units = (self.0 / 1000) as i128;
        if units == 0 {
            return write!(f, "0");
        }
        for (suffix, factor) in DECIMAL_SUFFIXES {
            if units % factor == 0 {
                return write!(f, "{}{}", units / factor, suffix);
            }
        }
        write!(f, "{units}")
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a quantity string or a non-negative number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
                let units = i64::try_from(v).map_err(E::custom)?;
                Ok(Quantity::from_units(units))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
                if v < 0 {
                    return Err(E::custom("negative quantity"));
                }
                Ok(Quantity::from_units(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Quantity, E> {
                if v < 0.0 {
                    return Err(E::custom("negative quantity"));
                }
                Ok(Quantity::from_f64(v))
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

/// Resource name to quantity map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(BTreeMap<String, Quantity>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, quantity: Quantity) -> Self {
        self.set(name, quantity);
        self
    }

    pub fn set(&mut self, name: &str, quantity: Quantity) {
        self.0.insert(name.to_string(), quantity);
    }

    pub fn get(&self, name: &str) -> Option<Quantity> {
        self.0.get(name).copied()
    }

    /// Quantity for `name`, zero when absent.
    pub fn amount(&self, name: &str) -> Quantity {
        self.get(name).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|q| q.is_zero())
    }

    pub fn add(&mut self, other: &ResourceList) {
        for (name, q) in other.iter() {
            let entry = self.0.entry(name.to_string()).or_default();
            *entry = entry.saturating_add(q);
        }
    }

    /// Per-dimension subtraction clamped at zero.
    pub fn sub(&mut self, other: &ResourceList) {
        for (name, q) in other.iter() {
            if let Some(entry) = self.0.get_mut(name) {
                *entry = entry.saturating_sub(q);
            }
        }
    }

    pub fn scaled(&self, factor: u64) -> ResourceList {
        ResourceList(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.saturating_mul(factor)))
                .collect(),
        )
    }

    pub fn divided(&self, divisor: u64) -> ResourceList {
        ResourceList(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.div(divisor)))
                .collect(),
        )
    }

    /// First dimension of `self` (with a non-zero amount) that `available`
    /// cannot cover. A dimension missing from `available` counts as short.
    pub fn first_shortfall(&self, available: &ResourceList) -> Option<String> {
        self.0
            .iter()
            .filter(|(_, q)| !q.is_zero())
            .find(|(name, q)| match available.get(name) {
                Some(avail) => avail < **q,
                None => true,
            })
            .map(|(name, _)| name.clone())
    }
}

impl FromIterator<(String, Quantity)> for ResourceList {
    fn from_iter<I: IntoIterator<Item = (String, Quantity)>>(iter: I) -> Self {
        ResourceList(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_cpu_forms() {
        assert_eq!(q("2").millis(), 2000);
        assert_eq!(q("500m").millis(), 500);
        assert_eq!(q("0.5").millis(), 500);
        assert_eq!(q("1.25").millis(), 1250);
    }

    #[test]
    fn test_parse_memory_suffixes() {
        assert_eq!(q("1024M"), Quantity::from_units(1_024_000_000));
        assert_eq!(q("1Gi"), Quantity::from_units(1 << 30));
        assert_eq!(q("512Mi"), Quantity::from_units(512 << 20));
        assert_eq!(q("2k"), Quantity::from_units(2000));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert!("abc".parse::<Quantity>().is_err());
        assert!("1X".parse::<Quantity>().is_err());
        assert!("-1".parse::<Quantity>().is_err());
        assert!("1.2.3".parse::<Quantity>().is_err());
        assert!(matches!(
            "100E".parse::<Quantity>(),
            Err(QuantityError::Overflow(_))
        ));
    }

    #[test]
    fn test_fractional_millis_round_up() {
        assert_eq!(q("0.0001").millis(), 1);
    }

    #[test]
    fn test_display_canonical() {
        assert_eq!(q("2").to_string(), "2");
        assert_eq!(q("0.5").to_string(), "500m");
        assert_eq!(Quantity::from_megabytes(512).to_string(), "512M");
        assert_eq!(Quantity::ZERO.to_string(), "0");
    }

    #[test]
    fn test_serde_accepts_numbers_and_strings() {
        let list: ResourceList =
            serde_json::from_str(r#"{"cpu":"1","memory":"1024M","npu":0}"#).unwrap();
        assert_eq!(list.amount(CPU), Quantity::from_units(1));
        assert_eq!(list.amount(MEMORY), Quantity::from_megabytes(1024));
        assert!(list.contains("npu"));
        assert!(list.amount("npu").is_zero());

        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"{"cpu":"1","memory":"1024M","npu":"0"}"#);
    }

    #[test]
    fn test_resource_list_arithmetic() {
        let per_pod = ResourceList::new()
            .with(CPU, q("500m"))
            .with(MEMORY, Quantity::from_megabytes(256));
        let mut total = ResourceList::new();
        total.add(&per_pod.scaled(3));
        assert_eq!(total.amount(CPU), q("1.5"));
        assert_eq!(total.divided(3), per_pod);

        total.sub(&per_pod.scaled(5));
        assert!(total.is_empty());
    }

    #[test]
    fn test_first_shortfall() {
        let request = ResourceList::new()
            .with(CPU, q("2"))
            .with(MEMORY, Quantity::from_megabytes(512));
        let available = ResourceList::new()
            .with(CPU, q("1"))
            .with(MEMORY, Quantity::from_megabytes(1024));
        assert_eq!(request.first_shortfall(&available).as_deref(), Some(CPU));

        let roomy = ResourceList::new()
            .with(CPU, q("4"))
            .with(MEMORY, Quantity::from_megabytes(1024));
        assert_eq!(request.first_shortfall(&roomy), None);

        let missing = ResourceList::new().with(CPU, q("4"));
        assert_eq!(request.first_shortfall(&missing).as_deref(), Some(MEMORY));
    }
}
