use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize};

/// Occupancy state of a dock. The only dock field that changes after seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DockStatus {
    Available,
    Occupied,
    OutOfService,
    Deiced,
}

impl DockStatus {
    pub const ALL: [DockStatus; 4] = [
        DockStatus::Available,
        DockStatus::Occupied,
        DockStatus::OutOfService,
        DockStatus::Deiced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DockStatus::Available => "available",
            DockStatus::Occupied => "occupied",
            DockStatus::OutOfService => "out-of-service",
            DockStatus::Deiced => "deiced",
        }
    }
}

/// Physical zone a dock belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockLocation {
    Southeast,
    Southwest,
}

impl DockLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            DockLocation::Southeast => "southeast",
            DockLocation::Southwest => "southwest",
        }
    }
}

/// Returned when a status or location string is not part of the fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown dock {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for DockStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DockStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant { kind: "status", value: s.to_string() })
    }
}

impl FromStr for DockLocation {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "southeast" => Ok(DockLocation::Southeast),
            "southwest" => Ok(DockLocation::Southwest),
            other => Err(UnknownVariant { kind: "location", value: other.to_string() }),
        }
    }
}

impl fmt::Display for DockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical docking bay.
/// `(location, number)` is fixed at seeding time; only `status` mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dock {
    /// Store-assigned identity, never reused
    pub id: i64,

    pub location: DockLocation,

    /// 1-based position within `location`
    pub number: u32,

    /// Human label. Present for locations with named bays, absent where the
    /// label is derived from `number`.
    #[serde(default)]
    pub name: Option<String>,

    pub status: DockStatus,
}

impl Dock {
    /// Display label: the stored name, or `Dock <number>` when none is stored.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Dock {}", self.number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&DockStatus::OutOfService).unwrap();
        assert_eq!(json, "\"out-of-service\"");

        for status in DockStatus::ALL {
            let parsed: DockStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = "broken".parse::<DockStatus>().unwrap_err();
        assert_eq!(err.kind, "status");
        assert!(serde_json::from_str::<DockStatus>("\"out_of_service\"").is_err());
    }

    #[test]
    fn test_label_falls_back_to_number() {
        let mut dock = Dock {
            id: 3,
            location: DockLocation::Southeast,
            number: 3,
            name: None,
            status: DockStatus::Available,
        };
        assert_eq!(dock.label(), "Dock 3");

        dock.name = Some("H84".to_string());
        assert_eq!(dock.label(), "H84");
    }
}
