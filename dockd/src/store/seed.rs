use shared::types::DockLocation;

/// Named bays at the southwest apron, in dock-number order
const SOUTHWEST_NAMES: [&str; 11] = [
    "H84", "H86", "H87", "H89", "H90", "H92", "H93", "H95", "H96", "H98", "H99",
];

/// Southeast bays are unnamed; their label derives from the number
const SOUTHEAST_COUNT: u32 = 13;

/// A row of the initial dock table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedDock {
    pub location: DockLocation,
    pub number: u32,
    pub name: Option<&'static str>,
}

/// The fixed location/number/name table written on first startup.
pub fn seed_docks() -> Vec<SeedDock> {
    let southeast = (1..=SOUTHEAST_COUNT).map(|number| SeedDock {
        location: DockLocation::Southeast,
        number,
        name: None,
    });

    let southwest = SOUTHWEST_NAMES.iter().zip(1u32..).map(|(name, number)| SeedDock {
        location: DockLocation::Southwest,
        number,
        name: Some(*name),
    });

    southeast.chain(southwest).collect()
}
