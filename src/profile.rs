//! Hardware profile table.
//! Normalizes hardware-revision-specific raw field names and units into a
//! version-independent reading vocabulary.
//!
//! The table is static and immutable; adding a hardware version means adding
//! rows, never logic.

/// Response section a raw field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// `system.get_sysinfo`
    SysInfo,
    /// `emeter.get_realtime`
    EmeterRealtime,
}

/// Table rows: (section, hardware version, raw field, normalized field, factor).
///
/// Hardware 1.0 reports plain units (watts, volts, degrees) and needs no
/// rows. Revisions 2.0 and 4.0 report fixed-point integers: energy counters
/// in milli-units and coordinates scaled by 10000.
const ROWS: &[(Section, &str, &str, &str, f64)] = &[
    (Section::SysInfo, "2.0", "latitude_i", "latitude", 1e-4),
    (Section::SysInfo, "2.0", "longitude_i", "longitude", 1e-4),
    (Section::SysInfo, "4.0", "latitude_i", "latitude", 1e-4),
    (Section::SysInfo, "4.0", "longitude_i", "longitude", 1e-4),
    (Section::EmeterRealtime, "2.0", "power_mw", "power", 1e-3),
    (Section::EmeterRealtime, "2.0", "voltage_mv", "voltage", 1e-3),
    (Section::EmeterRealtime, "2.0", "current_ma", "current", 1e-3),
    (Section::EmeterRealtime, "2.0", "total_wh", "total", 1e-3),
    (Section::EmeterRealtime, "4.0", "power_mw", "power", 1e-3),
    (Section::EmeterRealtime, "4.0", "voltage_mv", "voltage", 1e-3),
    (Section::EmeterRealtime, "4.0", "current_ma", "current", 1e-3),
    (Section::EmeterRealtime, "4.0", "total_wh", "total", 1e-3),
];

/// Normalized name and scale factor for a raw field.
///
/// Unmapped fields (and unknown hardware versions) pass through unchanged
/// with factor 1.
pub fn lookup<'a>(section: Section, hw_ver: &str, raw: &'a str) -> (&'a str, f64) {
    for (s, ver, from, to, factor) in ROWS {
        if *s == section && *ver == hw_ver && *from == raw {
            return (to, *factor);
        }
    }
    (raw, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn remaps_milliwatts_for_hw_2() {
        let (name, factor) = lookup(Section::EmeterRealtime, "2.0", "power_mw");
        assert_eq!(name, "power");
        assert_eq!(factor, 1e-3);
    }

    #[test]
    fn hw_1_is_identity() {
        let (name, factor) = lookup(Section::EmeterRealtime, "1.0", "power");
        assert_eq!(name, "power");
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn remaps_coordinates_for_hw_4() {
        let (name, factor) = lookup(Section::SysInfo, "4.0", "longitude_i");
        assert_eq!(name, "longitude");
        assert_eq!(factor, 1e-4);
    }

    #[test]
    fn unmapped_field_passes_through() {
        let (name, factor) = lookup(Section::SysInfo, "2.0", "alias");
        assert_eq!(name, "alias");
        assert_eq!(factor, 1.0);

        let (name, factor) = lookup(Section::SysInfo, "3.0", "latitude_i");
        assert_eq!(name, "latitude_i");
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn sections_do_not_bleed() {
        // power_mw is an emeter field; a sysinfo lookup must not remap it.
        let (name, factor) = lookup(Section::SysInfo, "2.0", "power_mw");
        assert_eq!(name, "power_mw");
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn each_raw_field_maps_to_exactly_one_entry() {
        let mut seen = HashSet::new();
        for (section, ver, from, _, _) in ROWS {
            assert!(seen.insert((*section, *ver, *from)), "duplicate row: {ver}/{from}");
        }
    }
}
