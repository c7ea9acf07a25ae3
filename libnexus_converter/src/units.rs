use std::fmt::Display;
use std::str::FromStr;

const SI_PREFIXES: [&str; 22] = [
    "Y", "Z", "E", "P", "T", "G", "M", "k", "h", "da", "d", "c", "m", "u", "µ", "μ", "n", "p", "f",
    "a", "z", "y",
];

/// The dimensional class a field's units must belong to, as named in NXDL (`NX_LENGTH`, ...).
///
/// Only unit *tagging* is supported; nothing is ever converted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitCategory {
    Any,
    Unitless,
    Dimensionless,
    Angle,
    Area,
    Charge,
    Count,
    Current,
    Energy,
    Frequency,
    Length,
    Mass,
    Power,
    Pressure,
    Temperature,
    Time,
    Voltage,
    Volume,
    Wavelength,
    /// A category we know the name of but carry no unit table for
    Other(String),
}

/// Units of one dimensional family: symbols taking SI prefixes and symbols that do not
struct UnitFamily {
    prefixable: &'static [&'static str],
    fixed: &'static [&'static str],
    power: u32,
}

const LENGTH: UnitFamily = UnitFamily {
    prefixable: &["m"],
    fixed: &["Å", "angstrom", "Angstrom", "in", "inch", "ft", "mil"],
    power: 1,
};

impl UnitCategory {
    fn family(&self) -> Option<UnitFamily> {
        let family = match self {
            UnitCategory::Length | UnitCategory::Wavelength => LENGTH,
            UnitCategory::Area => UnitFamily { power: 2, ..LENGTH },
            UnitCategory::Volume => UnitFamily { power: 3, ..LENGTH },
            UnitCategory::Angle => UnitFamily {
                prefixable: &["rad"],
                fixed: &["deg", "degree", "degrees", "°", "arcmin", "arcsec"],
                power: 1,
            },
            UnitCategory::Charge => UnitFamily {
                prefixable: &["C"],
                fixed: &["e"],
                power: 1,
            },
            UnitCategory::Current => UnitFamily {
                prefixable: &["A"],
                fixed: &[],
                power: 1,
            },
            UnitCategory::Energy => UnitFamily {
                prefixable: &["eV", "J"],
                fixed: &["Ry", "Hartree", "Ha", "erg", "cal", "kcal"],
                power: 1,
            },
            UnitCategory::Frequency => UnitFamily {
                prefixable: &["Hz"],
                fixed: &["rpm"],
                power: 1,
            },
            UnitCategory::Mass => UnitFamily {
                prefixable: &["g"],
                fixed: &["amu", "Da", "u"],
                power: 1,
            },
            UnitCategory::Power => UnitFamily {
                prefixable: &["W"],
                fixed: &[],
                power: 1,
            },
            UnitCategory::Pressure => UnitFamily {
                prefixable: &["Pa", "bar"],
                fixed: &["atm", "Torr", "torr", "psi", "mmHg"],
                power: 1,
            },
            UnitCategory::Temperature => UnitFamily {
                prefixable: &["K"],
                fixed: &["degC", "°C", "celsius", "degF", "°F"],
                power: 1,
            },
            UnitCategory::Time => UnitFamily {
                prefixable: &["s"],
                fixed: &["min", "h", "hour", "hours", "d", "day", "days"],
                power: 1,
            },
            UnitCategory::Voltage => UnitFamily {
                prefixable: &["V"],
                fixed: &[],
                power: 1,
            },
            UnitCategory::Count => UnitFamily {
                prefixable: &[],
                fixed: &["counts", "count", "cts", "1", ""],
                power: 1,
            },
            _ => return None,
        };
        Some(family)
    }

    /// Is the unit string a unit of this category?
    ///
    /// `None` means it cannot be decided: either the category carries no unit table or the
    /// unit is unknown to every table (compound units such as `m/s` fall in here).
    pub fn accepts(&self, unit: &str) -> Option<bool> {
        let unit = unit.trim();
        match self {
            UnitCategory::Any => return Some(true),
            UnitCategory::Unitless => {
                return Some(unit.is_empty() || unit == "1" || unit == "dimensionless")
            }
            UnitCategory::Dimensionless => {
                return Some(matches!(unit, "" | "1" | "dimensionless" | "%"))
            }
            UnitCategory::Other(_) => return None,
            _ => (),
        }
        let family = self.family()?;
        if family_matches(&family, unit) {
            return Some(true);
        }
        if CHECKED.iter().any(|other| {
            other
                .family()
                .is_some_and(|fam| family_matches(&fam, unit))
        }) {
            Some(false)
        } else {
            None
        }
    }
}

const CHECKED: [UnitCategory; 17] = [
    UnitCategory::Angle,
    UnitCategory::Area,
    UnitCategory::Charge,
    UnitCategory::Count,
    UnitCategory::Current,
    UnitCategory::Energy,
    UnitCategory::Frequency,
    UnitCategory::Length,
    UnitCategory::Mass,
    UnitCategory::Power,
    UnitCategory::Pressure,
    UnitCategory::Temperature,
    UnitCategory::Time,
    UnitCategory::Voltage,
    UnitCategory::Volume,
    UnitCategory::Wavelength,
    UnitCategory::Dimensionless,
];

fn split_power(unit: &str) -> (&str, u32) {
    if let Some((base, power)) = unit.split_once("**").or_else(|| unit.split_once('^')) {
        return match power.parse() {
            Ok(p) => (base, p),
            Err(_) => (unit, 0),
        };
    }
    let mut chars = unit.char_indices().rev();
    if let (Some((idx, last)), Some((_, before))) = (chars.next(), chars.next()) {
        if let Some(p) = last.to_digit(10) {
            if before.is_alphabetic() {
                return (&unit[..idx], p);
            }
        }
    }
    (unit, 1)
}

fn family_matches(family: &UnitFamily, unit: &str) -> bool {
    let (symbol, power) = split_power(unit);
    if power != family.power {
        return false;
    }
    family.fixed.contains(&symbol)
        || family.prefixable.iter().any(|base| {
            symbol
                .strip_suffix(base)
                .is_some_and(|prefix| prefix.is_empty() || SI_PREFIXES.contains(&prefix))
        })
}

impl FromStr for UnitCategory {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NX_ANY" => UnitCategory::Any,
            "NX_UNITLESS" => UnitCategory::Unitless,
            "NX_DIMENSIONLESS" => UnitCategory::Dimensionless,
            "NX_ANGLE" => UnitCategory::Angle,
            "NX_AREA" => UnitCategory::Area,
            "NX_CHARGE" => UnitCategory::Charge,
            "NX_COUNT" => UnitCategory::Count,
            "NX_CURRENT" => UnitCategory::Current,
            "NX_ENERGY" => UnitCategory::Energy,
            "NX_FREQUENCY" => UnitCategory::Frequency,
            "NX_LENGTH" => UnitCategory::Length,
            "NX_MASS" => UnitCategory::Mass,
            "NX_POWER" => UnitCategory::Power,
            "NX_PRESSURE" => UnitCategory::Pressure,
            "NX_TEMPERATURE" => UnitCategory::Temperature,
            "NX_TIME" | "NX_PERIOD" | "NX_TIME_OF_FLIGHT" => UnitCategory::Time,
            "NX_VOLTAGE" => UnitCategory::Voltage,
            "NX_VOLUME" => UnitCategory::Volume,
            "NX_WAVELENGTH" => UnitCategory::Wavelength,
            other => UnitCategory::Other(other.to_string()),
        })
    }
}

impl Display for UnitCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnitCategory::Any => "NX_ANY",
            UnitCategory::Unitless => "NX_UNITLESS",
            UnitCategory::Dimensionless => "NX_DIMENSIONLESS",
            UnitCategory::Angle => "NX_ANGLE",
            UnitCategory::Area => "NX_AREA",
            UnitCategory::Charge => "NX_CHARGE",
            UnitCategory::Count => "NX_COUNT",
            UnitCategory::Current => "NX_CURRENT",
            UnitCategory::Energy => "NX_ENERGY",
            UnitCategory::Frequency => "NX_FREQUENCY",
            UnitCategory::Length => "NX_LENGTH",
            UnitCategory::Mass => "NX_MASS",
            UnitCategory::Power => "NX_POWER",
            UnitCategory::Pressure => "NX_PRESSURE",
            UnitCategory::Temperature => "NX_TEMPERATURE",
            UnitCategory::Time => "NX_TIME",
            UnitCategory::Voltage => "NX_VOLTAGE",
            UnitCategory::Volume => "NX_VOLUME",
            UnitCategory::Wavelength => "NX_WAVELENGTH",
            UnitCategory::Other(name) => name,
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_units() {
        assert_eq!(UnitCategory::Energy.accepts("eV"), Some(true));
        assert_eq!(UnitCategory::Energy.accepts("keV"), Some(true));
        assert_eq!(UnitCategory::Length.accepts("nm"), Some(true));
        assert_eq!(UnitCategory::Time.accepts("ms"), Some(true));
        assert_eq!(UnitCategory::Time.accepts("min"), Some(true));
        assert_eq!(UnitCategory::Voltage.accepts("kV"), Some(true));
    }

    #[test]
    fn test_powers() {
        assert_eq!(UnitCategory::Area.accepts("cm^2"), Some(true));
        assert_eq!(UnitCategory::Area.accepts("mm2"), Some(true));
        assert_eq!(UnitCategory::Volume.accepts("m**3"), Some(true));
        assert_eq!(UnitCategory::Length.accepts("m^2"), Some(false));
    }

    #[test]
    fn test_mismatch_and_unknown() {
        assert_eq!(UnitCategory::Energy.accepts("m"), Some(false));
        assert_eq!(UnitCategory::Energy.accepts("furlong"), None);
        assert_eq!(UnitCategory::Energy.accepts("eV/Å"), None);
        assert_eq!(UnitCategory::Any.accepts("whatever"), Some(true));
        assert_eq!(UnitCategory::Other("NX_FLUX".into()).accepts("m"), None);
    }

    #[test]
    fn test_category_names_round_trip() {
        for name in ["NX_LENGTH", "NX_ENERGY", "NX_UNITLESS", "NX_FLUX"] {
            let category: UnitCategory = name.parse().unwrap();
            assert_eq!(category.to_string(), name);
        }
    }
}
