use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

/// Traffic density as reported by the model. Ordered from quietest to
/// busiest; the default is the lowest level.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Density {
    #[default]
    Low,
    Medium,
    High,
}

impl Density {
    pub fn as_str(&self) -> &'static str {
        match self {
            Density::Low => "LOW",
            Density::Medium => "MEDIUM",
            Density::High => "HIGH",
        }
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown density {0:?}")]
pub struct ParseDensityError(pub String);

impl FromStr for Density {
    type Err = ParseDensityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Density::Low),
            "MEDIUM" => Ok(Density::Medium),
            "HIGH" => Ok(Density::High),
            _ => Err(ParseDensityError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    TwoWheeler,
    ThreeWheeler,
    FourWheeler,
    HeavyVehicle,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 4] = [
        VehicleClass::TwoWheeler,
        VehicleClass::ThreeWheeler,
        VehicleClass::FourWheeler,
        VehicleClass::HeavyVehicle,
    ];

    /// Argument name in the `report_traffic` call.
    pub fn arg_name(&self) -> &'static str {
        match self {
            VehicleClass::TwoWheeler => "two_wheeler",
            VehicleClass::ThreeWheeler => "three_wheeler",
            VehicleClass::FourWheeler => "four_wheeler",
            VehicleClass::HeavyVehicle => "heavy_vehicle",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VehicleClass::TwoWheeler => "2-wheeler",
            VehicleClass::ThreeWheeler => "3-wheeler",
            VehicleClass::FourWheeler => "4-wheeler",
            VehicleClass::HeavyVehicle => "heavy",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VehicleCounts {
    pub two_wheeler: u64,
    pub three_wheeler: u64,
    pub four_wheeler: u64,
    pub heavy_vehicle: u64,
}

impl VehicleCounts {
    pub fn get(&self, class: VehicleClass) -> u64 {
        match class {
            VehicleClass::TwoWheeler => self.two_wheeler,
            VehicleClass::ThreeWheeler => self.three_wheeler,
            VehicleClass::FourWheeler => self.four_wheeler,
            VehicleClass::HeavyVehicle => self.heavy_vehicle,
        }
    }

    pub fn set(&mut self, class: VehicleClass, value: u64) {
        match class {
            VehicleClass::TwoWheeler => self.two_wheeler = value,
            VehicleClass::ThreeWheeler => self.three_wheeler = value,
            VehicleClass::FourWheeler => self.four_wheeler = value,
            VehicleClass::HeavyVehicle => self.heavy_vehicle = value,
        }
    }

    pub fn total(&self) -> u64 {
        VehicleClass::ALL
            .iter()
            .fold(0u64, |acc, class| acc.saturating_add(self.get(*class)))
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }

    /// Classes with a positive count, in declaration order.
    pub fn non_zero(&self) -> impl Iterator<Item = (VehicleClass, u64)> + '_ {
        VehicleClass::ALL
            .into_iter()
            .map(|class| (class, self.get(class)))
            .filter(|(_, n)| *n > 0)
    }

    fn add(&mut self, delta: &VehicleCounts) {
        for class in VehicleClass::ALL {
            self.set(class, self.get(class).saturating_add(delta.get(class)));
        }
    }
}

/// Aggregate counters shown on the dashboard.
///
/// Counters only grow; the one way back to zero is [`TrafficStats::reset`].
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct TrafficStats {
    counts: VehicleCounts,
    density: Density,
    last_updated: Option<DateTime<Local>>,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> &VehicleCounts {
        &self.counts
    }

    pub fn density(&self) -> Density {
        self.density
    }

    pub fn last_updated(&self) -> Option<DateTime<Local>> {
        self.last_updated
    }

    /// Adds a detection and stamps the update time.
    pub fn record(&mut self, delta: &VehicleCounts, density: Density) {
        self.counts.add(delta);
        self.density = density;
        self.last_updated = Some(Local::now());
    }

    pub fn set_density(&mut self, density: Density) {
        self.density = density;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_parses_case_insensitively() {
        assert_eq!("medium".parse::<Density>(), Ok(Density::Medium));
        assert_eq!(" HIGH ".parse::<Density>(), Ok(Density::High));
        assert!("jammed".parse::<Density>().is_err());
        assert!(Density::Low < Density::High);
        assert_eq!(serde_json::to_string(&Density::Medium).unwrap(), "\"MEDIUM\"");
    }

    #[test]
    fn record_accumulates_and_reset_zeroes() {
        let mut stats = TrafficStats::new();
        let delta = VehicleCounts {
            two_wheeler: 2,
            heavy_vehicle: 1,
            ..VehicleCounts::default()
        };
        stats.record(&delta, Density::High);
        stats.record(&delta, Density::Medium);
        assert_eq!(stats.counts().two_wheeler, 4);
        assert_eq!(stats.counts().heavy_vehicle, 2);
        assert_eq!(stats.counts().total(), 6);
        assert_eq!(stats.density(), Density::Medium);
        assert!(stats.last_updated().is_some());

        stats.reset();
        assert_eq!(stats, TrafficStats::default());
    }

    #[test]
    fn non_zero_lists_positive_classes_in_order() {
        let counts = VehicleCounts {
            four_wheeler: 3,
            two_wheeler: 1,
            ..VehicleCounts::default()
        };
        let classes: Vec<_> = counts.non_zero().collect();
        assert_eq!(
            classes,
            vec![(VehicleClass::TwoWheeler, 1), (VehicleClass::FourWheeler, 3)]
        );
    }
}
