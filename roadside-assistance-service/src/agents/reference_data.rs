use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::models::{
    Coordinates, ExclusionTag, Garage, Policy, Provider, ProviderCategory, RoadsideCoverage,
    ServiceCoverage, ServiceKind,
};

/// Fixed customer position reported by the geolocation agent.
pub const CUSTOMER_LOCATION: Coordinates = Coordinates {
    lat: 51.554257,
    lon: -0.293532,
};

pub const CUSTOMER_ADDRESS_ESTIMATE: &str = "Near Harrow, London";

/// Immutable lookup data shared by the agents: the single mock policy, the
/// provider fleet and the partner garages.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub policy: Policy,
    pub providers: Vec<Provider>,
    pub garages: Vec<Garage>,
    pub customer_location: Coordinates,
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self {
            policy: mock_policy(),
            providers: mock_providers(),
            garages: mock_garages(),
            customer_location: CUSTOMER_LOCATION,
        }
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

pub fn mock_policy() -> Policy {
    let services = BTreeMap::from([
        (
            ServiceKind::Towing,
            ServiceCoverage {
                is_covered: true,
                max_distance_km: Some(100),
            },
        ),
        (
            ServiceKind::BatteryJumpstart,
            ServiceCoverage {
                is_covered: true,
                max_distance_km: None,
            },
        ),
        (
            ServiceKind::FlatTireService,
            ServiceCoverage {
                is_covered: true,
                max_distance_km: None,
            },
        ),
        (
            ServiceKind::FuelDelivery,
            ServiceCoverage {
                is_covered: false,
                max_distance_km: None,
            },
        ),
        (
            ServiceKind::LockoutService,
            ServiceCoverage {
                is_covered: true,
                max_distance_km: None,
            },
        ),
    ]);

    Policy {
        policy_holder: "John Doe".to_string(),
        policy_number: "XYZ-12345".to_string(),
        start_date: date(2024, 1, 1),
        end_date: date(2030, 12, 31),
        roadside_assistance: RoadsideCoverage {
            is_covered: true,
            service_limit_per_year: 3,
            services,
        },
        exclusions: vec![
            ExclusionTag::CommercialUse,
            ExclusionTag::RacingEvents,
            ExclusionTag::OffRoadUse,
        ],
    }
}

fn provider(name: &str, lat: f64, lon: f64, category: ProviderCategory) -> Provider {
    Provider {
        name: name.to_string(),
        lat,
        lon,
        category,
    }
}

pub fn mock_providers() -> Vec<Provider> {
    use ProviderCategory::{RepairTruck, TowTruck};
    vec![
        provider("Awesome Roadside Repair", 51.563125, -0.239530, RepairTruck),
        provider("Swift Lift Towing", 51.549700, -0.264947, TowTruck),
        provider("24/7 Roadside Rescue", 51.545117, -0.297145, RepairTruck),
        provider("Guardian Angel Towing", 51.552307, -0.298172, TowTruck),
    ]
}

pub fn mock_garages() -> Vec<Garage> {
    [
        ("Apex Automotive Solutions", 51.552307, -0.298172),
        ("Velocity Vehicle Works", 51.545117, -0.297145),
        ("Reliable Auto Repair", 51.549700, -0.264947),
    ]
    .into_iter()
    .map(|(name, lat, lon)| Garage {
        name: name.to_string(),
        lat,
        lon,
    })
    .collect()
}
