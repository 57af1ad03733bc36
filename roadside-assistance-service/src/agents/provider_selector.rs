use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::geo::haversine_km;
use crate::models::{Coordinates, Garage, Provider, ProviderCategory, problem_types};

/// A repair truck only makes sense when a garage is within towing range.
pub const MAX_GARAGE_DISTANCE_KM: f64 = 50.0;
pub const MIN_ETA_MINUTES: u32 = 15;
const MINUTES_PER_KM: f64 = 2.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub provider: Provider,
    pub eta_minutes: u32,
    pub service_type: ProviderCategory,
    pub distance_km: f64,
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    provider: &'a Provider,
    distance_km: f64,
    priority: u8,
}

/// Preferred and fallback provider category for a problem type.
pub fn routing_for(problem_type: &str) -> (ProviderCategory, ProviderCategory) {
    match problem_type {
        problem_types::BATTERY_ISSUE | problem_types::FLAT_TIRE | problem_types::LOCKOUT => {
            (ProviderCategory::RepairTruck, ProviderCategory::TowTruck)
        }
        _ => (ProviderCategory::TowTruck, ProviderCategory::RepairTruck),
    }
}

pub fn eta_minutes(distance_km: f64) -> u32 {
    MIN_ETA_MINUTES.max((distance_km * MINUTES_PER_KM).floor() as u32)
}

fn nearest_garage_km(customer: Coordinates, garages: &[Garage]) -> Option<f64> {
    garages
        .iter()
        .map(|garage| haversine_km(customer, garage.coordinates()))
        .min_by(|a, b| a.total_cmp(b))
}

/// Picks the provider to send, or `None` when no provider fits.
///
/// Candidates are ranked by (category priority, distance). A repair truck is
/// swapped for the nearest tow truck when no garage lies within
/// [`MAX_GARAGE_DISTANCE_KM`] of the customer.
pub fn select_provider(
    problem_type: &str,
    customer: Coordinates,
    providers: &[Provider],
    garages: &[Garage],
) -> Option<Assignment> {
    let (preferred, fallback) = routing_for(problem_type);

    let mut candidates: Vec<Candidate<'_>> = providers
        .iter()
        .filter_map(|provider| {
            let priority = if provider.category == preferred {
                1
            } else if provider.category == fallback {
                2
            } else {
                return None;
            };
            Some(Candidate {
                provider,
                distance_km: haversine_km(customer, provider.coordinates()),
                priority,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.distance_km.total_cmp(&b.distance_km))
    });

    let Some(mut selected) = candidates.first() else {
        warn!(problem_type = %problem_type, "No service providers available");
        return None;
    };

    if selected.provider.category == ProviderCategory::RepairTruck {
        let garage_km = nearest_garage_km(customer, garages);
        let garage_in_range = garage_km.is_some_and(|km| km <= MAX_GARAGE_DISTANCE_KM);
        if !garage_in_range {
            if let Some(tow) = candidates
                .iter()
                .find(|c| c.provider.category == ProviderCategory::TowTruck)
            {
                info!(
                    nearest_garage_km = ?garage_km,
                    provider = %tow.provider.name,
                    "No garage in towing range, sending a tow truck instead"
                );
                selected = tow;
            }
        }
    }

    let assignment = Assignment {
        provider: selected.provider.clone(),
        eta_minutes: eta_minutes(selected.distance_km),
        service_type: selected.provider.category,
        distance_km: (selected.distance_km * 10.0).round() / 10.0,
    };

    info!(
        problem_type = %problem_type,
        provider = %assignment.provider.name,
        service_type = ?assignment.service_type,
        distance_km = assignment.distance_km,
        eta_minutes = assignment.eta_minutes,
        "Provider selected"
    );

    Some(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::reference_data::{CUSTOMER_LOCATION, mock_garages, mock_providers};

    fn select(problem_type: &str) -> Option<Assignment> {
        select_provider(
            problem_type,
            CUSTOMER_LOCATION,
            &mock_providers(),
            &mock_garages(),
        )
    }

    #[test]
    fn battery_issue_gets_the_nearest_repair_truck() {
        let assignment = select("battery issue").unwrap();
        assert_eq!(assignment.service_type, ProviderCategory::RepairTruck);
        assert_eq!(assignment.provider.name, "24/7 Roadside Rescue");
        assert!(assignment.eta_minutes >= MIN_ETA_MINUTES);
        assert!(assignment.distance_km < 2.0);
    }

    #[test]
    fn breakdown_gets_the_nearest_tow_truck() {
        let assignment = select("breakdown requiring tow").unwrap();
        assert_eq!(assignment.service_type, ProviderCategory::TowTruck);
        assert_eq!(assignment.provider.name, "Guardian Angel Towing");
    }

    #[test]
    fn unknown_problem_types_route_to_tow_trucks() {
        let assignment = select("something odd").unwrap();
        assert_eq!(assignment.service_type, ProviderCategory::TowTruck);
    }

    #[test]
    fn fallback_category_is_used_when_preferred_is_missing() {
        let tow_only: Vec<Provider> = mock_providers()
            .into_iter()
            .filter(|p| p.category == ProviderCategory::TowTruck)
            .collect();
        let assignment =
            select_provider("flat tire", CUSTOMER_LOCATION, &tow_only, &mock_garages()).unwrap();
        assert_eq!(assignment.provider.name, "Guardian Angel Towing");
    }

    #[test]
    fn distant_garages_swap_repair_truck_for_tow_truck() {
        let far_garage = Garage {
            name: "Edinburgh Motors".to_string(),
            lat: 55.9533,
            lon: -3.1883,
        };
        let assignment =
            select_provider("lockout", CUSTOMER_LOCATION, &mock_providers(), &[far_garage])
                .unwrap();
        assert_eq!(assignment.service_type, ProviderCategory::TowTruck);
        assert_eq!(assignment.provider.name, "Guardian Angel Towing");
    }

    #[test]
    fn repair_truck_kept_when_no_tow_truck_exists() {
        let repair_only: Vec<Provider> = mock_providers()
            .into_iter()
            .filter(|p| p.category == ProviderCategory::RepairTruck)
            .collect();
        let assignment =
            select_provider("battery issue", CUSTOMER_LOCATION, &repair_only, &[]).unwrap();
        assert_eq!(assignment.service_type, ProviderCategory::RepairTruck);
    }

    #[test]
    fn no_providers_means_no_dispatch() {
        assert!(select_provider("flat tire", CUSTOMER_LOCATION, &[], &mock_garages()).is_none());
    }

    #[test]
    fn eta_has_a_floor_and_rounds_down() {
        assert_eq!(eta_minutes(0.4), 15);
        assert_eq!(eta_minutes(6.0), 15);
        assert_eq!(eta_minutes(6.39), 15);
        assert_eq!(eta_minutes(10.0), 25);
        assert_eq!(eta_minutes(10.39), 25);
    }
}
