use serde::{Deserialize, Serialize};

use super::reference_data::{CUSTOMER_ADDRESS_ESTIMATE, ReferenceData};
use crate::models::Coordinates;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub location_method: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: String,
    pub address_estimate: String,
}

impl LocationFix {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            lat: self.latitude,
            lon: self.longitude,
        }
    }
}

/// Reports the customer's position. There is no real positioning source; the
/// fix is always the configured customer coordinate.
pub fn locate_customer(reference: &ReferenceData) -> LocationFix {
    LocationFix {
        location_method: "gps_coordinates".to_string(),
        latitude: reference.customer_location.lat,
        longitude: reference.customer_location.lon,
        accuracy: "high".to_string(),
        address_estimate: CUSTOMER_ADDRESS_ESTIMATE.to_string(),
    }
}
