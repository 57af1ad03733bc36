/// Customer-facing notifications sent while a case progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification<'a> {
    Dispatched { provider_name: &'a str },
    EtaUpdate { eta_minutes: u32 },
    Arrival,
    CabBooked,
}

/// Formats a notification as the SMS line sent to `customer_name`.
pub fn compose_notification(customer_name: &str, notification: Notification<'_>) -> String {
    let body = match notification {
        Notification::Dispatched { provider_name } => {
            format!("Help is on the way! '{provider_name}' has been dispatched.")
        }
        Notification::EtaUpdate { eta_minutes } => {
            format!("Your service vehicle will arrive in approximately {eta_minutes} minutes.")
        }
        Notification::Arrival => "Your service vehicle has arrived.".to_string(),
        Notification::CabBooked => {
            "A cab has been booked to take you on to your destination.".to_string()
        }
    };
    format!("[COMMUNICATION] SMS to {customer_name}: {body}")
}
