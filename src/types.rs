use serde_json::{json, Value};
use uuid::Uuid;

/// Resting state of a tracked plate between check cycles. `Checking` is
/// only ever observed while a probe for that plate is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlateStatus {
    Pending,
    Checking,
    Clear,
    Found,
    Error,
}

impl PlateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlateStatus::Pending => "pending",
            PlateStatus::Checking => "checking",
            PlateStatus::Clear => "clear",
            PlateStatus::Found => "found",
            PlateStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Plate {
    pub id: String,
    pub plate_number: String,
    pub contact: String,
    pub status: PlateStatus,
    pub last_checked: Option<f64>,
    pub alert_sent: bool,
}

impl Plate {
    pub fn new(plate_number: String, contact: String) -> Plate {
        Plate {
            id: Uuid::new_v4().simple().to_string(),
            plate_number,
            contact,
            status: PlateStatus::Pending,
            last_checked: None,
            alert_sent: false,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "plateNumber": self.plate_number,
            "contact": self.contact,
            "status": self.status.as_str(),
            "lastChecked": self.last_checked,
            "alertSent": self.alert_sent,
        })
    }
}

/// Partial update applied to a plate by the check cycle. Only the cycle
/// touches these fields; user-facing edits go through the registry's
/// `update` instead.
#[derive(Debug, Default)]
pub struct StatusPatch {
    pub status: Option<PlateStatus>,
    pub last_checked: Option<f64>,
    pub alert_sent: Option<bool>,
}
