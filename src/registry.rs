use crate::errors::RequestError;
use crate::types::{Plate, PlateStatus, StatusPatch};
use log::debug;

/// In-memory set of tracked plates, in insertion order. Plate numbers
/// are stored upper-cased and are unique case-insensitively.
#[derive(Debug, Default)]
pub struct PlateRegistry {
    plates: Vec<Plate>,
}

#[derive(Debug)]
pub struct BulkError {
    pub plate_number: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct BulkOutcome {
    pub added: Vec<Plate>,
    pub errors: Vec<BulkError>,
}

fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

impl PlateRegistry {
    pub fn new() -> PlateRegistry {
        PlateRegistry { plates: Vec::new() }
    }

    pub fn add(&mut self, plate_number: &str, contact: &str) -> Result<Plate, RequestError> {
        let normalized = normalize(plate_number);
        let contact = contact.trim();
        if normalized.is_empty() {
            return Err(RequestError::Invalid(
                "plate number must not be empty".to_string(),
            ));
        }
        if contact.is_empty() {
            return Err(RequestError::Invalid("contact must not be empty".to_string()));
        }
        if self.plates.iter().any(|p| p.plate_number == normalized) {
            return Err(RequestError::Duplicate(normalized));
        }
        let plate = Plate::new(normalized, contact.to_string());
        self.plates.push(plate.clone());
        Ok(plate)
    }

    pub fn remove(&mut self, id: &str) -> Result<Plate, RequestError> {
        match self.plates.iter().position(|p| p.id == id) {
            Some(index) => Ok(self.plates.remove(index)),
            None => Err(RequestError::NotFound(id.to_string())),
        }
    }

    /// Partial update of the user-editable fields. A changed plate
    /// number is re-validated and re-checked for uniqueness against
    /// every other plate.
    pub fn update(
        &mut self,
        id: &str,
        plate_number: Option<&str>,
        contact: Option<&str>,
    ) -> Result<Plate, RequestError> {
        let new_number = match plate_number {
            Some(raw) => {
                let normalized = normalize(raw);
                if normalized.is_empty() {
                    return Err(RequestError::Invalid(
                        "plate number must not be empty".to_string(),
                    ));
                }
                if self
                    .plates
                    .iter()
                    .any(|p| p.id != id && p.plate_number == normalized)
                {
                    return Err(RequestError::Duplicate(normalized));
                }
                Some(normalized)
            }
            None => None,
        };
        let new_contact = match contact {
            Some(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(RequestError::Invalid(
                        "contact must not be empty".to_string(),
                    ));
                }
                Some(trimmed.to_string())
            }
            None => None,
        };
        let plate = self
            .plates
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| RequestError::NotFound(id.to_string()))?;
        if let Some(number) = new_number {
            plate.plate_number = number;
        }
        if let Some(contact) = new_contact {
            plate.contact = contact;
        }
        Ok(plate.clone())
    }

    /// Merge cycle results into a plate. A plate removed while its
    /// check was in flight is gone for good; the late result is
    /// dropped rather than resurrecting it.
    pub fn apply_status(&mut self, id: &str, patch: StatusPatch) {
        match self.plates.iter_mut().find(|p| p.id == id) {
            Some(plate) => {
                if let Some(status) = patch.status {
                    plate.status = status;
                }
                if let Some(timestamp) = patch.last_checked {
                    plate.last_checked = Some(timestamp);
                }
                if let Some(flag) = patch.alert_sent {
                    plate.alert_sent = flag;
                }
            }
            None => debug!("Dropping status update for removed plate {}", id),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Plate> {
        self.plates.iter().find(|p| p.id == id)
    }

    pub fn list(&self) -> &[Plate] {
        &self.plates
    }

    pub fn len(&self) -> usize {
        self.plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }

    /// Per-entry add; failures are collected inline instead of aborting
    /// the batch, so a duplicate within the batch rejects only the
    /// second occurrence.
    pub fn bulk_add(&mut self, entries: &[(String, String)]) -> BulkOutcome {
        let mut added = Vec::new();
        let mut errors = Vec::new();
        for (plate_number, contact) in entries {
            match self.add(plate_number, contact) {
                Ok(plate) => added.push(plate),
                Err(e) => errors.push(BulkError {
                    plate_number: plate_number.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        BulkOutcome { added, errors }
    }

    /// A new monitoring session starts from a clean slate: every plate
    /// back to pending with its alert re-armed. `last_checked` is kept
    /// as history.
    pub fn reset_for_session(&mut self) {
        for plate in &mut self.plates {
            plate.status = PlateStatus::Pending;
            plate.alert_sent = false;
        }
    }
}
