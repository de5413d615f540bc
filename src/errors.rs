use failure::Fail;

/// Precondition failures on registry and control operations. These are
/// the only errors surfaced to API callers; everything that goes wrong
/// inside a check cycle stays on the affected plate.
#[derive(Debug, Fail, PartialEq)]
pub enum RequestError {
    #[fail(display = "invalid plate entry: {}", _0)]
    Invalid(String),
    #[fail(display = "plate {} is already tracked", _0)]
    Duplicate(String),
    #[fail(display = "no tracked plate with id {}", _0)]
    NotFound(String),
}

/// Transient failure fetching or reading the fines page.
#[derive(Debug, Fail)]
#[fail(display = "fine lookup failed: {}", _0)]
pub struct ProbeError(pub String);

/// Transient failure delivering an alert.
#[derive(Debug, Fail)]
#[fail(display = "notification delivery failed: {}", _0)]
pub struct NotificationError(pub String);
