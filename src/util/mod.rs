use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

pub mod format;
pub mod persistence;
pub mod version;

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC time as RFC 3339, the format stored on sessions.
pub fn timestamp_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
