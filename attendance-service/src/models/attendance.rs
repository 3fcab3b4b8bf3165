use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize, Serializer};
use validator::{Validate, ValidationError};

pub const DEFAULT_SOURCE: &str = "qr";

/// Check-in as posted by the scanner page or the manual entry form.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AttendanceSubmission {
    #[validate(custom(function = "not_blank", message = "name must not be empty"))]
    pub name: String,
    #[serde(alias = "nisn")]
    #[validate(custom(function = "not_blank", message = "id_number must not be empty"))]
    pub id_number: String,
    #[validate(custom(function = "not_blank", message = "major must not be empty"))]
    pub major: String,
    /// ISO-8601 text. Unparsable values are replaced by the ingestion time.
    #[serde(default)]
    pub scanned_at: Option<String>,
    /// Free-form origin tag, usually "qr" or "manual".
    #[serde(default)]
    pub source: Option<String>,
}

/// Rejects values that are empty once surrounding whitespace is removed.
fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

impl AttendanceSubmission {
    /// Pin down the scan time and source so storage and forwarding see the
    /// same concrete values.
    pub fn resolve(self, now: DateTime<Utc>) -> AttendanceRecord {
        let scanned_at = match self.scanned_at.as_deref() {
            None => now,
            Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
                tracing::debug!(scanned_at = %raw, "Unparsable scanned_at, using ingestion time");
                now
            }),
        };

        AttendanceRecord {
            name: self.name,
            id_number: self.id_number,
            major: self.major,
            scanned_at,
            source: self.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub name: String,
    pub id_number: String,
    pub major: String,
    pub scanned_at: DateTime<Utc>,
    pub source: String,
}

impl AttendanceRecord {
    pub fn to_document(&self) -> Document {
        doc! {
            "name": self.name.clone(),
            "id_number": self.id_number.clone(),
            "major": self.major.clone(),
            "scanned_at": BsonDateTime::from_chrono(self.scanned_at),
            "source": self.source.clone(),
        }
    }

    pub fn sheets_payload(&self) -> SheetsPayload {
        SheetsPayload {
            name: self.name.clone(),
            id_number: self.id_number.clone(),
            major: self.major.clone(),
            scanned_at: self.scanned_at.to_rfc3339(),
            source: self.source.clone(),
        }
    }
}

/// Body posted to the spreadsheet webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetsPayload {
    pub name: String,
    pub id_number: String,
    pub major: String,
    pub scanned_at: String,
    pub source: String,
}

/// A persisted record as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAttendance {
    pub id: String,
    pub name: String,
    pub id_number: String,
    pub major: String,
    #[serde(serialize_with = "iso_text")]
    pub scanned_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
    #[serde(serialize_with = "iso_text")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "iso_text")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredAttendance {
    /// Map a raw store document. Missing fields degrade to empty values so a
    /// single malformed document never hides the rest of the listing.
    pub fn from_document(doc: &Document) -> Self {
        let text = |key: &str| doc.get_str(key).ok().map(str::to_string);

        Self {
            id: doc.get("_id").map(id_text).unwrap_or_default(),
            name: text("name").unwrap_or_default(),
            // Early clients stored the identifier as "nisn"
            id_number: text("id_number").or_else(|| text("nisn")).unwrap_or_default(),
            major: text("major").unwrap_or_default(),
            scanned_at: timestamp_field(doc, "scanned_at"),
            source: text("source"),
            created_at: timestamp_field(doc, "created_at"),
            updated_at: timestamp_field(doc, "updated_at"),
        }
    }
}

/// Newest first by `created_at`; records without one go last. Stable, so
/// ties keep the order the store returned them in.
pub fn sort_most_recent_first(records: &mut [StoredAttendance]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Render a store-assigned identifier as plain text.
pub fn id_text(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn timestamp_field(doc: &Document, key: &str) -> Option<DateTime<Utc>> {
    match doc.get(key)? {
        Bson::DateTime(dt) => Some(dt.to_chrono()),
        Bson::String(s) => parse_timestamp(s),
        _ => None,
    }
}

fn iso_text<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        None => serializer.serialize_none(),
    }
}

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse ISO-8601 text into UTC. Values without an offset are taken as UTC,
/// a bare date as midnight UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}
