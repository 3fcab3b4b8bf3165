pub mod attendance;

pub use attendance::{
    id_text, parse_timestamp, sort_most_recent_first, AttendanceRecord, AttendanceSubmission,
    SheetsPayload, StoredAttendance, DEFAULT_SOURCE,
};
