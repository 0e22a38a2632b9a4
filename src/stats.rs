use serde::Serialize;

/// Persisted attendance status. "pending" deliberately has no variant here:
/// drafts that were never decided must not be representable as a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(s: &str) -> Option<AttendanceStatus> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

/// Client-side decision state for one student on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStatus {
    Pending,
    Decided(AttendanceStatus),
}

impl DraftStatus {
    pub fn parse(s: &str) -> Option<DraftStatus> {
        if s == "pending" {
            return Some(DraftStatus::Pending);
        }
        AttendanceStatus::parse(s).map(DraftStatus::Decided)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttendanceStats {
    pub total_students: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub late_count: usize,
    pub excused_count: usize,
    pub attendance_rate: f64,
}

/// Aggregate counts over a set of attendance records.
///
/// The rate denominator is the number of distinct students with at least one
/// record in the input, not a roster size. Callers that need a per-day rate
/// over all marked records use [`daily_rate`] instead; the two denominators
/// are different on purpose.
pub fn attendance_stats<I>(records: I) -> AttendanceStats
where
    I: IntoIterator<Item = (i64, AttendanceStatus)>,
{
    let mut seen = std::collections::HashSet::new();
    let mut present_count = 0usize;
    let mut absent_count = 0usize;
    let mut late_count = 0usize;
    let mut excused_count = 0usize;

    for (student_id, status) in records {
        seen.insert(student_id);
        match status {
            AttendanceStatus::Present => present_count += 1,
            AttendanceStatus::Absent => absent_count += 1,
            AttendanceStatus::Late => late_count += 1,
            AttendanceStatus::Excused => excused_count += 1,
        }
    }

    let total_students = seen.len();
    let attendance_rate = if total_students > 0 {
        round_2dp(100.0 * present_count as f64 / total_students as f64)
    } else {
        0.0
    };

    AttendanceStats {
        total_students,
        present_count,
        absent_count,
        late_count,
        excused_count,
        attendance_rate,
    }
}

/// Whole-percent rate for one day's breakdown: present over all marked
/// records that day, 0 when nothing was marked.
pub fn daily_rate(present: usize, marked_total: usize) -> i64 {
    if marked_total == 0 {
        return 0;
    }
    (100.0 * present as f64 / marked_total as f64).round() as i64
}

pub fn round_2dp(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
