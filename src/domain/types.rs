//! Core domain entities (spec §3). Identity is a stable integer id
//! unless noted; attributes are given semantically, matching the
//! requirement/subject/teacher/room rows read by
//! `examples/original_source/backend/app/domain/planner/data_access.py`.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Fid = u32;
pub type ClassId = i64;
pub type SubjectId = i64;
pub type TeacherId = i64;
pub type RoomId = i64;
pub type TenantId = i64;
pub type PlanningPeriodId = i64;
pub type VersionId = i64;
pub type RuleProfileId = i64;

/// Canonical weekday tags, Monday through Friday. Ordering matches
/// `TAGE` in the original `utils.py`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Day {
    Mo,
    Di,
    Mi,
    Do,
    Fr,
}

pub const DAYS: [Day; 5] = [Day::Mo, Day::Di, Day::Mi, Day::Do, Day::Fr];

impl Day {
    pub fn index(self) -> usize {
        DAYS.iter().position(|d| *d == self).unwrap()
    }

    /// Maps the base-plan document's `day_key` (mon/tue/wed/thu/fri) to
    /// the canonical tag. Unknown keys are rejected by the caller.
    pub fn from_day_key(key: &str) -> Option<Day> {
        match key {
            "mon" => Some(Day::Mo),
            "tue" => Some(Day::Di),
            "wed" => Some(Day::Mi),
            "thu" => Some(Day::Do),
            "fri" => Some(Day::Fr),
            _ => None,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Day::Mo => "Mo",
            Day::Di => "Di",
            Day::Mi => "Mi",
            Day::Do => "Do",
            Day::Fr => "Fr",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoublePeriodRule {
    Must,
    Should,
    May,
    Never,
}

impl Default for DoublePeriodRule {
    fn default() -> Self {
        DoublePeriodRule::May
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfternoonRule {
    Must,
    May,
    Never,
}

impl Default for AfternoonRule {
    fn default() -> Self {
        AfternoonRule::May
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participation {
    Curriculum,
    Ag,
}

impl Default for Participation {
    fn default() -> Self {
        Participation::Curriculum
    }
}

/// One teaching requirement row. `(class_id, subject_id)` may repeat
/// across multiple teachers; their summed `weekly_hours` is the demand
/// for that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub class_id: ClassId,
    pub subject_id: SubjectId,
    pub teacher_id: TeacherId,
    pub weekly_hours: u32,
    pub double_period_rule: DoublePeriodRule,
    pub afternoon_rule: AfternoonRule,
    pub participation: Participation,
    pub version_id: Option<VersionId>,
    pub planning_period_id: Option<PlanningPeriodId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    pub code: Option<String>,
    pub required_room_id: Option<RoomId>,
    pub default_double_period_rule: DoublePeriodRule,
    pub default_afternoon_rule: AfternoonRule,
    pub is_band: bool,
    pub is_ag: bool,
    pub alias_subject_id: Option<SubjectId>,
}

/// Per-day workday mask over the five configured days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkdayMask {
    pub mo: bool,
    pub di: bool,
    pub mi: bool,
    pub do_: bool,
    pub fr: bool,
}

impl Default for WorkdayMask {
    fn default() -> Self {
        Self {
            mo: true,
            di: true,
            mi: true,
            do_: true,
            fr: true,
        }
    }
}

impl WorkdayMask {
    pub fn get(&self, day: Day) -> bool {
        match day {
            Day::Mo => self.mo,
            Day::Di => self.di,
            Day::Mi => self.mi,
            Day::Do => self.do_,
            Day::Fr => self.fr,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teacher {
    pub id: TeacherId,
    pub name: String,
    pub short_code: Option<String>,
    pub workdays: WorkdayMask,
}

impl Teacher {
    /// A teacher is the sentinel pool teacher if its short code is
    /// (case-insensitively) "POOL", or its name matches the configured
    /// pool display name — mirroring
    /// `data_access.py`'s `pool_teacher_ids` computation.
    pub fn is_pool(&self, pool_display_name: &str) -> bool {
        let short_code_matches = self
            .short_code
            .as_deref()
            .map(|c| c.trim().eq_ignore_ascii_case("pool"))
            .unwrap_or(false);
        let name_matches = self.name.trim().eq_ignore_ascii_case(pool_display_name.trim());
        short_code_matches || name_matches
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
}

/// Per-day, per-period availability (`true` == available).
pub type DayMatrix = std::collections::BTreeMap<Day, Vec<bool>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub availability: DayMatrix,
}
