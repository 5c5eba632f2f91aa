//! Base-Plan Parser (C2, spec §4.2). Interprets the per-period
//! base-plan document into a typed, solver-ready context. Tolerant to
//! missing/malformed sub-objects (they default to empty), matching
//! `examples/original_source/backend/app/domain/planner/basis_parser.py`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::types::{ClassId, Day, Fid, RoomId, SubjectId, DAYS};
use crate::error::PlannerError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BasePlanDocument {
    #[serde(default)]
    pub meta: BasePlanMeta,
    #[serde(default)]
    pub classes: BTreeMap<String, WindowEntry>,
    #[serde(default)]
    pub rooms: BTreeMap<String, WindowEntry>,
    #[serde(default)]
    pub fixed: BTreeMap<String, Vec<FixedEntry>>,
    #[serde(default)]
    pub flexible: BTreeMap<String, Vec<FlexibleGroupEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BasePlanMeta {
    #[serde(default)]
    pub slots: Vec<SlotMetaEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlotMetaEntry {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, rename = "isPause")]
    pub is_pause: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WindowEntry {
    #[serde(default)]
    pub allowed: BTreeMap<String, Vec<bool>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FixedEntry {
    #[serde(alias = "subjectId")]
    pub subject_id: SubjectId,
    pub day: String,
    pub slot: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlexibleGroupEntry {
    #[serde(alias = "subjectId")]
    pub subject_id: SubjectId,
    #[serde(default)]
    pub slots: Vec<FlexibleSlotEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlexibleSlotEntry {
    pub day: String,
    pub slot: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotMeta {
    pub index: u32,
    pub label: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub is_pause: bool,
}

#[derive(Debug, Clone)]
pub struct FlexibleGroup {
    pub fid: Fid,
    pub slots: Vec<(Day, u32)>,
}

/// Typed output of C2, consumed directly by the constraint builder (C4).
#[derive(Debug, Clone, Default)]
pub struct BasePlanContext {
    pub room_plan: HashMap<RoomId, HashMap<Day, Vec<bool>>>,
    pub class_windows_by_name: HashMap<String, HashMap<Day, Vec<bool>>>,
    pub class_fixed_lookup: HashMap<String, HashMap<Day, BTreeSet<u32>>>,
    pub flexible_slot_lookup: HashMap<(String, Day, u32), BTreeSet<Fid>>,
    /// Named separately from `flexible_slot_lookup` in the output
    /// contract, but materialized identically in `parse_flexible`.
    pub flexible_slot_limits: HashMap<(String, Day, u32), BTreeSet<Fid>>,
    pub flexible_groups: Vec<FlexibleGroup>,
    pub fixed_slot_map: HashMap<Fid, Vec<(Day, u32)>>,
    pub slots_per_day: u32,
    pub pause_slots: BTreeSet<u32>,
    pub slots_meta: Vec<SlotMeta>,
}

/// Picks a concrete `fid` for a (class, subject) pair, first-fit over
/// requirement-insertion order, never returning a `fid` whose remaining
/// quota is exhausted. Mirrors `_build_fid_picker` in both
/// `basis_parser.py` and `service.py`.
struct FidPicker {
    remaining: HashMap<Fid, u32>,
    by_key: HashMap<(String, String), Vec<Fid>>,
}

impl FidPicker {
    fn new(rows: &[(Fid, String, String, u32)]) -> Self {
        let mut remaining = HashMap::new();
        let mut by_key: HashMap<(String, String), Vec<Fid>> = HashMap::new();
        for (fid, class_name, subject_name, weekly_hours) in rows {
            remaining.insert(*fid, *weekly_hours);
            by_key
                .entry((class_name.clone(), subject_name.clone()))
                .or_default()
                .push(*fid);
        }
        Self { remaining, by_key }
    }

    fn pick(&mut self, class_name: &str, subject_name: &str) -> Option<Fid> {
        let fids = self.by_key.get(&(class_name.to_string(), subject_name.to_string()))?;
        for fid in fids {
            if let Some(remaining) = self.remaining.get_mut(fid) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Some(*fid);
                }
            }
        }
        None
    }
}

pub struct BasePlanParser;

impl BasePlanParser {
    /// `rows`: one entry per requirement row, `(fid, class_name,
    /// subject_name, weekly_hours)`, in requirement-insertion order —
    /// the iteration order the picker relies on for determinism.
    pub fn parse(
        doc: &BasePlanDocument,
        rows: &[(Fid, String, String, u32)],
        class_id_to_name: &HashMap<ClassId, String>,
        subject_id_to_name: &HashMap<SubjectId, String>,
    ) -> Result<BasePlanContext, PlannerError> {
        let mut ctx = BasePlanContext {
            slots_per_day: 8,
            ..Default::default()
        };
        let mut errors: BTreeSet<String> = BTreeSet::new();

        Self::parse_meta(doc, &mut ctx);
        Self::parse_class_windows(doc, class_id_to_name, &mut ctx);
        Self::parse_room_plan(doc, &mut ctx);

        let mut picker = FidPicker::new(rows);
        Self::parse_fixed(doc, class_id_to_name, subject_id_to_name, &mut picker, &mut ctx, &mut errors);
        Self::parse_flexible(doc, class_id_to_name, subject_id_to_name, &mut picker, &mut ctx, &mut errors);

        if !errors.is_empty() {
            let joined = errors.into_iter().collect::<Vec<_>>().join(" ");
            return Err(PlannerError::BasePlanOverflow(joined));
        }

        for slots in ctx.fixed_slot_map.values_mut() {
            slots.sort_by_key(|(day, slot)| (day.index(), *slot));
            let deduped: BTreeSet<(Day, u32)> = slots.iter().copied().collect();
            *slots = deduped.into_iter().collect();
        }

        Ok(ctx)
    }

    fn register_slot_index(ctx: &mut BasePlanContext, idx: u32) {
        if idx + 1 > ctx.slots_per_day {
            ctx.slots_per_day = idx + 1;
        }
    }

    fn parse_meta(doc: &BasePlanDocument, ctx: &mut BasePlanContext) {
        if doc.meta.slots.is_empty() {
            return;
        }
        ctx.slots_per_day = ctx.slots_per_day.max(doc.meta.slots.len() as u32);
        for (idx, entry) in doc.meta.slots.iter().enumerate() {
            let idx = idx as u32;
            if entry.is_pause {
                ctx.pause_slots.insert(idx);
            }
            ctx.slots_meta.push(SlotMeta {
                index: idx,
                label: entry
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("{}. Stunde", idx + 1)),
                start: entry.start.clone(),
                end: entry.end.clone(),
                is_pause: entry.is_pause,
            });
        }
    }

    fn normalize_window(window: &WindowEntry, slots_per_day: u32) -> HashMap<Day, Vec<bool>> {
        let mut normalized = HashMap::new();
        for day in DAYS {
            let tag = day_tag(day);
            match window.allowed.get(tag) {
                Some(slots) if !slots.is_empty() => {
                    let row: Vec<bool> = (0..slots_per_day as usize)
                        .map(|i| slots.get(i).copied().unwrap_or(true))
                        .collect();
                    normalized.insert(day, row);
                }
                _ => {
                    normalized.insert(day, vec![true; slots_per_day.max(1) as usize]);
                }
            }
        }
        normalized
    }

    fn parse_class_windows(
        doc: &BasePlanDocument,
        class_id_to_name: &HashMap<ClassId, String>,
        ctx: &mut BasePlanContext,
    ) {
        for window in doc.classes.values() {
            for slots in window.allowed.values() {
                for (i, _) in slots.iter().enumerate() {
                    Self::register_slot_index(ctx, i as u32);
                }
            }
        }
        for (class_key, window) in &doc.classes {
            let Ok(class_id) = class_key.parse::<ClassId>() else {
                continue;
            };
            let class_name = class_id_to_name
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| class_id.to_string());
            let normalized = Self::normalize_window(window, ctx.slots_per_day);
            ctx.class_windows_by_name.insert(class_name, normalized);
        }
    }

    fn parse_room_plan(doc: &BasePlanDocument, ctx: &mut BasePlanContext) {
        for (room_key, window) in &doc.rooms {
            let Ok(room_id) = room_key.parse::<RoomId>() else {
                continue;
            };
            let normalized = Self::normalize_window(window, ctx.slots_per_day);
            ctx.room_plan.insert(room_id, normalized);
        }
    }

    fn parse_fixed(
        doc: &BasePlanDocument,
        class_id_to_name: &HashMap<ClassId, String>,
        subject_id_to_name: &HashMap<SubjectId, String>,
        picker: &mut FidPicker,
        ctx: &mut BasePlanContext,
        errors: &mut BTreeSet<String>,
    ) {
        for (class_key, entries) in &doc.fixed {
            let Ok(class_id) = class_key.parse::<ClassId>() else {
                continue;
            };
            let class_name = class_id_to_name
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| class_id.to_string());
            for entry in entries {
                Self::register_slot_index(ctx, entry.slot);
                let Some(day) = Day::from_day_key(&entry.day) else {
                    continue;
                };
                let Some(subject_name) = subject_id_to_name.get(&entry.subject_id) else {
                    continue;
                };
                if entry.slot >= ctx.slots_per_day {
                    continue;
                }
                match picker.pick(&class_name, subject_name) {
                    Some(fid) => {
                        ctx.fixed_slot_map.entry(fid).or_default().push((day, entry.slot));
                        ctx.class_fixed_lookup
                            .entry(class_name.clone())
                            .or_default()
                            .entry(day)
                            .or_default()
                            .insert(entry.slot);
                    }
                    None => {
                        errors.insert(format!(
                            "Zu viele feste Slots für {class_name} / {subject_name}."
                        ));
                    }
                }
            }
        }
    }

    fn parse_flexible(
        doc: &BasePlanDocument,
        class_id_to_name: &HashMap<ClassId, String>,
        subject_id_to_name: &HashMap<SubjectId, String>,
        picker: &mut FidPicker,
        ctx: &mut BasePlanContext,
        errors: &mut BTreeSet<String>,
    ) {
        for (class_key, groups) in &doc.flexible {
            let Ok(class_id) = class_key.parse::<ClassId>() else {
                continue;
            };
            let class_name = class_id_to_name
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| class_id.to_string());
            for group in groups {
                let Some(subject_name) = subject_id_to_name.get(&group.subject_id) else {
                    continue;
                };
                let mut option_set: BTreeSet<(Day, u32)> = BTreeSet::new();
                for slot in &group.slots {
                    Self::register_slot_index(ctx, slot.slot);
                    let Some(day) = Day::from_day_key(&slot.day) else {
                        continue;
                    };
                    if slot.slot >= ctx.slots_per_day {
                        continue;
                    }
                    option_set.insert((day, slot.slot));
                }
                if option_set.is_empty() {
                    continue;
                }
                match picker.pick(&class_name, subject_name) {
                    Some(fid) => {
                        let sorted_slots: Vec<(Day, u32)> = option_set.iter().copied().collect();
                        ctx.flexible_groups.push(FlexibleGroup {
                            fid,
                            slots: sorted_slots,
                        });
                        for (day, slot) in option_set {
                            ctx.flexible_slot_lookup
                                .entry((class_name.clone(), day, slot))
                                .or_default()
                                .insert(fid);
                            ctx.flexible_slot_limits
                                .entry((class_name.clone(), day, slot))
                                .or_default()
                                .insert(fid);
                        }
                    }
                    None => {
                        errors.insert(format!(
                            "Zu viele Optionen für {class_name} / {subject_name}."
                        ));
                    }
                }
            }
        }
    }
}

fn day_tag(day: Day) -> &'static str {
    match day {
        Day::Mo => "Mo",
        Day::Di => "Di",
        Day::Mi => "Mi",
        Day::Do => "Do",
        Day::Fr => "Fr",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps() -> (HashMap<ClassId, String>, HashMap<SubjectId, String>) {
        let mut classes = HashMap::new();
        classes.insert(1, "1A".to_string());
        let mut subjects = HashMap::new();
        subjects.insert(10, "Mathe".to_string());
        (classes, subjects)
    }

    #[test]
    fn fixed_pin_is_allocated_to_a_fid_with_remaining_quota() {
        let (classes, subjects) = maps();
        let doc: BasePlanDocument = serde_json::from_value(serde_json::json!({
            "fixed": { "1": [{ "subjectId": 10, "day": "mon", "slot": 0 }] }
        }))
        .unwrap();
        let rows = vec![(0u32, "1A".to_string(), "Mathe".to_string(), 2u32)];
        let ctx = BasePlanParser::parse(&doc, &rows, &classes, &subjects).unwrap();
        assert_eq!(ctx.fixed_slot_map.get(&0).unwrap(), &vec![(Day::Mo, 0)]);
        assert!(ctx.class_fixed_lookup["1A"][&Day::Mo].contains(&0));
    }

    #[test]
    fn over_pinning_fails_with_overflow_error() {
        let (classes, subjects) = maps();
        let doc: BasePlanDocument = serde_json::from_value(serde_json::json!({
            "fixed": { "1": [
                { "subjectId": 10, "day": "mon", "slot": 0 },
                { "subjectId": 10, "day": "mon", "slot": 1 },
                { "subjectId": 10, "day": "tue", "slot": 0 },
                { "subjectId": 10, "day": "tue", "slot": 1 },
                { "subjectId": 10, "day": "wed", "slot": 0 }
            ] }
        }))
        .unwrap();
        let rows = vec![(0u32, "1A".to_string(), "Mathe".to_string(), 4u32)];
        let err = BasePlanParser::parse(&doc, &rows, &classes, &subjects).unwrap_err();
        match err {
            PlannerError::BasePlanOverflow(msg) => {
                assert!(msg.contains("1A"));
                assert!(msg.contains("Mathe"));
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn slots_per_day_expands_to_largest_referenced_index() {
        let (classes, subjects) = maps();
        let doc: BasePlanDocument = serde_json::from_value(serde_json::json!({
            "fixed": { "1": [{ "subjectId": 10, "day": "mon", "slot": 9 }] }
        }))
        .unwrap();
        let rows = vec![(0u32, "1A".to_string(), "Mathe".to_string(), 1u32)];
        let ctx = BasePlanParser::parse(&doc, &rows, &classes, &subjects).unwrap();
        assert_eq!(ctx.slots_per_day, 10);
    }
}
