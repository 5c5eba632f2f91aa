//! Constraint Model Builder (C4, spec §4.4) — the bulk of the
//! engineering. Materializes the variable grid and every enabled hard
//! constraint / soft-objective term over a [`SolverEngine`]. Grounded
//! in `examples/original_source/backend/app/domain/planner/stundenplan_regeln.py`
//! for the constraint semantics, and in `examples/bc-ross-ross`'s model
//! builder files for the manual-encoding technique.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::base_plan::BasePlanContext;
use crate::domain::loader::RequirementSet;
use crate::domain::rules::{EffectiveRules, RuleKey};
use crate::domain::types::{
    AfternoonRule, ClassId, Day, DoublePeriodRule, Fid, Participation, RoomId, SubjectId,
    TeacherId, WorkdayMask, DAYS,
};
use crate::engine::solver_engine::{LinearTerm, SolverEngine};

/// Flat, `fid`-indexed view over one requirement row, assembled once
/// per generation request in insertion order — the order every
/// downstream tie-break in the spec relies on.
#[derive(Debug, Clone)]
pub struct RequirementRow {
    pub fid: Fid,
    pub class_id: ClassId,
    pub class_name: String,
    pub subject_id: SubjectId,
    pub canonical_subject_id: SubjectId,
    pub subject_name: String,
    pub teacher_id: TeacherId,
    pub weekly_hours: u32,
    pub double_period_rule: DoublePeriodRule,
    pub afternoon_rule: AfternoonRule,
    pub participation: Participation,
    pub is_band: bool,
    pub required_room_id: Option<RoomId>,
}

pub fn build_requirement_rows(set: &RequirementSet) -> Vec<RequirementRow> {
    set.requirements
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let subject = set.subjects.get(&r.subject_id);
            RequirementRow {
                fid: i as Fid,
                class_id: r.class_id,
                class_name: set.class_name(r.class_id),
                subject_id: r.subject_id,
                canonical_subject_id: set.canonical_subject_id(r.subject_id),
                subject_name: set.subject_name(r.subject_id),
                teacher_id: r.teacher_id,
                weekly_hours: r.weekly_hours,
                double_period_rule: r.double_period_rule,
                afternoon_rule: r.afternoon_rule,
                participation: r.participation,
                is_band: subject.map(|s| s.is_band).unwrap_or(false),
                required_room_id: subject.and_then(|s| s.required_room_id),
            }
        })
        .collect()
}

const MORNING_PERIODS: u32 = 6;

fn daily_cap(day: Day, slots_per_day: u32) -> u32 {
    let cap = if day == Day::Fr { 5 } else { 6 };
    cap.min(slots_per_day)
}

/// Built model ready to hand to the search orchestrator (C5).
pub struct BuiltModel<E: SolverEngine> {
    pub engine: E,
    pub vars: HashMap<(Fid, Day, u32), E::BoolVar>,
    pub rows: Vec<RequirementRow>,
}

pub struct ModelBuilder<'a, E: SolverEngine> {
    engine: E,
    rows: Vec<RequirementRow>,
    ctx: &'a BasePlanContext,
    rules: &'a EffectiveRules,
    pool_teacher_ids: &'a BTreeSet<TeacherId>,
    teacher_workdays: &'a HashMap<TeacherId, WorkdayMask>,
    vars: HashMap<(Fid, Day, u32), E::BoolVar>,
    objective_terms: Vec<E::Expr>,
}

impl<'a, E: SolverEngine> ModelBuilder<'a, E> {
    pub fn new(
        engine: E,
        rows: Vec<RequirementRow>,
        ctx: &'a BasePlanContext,
        rules: &'a EffectiveRules,
        pool_teacher_ids: &'a BTreeSet<TeacherId>,
        teacher_workdays: &'a HashMap<TeacherId, WorkdayMask>,
    ) -> Self {
        Self {
            engine,
            rows,
            ctx,
            rules,
            pool_teacher_ids,
            teacher_workdays,
            vars: HashMap::new(),
            objective_terms: Vec::new(),
        }
    }

    fn enabled(&self, key: RuleKey) -> bool {
        self.rules.get(&key).map(|v| v.as_bool()).unwrap_or(false)
    }

    fn weight(&self, key: RuleKey) -> i64 {
        self.rules.get(&key).map(|v| v.as_weight()).unwrap_or(0)
    }

    fn var_expr(vars: &HashMap<(Fid, Day, u32), E::BoolVar>, fid: Fid, day: Day, p: u32) -> E::Expr {
        match vars.get(&(fid, day, p)) {
            Some(v) => E::Expr::from(v.clone()),
            None => E::Expr::constant(0),
        }
    }

    fn all_periods(&self) -> std::ops::Range<u32> {
        0..self.ctx.slots_per_day
    }

    /// Runs the full pipeline and returns the ready-to-solve model.
    pub fn build(mut self) -> BuiltModel<E> {
        self.create_variable_grid();
        self.coverage();
        self.class_non_overlap();
        self.teacher_non_overlap();
        self.teacher_workdays();
        self.room_availability();
        self.class_windows();
        self.fixed_pins();
        self.flexible_groups();
        self.daily_period_caps();
        self.first_period_when_full();
        self.subject_afternoon();
        self.afternoon_break();
        self.morning_minimum();
        self.double_period_discipline();
        self.canonical_subject_daily_cap();
        self.band_parallel();
        self.no_gaps();
        self.teacher_gaps();
        self.even_distribution();
        self.assemble_objective();

        BuiltModel {
            engine: self.engine,
            vars: self.vars,
            rows: self.rows,
        }
    }

    fn create_variable_grid(&mut self) {
        for row in &self.rows {
            for day in DAYS {
                for p in 0..self.ctx.slots_per_day {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    let var = self.engine.new_bool_var();
                    self.vars.insert((row.fid, day, p), var);
                }
            }
        }
    }

    fn coverage(&mut self) {
        let coverage_on = self.enabled(RuleKey::stundenbedarf_vollstaendig);
        for row in &self.rows {
            let mut sum = E::Expr::constant(0);
            for day in DAYS {
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    sum = sum.add(Self::var_expr(&self.vars, row.fid, day, p));
                }
            }
            let target = E::Expr::constant(row.weekly_hours as i64);
            let use_eq = coverage_on && row.participation == Participation::Curriculum;
            if use_eq {
                self.engine.add_eq(sum, target);
            } else {
                self.engine.add_le(sum, target);
            }
        }
    }

    fn class_non_overlap(&mut self) {
        if !self.enabled(RuleKey::keine_klassenkonflikte) {
            return;
        }
        let mut by_class: BTreeMap<String, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class.entry(row.class_name.clone()).or_default().push(row.fid);
        }
        for (_, fids) in by_class {
            for day in DAYS {
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    let mut sum = E::Expr::constant(0);
                    for fid in &fids {
                        sum = sum.add(Self::var_expr(&self.vars, *fid, day, p));
                    }
                    self.engine.add_le(sum, E::Expr::constant(1));
                }
            }
        }
    }

    fn teacher_non_overlap(&mut self) {
        if !self.enabled(RuleKey::keine_lehrerkonflikte) {
            return;
        }
        let band_parallel = self.enabled(RuleKey::band_lehrer_parallel);
        let mut by_teacher: BTreeMap<TeacherId, Vec<&RequirementRow>> = BTreeMap::new();
        for row in &self.rows {
            if self.pool_teacher_ids.contains(&row.teacher_id) {
                continue;
            }
            by_teacher.entry(row.teacher_id).or_default().push(row);
        }
        for (_, rows) in by_teacher {
            for day in DAYS {
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    if !band_parallel {
                        let mut sum = E::Expr::constant(0);
                        for row in &rows {
                            sum = sum.add(Self::var_expr(&self.vars, row.fid, day, p));
                        }
                        self.engine.add_le(sum, E::Expr::constant(1));
                        continue;
                    }

                    let mut nonband_sum = E::Expr::constant(0);
                    let mut buckets: BTreeMap<SubjectId, Vec<&RequirementRow>> = BTreeMap::new();
                    for row in &rows {
                        if row.is_band {
                            buckets.entry(row.canonical_subject_id).or_default().push(row);
                        } else {
                            nonband_sum = nonband_sum.add(Self::var_expr(&self.vars, row.fid, day, p));
                        }
                    }
                    self.engine.add_le(nonband_sum.clone(), E::Expr::constant(1));
                    let mut total = nonband_sum;
                    for (_, bucket) in buckets {
                        let bb = self.engine.new_bool_var();
                        let mut bucket_sum = E::Expr::constant(0);
                        for row in &bucket {
                            let v = Self::var_expr(&self.vars, row.fid, day, p);
                            self.engine.add_ge(E::Expr::from(bb.clone()), v.clone());
                            bucket_sum = bucket_sum.add(v);
                        }
                        self.engine
                            .add_le(bucket_sum, E::Expr::from(bb.clone()).scale(bucket.len() as i64));
                        total = total.add(E::Expr::from(bb));
                    }
                    self.engine.add_le(total, E::Expr::constant(1));
                }
            }
        }
    }

    fn teacher_workdays(&mut self) {
        if !self.enabled(RuleKey::lehrer_arbeitstage) {
            return;
        }
        for row in &self.rows {
            let Some(mask) = self.teacher_workdays.get(&row.teacher_id) else {
                continue;
            };
            for day in DAYS {
                if mask.get(day) {
                    continue;
                }
                for p in self.all_periods() {
                    if let Some(var) = self.vars.get(&(row.fid, day, p)) {
                        self.engine.add_eq(E::Expr::from(var.clone()), E::Expr::constant(0));
                    }
                }
            }
        }
    }

    fn room_availability(&mut self) {
        if !self.enabled(RuleKey::raum_verfuegbarkeit) {
            return;
        }
        for row in &self.rows {
            let Some(room_id) = row.required_room_id else {
                continue;
            };
            let Some(room_plan) = self.ctx.room_plan.get(&room_id) else {
                continue;
            };
            for day in DAYS {
                let Some(mask) = room_plan.get(&day) else {
                    continue;
                };
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    let available = mask.get(p as usize).copied().unwrap_or(true);
                    if !available {
                        if let Some(var) = self.vars.get(&(row.fid, day, p)) {
                            self.engine.add_eq(E::Expr::from(var.clone()), E::Expr::constant(0));
                        }
                    }
                }
            }
        }
    }

    fn class_windows(&mut self) {
        if !self.enabled(RuleKey::basisplan_windows) {
            return;
        }
        for row in &self.rows {
            let Some(windows) = self.ctx.class_windows_by_name.get(&row.class_name) else {
                continue;
            };
            for day in DAYS {
                let Some(mask) = windows.get(&day) else {
                    continue;
                };
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    let allowed = mask.get(p as usize).copied().unwrap_or(true);
                    if !allowed {
                        if let Some(var) = self.vars.get(&(row.fid, day, p)) {
                            self.engine.add_eq(E::Expr::from(var.clone()), E::Expr::constant(0));
                        }
                    }
                }
            }
        }
    }

    fn fixed_pins(&mut self) {
        if !self.enabled(RuleKey::basisplan_fixed) {
            return;
        }
        for (fid, slots) in &self.ctx.fixed_slot_map {
            for (day, p) in slots {
                if let Some(var) = self.vars.get(&(*fid, *day, *p)) {
                    self.engine.add_eq(E::Expr::from(var.clone()), E::Expr::constant(1));
                }
            }
        }
    }

    fn flexible_groups(&mut self) {
        if !self.enabled(RuleKey::basisplan_flexible) {
            return;
        }
        for group in &self.ctx.flexible_groups {
            let allowed: BTreeSet<(Day, u32)> = group.slots.iter().copied().collect();
            for day in DAYS {
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) || allowed.contains(&(day, p)) {
                        continue;
                    }
                    if let Some(var) = self.vars.get(&(group.fid, day, p)) {
                        self.engine.add_eq(E::Expr::from(var.clone()), E::Expr::constant(0));
                    }
                }
            }
            // OQ-1: the stronger "exactly one" contract — a single listed
            // group must occupy exactly one of its candidate slots.
            let mut sum = E::Expr::constant(0);
            for (day, p) in &group.slots {
                sum = sum.add(Self::var_expr(&self.vars, group.fid, *day, *p));
            }
            self.engine.add_eq(sum, E::Expr::constant(1));
        }
    }

    fn daily_period_caps(&mut self) {
        if !self.enabled(RuleKey::stundenbegrenzung) {
            return;
        }
        let mut by_class: BTreeMap<String, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class.entry(row.class_name.clone()).or_default().push(row.fid);
        }
        for (_, fids) in &by_class {
            for day in DAYS {
                let cap = daily_cap(day, self.ctx.slots_per_day);
                let mut sum = E::Expr::constant(0);
                for p in 0..cap {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    for fid in fids {
                        sum = sum.add(Self::var_expr(&self.vars, *fid, day, p));
                    }
                }
                self.engine.add_le(sum, E::Expr::constant(cap as i64));
            }
        }
    }

    /// OQ-3: `full` reifies on *exact* capacity, not `>=` — a class with
    /// fewer than `cap` weekly hours on that day is free to start later.
    fn first_period_when_full(&mut self) {
        if !self.enabled(RuleKey::stundenbegrenzung_erste_stunde) {
            return;
        }
        let mut by_class: BTreeMap<String, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class.entry(row.class_name.clone()).or_default().push(row.fid);
        }
        for (_, fids) in &by_class {
            for day in DAYS {
                let cap = daily_cap(day, self.ctx.slots_per_day);
                let mut used = E::Expr::constant(0);
                for p in 0..cap {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    for fid in fids {
                        used = used.add(Self::var_expr(&self.vars, *fid, day, p));
                    }
                }
                let full = self.engine.new_bool_var();
                self.engine
                    .reify_eq(full.clone(), used, E::Expr::constant(cap as i64), cap as i64 + 1);
                if self.ctx.pause_slots.contains(&0) {
                    continue;
                }
                let mut first_period_sum = E::Expr::constant(0);
                for fid in fids {
                    first_period_sum = first_period_sum.add(Self::var_expr(&self.vars, *fid, day, 0));
                }
                // first_period_sum == 1 only when `full`.
                self.engine
                    .add_eq_if(first_period_sum, E::Expr::constant(1), full, fids.len() as i64 + 1);
            }
        }
    }

    fn subject_afternoon(&mut self) {
        if !self.enabled(RuleKey::fach_nachmittag_regeln) {
            return;
        }
        for row in &self.rows {
            match row.afternoon_rule {
                AfternoonRule::Must => {
                    for day in DAYS {
                        for p in 0..MORNING_PERIODS.min(self.ctx.slots_per_day) {
                            if let Some(var) = self.vars.get(&(row.fid, day, p)) {
                                self.engine.add_eq(E::Expr::from(var.clone()), E::Expr::constant(0));
                            }
                        }
                    }
                    let mut afternoon_sum = E::Expr::constant(0);
                    for day in DAYS {
                        for p in MORNING_PERIODS..self.ctx.slots_per_day {
                            if self.ctx.pause_slots.contains(&p) {
                                continue;
                            }
                            afternoon_sum = afternoon_sum.add(Self::var_expr(&self.vars, row.fid, day, p));
                        }
                    }
                    self.engine
                        .add_eq(afternoon_sum, E::Expr::constant(row.weekly_hours as i64));
                }
                AfternoonRule::Never => {
                    for day in DAYS {
                        for p in MORNING_PERIODS..self.ctx.slots_per_day {
                            if let Some(var) = self.vars.get(&(row.fid, day, p)) {
                                self.engine.add_eq(E::Expr::from(var.clone()), E::Expr::constant(0));
                            }
                        }
                    }
                }
                AfternoonRule::May => {}
            }
        }
    }

    fn afternoon_break(&mut self) {
        if !self.enabled(RuleKey::nachmittag_pause_stunde) {
            return;
        }
        if MORNING_PERIODS >= self.ctx.slots_per_day || MORNING_PERIODS == 0 {
            return;
        }
        // The 6th teaching period (1-based, per the `period + 1` output
        // convention) is the last morning slot, 0-based index
        // `MORNING_PERIODS - 1` — not the first afternoon slot.
        let last_morning_period = MORNING_PERIODS - 1;
        let mut by_class: BTreeMap<String, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class.entry(row.class_name.clone()).or_default().push(row.fid);
        }
        for (_, fids) in &by_class {
            for day in DAYS {
                let mut afternoon_bools = Vec::new();
                for p in MORNING_PERIODS..self.ctx.slots_per_day {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    for fid in fids {
                        if let Some(var) = self.vars.get(&(*fid, day, p)) {
                            afternoon_bools.push(var.clone());
                        }
                    }
                }
                if afternoon_bools.is_empty() {
                    continue;
                }
                let has_afternoon = self.engine.new_or(&afternoon_bools);
                if self.ctx.pause_slots.contains(&last_morning_period) {
                    continue;
                }
                for fid in fids {
                    if let Some(var) = self.vars.get(&(*fid, day, last_morning_period)) {
                        // has_afternoon => last morning period forced off.
                        let not_has_afternoon = self.engine.negate(has_afternoon.clone());
                        self.engine.implies(var.clone(), not_has_afternoon);
                    }
                }
            }
        }
    }

    /// OQ-2: unconditional — the morning minimum applies to every
    /// (class, day), not only when the day already has morning teaching.
    fn morning_minimum(&mut self) {
        if !self.enabled(RuleKey::mittagsschule_vormittag) {
            return;
        }
        let morning_cap = MORNING_PERIODS.min(self.ctx.slots_per_day);
        let mut by_class: BTreeMap<String, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class.entry(row.class_name.clone()).or_default().push(row.fid);
        }
        for (_, fids) in &by_class {
            for day in DAYS {
                let mut sum = E::Expr::constant(0);
                for p in 0..morning_cap {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    for fid in fids {
                        sum = sum.add(Self::var_expr(&self.vars, *fid, day, p));
                    }
                }
                self.engine.add_ge(sum, E::Expr::constant(4));
            }
        }
    }

    fn double_period_discipline(&mut self) {
        if !self.enabled(RuleKey::doppelstundenregel) {
            return;
        }
        let single_at_edges_only = self.enabled(RuleKey::einzelstunde_nur_rand);
        let s = self.ctx.slots_per_day;
        for row in &self.rows {
            for day in DAYS {
                let mut pair_vars: Vec<(u32, E::BoolVar)> = Vec::new();
                let mut single_vars: Vec<(u32, E::BoolVar)> = Vec::new();

                for p in 0..s.saturating_sub(2) {
                    if [p, p + 1, p + 2].iter().any(|q| self.ctx.pause_slots.contains(q)) {
                        continue;
                    }
                    let x0 = Self::var_expr(&self.vars, row.fid, day, p);
                    let x1 = Self::var_expr(&self.vars, row.fid, day, p + 1);
                    let x2 = Self::var_expr(&self.vars, row.fid, day, p + 2);
                    self.engine.add_le(x0.add(x1).add(x2), E::Expr::constant(2));
                }

                for p in 0..s {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    if p + 1 < s && !self.ctx.pause_slots.contains(&(p + 1)) {
                        if let (Some(a), Some(b)) = (
                            self.vars.get(&(row.fid, day, p)).cloned(),
                            self.vars.get(&(row.fid, day, p + 1)).cloned(),
                        ) {
                            let pair = self.engine.new_and(&[a, b]);
                            pair_vars.push((p, pair));
                        }
                    }

                    let Some(cur) = self.vars.get(&(row.fid, day, p)).cloned() else {
                        continue;
                    };
                    let prev_off = p == 0
                        || self.ctx.pause_slots.contains(&(p - 1))
                        || self.vars.get(&(row.fid, day, p - 1)).is_none();
                    let next_off = p + 1 >= s
                        || self.ctx.pause_slots.contains(&(p + 1))
                        || self.vars.get(&(row.fid, day, p + 1)).is_none();
                    let prev_neg = if prev_off {
                        None
                    } else {
                        self.vars.get(&(row.fid, day, p - 1)).cloned().map(|v| self.engine.negate(v))
                    };
                    let next_neg = if next_off {
                        None
                    } else {
                        self.vars.get(&(row.fid, day, p + 1)).cloned().map(|v| self.engine.negate(v))
                    };
                    let mut and_terms = vec![cur.clone()];
                    if let Some(v) = prev_neg {
                        and_terms.push(v);
                    }
                    if let Some(v) = next_neg {
                        and_terms.push(v);
                    }
                    let single = self.engine.new_and(&and_terms);
                    single_vars.push((p, single));
                }

                let pair_sum = pair_vars
                    .iter()
                    .fold(E::Expr::constant(0), |acc, (_, v)| acc.add(E::Expr::from(v.clone())));
                let single_sum = single_vars
                    .iter()
                    .fold(E::Expr::constant(0), |acc, (_, v)| acc.add(E::Expr::from(v.clone())));

                let weekly = row.weekly_hours as i64;
                let count_eq = pair_sum.clone().scale(2).add(single_sum.clone());
                if row.participation == Participation::Curriculum {
                    self.engine.add_eq(count_eq, E::Expr::constant(weekly));
                } else {
                    self.engine.add_le(count_eq, E::Expr::constant(weekly));
                }

                match row.double_period_rule {
                    DoublePeriodRule::Must => {
                        self.engine
                            .add_eq(single_sum.clone(), E::Expr::constant(weekly % 2));
                        if single_at_edges_only {
                            for (p, v) in &single_vars {
                                if *p != 0 && *p != s.saturating_sub(1) {
                                    self.engine.add_eq(E::Expr::from(v.clone()), E::Expr::constant(0));
                                }
                            }
                        }
                        for p in 0..s.saturating_sub(2) {
                            if [p, p + 1, p + 2].iter().any(|q| self.ctx.pause_slots.contains(q)) {
                                continue;
                            }
                            let x0 = Self::var_expr(&self.vars, row.fid, day, p);
                            let x1 = Self::var_expr(&self.vars, row.fid, day, p + 1);
                            let x2 = Self::var_expr(&self.vars, row.fid, day, p + 2);
                            self.engine
                                .add_le(x0.add(x2), x1.add(E::Expr::constant(1)));
                        }
                    }
                    DoublePeriodRule::Never => {
                        for (_, v) in &pair_vars {
                            self.engine.add_eq(E::Expr::from(v.clone()), E::Expr::constant(0));
                        }
                    }
                    DoublePeriodRule::May => {
                        self.engine.add_le(pair_sum.clone(), E::Expr::constant(weekly / 2));
                        let soft = pair_sum.clone().scale(2).sub(single_sum.clone());
                        let weight = self.weight(RuleKey::W_EINZEL_KANN);
                        self.objective_terms.push(soft.scale(weight));
                    }
                    DoublePeriodRule::Should => {
                        let target_pairs = weekly / 2;
                        let missing = self.engine.new_int_var(0, target_pairs.max(0));
                        self.engine.add_ge(
                            E::Expr::from(missing.clone()),
                            E::Expr::constant(target_pairs).sub(pair_sum.clone()),
                        );
                        self.engine.add_ge(E::Expr::from(missing.clone()), E::Expr::constant(0));

                        let extra = self.engine.new_int_var(0, weekly.max(0));
                        self.engine.add_ge(
                            E::Expr::from(extra.clone()),
                            single_sum.clone().sub(E::Expr::constant(weekly % 2)),
                        );
                        self.engine.add_ge(E::Expr::from(extra.clone()), E::Expr::constant(0));

                        let weight = self.weight(RuleKey::W_EINZEL_SOLL);
                        let penalty = E::Expr::from(missing).add(E::Expr::from(extra));
                        self.objective_terms.push(penalty.scale(weight));
                    }
                }
            }
        }
    }

    fn canonical_subject_daily_cap(&mut self) {
        let mut by_class_subject: BTreeMap<(String, SubjectId), Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class_subject
                .entry((row.class_name.clone(), row.canonical_subject_id))
                .or_default()
                .push(row.fid);
        }
        for (_, fids) in by_class_subject {
            for day in DAYS {
                let mut sum = E::Expr::constant(0);
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    for fid in &fids {
                        sum = sum.add(Self::var_expr(&self.vars, *fid, day, p));
                    }
                }
                self.engine.add_le(sum, E::Expr::constant(2));
            }
        }
    }

    fn band_parallel(&mut self) {
        if !self.enabled(RuleKey::bandstunden_parallel) {
            return;
        }
        let mut by_subject: BTreeMap<String, (Vec<&RequirementRow>, Vec<&RequirementRow>, BTreeSet<String>)> =
            BTreeMap::new();
        for row in &self.rows {
            if !row.is_band {
                continue;
            }
            let entry = by_subject
                .entry(row.subject_name.clone())
                .or_insert_with(|| (Vec::new(), Vec::new(), BTreeSet::new()));
            entry.2.insert(row.class_name.clone());
            if row.participation == Participation::Curriculum {
                entry.0.push(row);
            } else {
                entry.1.push(row);
            }
        }

        for (_, (mandatory, optional, classes)) in by_subject {
            if mandatory.is_empty() {
                continue;
            }
            let weekly_hours = mandatory[0].weekly_hours;
            if weekly_hours == 0 || !mandatory.iter().all(|r| r.weekly_hours == weekly_hours) {
                continue;
            }

            let mut parallel_vars: Vec<E::BoolVar> = Vec::new();
            for day in DAYS {
                let mut day_parallel = Vec::new();
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    let parallel = self.engine.new_bool_var();
                    for row in &mandatory {
                        if let Some(var) = self.vars.get(&(row.fid, day, p)) {
                            self.engine
                                .add_eq(E::Expr::from(var.clone()), E::Expr::from(parallel.clone()));
                        }
                    }
                    let mut optional_assigned = E::Expr::constant(0);
                    for row in &optional {
                        if let Some(var) = self.vars.get(&(row.fid, day, p)) {
                            self.engine
                                .add_le(E::Expr::from(var.clone()), E::Expr::from(parallel.clone()));
                            optional_assigned = optional_assigned.add(E::Expr::from(var.clone()));
                        }
                    }
                    for class_name in &classes {
                        let others: Vec<Fid> = self
                            .rows
                            .iter()
                            .filter(|r| {
                                &r.class_name == class_name
                                    && !mandatory.iter().any(|m| m.fid == r.fid)
                                    && !optional.iter().any(|o| o.fid == r.fid)
                            })
                            .map(|r| r.fid)
                            .collect();
                        for fid in others {
                            if let Some(var) = self.vars.get(&(fid, day, p)).cloned() {
                                self.engine.add_le(
                                    E::Expr::from(var),
                                    E::Expr::constant(1).sub(E::Expr::from(parallel.clone())),
                                );
                            }
                        }
                    }
                    if !optional.is_empty() {
                        let weight = self.weight(RuleKey::W_BAND_OPTIONAL);
                        let penalty = E::Expr::constant(optional.len() as i64).sub(optional_assigned);
                        self.objective_terms.push(penalty.scale(weight));
                    }
                    day_parallel.push(parallel.clone());
                    parallel_vars.push(parallel);
                }
                if day_parallel.len() > 1 {
                    let sum = day_parallel
                        .iter()
                        .fold(E::Expr::constant(0), |acc, v| acc.add(E::Expr::from(v.clone())));
                    self.engine.add_le(sum, E::Expr::constant(1));
                }
            }

            let total = parallel_vars
                .iter()
                .fold(E::Expr::constant(0), |acc, v| acc.add(E::Expr::from(v.clone())));
            self.engine.add_eq(total, E::Expr::constant(weekly_hours as i64));
        }
    }

    fn occupancy_indicators(&mut self, fids: &[Fid], day: Day) -> Vec<(u32, E::BoolVar)> {
        let mut occ = Vec::new();
        for p in self.all_periods() {
            if self.ctx.pause_slots.contains(&p) {
                continue;
            }
            let row_vars: Vec<E::BoolVar> = fids
                .iter()
                .filter_map(|fid| self.vars.get(&(*fid, day, p)).cloned())
                .collect();
            if row_vars.is_empty() {
                continue;
            }
            let occ_p = self.engine.new_or(&row_vars);
            occ.push((p, occ_p));
        }
        occ
    }

    fn no_gaps(&mut self) {
        let soft_on = self.enabled(RuleKey::keine_hohlstunden);
        let hard_on = self.enabled(RuleKey::keine_hohlstunden_hard);
        if !soft_on && !hard_on {
            return;
        }
        let mut by_class: BTreeMap<String, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class.entry(row.class_name.clone()).or_default().push(row.fid);
        }
        for (_, fids) in by_class {
            for day in DAYS {
                let occ = self.occupancy_indicators(&fids, day);
                if occ.is_empty() {
                    continue;
                }

                if soft_on {
                    let first = &occ[0].1;
                    let weight_start = self.weight(RuleKey::W_GAPS_START);
                    let term = E::Expr::constant(1).sub(E::Expr::from(first.clone()));
                    self.objective_terms.push(term.scale(weight_start));

                    let weight_inside = self.weight(RuleKey::W_GAPS_INSIDE);
                    for w in occ.windows(2) {
                        let (_, occ_p) = &w[0];
                        let (_, occ_next) = &w[1];
                        let not_occ_p = self.engine.negate(occ_p.clone());
                        let t01 = self.engine.new_and(&[not_occ_p, occ_next.clone()]);
                        self.objective_terms.push(E::Expr::from(t01).scale(weight_inside));
                    }
                }

                if hard_on {
                    // The occupied periods must form a contiguous block:
                    // an on-off-on triple within the day is forbidden.
                    for w in occ.windows(3) {
                        let (_, a) = &w[0];
                        let (_, b) = &w[1];
                        let (_, c) = &w[2];
                        // Forbid on-off-on: a ∧ ¬b ∧ c is disallowed.
                        let not_b = self.engine.negate(b.clone());
                        let pattern = self.engine.new_and(&[a.clone(), not_b, c.clone()]);
                        self.engine.add_eq(E::Expr::from(pattern), E::Expr::constant(0));
                    }
                }
            }
        }
    }

    fn teacher_gaps(&mut self) {
        if !self.enabled(RuleKey::lehrer_hohlstunden_soft) {
            return;
        }
        let mut by_teacher: BTreeMap<TeacherId, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            if self.pool_teacher_ids.contains(&row.teacher_id) {
                continue;
            }
            by_teacher.entry(row.teacher_id).or_default().push(row.fid);
        }

        let weight = self.weight(RuleKey::W_TEACHER_GAPS);
        let day_max = self.weight(RuleKey::TEACHER_GAPS_DAY_MAX);
        let week_max = self.weight(RuleKey::TEACHER_GAPS_WEEK_MAX);

        for (_, fids) in by_teacher {
            let mut week_gap_terms: Vec<E::Expr> = Vec::new();
            for day in DAYS {
                let occ = self.occupancy_indicators(&fids, day);
                if occ.len() < 2 {
                    continue;
                }
                let mut seg_starts = vec![occ[0].1.clone()];
                for w in occ.windows(2) {
                    let (_, prev) = &w[0];
                    let (_, cur) = &w[1];
                    let not_prev = self.engine.negate(prev.clone());
                    let seg = self.engine.new_and(&[cur.clone(), not_prev]);
                    seg_starts.push(seg);
                }
                let segments = seg_starts
                    .iter()
                    .fold(E::Expr::constant(0), |acc, v| acc.add(E::Expr::from(v.clone())));
                let has_teaching = self.engine.new_or(&occ.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>());

                let gaps_raw = self.engine.new_int_var(-1, fids.len() as i64);
                self.engine.add_eq(
                    E::Expr::from(gaps_raw.clone()),
                    segments.sub(E::Expr::constant(1)),
                );
                let gaps_day = self.engine.new_int_var(0, fids.len() as i64);
                self.engine
                    .add_le(E::Expr::from(gaps_day.clone()), E::Expr::from(gaps_raw.clone()));
                self.engine.add_ge(E::Expr::from(gaps_day.clone()), E::Expr::constant(0));
                // gaps_day is only meaningful when has_teaching; otherwise force 0.
                let not_teaching = self.engine.negate(has_teaching);
                self.engine
                    .add_eq_if(E::Expr::from(gaps_day.clone()), E::Expr::constant(0), not_teaching, fids.len() as i64 + 1);

                let over_day = self.engine.new_int_var(0, fids.len() as i64);
                self.engine.add_ge(
                    E::Expr::from(over_day.clone()),
                    E::Expr::from(gaps_day.clone()).sub(E::Expr::constant(day_max)),
                );
                self.objective_terms.push(E::Expr::from(over_day).scale(weight));

                week_gap_terms.push(E::Expr::from(gaps_day));
            }

            if week_gap_terms.is_empty() {
                continue;
            }
            let week_sum = week_gap_terms
                .into_iter()
                .fold(E::Expr::constant(0), |acc, t| acc.add(t));
            let over_week = self.engine.new_int_var(0, fids.len() as i64 * DAYS.len() as i64);
            self.engine.add_ge(
                E::Expr::from(over_week.clone()),
                week_sum.sub(E::Expr::constant(week_max)),
            );
            self.objective_terms.push(E::Expr::from(over_week).scale(weight));
        }
    }

    fn even_distribution(&mut self) {
        if !self.enabled(RuleKey::gleichverteilung) {
            return;
        }
        let weight = self.weight(RuleKey::W_EVEN_DIST);
        let mut by_class: BTreeMap<String, Vec<Fid>> = BTreeMap::new();
        for row in &self.rows {
            by_class.entry(row.class_name.clone()).or_default().push(row.fid);
        }
        for (_, fids) in by_class {
            let weekly_total: i64 = self
                .rows
                .iter()
                .filter(|r| fids.contains(&r.fid))
                .map(|r| r.weekly_hours as i64)
                .sum();
            let avg = weekly_total / DAYS.len() as i64;
            for day in DAYS {
                let mut load = E::Expr::constant(0);
                for p in self.all_periods() {
                    if self.ctx.pause_slots.contains(&p) {
                        continue;
                    }
                    for fid in &fids {
                        load = load.add(Self::var_expr(&self.vars, *fid, day, p));
                    }
                }
                let diff = self.engine.new_int_var(-(weekly_total.max(1)), weekly_total.max(1));
                self.engine
                    .add_eq(E::Expr::from(diff.clone()), load.sub(E::Expr::constant(avg)));
                let abs_diff = self.engine.new_int_var(0, weekly_total.max(1));
                self.engine.add_abs_equality(E::Expr::from(abs_diff.clone()), E::Expr::from(diff));
                self.objective_terms.push(E::Expr::from(abs_diff).scale(weight));
            }
        }
    }

    fn assemble_objective(&mut self) {
        if self.objective_terms.is_empty() {
            return;
        }
        let mut total = E::Expr::constant(0);
        for term in self.objective_terms.drain(..) {
            total = total.add(term);
        }
        self.engine.minimize(total);
    }
}
