//! Search Orchestrator & Decoder (C5, spec §4.5). Owns the
//! generation use case end-to-end: loads requirements, resolves
//! rules, parses the base plan, builds the constraint model, runs the
//! seeded multi-start search, and decodes the winning assignment.
//! Grounded in
//! `examples/original_source/backend/app/domain/planner/service.py`
//! (the search loop and decode step) and
//! `examples/original_source/backend/app/infrastructure/solver/ortools_adapter.py`
//! (value-hint seeding).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::domain::base_plan::{BasePlanContext, BasePlanDocument, BasePlanParser};
use crate::domain::loader::{RequirementSet, RequirementsRepository};
use crate::domain::rules::{RuleOverrides, RuleProfileRow, RuleResolver};
use crate::domain::types::{
    ClassId, Day, PlanningPeriodId, RoomId, SubjectId, TeacherId, TenantId, VersionId, WorkdayMask,
};
use crate::engine::solver_engine::{SolveStatus, SolverEngine};
use crate::error::PlannerError;
use crate::model_builder::{build_requirement_rows, ModelBuilder, RequirementRow};

pub trait RuleProfileRepository: Send + Sync {
    fn find(&self, rule_profile_id: i64) -> Result<Option<RuleProfileRow>, PlannerError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleProfileRepository {
    pub profiles: HashMap<i64, RuleProfileRow>,
}

impl RuleProfileRepository for InMemoryRuleProfileRepository {
    fn find(&self, rule_profile_id: i64) -> Result<Option<RuleProfileRow>, PlannerError> {
        Ok(self.profiles.get(&rule_profile_id).cloned())
    }
}

pub trait BasePlanRepository: Send + Sync {
    fn load(&self, planning_period_id: PlanningPeriodId) -> Result<BasePlanDocument, PlannerError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBasePlanRepository {
    pub documents: HashMap<PlanningPeriodId, BasePlanDocument>,
}

impl BasePlanRepository for InMemoryBasePlanRepository {
    fn load(&self, planning_period_id: PlanningPeriodId) -> Result<BasePlanDocument, PlannerError> {
        Ok(self.documents.get(&planning_period_id).cloned().unwrap_or_default())
    }
}

/// Header fields the response payload doesn't carry but the Plan row
/// needs (spec §4.5 "Persistence contract").
pub struct PlanHeader<'a> {
    pub name: &'a str,
    pub comment: Option<&'a str>,
    pub rule_profile_id: Option<i64>,
    pub version_id: Option<VersionId>,
    pub seed: i64,
}

/// The persistence contract of spec §4.5/§6: one header row plus one
/// row per decoded slot, written only when `dry_run=false`.
pub trait PlanSink: Send + Sync {
    fn persist(&self, header: &PlanHeader, plan: &GenerateResponse) -> Result<Option<i64>, PlannerError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPlanSink;

impl PlanSink for InMemoryPlanSink {
    fn persist(&self, _header: &PlanHeader, _plan: &GenerateResponse) -> Result<Option<i64>, PlannerError> {
        Ok(Some(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(default = "default_true")]
    pub multi_start: bool,
    pub max_attempts: Option<u32>,
    pub patience: Option<u32>,
    pub time_per_attempt: Option<f64>,
    #[serde(default = "default_true")]
    pub randomize_search: bool,
    pub base_seed: i64,
    #[serde(default = "default_seed_step")]
    pub seed_step: i64,
    #[serde(default = "default_true")]
    pub use_value_hints: bool,
}

fn default_true() -> bool {
    true
}

fn default_seed_step() -> i64 {
    17
}

impl SearchParams {
    fn resolved(&self, config: &AppConfig) -> (u32, u32, f64) {
        (
            self.max_attempts.unwrap_or(config.default_max_attempts),
            self.patience.unwrap_or(config.default_patience),
            self.time_per_attempt.unwrap_or(config.default_time_per_attempt),
        )
    }
}

pub struct GenerateInput {
    pub tenant_id: TenantId,
    pub planning_period_id: PlanningPeriodId,
    pub name: String,
    pub rule_profile_id: Option<i64>,
    pub override_rules: Option<RuleOverrides>,
    pub version_id: Option<VersionId>,
    pub comment: Option<String>,
    pub dry_run: bool,
    pub params: SearchParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotOut {
    pub class_id: ClassId,
    pub day: Day,
    pub period: u32,
    pub subject_id: SubjectId,
    pub teacher_id: TeacherId,
    pub room_id: Option<RoomId>,
    pub room_name: Option<String>,
    pub is_fixed: bool,
    pub is_flexible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotMetaOut {
    pub index: u32,
    pub label: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub is_pause: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub plan_id: Option<i64>,
    pub status: String,
    pub score: Option<f64>,
    pub objective_value: Option<f64>,
    pub slots: Vec<SlotOut>,
    pub slots_meta: Vec<SlotMetaOut>,
    pub rules_snapshot: BTreeMap<String, serde_json::Value>,
    pub rule_keys_active: Vec<String>,
    pub params_used: SearchParams,
    pub planning_period_id: PlanningPeriodId,
}

impl Serialize for SearchParams {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SearchParams", 8)?;
        state.serialize_field("multi_start", &self.multi_start)?;
        state.serialize_field("max_attempts", &self.max_attempts)?;
        state.serialize_field("patience", &self.patience)?;
        state.serialize_field("time_per_attempt", &self.time_per_attempt)?;
        state.serialize_field("randomize_search", &self.randomize_search)?;
        state.serialize_field("base_seed", &self.base_seed)?;
        state.serialize_field("seed_step", &self.seed_step)?;
        state.serialize_field("use_value_hints", &self.use_value_hints)?;
        state.end()
    }
}

pub struct PlannerService<E: SolverEngine> {
    requirements: Box<dyn RequirementsRepository>,
    rule_profiles: Box<dyn RuleProfileRepository>,
    base_plans: Box<dyn BasePlanRepository>,
    plan_sink: Box<dyn PlanSink>,
    config: AppConfig,
    _engine: std::marker::PhantomData<E>,
}

impl<E: SolverEngine + Default> PlannerService<E> {
    pub fn new(
        requirements: Box<dyn RequirementsRepository>,
        rule_profiles: Box<dyn RuleProfileRepository>,
        base_plans: Box<dyn BasePlanRepository>,
        plan_sink: Box<dyn PlanSink>,
        config: AppConfig,
    ) -> Self {
        Self {
            requirements,
            rule_profiles,
            base_plans,
            plan_sink,
            config,
            _engine: std::marker::PhantomData,
        }
    }

    pub fn generate(&self, input: GenerateInput) -> Result<GenerateResponse, PlannerError> {
        let set = self
            .requirements
            .load(input.tenant_id, input.planning_period_id, input.version_id)?;

        let profile = match input.rule_profile_id {
            Some(id) => Some(
                self.rule_profiles
                    .find(id)?
                    .ok_or_else(|| PlannerError::NotFound(format!("Regelprofil {id} nicht gefunden.")))?,
            ),
            None => None,
        };
        let (rules, active_keys) = RuleResolver::resolve(profile.as_ref(), input.override_rules.as_ref());

        let doc = self.base_plans.load(input.planning_period_id)?;
        let rows = build_requirement_rows(&set);
        let picker_rows: Vec<(u32, String, String, u32)> = rows
            .iter()
            .map(|r| (r.fid, r.class_name.clone(), r.subject_name.clone(), r.weekly_hours))
            .collect();
        let class_id_to_name: HashMap<ClassId, String> =
            set.classes.values().map(|c| (c.id, c.name.clone())).collect();
        let subject_id_to_name: HashMap<SubjectId, String> =
            set.subjects.values().map(|s| (s.id, s.name.clone())).collect();
        let ctx = BasePlanParser::parse(&doc, &picker_rows, &class_id_to_name, &subject_id_to_name)?;

        let teacher_workdays: HashMap<TeacherId, WorkdayMask> =
            set.teachers.values().map(|t| (t.id, t.workdays)).collect();

        let (max_attempts, patience, time_per_attempt) = input.params.resolved(&self.config);
        let attempts = if input.params.multi_start { max_attempts.max(1) } else { 1 };

        let mut best: Option<(SolveStatus, Option<f64>, HashMap<(u32, Day, u32), bool>, i64)> = None;
        let mut patience_counter = patience;

        for i in 0..attempts {
            let seed = if input.params.multi_start {
                input.params.base_seed + i as i64 * input.params.seed_step
            } else {
                input.params.base_seed
            };

            let engine = E::default();
            let pool_teacher_ids = set.pool_teacher_ids.clone();
            let builder = ModelBuilder::new(engine, rows.clone(), &ctx, &rules, &pool_teacher_ids, &teacher_workdays);
            let built = builder.build();

            let hints: Vec<(E::BoolVar, bool)> = if input.params.use_value_hints {
                value_hints::<E>(&rows, &ctx, &built.vars, seed)
            } else {
                Vec::new()
            };

            let mut engine = built.engine;
            let outcome = engine.solve(time_per_attempt, seed, &hints);
            let status = outcome.status;

            if outcome.is_usable() {
                let mut assignment = HashMap::new();
                for ((fid, day, p), var) in &built.vars {
                    let value = engine.bool_value(var, &outcome.response);
                    if value {
                        assignment.insert((*fid, *day, *p), true);
                    }
                }
                let is_better = match &best {
                    None => true,
                    Some((best_status, best_obj, _, _)) => {
                        status == SolveStatus::Optimal && *best_status != SolveStatus::Optimal
                            || score_of(outcome.objective_value) > score_of(*best_obj)
                    }
                };
                if is_better {
                    best = Some((status, outcome.objective_value, assignment, seed));
                }
                if status == SolveStatus::Optimal {
                    break;
                }
                patience_counter = patience_counter.saturating_sub(1);
                if patience_counter == 0 {
                    break;
                }
            } else {
                patience_counter = patience_counter.saturating_sub(1);
                if patience_counter == 0 {
                    break;
                }
            }
        }

        let Some((status, objective_value, assignment, winning_seed)) = best else {
            return Err(PlannerError::SolverInfeasible);
        };

        let slots = decode(&rows, &set, &ctx, &assignment);
        let slots_meta: Vec<SlotMetaOut> = ctx
            .slots_meta
            .iter()
            .map(|m| SlotMetaOut {
                index: m.index,
                label: m.label.clone(),
                start: m.start.clone(),
                end: m.end.clone(),
                is_pause: m.is_pause,
            })
            .collect();

        let rules_snapshot: BTreeMap<String, serde_json::Value> = rules
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    crate::domain::rules::RuleValue::Bool(b) => serde_json::Value::Bool(*b),
                    crate::domain::rules::RuleValue::Weight(w) => serde_json::Value::from(*w),
                };
                (k.as_str().to_string(), value)
            })
            .collect();
        let rule_keys_active: Vec<String> = active_keys.iter().map(|k| k.as_str().to_string()).collect();

        let response = GenerateResponse {
            plan_id: None,
            status: match status {
                SolveStatus::Optimal => "OPTIMAL".to_string(),
                _ => "FEASIBLE".to_string(),
            },
            score: Some(score_of(objective_value)),
            objective_value,
            slots,
            slots_meta,
            rules_snapshot,
            rule_keys_active,
            params_used: input.params,
            planning_period_id: input.planning_period_id,
        };

        let response = if input.dry_run {
            response
        } else {
            let header = PlanHeader {
                name: &input.name,
                comment: input.comment.as_deref(),
                rule_profile_id: input.rule_profile_id,
                version_id: input.version_id,
                seed: winning_seed,
            };
            let plan_id = self.plan_sink.persist(&header, &response)?;
            GenerateResponse { plan_id, ..response }
        };

        Ok(response)
    }
}

fn score_of(objective_value: Option<f64>) -> f64 {
    let penalty = objective_value.unwrap_or(0.0).max(0.0);
    1000.0 / (1.0 + penalty)
}

/// Seeds one-hints: for each requirement, shuffle candidate
/// `(day, period<min(6,S))` pairs using a PRNG keyed by `seed` and hint
/// the first `weekly_hours` of them to 1, matching
/// `ortools_adapter.py::add_value_hints_evenly`.
fn value_hints<E: SolverEngine>(
    rows: &[RequirementRow],
    ctx: &BasePlanContext,
    vars: &HashMap<(u32, Day, u32), E::BoolVar>,
    seed: i64,
) -> Vec<(E::BoolVar, bool)> {
    let mut rng = StdRng::seed_from_u64(seed as u64);
    let morning_cap = 6u32.min(ctx.slots_per_day);
    let mut hinted: BTreeSet<(u32, Day, u32)> = BTreeSet::new();
    let mut hints = Vec::new();

    for row in rows {
        let mut candidates: Vec<(Day, u32)> = Vec::new();
        for day in crate::domain::types::DAYS {
            for p in 0..morning_cap {
                if ctx.pause_slots.contains(&p) {
                    continue;
                }
                candidates.push((day, p));
            }
        }
        candidates.shuffle(&mut rng);

        let mut given = 0u32;
        for (day, p) in candidates {
            if given >= row.weekly_hours {
                break;
            }
            let key = (row.fid, day, p);
            if hinted.contains(&key) {
                continue;
            }
            if let Some(var) = vars.get(&key) {
                hints.push((var.clone(), true));
                hinted.insert(key);
                given += 1;
            }
        }
    }
    hints
}

fn decode(
    rows: &[RequirementRow],
    set: &RequirementSet,
    ctx: &BasePlanContext,
    assignment: &HashMap<(u32, Day, u32), bool>,
) -> Vec<SlotOut> {
    let mut slots = Vec::new();
    for row in rows {
        for day in crate::domain::types::DAYS {
            for p in 0..ctx.slots_per_day {
                if !assignment.get(&(row.fid, day, p)).copied().unwrap_or(false) {
                    continue;
                }
                let is_fixed = ctx
                    .class_fixed_lookup
                    .get(&row.class_name)
                    .and_then(|by_day| by_day.get(&day))
                    .map(|set| set.contains(&p))
                    .unwrap_or(false);
                let is_flexible = ctx
                    .flexible_slot_lookup
                    .get(&(row.class_name.clone(), day, p))
                    .map(|fids| fids.contains(&row.fid))
                    .unwrap_or(false);
                let room_id = set
                    .subjects
                    .get(&row.subject_id)
                    .and_then(|s| s.required_room_id);
                let room_name = room_id.and_then(|rid| set.rooms.get(&rid)).map(|r| r.name.clone());
                slots.push(SlotOut {
                    class_id: row.class_id,
                    day,
                    period: p + 1,
                    subject_id: row.subject_id,
                    teacher_id: row.teacher_id,
                    room_id,
                    room_name,
                    is_fixed,
                    is_flexible,
                });
            }
        }
    }
    slots
}
