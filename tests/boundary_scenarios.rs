//! Boundary scenarios S1-S6 (spec §8), exercised end-to-end against
//! `PlannerService::generate` with in-memory repositories and the real
//! CP-SAT engine.

use std::collections::HashMap;

use stundenplan_core::domain::base_plan::BasePlanDocument;
use stundenplan_core::domain::loader::InMemoryRepository;
use stundenplan_core::domain::types::{
    AfternoonRule, Class, DoublePeriodRule, Participation, Requirement, Subject, Teacher, WorkdayMask,
};
use stundenplan_core::engine::CpSatEngine;
use stundenplan_core::error::PlannerError;
use stundenplan_core::orchestrator::{
    GenerateInput, InMemoryBasePlanRepository, InMemoryPlanSink, InMemoryRuleProfileRepository,
    PlannerService, SearchParams,
};

const PLANNING_PERIOD: i64 = 1;
const TENANT: i64 = 1;

fn subject(id: i64, name: &str) -> Subject {
    Subject {
        id,
        name: name.to_string(),
        code: None,
        required_room_id: None,
        default_double_period_rule: DoublePeriodRule::May,
        default_afternoon_rule: AfternoonRule::May,
        is_band: false,
        is_ag: false,
        alias_subject_id: None,
    }
}

fn class(id: i64, name: &str) -> Class {
    Class {
        id,
        name: name.to_string(),
    }
}

fn teacher(id: i64, name: &str) -> Teacher {
    Teacher {
        id,
        name: name.to_string(),
        short_code: None,
        workdays: WorkdayMask::default(),
    }
}

fn requirement(class_id: i64, subject_id: i64, teacher_id: i64, weekly_hours: u32) -> Requirement {
    Requirement {
        class_id,
        subject_id,
        teacher_id,
        weekly_hours,
        double_period_rule: DoublePeriodRule::May,
        afternoon_rule: AfternoonRule::May,
        participation: Participation::Curriculum,
        version_id: None,
        planning_period_id: Some(PLANNING_PERIOD),
    }
}

/// `meta.slots` with `count` plain (non-pause) entries, yielding
/// `slots_per_day == count`.
fn base_plan_with_slot_count(count: usize) -> BasePlanDocument {
    let slots: Vec<serde_json::Value> = (0..count)
        .map(|i| serde_json::json!({ "label": format!("{}. Stunde", i + 1), "isPause": false }))
        .collect();
    serde_json::from_value(serde_json::json!({ "meta": { "slots": slots } })).unwrap()
}

fn service(
    repo: InMemoryRepository,
    base_plan: BasePlanDocument,
) -> PlannerService<CpSatEngine> {
    let mut base_plans = HashMap::new();
    base_plans.insert(PLANNING_PERIOD, base_plan);
    PlannerService::new(
        Box::new(repo),
        Box::new(InMemoryRuleProfileRepository::default()),
        Box::new(InMemoryBasePlanRepository { documents: base_plans }),
        Box::new(InMemoryPlanSink::default()),
        Default::default(),
    )
}

fn deterministic_params() -> SearchParams {
    SearchParams {
        multi_start: false,
        max_attempts: Some(1),
        patience: Some(1),
        time_per_attempt: Some(5.0),
        randomize_search: false,
        base_seed: 42,
        seed_step: 17,
        use_value_hints: true,
    }
}

fn input(name: &str, dry_run: bool) -> GenerateInput {
    GenerateInput {
        tenant_id: TENANT,
        planning_period_id: PLANNING_PERIOD,
        name: name.to_string(),
        rule_profile_id: None,
        override_rules: None,
        version_id: None,
        comment: None,
        dry_run,
        params: deterministic_params(),
    }
}

#[test]
fn s1_empty_requirements_is_input_missing() {
    let repo = InMemoryRepository::new("Lehrkräfte-Pool");
    let service = service(repo, BasePlanDocument::default());
    let err = service.generate(input("leer", false)).unwrap_err();
    assert!(matches!(err, PlannerError::InputMissing));
}

#[test]
fn s2_single_requirement_produces_exactly_weekly_hours_slots() {
    let mut repo = InMemoryRepository::new("Lehrkräfte-Pool");
    repo.classes.push(class(1, "1A"));
    repo.subjects.push(subject(10, "Mathe"));
    repo.teachers.push(teacher(100, "Frau Muster"));
    repo.requirements.push(requirement(1, 10, 100, 2));

    let service = service(repo, base_plan_with_slot_count(8));
    let response = service.generate(input("s2", false)).unwrap();

    assert_eq!(response.slots.len(), 2);
    assert!(response.slots.iter().all(|s| s.class_id == 1 && s.subject_id == 10 && s.teacher_id == 100));
    assert_eq!(response.status, "OPTIMAL");
    assert!(response.plan_id.is_some());
}

#[test]
fn s3_fixed_pin_survives_and_total_matches_combined_weekly_hours() {
    let mut repo = InMemoryRepository::new("Lehrkräfte-Pool");
    repo.classes.push(class(1, "1A"));
    repo.subjects.push(subject(10, "Mathe"));
    repo.teachers.push(teacher(100, "Frau Muster"));
    repo.teachers.push(teacher(101, "Herr Beispiel"));
    repo.requirements.push(requirement(1, 10, 100, 2));
    repo.requirements.push(requirement(1, 10, 101, 2));

    let mut doc = base_plan_with_slot_count(8);
    doc.fixed.insert(
        "1".to_string(),
        vec![serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "mon", "slot": 0 })).unwrap()],
    );

    let service = service(repo, doc);
    let response = service.generate(input("s3", false)).unwrap();

    let matching: Vec<_> = response
        .slots
        .iter()
        .filter(|s| s.class_id == 1 && s.subject_id == 10)
        .collect();
    assert_eq!(matching.len(), 4);
    assert!(matching.iter().any(|s| s.is_fixed));
}

#[test]
fn s4_over_pinning_is_base_plan_overflow() {
    let mut repo = InMemoryRepository::new("Lehrkräfte-Pool");
    repo.classes.push(class(1, "1A"));
    repo.subjects.push(subject(10, "Mathe"));
    repo.teachers.push(teacher(100, "Frau Muster"));
    repo.requirements.push(requirement(1, 10, 100, 4));

    let mut doc = base_plan_with_slot_count(8);
    doc.fixed.insert(
        "1".to_string(),
        vec![
            serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "mon", "slot": 0 })).unwrap(),
            serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "mon", "slot": 1 })).unwrap(),
            serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "tue", "slot": 0 })).unwrap(),
            serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "tue", "slot": 1 })).unwrap(),
            serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "wed", "slot": 0 })).unwrap(),
        ],
    );

    let service = service(repo, doc);
    let err = service.generate(input("s4", false)).unwrap_err();
    match err {
        PlannerError::BasePlanOverflow(msg) => {
            assert!(msg.contains("1A"));
            assert!(msg.contains("Mathe"));
        }
        other => panic!("expected BasePlanOverflow, got {other:?}"),
    }
}

#[test]
fn s5_pool_teacher_parallel_pins_do_not_violate_non_overlap() {
    let mut repo = InMemoryRepository::new("Lehrkräfte-Pool");
    repo.classes.push(class(1, "1A"));
    repo.classes.push(class(2, "1B"));
    repo.subjects.push(subject(10, "Foerderunterricht"));
    repo.teachers.push(teacher(999, "Lehrkräfte-Pool"));
    repo.requirements.push(requirement(1, 10, 999, 1));
    repo.requirements.push(requirement(2, 10, 999, 1));

    let mut doc = base_plan_with_slot_count(8);
    doc.fixed.insert(
        "1".to_string(),
        vec![serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "mon", "slot": 0 })).unwrap()],
    );
    doc.fixed.insert(
        "2".to_string(),
        vec![serde_json::from_value(serde_json::json!({ "subjectId": 10, "day": "mon", "slot": 0 })).unwrap()],
    );

    let service = service(repo, doc);
    let response = service.generate(input("s5", false)).unwrap();

    assert!(matches!(response.status.as_str(), "OPTIMAL" | "FEASIBLE"));
    let in_cell: Vec<_> = response
        .slots
        .iter()
        .filter(|s| s.day == stundenplan_core::domain::types::Day::Mo && s.period == 1)
        .collect();
    assert_eq!(in_cell.len(), 2);
}

#[test]
fn s6_dry_run_does_not_assign_a_plan_id() {
    let mut repo = InMemoryRepository::new("Lehrkräfte-Pool");
    repo.classes.push(class(1, "1A"));
    repo.subjects.push(subject(10, "Mathe"));
    repo.teachers.push(teacher(100, "Frau Muster"));
    repo.requirements.push(requirement(1, 10, 100, 2));

    let service = service(repo, base_plan_with_slot_count(8));
    let response = service.generate(input("s6", true)).unwrap();

    assert!(response.plan_id.is_none());
    assert!(matches!(response.status.as_str(), "OPTIMAL" | "FEASIBLE"));
    assert!(!response.slots.is_empty());
}
