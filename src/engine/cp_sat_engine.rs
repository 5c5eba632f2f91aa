//! Production [`SolverEngine`] backed by the real CP-SAT binding,
//! matching the builder calls exercised in
//! `examples/bc-ross-ross/src/model/two_stage_schedule.rs`
//! (`new_bool_var`, `new_int_var`, `add_eq`/`add_le`/`add_ge`,
//! `minimize`, `solve_with_parameters`, `solution_value`).

use cp_sat::builder::{BoolVar, CpModelBuilder, IntVar, LinearExpr};
use cp_sat::proto::{CpSolverStatus, SatParameters};

use super::solver_engine::{LinearTerm, SolveOutcome, SolveStatus, SolverEngine};

/// Thin newtype so [`LinearTerm`] can be implemented for the engine's
/// expression type without running into the orphan rule on
/// `cp_sat::builder::LinearExpr`.
#[derive(Clone)]
pub struct Expr(pub LinearExpr);

impl From<BoolVar> for Expr {
    fn from(v: BoolVar) -> Self {
        Expr(LinearExpr::from(v))
    }
}

impl From<IntVar> for Expr {
    fn from(v: IntVar) -> Self {
        Expr(LinearExpr::from(v))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr(LinearExpr::from(v))
    }
}

impl LinearTerm for Expr {
    fn constant(value: i64) -> Self {
        Expr(LinearExpr::from(value))
    }

    fn add(self, other: Self) -> Self {
        Expr(self.0 + other.0)
    }

    fn sub(self, other: Self) -> Self {
        Expr(self.0 - other.0)
    }

    /// `cp_sat::builder::LinearExpr` has no scalar multiply; scale by
    /// repeated addition/subtraction, the idiom
    /// `model_geneds.rs`/`two_stage_schedule.rs` use for the same need.
    fn scale(self, factor: i64) -> Self {
        if factor == 0 {
            return Expr(LinearExpr::from(0));
        }
        let mut acc = LinearExpr::from(0);
        let reps = factor.unsigned_abs();
        for _ in 0..reps {
            acc = if factor > 0 {
                acc + self.0.clone()
            } else {
                acc - self.0.clone()
            };
        }
        Expr(acc)
    }
}

pub struct CpSatEngine {
    model: CpModelBuilder,
}

impl Default for CpSatEngine {
    fn default() -> Self {
        Self {
            model: CpModelBuilder::default(),
        }
    }
}

impl CpSatEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SolverEngine for CpSatEngine {
    type BoolVar = BoolVar;
    type IntVar = IntVar;
    type Expr = Expr;
    type Response = cp_sat::proto::CpSolverResponse;

    fn new_bool_var(&mut self) -> Self::BoolVar {
        self.model.new_bool_var()
    }

    fn new_int_var(&mut self, lower: i64, upper: i64) -> Self::IntVar {
        self.model.new_int_var(vec![(lower, upper)])
    }

    fn add_eq(&mut self, lhs: Self::Expr, rhs: Self::Expr) {
        self.model.add_eq(lhs.0, rhs.0);
    }

    fn add_le(&mut self, lhs: Self::Expr, rhs: Self::Expr) {
        self.model.add_le(lhs.0, rhs.0);
    }

    fn add_ge(&mut self, lhs: Self::Expr, rhs: Self::Expr) {
        self.model.add_ge(lhs.0, rhs.0);
    }

    fn minimize(&mut self, objective: Self::Expr) {
        self.model.minimize(objective.0);
    }

    fn solve(
        &mut self,
        time_limit_seconds: f64,
        seed: i64,
        hints: &[(Self::BoolVar, bool)],
    ) -> SolveOutcome<Self::Response> {
        for (var, value) in hints {
            self.model.add_hint(var.clone(), *value as i64);
        }

        let mut params = SatParameters::default();
        params.max_time_in_seconds = Some(time_limit_seconds);
        params.random_seed = Some(seed as i32);
        params.num_search_workers = Some(1);
        params.log_search_progress = Some(false);

        let response = self.model.solve_with_parameters(&params);
        let status = match response.status() {
            CpSolverStatus::Optimal => SolveStatus::Optimal,
            CpSolverStatus::Feasible => SolveStatus::Feasible,
            CpSolverStatus::Infeasible => SolveStatus::Infeasible,
            _ => SolveStatus::Unknown,
        };
        let objective_value = if matches!(status, SolveStatus::Optimal | SolveStatus::Feasible) {
            Some(response.objective_value)
        } else {
            None
        };
        SolveOutcome {
            status,
            objective_value,
            response,
        }
    }

    fn bool_value(&self, var: &Self::BoolVar, response: &Self::Response) -> bool {
        var.solution_value(response)
    }

    fn int_value(&self, var: &Self::IntVar, response: &Self::Response) -> i64 {
        var.solution_value(response)
    }
}
