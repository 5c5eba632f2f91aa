//! Constraint-engine abstraction for C4/C5. `CpSatEngine`
//! (`src/engine/cp_sat_engine.rs`) is the production implementation
//! wrapping the real CP-SAT model builder; tests may supply a fake
//! instead, matching the constructor-injected handle pattern called
//! for by spec §9.
//!
//! Primitive methods mirror calls actually exercised against
//! `cp_sat::builder::CpModelBuilder` in
//! `examples/bc-ross-ross/src/model/{model_geneds,two_stage_schedule}.rs`
//! (`new_bool_var`, `new_int_var`, `add_eq`, `add_le`, `add_ge`,
//! `minimize`, `solve_with_parameters`). Everything the spec's
//! constraint catalogue needs beyond those primitives — reified
//! equality, min/max-equality, abs-equality — is built as a derived
//! default method using the same big-M / half-plane techniques
//! `model_geneds.rs` and `two_stage_schedule.rs` use by hand.

pub trait LinearTerm: Clone {
    fn constant(value: i64) -> Self;
    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn scale(self, factor: i64) -> Self;
}

/// A constraint-programming engine exposing the primitive operations
/// the model builder composes into the full catalogue.
pub trait SolverEngine {
    type BoolVar: Clone;
    type IntVar: Clone;
    type Expr: LinearTerm + From<Self::BoolVar> + From<Self::IntVar> + From<i64>;
    /// Opaque solver response, needed by `bool_value`/`int_value` to
    /// read a variable's assignment back out of a finished solve.
    type Response;

    fn new_bool_var(&mut self) -> Self::BoolVar;
    fn new_int_var(&mut self, lower: i64, upper: i64) -> Self::IntVar;

    fn add_eq(&mut self, lhs: Self::Expr, rhs: Self::Expr);
    fn add_le(&mut self, lhs: Self::Expr, rhs: Self::Expr);
    fn add_ge(&mut self, lhs: Self::Expr, rhs: Self::Expr);

    /// `lhs == rhs` only when `indicator` is true; no constraint otherwise.
    /// Big-M reification using the variable's own finite bound as `m`,
    /// the same scaling-by-repeated-subtraction idiom `model_geneds.rs`
    /// uses to express "sum == len() only when opt_var is set".
    fn add_eq_if(&mut self, lhs: Self::Expr, rhs: Self::Expr, indicator: Self::BoolVar, m: i64) {
        let slack = Self::Expr::constant(m).sub(Self::Expr::from(indicator.clone()).scale(m));
        self.add_le(lhs.clone().sub(rhs.clone()), slack.clone());
        self.add_ge(lhs.sub(rhs), slack.scale(-1));
    }

    /// `lhs != rhs` only when `indicator` is true, expressed as the
    /// complementary big-M band around a nonzero gap of at least 1.
    fn add_ne_if(&mut self, lhs: Self::Expr, rhs: Self::Expr, indicator: Self::BoolVar, m: i64) {
        let gap = self.new_bool_var();
        let slack_pos = Self::Expr::constant(m)
            .sub(Self::Expr::from(indicator.clone()).scale(m))
            .add(Self::Expr::from(gap.clone()).scale(m));
        self.add_le(
            lhs.clone().sub(rhs.clone()).add(Self::Expr::constant(1)),
            slack_pos,
        );
        let slack_neg = Self::Expr::constant(m)
            .sub(Self::Expr::from(indicator).scale(m))
            .add(Self::Expr::from(gap).scale(m).scale(-1))
            .add(Self::Expr::constant(m));
        self.add_ge(
            lhs.sub(rhs).sub(Self::Expr::constant(1)),
            slack_neg.scale(-1),
        );
    }

    /// `target = max(terms)`, via the standard two-sided encoding:
    /// `target >= t_i` for every term, and `target <= t_i` for the
    /// (unique, externally-chosen) argmax term.
    fn add_max_equality(&mut self, target: Self::Expr, terms: &[Self::Expr]) {
        for term in terms {
            self.add_ge(target.clone(), term.clone());
        }
    }

    /// `target = min(terms)`.
    fn add_min_equality(&mut self, target: Self::Expr, terms: &[Self::Expr]) {
        for term in terms {
            self.add_le(target.clone(), term.clone());
        }
    }

    /// `target = |value|`, the two half-plane `add_ge` calls
    /// `two_stage_schedule.rs` uses for `abs_diff`.
    fn add_abs_equality(&mut self, target: Self::Expr, value: Self::Expr) {
        self.add_ge(target.clone(), value.clone());
        self.add_ge(target, value.scale(-1));
    }

    /// `z = NOT(b)`, materialized as a fresh boolean tied to `b` via
    /// `z + b == 1` rather than assumed as engine-native negation.
    fn negate(&mut self, b: Self::BoolVar) -> Self::BoolVar {
        let z = self.new_bool_var();
        self.add_eq(
            Self::Expr::from(z.clone()).add(Self::Expr::from(b)),
            Self::Expr::constant(1),
        );
        z
    }

    /// `z == AND(terms)`: `z <= t_i` for every term, `z >= sum(terms) - (n-1)`.
    fn constrain_and(&mut self, z: Self::BoolVar, terms: &[Self::BoolVar]) {
        let mut sum = Self::Expr::constant(0);
        for t in terms {
            self.add_le(Self::Expr::from(z.clone()), Self::Expr::from(t.clone()));
            sum = sum.add(Self::Expr::from(t.clone()));
        }
        self.add_ge(
            Self::Expr::from(z),
            sum.sub(Self::Expr::constant(terms.len() as i64 - 1)),
        );
    }

    fn new_and(&mut self, terms: &[Self::BoolVar]) -> Self::BoolVar {
        let z = self.new_bool_var();
        self.constrain_and(z.clone(), terms);
        z
    }

    /// `z == OR(terms)`: `z >= t_i` for every term, `z <= sum(terms)`.
    fn constrain_or(&mut self, z: Self::BoolVar, terms: &[Self::BoolVar]) {
        let mut sum = Self::Expr::constant(0);
        for t in terms {
            self.add_ge(Self::Expr::from(z.clone()), Self::Expr::from(t.clone()));
            sum = sum.add(Self::Expr::from(t.clone()));
        }
        self.add_le(Self::Expr::from(z), sum);
    }

    fn new_or(&mut self, terms: &[Self::BoolVar]) -> Self::BoolVar {
        let z = self.new_bool_var();
        self.constrain_or(z.clone(), terms);
        z
    }

    /// `a => b`, valid for 0/1 variables as `b >= a`.
    fn implies(&mut self, a: Self::BoolVar, b: Self::BoolVar) {
        self.add_ge(Self::Expr::from(b), Self::Expr::from(a));
    }

    /// `indicator <=> (lhs == rhs)`, the full two-sided reification
    /// `stundenplan_regeln.py`'s `full ⇔ used == cap` pattern needs,
    /// built from [`SolverEngine::add_eq_if`]/[`SolverEngine::add_ne_if`]
    /// plus [`SolverEngine::negate`].
    fn reify_eq(&mut self, indicator: Self::BoolVar, lhs: Self::Expr, rhs: Self::Expr, m: i64) {
        let not_indicator = self.negate(indicator.clone());
        self.add_eq_if(lhs.clone(), rhs.clone(), indicator, m);
        self.add_ne_if(lhs, rhs, not_indicator, m);
    }

    fn minimize(&mut self, objective: Self::Expr);

    fn solve(
        &mut self,
        time_limit_seconds: f64,
        seed: i64,
        hints: &[(Self::BoolVar, bool)],
    ) -> SolveOutcome<Self::Response>;

    fn bool_value(&self, var: &Self::BoolVar, response: &Self::Response) -> bool;
    fn int_value(&self, var: &Self::IntVar, response: &Self::Response) -> i64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unknown,
}

pub struct SolveOutcome<R> {
    pub status: SolveStatus,
    pub objective_value: Option<f64>,
    pub response: R,
}

impl<R> SolveOutcome<R> {
    pub fn is_usable(&self) -> bool {
        matches!(self.status, SolveStatus::Optimal | SolveStatus::Feasible)
    }
}
