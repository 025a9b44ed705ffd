//! Thin MILP model wrapper around good_lp.
//!
//! Variables, constraints, and the objective are collected first and handed
//! to a worker thread for the solve, so a stuck solve can be abandoned after
//! the configured timeout. An abandoned worker keeps running until the solver
//! returns; its result is dropped.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use good_lp::{
    Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    microlp, variable,
};
use tracing::debug;

use crate::error::{DispatchError, Result};

/// A minimisation problem under construction.
pub struct Model {
    label: String,
    vars: ProblemVariables,
    handles: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective: Expression,
}

impl Model {
    /// `label` names the problem in errors and logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vars: ProblemVariables::new(),
            handles: Vec::new(),
            constraints: Vec::new(),
            objective: Expression::default(),
        }
    }

    fn track(&mut self, v: Variable) -> Variable {
        self.handles.push(v);
        v
    }

    /// Continuous variable in `[min, max]`.
    pub fn bounded(&mut self, min: f64, max: f64) -> Variable {
        let v = self.vars.add(variable().min(min).max(max));
        self.track(v)
    }

    /// Continuous variable in `[0, inf)`.
    pub fn non_negative(&mut self) -> Variable {
        let v = self.vars.add(variable().min(0.0));
        self.track(v)
    }

    pub fn binary(&mut self) -> Variable {
        let v = self.vars.add(variable().binary());
        self.track(v)
    }

    pub fn constrain(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn add_cost(&mut self, term: Expression) {
        self.objective += term;
    }

    pub fn variable_count(&self) -> usize {
        self.handles.len()
    }

    /// Solves with the pure-Rust microlp backend.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Infeasible`] / [`DispatchError::Unbounded`] as
    ///   reported by the solver.
    /// - [`DispatchError::SolverTimeout`] if no answer arrives in `timeout`.
    /// - [`DispatchError::Solver`] for any other solver failure.
    pub fn solve(self, timeout: Duration) -> Result<Values> {
        let Self {
            label,
            vars,
            handles,
            constraints,
            objective,
        } = self;
        debug!(
            problem = %label,
            variables = handles.len(),
            constraints = constraints.len(),
            "solving"
        );

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("dispatch-solver".to_string())
            .spawn(move || {
                let mut problem = vars.minimise(objective).using(microlp);
                for c in constraints {
                    problem = problem.with(c);
                }
                let outcome = problem.solve().map(|solution| {
                    handles
                        .iter()
                        .map(|&v| (v, solution.value(v)))
                        .collect::<HashMap<_, _>>()
                });
                // receiver may be gone after a timeout
                let _ = tx.send(outcome);
            })?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(values)) => Ok(Values(values)),
            Ok(Err(ResolutionError::Infeasible)) => Err(DispatchError::Infeasible(label)),
            Ok(Err(ResolutionError::Unbounded)) => Err(DispatchError::Unbounded(label)),
            Ok(Err(other)) => Err(DispatchError::Solver(format!("{label}: {other}"))),
            Err(RecvTimeoutError::Timeout) => Err(DispatchError::SolverTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(DispatchError::Solver(format!(
                "{label}: solver thread exited without a result"
            ))),
        }
    }
}

/// Optimal variable values.
#[derive(Debug, Clone)]
pub struct Values(HashMap<Variable, f64>);

impl Values {
    pub fn get(&self, v: Variable) -> f64 {
        self.0.get(&v).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use good_lp::constraint;

    #[test]
    fn solves_small_lp() {
        let mut m = Model::new("lp");
        let x = m.bounded(0.0, 10.0);
        let y = m.non_negative();
        m.constrain(constraint!(x + y >= 4.0));
        m.add_cost(x * 2.0 + y * 1.0);
        let values = m.solve(Duration::from_secs(5)).unwrap();
        assert!(values.get(x).abs() < 1e-6);
        assert!((values.get(y) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn binary_exclusion_holds() {
        let mut m = Model::new("milp");
        let a = m.bounded(0.0, 5.0);
        let b = m.bounded(0.0, 5.0);
        let flag = m.binary();
        m.constrain(constraint!(a + flag * 100.0 <= 100.0));
        m.constrain(constraint!(b - flag * 100.0 <= 0.0));
        // rewards both, but only one may be nonzero
        m.add_cost(a * -1.0 + b * -2.0);
        let values = m.solve(Duration::from_secs(5)).unwrap();
        assert!(values.get(a).abs() < 1e-6);
        assert!((values.get(b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn infeasible_is_reported() {
        let mut m = Model::new("broken");
        let x = m.bounded(0.0, 1.0);
        m.constrain(constraint!(x >= 2.0));
        m.add_cost(x * 1.0);
        let err = m.solve(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, DispatchError::Infeasible(ref l) if l == "broken"));
    }
}
