use std::rc::Rc;

use crate::error::OdeError;
use crate::solvers::Method;
use crate::system::System;
use crate::traits::{StepContext, Stepper};

/// Threshold below which a remaining interval counts as covered, and the
/// floor term of the mixed error scale.
pub(crate) const TINY: f64 = 1e-30;

const SAFETY: f64 = 0.9;
const PGROW: f64 = -0.2;
const PSHRINK: f64 = -0.25;

/// Marches one system through time with a chosen stepper.
///
/// The driver owns the committed base point `(t, x, dx)` and the tentative
/// triplet the stepper writes into, and keeps `dx` equal to the field
/// evaluated at `(x, t)` after every state change. It offers fixed-step
/// marching and embedded-error adaptive marching with proportional step
/// control. Several drivers may share one system; a driver never mutates
/// the system it is bound to.
pub struct Driver {
    system: Rc<System>,
    stepper: Box<dyn Stepper>,
    method: Option<Method>,
    t: f64,
    x: Vec<f64>,
    dx: Vec<f64>,
    new_t: f64,
    new_x: Vec<f64>,
    err_x: Vec<f64>,
    tolerance: f64,
    stepsize: f64,
    max_steps: usize,
    min_stepsize: f64,
    evals: usize,
}

impl Driver {
    pub fn new(
        system: Rc<System>,
        method: Method,
        x0: &[f64],
        t0: f64,
    ) -> Result<Self, OdeError> {
        let stepper = method.build(system.dimension());
        Self::assemble(system, stepper, Some(method), x0, t0)
    }

    /// Binds a caller-supplied stepper instead of a built-in variant.
    ///
    /// The stepper's buffers must match the system dimension; such a driver
    /// cannot be rebound to a system of a different dimension.
    pub fn with_stepper(
        system: Rc<System>,
        stepper: Box<dyn Stepper>,
        x0: &[f64],
        t0: f64,
    ) -> Result<Self, OdeError> {
        Self::assemble(system, stepper, None, x0, t0)
    }

    fn assemble(
        system: Rc<System>,
        stepper: Box<dyn Stepper>,
        method: Option<Method>,
        x0: &[f64],
        t0: f64,
    ) -> Result<Self, OdeError> {
        let dim = system.dimension();
        if x0.len() != dim {
            return Err(OdeError::DimensionMismatch {
                expected: dim,
                got: x0.len(),
            });
        }
        let mut driver = Driver {
            system,
            stepper,
            method,
            t: t0,
            x: x0.to_vec(),
            dx: vec![0.0; dim],
            new_t: t0,
            new_x: vec![0.0; dim],
            err_x: vec![0.0; dim],
            tolerance: 1e-6,
            stepsize: 0.0,
            max_steps: 100_000,
            min_stepsize: TINY,
            evals: 0,
        };
        driver.refresh_derivative()?;
        Ok(driver)
    }

    /// Rebinds the driver to another system and restarts from `(x0, t0)`.
    pub fn set_system(
        &mut self,
        system: Rc<System>,
        x0: &[f64],
        t0: f64,
    ) -> Result<(), OdeError> {
        let dim = system.dimension();
        if x0.len() != dim {
            return Err(OdeError::DimensionMismatch {
                expected: dim,
                got: x0.len(),
            });
        }
        if dim != self.x.len() {
            match self.method {
                Some(method) => self.stepper = method.build(dim),
                None => {
                    return Err(OdeError::DimensionMismatch {
                        expected: self.x.len(),
                        got: dim,
                    });
                }
            }
            self.x = vec![0.0; dim];
            self.dx = vec![0.0; dim];
            self.new_x = vec![0.0; dim];
            self.err_x = vec![0.0; dim];
        }
        self.system = system;
        self.set_initial_condition(x0, t0)
    }

    /// Restarts the march from `(x0, t0)` and re-evaluates the derivative.
    pub fn set_initial_condition(&mut self, x0: &[f64], t0: f64) -> Result<(), OdeError> {
        if x0.len() != self.x.len() {
            return Err(OdeError::DimensionMismatch {
                expected: self.x.len(),
                got: x0.len(),
            });
        }
        self.x.copy_from_slice(x0);
        self.t = t0;
        self.new_t = t0;
        self.refresh_derivative()
    }

    pub fn set_tolerance(&mut self, tolerance: f64) -> Result<(), OdeError> {
        if !(tolerance > 0.0) {
            return Err(OdeError::InvalidTuning {
                what: "tolerance",
                value: tolerance,
            });
        }
        self.tolerance = tolerance;
        Ok(())
    }

    /// Sets the step size; its sign is a direction hint that the solvers
    /// realign automatically. Zero and non-finite arguments are rejected.
    pub fn set_stepsize(&mut self, stepsize: f64) -> Result<(), OdeError> {
        if stepsize == 0.0 || !stepsize.is_finite() {
            return Err(OdeError::InvalidTuning {
                what: "stepsize",
                value: stepsize,
            });
        }
        self.stepsize = stepsize;
        Ok(())
    }

    pub fn set_max_steps(&mut self, max_steps: usize) -> Result<(), OdeError> {
        if max_steps == 0 {
            return Err(OdeError::InvalidTuning {
                what: "max_steps",
                value: 0.0,
            });
        }
        self.max_steps = max_steps;
        Ok(())
    }

    pub fn set_min_stepsize(&mut self, min_stepsize: f64) -> Result<(), OdeError> {
        if !(min_stepsize > 0.0) {
            return Err(OdeError::InvalidTuning {
                what: "min_stepsize",
                value: min_stepsize,
            });
        }
        self.min_stepsize = min_stepsize;
        Ok(())
    }

    pub fn current_t(&self) -> f64 {
        self.t
    }

    pub fn current_x(&self) -> &[f64] {
        &self.x
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn stepsize(&self) -> f64 {
        self.stepsize
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn min_stepsize(&self) -> f64 {
        self.min_stepsize
    }

    /// Number of field evaluations performed through this driver, counting
    /// stage evaluations of every trial step (rejected ones included) and
    /// each base-point re-evaluation.
    pub fn evaluations(&self) -> usize {
        self.evals
    }

    pub fn has_error_estimate(&self) -> bool {
        self.stepper.properties().has_error_estimate
    }

    /// Marches to `t_end` with constant steps of the configured size.
    ///
    /// The sign of the step size is aligned with the direction of `t_end`
    /// first. Whole steps are taken while another one still falls short of
    /// the target, then a final partial step lands on it exactly. Returns a
    /// copy of the state at `t_end`.
    pub fn solve_fixed(&mut self, t_end: f64) -> Result<Vec<f64>, OdeError> {
        if self.stepsize == 0.0 {
            return Err(OdeError::InvalidTuning {
                what: "stepsize",
                value: self.stepsize,
            });
        }
        if (t_end - self.t) * self.stepsize < 0.0 {
            self.stepsize = -self.stepsize;
        }
        let derivatives = self.stepper.properties().derivatives_per_step;
        while (t_end - self.t - self.stepsize) * self.stepsize > 0.0 {
            self.try_step(self.stepsize)?;
            self.evals += derivatives;
            self.commit_step()?;
        }
        let h = t_end - self.t;
        self.try_step(h)?;
        self.evals += derivatives;
        self.commit_step()?;
        Ok(self.x.clone())
    }

    /// Marches to `t_end` under embedded-error step control.
    ///
    /// Each outer iteration trials the persistent step size (clamped so it
    /// never overshoots the target), shrinks it against the mixed
    /// absolute/relative error scale until the step is acceptable, commits,
    /// and regrows the persistent size for the next round. The accepted
    /// trial magnitude is what the next iteration resumes from.
    pub fn solve_adaptive(&mut self, t_end: f64) -> Result<Vec<f64>, OdeError> {
        let props = self.stepper.properties();
        if !props.has_error_estimate {
            return Err(OdeError::NoErrorEstimate);
        }
        if self.stepsize == 0.0 {
            self.stepsize = t_end - self.t;
        }
        if (t_end - self.t) * self.stepsize < 0.0 {
            self.stepsize = -self.stepsize;
        }
        let errcon = (5.0 / SAFETY).powf(1.0 / PGROW);
        for _ in 0..self.max_steps {
            if (t_end - self.t).abs() <= TINY {
                return Ok(self.x.clone());
            }
            let remaining = t_end - self.t;
            let mut h = self.stepsize;
            if remaining * (self.stepsize - remaining) > 0.0 {
                h = remaining;
            }
            let err_max = loop {
                self.try_step(h)?;
                self.evals += props.derivatives_per_step;
                let mut err_max = 0.0_f64;
                for i in 0..self.x.len() {
                    let scale = self.x[i].abs() + (h * self.dx[i]).abs() + TINY;
                    err_max = err_max.max((self.err_x[i] / scale).abs());
                }
                err_max /= self.tolerance;
                if err_max < 1.0 {
                    break err_max;
                }
                let shrunk = SAFETY * h * err_max.powf(PSHRINK);
                h = if h >= 0.0 {
                    shrunk.max(0.1 * h)
                } else {
                    shrunk.min(0.1 * h)
                };
                if self.t + h == self.t {
                    return Err(OdeError::StepUnderflow { t: self.t });
                }
            };
            self.commit_step()?;
            if err_max > errcon {
                self.stepsize = SAFETY * self.stepsize * err_max.powf(PGROW);
            } else {
                self.stepsize *= 5.0;
            }
            if (t_end - self.t).abs() <= TINY {
                return Ok(self.x.clone());
            }
            // Resume the next round from the step that actually succeeded.
            self.stepsize = h;
            if self.stepsize.abs() < self.min_stepsize {
                return Err(OdeError::StepTooSmall {
                    stepsize: self.stepsize,
                    min: self.min_stepsize,
                });
            }
        }
        Err(OdeError::MaxIterationsExceeded {
            limit: self.max_steps,
        })
    }

    fn try_step(&mut self, h: f64) -> Result<(), OdeError> {
        let mut ctx = StepContext {
            t: self.t,
            x: &self.x,
            dx: &self.dx,
            new_t: &mut self.new_t,
            new_x: &mut self.new_x,
            err: &mut self.err_x,
        };
        self.stepper.step(&self.system, &mut ctx, h)
    }

    fn commit_step(&mut self) -> Result<(), OdeError> {
        self.t = self.new_t;
        self.x.copy_from_slice(&self.new_x);
        self.refresh_derivative()
    }

    fn refresh_derivative(&mut self) -> Result<(), OdeError> {
        self.system.eval_into(&self.x, self.t, &mut self.dx)?;
        self.evals += 1;
        Ok(())
    }
}
