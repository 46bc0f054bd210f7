use serde::{Deserialize, Serialize};

use crate::driver::{Driver, TINY};
use crate::error::OdeError;
use crate::trajectory::Trajectory;

/// Knobs for trajectory sampling.
///
/// `max_change` bounds the sup-norm displacement between consecutive stored
/// samples; whenever a grid step moves farther than that, the sampler
/// halves the step and retries, down to `min_step`. `max_points` caps the
/// number of samples stored on each side of the starting time, zero meaning
/// unlimited. `x_min`/`x_max` stop the walk once any state component
/// escapes. `adaptive` selects embedded-error marching over fixed steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleOptions {
    pub x_min: f64,
    pub x_max: f64,
    pub max_points: usize,
    pub max_change: f64,
    pub min_step: f64,
    pub adaptive: bool,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            x_min: f64::NEG_INFINITY,
            x_max: f64::INFINITY,
            max_points: 0,
            max_change: f64::INFINITY,
            min_step: TINY,
            adaptive: true,
        }
    }
}

impl Driver {
    /// Samples the solution through `t0` over the interval between `t1` and
    /// `t2`, listing times from `t1` to `t2`.
    ///
    /// The walk lays samples on a grid of spacing `time_step` (sign
    /// ignored) and densifies it wherever the solution moves faster than
    /// `opts.max_change` per sample. The three reference times may come in
    /// any order: the sampler seeds at `t0`, or first integrates silently
    /// to the nearer endpoint, and reverses the stored sequences as needed
    /// so the output runs from `t1` to `t2`.
    ///
    /// Integration failures reached while walking the grid are not errors:
    /// the trajectory collected so far is returned, and the driver exposes
    /// the last committed state. Failures before the walk begins do
    /// propagate: misuse (bad tuning, wrong state length, an adaptive
    /// request without an error estimate) as well as a field fault while
    /// binding the start state or moving to the near endpoint.
    pub fn solution_at_points(
        &mut self,
        x0: &[f64],
        t0: f64,
        t1: f64,
        t2: f64,
        time_step: f64,
        opts: &SampleOptions,
    ) -> Result<Trajectory, OdeError> {
        if time_step == 0.0 || !time_step.is_finite() {
            return Err(OdeError::InvalidTuning {
                what: "time_step",
                value: time_step,
            });
        }
        if !(opts.max_change > 0.0) {
            return Err(OdeError::InvalidTuning {
                what: "max_change",
                value: opts.max_change,
            });
        }
        if !(opts.min_step > 0.0) {
            return Err(OdeError::InvalidTuning {
                what: "min_step",
                value: opts.min_step,
            });
        }
        if opts.adaptive {
            if !self.has_error_estimate() {
                return Err(OdeError::NoErrorEstimate);
            }
        } else if self.stepsize() == 0.0 {
            return Err(OdeError::InvalidTuning {
                what: "stepsize",
                value: 0.0,
            });
        }

        self.set_initial_condition(x0, t0)?;

        let mut run = SampleRun {
            driver: self,
            time_step: time_step.abs(),
            opts,
            tvals: Vec::new(),
            xvals: Vec::new(),
        };

        let between =
            |a: f64, mid: f64, b: f64| (a <= mid && mid <= b) || (b <= mid && mid <= a);

        if between(t1, t0, t2) {
            // The start lies inside the interval: walk out to each endpoint.
            run.push_current();
            run.extend(t1);
            run.reverse();
            run.driver.set_initial_condition(x0, t0)?;
            run.extend(t2);
        } else if between(t0, t1, t2) {
            // The interval lies ahead: move to its near end without
            // recording, then walk across.
            run.integrate_to(t1)?;
            run.push_current();
            run.extend(t2);
        } else {
            // The near end is t2: walk from it back toward t1, then flip.
            run.integrate_to(t2)?;
            run.push_current();
            run.extend(t1);
            run.reverse();
        }

        Ok(Trajectory {
            t: run.tvals,
            x: run.xvals,
        })
    }
}

/// Working state of one sampling request: the subordinate driver and the
/// output sequences under construction.
struct SampleRun<'a> {
    driver: &'a mut Driver,
    time_step: f64,
    opts: &'a SampleOptions,
    tvals: Vec<f64>,
    xvals: Vec<Vec<f64>>,
}

impl SampleRun<'_> {
    fn integrate_to(&mut self, t: f64) -> Result<Vec<f64>, OdeError> {
        if self.opts.adaptive {
            self.driver.solve_adaptive(t)
        } else {
            self.driver.solve_fixed(t)
        }
    }

    fn push_current(&mut self) {
        self.tvals.push(self.driver.current_t());
        self.xvals.push(self.driver.current_x().to_vec());
    }

    fn reverse(&mut self) {
        self.tvals.reverse();
        self.xvals.reverse();
    }

    /// Walks from the driver's current state to `tfinal`, appending one
    /// sample per (possibly refined) grid step. Returns false as soon as
    /// integration fails, a state component escapes the bounds, or the
    /// per-side sample budget is exhausted; the samples stored so far stay.
    fn extend(&mut self, tfinal: f64) -> bool {
        let direction = if tfinal >= self.driver.current_t() {
            1.0
        } else {
            -1.0
        };
        let tstep = direction * self.time_step;
        let mut count = 0usize;
        loop {
            let last_t = self.driver.current_t();
            let last_x = self.driver.current_x().to_vec();
            let mut dt = tstep;
            loop {
                let mut target = self.driver.current_t() + dt;
                if (target - tfinal) * dt > 0.0 {
                    target = tfinal;
                }
                if self.integrate_to(target).is_err() {
                    return false;
                }
                let dist = sup_distance(self.driver.current_x(), &last_x);
                if dist < self.opts.max_change {
                    break;
                }
                dt *= 0.5;
                if dt.abs() >= self.opts.min_step {
                    // Rewind and retry the half step.
                    if self.driver.set_initial_condition(&last_x, last_t).is_err() {
                        return false;
                    }
                } else {
                    // Refinement bottomed out: keep the move as it stands.
                    break;
                }
            }
            self.push_current();
            count += 1;
            if dt * (self.driver.current_t() - tfinal) >= 0.0 {
                return true;
            }
            for &component in self.driver.current_x() {
                if component < self.opts.x_min || component > self.opts.x_max {
                    return false;
                }
            }
            if self.opts.max_points > 0 && count > self.opts.max_points {
                return false;
            }
        }
    }
}

fn sup_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(lhs, rhs)| (lhs - rhs).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::SampleOptions;
    use crate::driver::Driver;
    use crate::error::OdeError;
    use crate::solvers::Method;
    use crate::system::{FieldFn, Parameters, System};

    fn oscillator_system() -> Rc<System> {
        let field: FieldFn = Box::new(|x, _t, _p, out| {
            out[0] = x[1];
            out[1] = -x[0];
            Ok(())
        });
        Rc::new(System::new(2, Parameters::default(), field).expect("system should build"))
    }

    fn growth_system() -> Rc<System> {
        let field: FieldFn = Box::new(|x, _t, _p, out| {
            out[0] = x[0];
            Ok(())
        });
        Rc::new(System::new(1, Parameters::default(), field).expect("system should build"))
    }

    fn van_der_pol_system() -> Rc<System> {
        let params = Parameters::new(&[("mu", 5.0)]).expect("parameter store should build");
        let field: FieldFn = Box::new(|x, _t, p, out| {
            let mu = p.require("mu")?;
            out[0] = x[1];
            out[1] = mu * (1.0 - x[0] * x[0]) * x[1] - x[0];
            Ok(())
        });
        Rc::new(System::new(2, params, field).expect("system should build"))
    }

    fn assert_monotone(t: &[f64], ascending: bool) {
        for pair in t.windows(2) {
            if ascending {
                assert!(pair[1] >= pair[0], "times are not ascending: {pair:?}");
            } else {
                assert!(pair[1] <= pair[0], "times are not descending: {pair:?}");
            }
        }
    }

    #[test]
    fn displacement_budget_densifies_the_grid() {
        let mut driver =
            Driver::new(van_der_pol_system(), Method::DormandPrince45, &[2.0, 0.0], 0.0)
                .expect("driver should build");
        driver.set_tolerance(1e-6).expect("tolerance is valid");
        driver.set_stepsize(0.1).expect("step size is valid");
        let opts = SampleOptions {
            max_change: 0.1,
            ..SampleOptions::default()
        };
        let traj = driver
            .solution_at_points(&[2.0, 0.0], 0.0, 0.0, 20.0, 1.0, &opts)
            .expect("sampling should succeed");
        assert!(
            traj.len() > 21,
            "relaxation spikes should densify beyond the uniform grid, got {} samples",
            traj.len()
        );
        assert_monotone(&traj.t, true);
        for pair in traj.x.windows(2) {
            let dist = super::sup_distance(&pair[1], &pair[0]);
            assert!(
                dist < 0.1,
                "consecutive samples moved {dist}, above the budget"
            );
        }
    }

    #[test]
    fn swapping_the_endpoints_reverses_both_sequences() {
        let make_driver = || {
            let mut driver =
                Driver::new(oscillator_system(), Method::CashKarp45, &[1.0, 0.0], 0.0)
                    .expect("driver should build");
            driver.set_stepsize(0.1).expect("step size is valid");
            driver
        };
        let opts = SampleOptions::default();
        let forward = make_driver()
            .solution_at_points(&[1.0, 0.0], 0.0, 0.0, 5.0, 0.5, &opts)
            .expect("forward sampling should succeed");
        let backward = make_driver()
            .solution_at_points(&[1.0, 0.0], 0.0, 5.0, 0.0, 0.5, &opts)
            .expect("backward sampling should succeed");
        let mut flipped = backward.clone();
        flipped.reverse();
        assert_eq!(flipped.t, forward.t);
        assert_eq!(flipped.x, forward.x);
        assert_monotone(&forward.t, true);
        assert_monotone(&backward.t, false);
    }

    #[test]
    fn interval_ahead_of_the_start_is_entered_silently() {
        let field: FieldFn = Box::new(|x, t, _p, out| {
            out[0] = if t > 3.0 { f64::NAN } else { -x[0] };
            Ok(())
        });
        let system =
            Rc::new(System::new(1, Parameters::default(), field).expect("system should build"));
        let mut driver = Driver::new(system, Method::DormandPrince45, &[1.0], 0.0)
            .expect("driver should build");
        driver.set_stepsize(0.1).expect("step size is valid");
        let traj = driver
            .solution_at_points(&[1.0], 0.0, 1.0, 10.0, 0.5, &SampleOptions::default())
            .expect("sampling should succeed");
        // Seeded at the near endpoint, extended until the field blows up.
        assert_eq!(traj.len(), 5);
        assert_eq!(traj.t[0], 1.0);
        assert_eq!(*traj.t.last().expect("samples exist"), 3.0);
        assert!(
            driver.current_t() <= 3.5,
            "driver marched past the fault to t = {}",
            driver.current_t()
        );
    }

    #[test]
    fn positioning_failures_propagate() {
        let field: FieldFn = Box::new(|x, t, _p, out| {
            out[0] = if t > 2.0 { f64::NAN } else { -x[0] };
            Ok(())
        });
        let system =
            Rc::new(System::new(1, Parameters::default(), field).expect("system should build"));
        let mut driver = Driver::new(system, Method::DormandPrince45, &[1.0], 0.0)
            .expect("driver should build");
        // The field blows up while still moving to the near endpoint, before
        // any sample is recorded, so the fault is the caller's to see.
        let err = driver
            .solution_at_points(&[1.0], 0.0, 5.0, 10.0, 0.5, &SampleOptions::default())
            .expect_err("a fault before the walk begins must surface");
        assert!(matches!(err, OdeError::Computation(_)));
    }

    #[test]
    fn far_endpoint_ordering_flips_the_walk() {
        let mut driver =
            Driver::new(oscillator_system(), Method::CashKarp45, &[1.0, 0.0], 0.0)
                .expect("driver should build");
        driver.set_stepsize(0.1).expect("step size is valid");
        let traj = driver
            .solution_at_points(
                &[1.0, 0.0],
                0.0,
                10.0,
                5.0,
                0.5,
                &SampleOptions::default(),
            )
            .expect("sampling should succeed");
        assert_eq!(traj.len(), 11);
        assert_eq!(traj.t[0], 10.0);
        assert_eq!(*traj.t.last().expect("samples exist"), 5.0);
        assert_monotone(&traj.t, false);
    }

    #[test]
    fn escaping_the_state_bounds_stops_the_walk() {
        let mut driver = Driver::new(growth_system(), Method::DormandPrince45, &[1.0], 0.0)
            .expect("driver should build");
        let opts = SampleOptions {
            x_max: 5.0,
            ..SampleOptions::default()
        };
        let traj = driver
            .solution_at_points(&[1.0], 0.0, 0.0, 10.0, 0.5, &opts)
            .expect("sampling should succeed");
        let last = traj.x.last().expect("samples exist");
        assert!(
            last[0] > 5.0,
            "the escaping sample itself is recorded, got {}",
            last[0]
        );
        assert!(
            *traj.t.last().expect("samples exist") < 10.0,
            "the walk should stop well before the far endpoint"
        );
    }

    #[test]
    fn per_side_sample_budget_truncates_the_walk() {
        let field: FieldFn = Box::new(|x, _t, _p, out| {
            out[0] = -x[0];
            Ok(())
        });
        let system =
            Rc::new(System::new(1, Parameters::default(), field).expect("system should build"));
        let mut driver = Driver::new(system, Method::DormandPrince45, &[1.0], 0.0)
            .expect("driver should build");
        let opts = SampleOptions {
            max_points: 3,
            ..SampleOptions::default()
        };
        let traj = driver
            .solution_at_points(&[1.0], 0.0, 0.0, 10.0, 1.0, &opts)
            .expect("sampling should succeed");
        // Seed, the degenerate near-end sample, and four walked samples:
        // the budget check fires after the step that exceeds it.
        assert_eq!(traj.len(), 6);
        assert_eq!(*traj.t.last().expect("samples exist"), 4.0);
    }

    #[test]
    fn sampling_validates_its_tuning() {
        let mut driver =
            Driver::new(oscillator_system(), Method::CashKarp45, &[1.0, 0.0], 0.0)
                .expect("driver should build");
        assert!(matches!(
            driver.solution_at_points(
                &[1.0, 0.0],
                0.0,
                0.0,
                1.0,
                0.0,
                &SampleOptions::default()
            ),
            Err(OdeError::InvalidTuning { what: "time_step", .. })
        ));
        let bad_change = SampleOptions {
            max_change: 0.0,
            ..SampleOptions::default()
        };
        assert!(matches!(
            driver.solution_at_points(&[1.0, 0.0], 0.0, 0.0, 1.0, 0.5, &bad_change),
            Err(OdeError::InvalidTuning { what: "max_change", .. })
        ));
        let bad_floor = SampleOptions {
            min_step: -1.0,
            ..SampleOptions::default()
        };
        assert!(matches!(
            driver.solution_at_points(&[1.0, 0.0], 0.0, 0.0, 1.0, 0.5, &bad_floor),
            Err(OdeError::InvalidTuning { what: "min_step", .. })
        ));
        // Fixed-step sampling needs a configured step size.
        let fixed = SampleOptions {
            adaptive: false,
            ..SampleOptions::default()
        };
        assert!(matches!(
            driver.solution_at_points(&[1.0, 0.0], 0.0, 0.0, 1.0, 0.5, &fixed),
            Err(OdeError::InvalidTuning { what: "stepsize", .. })
        ));
    }

    #[test]
    fn adaptive_sampling_needs_an_embedded_stepper() {
        let mut driver =
            Driver::new(oscillator_system(), Method::ClassicRk4, &[1.0, 0.0], 0.0)
                .expect("driver should build");
        assert!(matches!(
            driver.solution_at_points(
                &[1.0, 0.0],
                0.0,
                0.0,
                1.0,
                0.5,
                &SampleOptions::default()
            ),
            Err(OdeError::NoErrorEstimate)
        ));
    }

    #[test]
    fn fixed_step_sampling_walks_the_grid() {
        let mut driver =
            Driver::new(oscillator_system(), Method::ClassicRk4, &[1.0, 0.0], 0.0)
                .expect("driver should build");
        driver.set_stepsize(0.05).expect("step size is valid");
        let opts = SampleOptions {
            adaptive: false,
            ..SampleOptions::default()
        };
        let traj = driver
            .solution_at_points(&[1.0, 0.0], 0.0, 0.0, 2.0, 0.5, &opts)
            .expect("sampling should succeed");
        assert_eq!(traj.len(), 6);
        assert_monotone(&traj.t, true);
        let (t, x) = traj.sample(traj.len() - 1).expect("last sample exists");
        assert_eq!(t, 2.0);
        assert!(
            (x[0] - 2.0f64.cos()).abs() < 1e-6,
            "expected cos(2), got {}",
            x[0]
        );
    }
}
