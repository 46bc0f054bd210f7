use serde::{Deserialize, Serialize};

use crate::error::OdeError;
use crate::system::System;
use crate::traits::{StepContext, Stepper, StepperProps};

/// Stepper variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Euler,
    ClassicRk4,
    Fehlberg45,
    CashKarp45,
    DormandPrince45,
}

impl Method {
    pub fn build(self, dim: usize) -> Box<dyn Stepper> {
        match self {
            Method::Euler => Box::new(Euler),
            Method::ClassicRk4 => Box::new(ClassicRk4::new(dim)),
            Method::Fehlberg45 => Box::new(Fehlberg45::new(dim)),
            Method::CashKarp45 => Box::new(CashKarp45::new(dim)),
            Method::DormandPrince45 => Box::new(DormandPrince45::new(dim)),
        }
    }
}

/// Forward Euler. One field evaluation per step, all of it the free base
/// derivative, and no error estimate.
pub struct Euler;

impl Stepper for Euler {
    fn properties(&self) -> StepperProps {
        StepperProps {
            derivatives_per_step: 0,
            has_error_estimate: false,
        }
    }

    fn step(
        &mut self,
        _system: &System,
        ctx: &mut StepContext<'_>,
        h: f64,
    ) -> Result<(), OdeError> {
        for i in 0..ctx.x.len() {
            ctx.new_x[i] = ctx.x[i] + h * ctx.dx[i];
        }
        *ctx.new_t = ctx.t + h;
        Ok(())
    }
}

/// Classic fourth-order Runge-Kutta, fixed step, no error estimate.
pub struct ClassicRk4 {
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl ClassicRk4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Stepper for ClassicRk4 {
    fn properties(&self) -> StepperProps {
        StepperProps {
            derivatives_per_step: 3,
            has_error_estimate: false,
        }
    }

    fn step(&mut self, system: &System, ctx: &mut StepContext<'_>, h: f64) -> Result<(), OdeError> {
        let n = ctx.x.len();

        // k2 = f(t + h/2, x + h/2 * k1)
        for i in 0..n {
            self.tmp[i] = ctx.x[i] + 0.5 * h * ctx.dx[i];
        }
        system.eval_into(&self.tmp, ctx.t + 0.5 * h, &mut self.k2)?;

        // k3 = f(t + h/2, x + h/2 * k2)
        for i in 0..n {
            self.tmp[i] = ctx.x[i] + 0.5 * h * self.k2[i];
        }
        system.eval_into(&self.tmp, ctx.t + 0.5 * h, &mut self.k3)?;

        // k4 = f(t + h, x + h * k3)
        for i in 0..n {
            self.tmp[i] = ctx.x[i] + h * self.k3[i];
        }
        system.eval_into(&self.tmp, ctx.t + h, &mut self.k4)?;

        for i in 0..n {
            ctx.new_x[i] = ctx.x[i]
                + h * ((ctx.dx[i] + self.k4[i]) / 6.0 + (self.k2[i] + self.k3[i]) / 3.0);
        }
        *ctx.new_t = ctx.t + h;
        Ok(())
    }
}

/// Runge-Kutta-Fehlberg 4(5) embedded pair (Fehlberg coefficients).
///
/// Six stages; the fifth-order solution is propagated and the error
/// estimate is the weighted difference of the two orders.
pub struct Fehlberg45 {
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    tmp: Vec<f64>,
}

impl Fehlberg45 {
    pub fn new(dim: usize) -> Self {
        Self {
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Stepper for Fehlberg45 {
    fn properties(&self) -> StepperProps {
        StepperProps {
            derivatives_per_step: 5,
            has_error_estimate: true,
        }
    }

    fn step(&mut self, system: &System, ctx: &mut StepContext<'_>, h: f64) -> Result<(), OdeError> {
        const C2: f64 = 1.0 / 4.0;
        const C3: f64 = 3.0 / 8.0;
        const C4: f64 = 12.0 / 13.0;
        const C5: f64 = 1.0;
        const C6: f64 = 1.0 / 2.0;

        const A21: f64 = 1.0 / 4.0;
        const A31: f64 = 3.0 / 32.0;
        const A32: f64 = 9.0 / 32.0;
        const A41: f64 = 1932.0 / 2197.0;
        const A42: f64 = -7200.0 / 2197.0;
        const A43: f64 = 7296.0 / 2197.0;
        const A51: f64 = 439.0 / 216.0;
        const A52: f64 = -8.0;
        const A53: f64 = 3680.0 / 513.0;
        const A54: f64 = -845.0 / 4104.0;
        const A61: f64 = -8.0 / 27.0;
        const A62: f64 = 2.0;
        const A63: f64 = -3544.0 / 2565.0;
        const A64: f64 = 1859.0 / 4104.0;
        const A65: f64 = -11.0 / 40.0;

        // Fifth-order weights.
        const B1: f64 = 16.0 / 135.0;
        const B3: f64 = 6656.0 / 12825.0;
        const B4: f64 = 28561.0 / 56430.0;
        const B5: f64 = -9.0 / 50.0;
        const B6: f64 = 2.0 / 55.0;

        // Fourth-order weights, kept only for the error difference.
        const D1: f64 = 25.0 / 216.0;
        const D3: f64 = 1408.0 / 2565.0;
        const D4: f64 = 2197.0 / 4104.0;
        const D5: f64 = -1.0 / 5.0;
        const D6: f64 = 0.0;

        const E1: f64 = B1 - D1;
        const E3: f64 = B3 - D3;
        const E4: f64 = B4 - D4;
        const E5: f64 = B5 - D5;
        const E6: f64 = B6 - D6;

        let n = ctx.x.len();

        for i in 0..n {
            self.tmp[i] = ctx.x[i] + h * A21 * ctx.dx[i];
        }
        system.eval_into(&self.tmp, ctx.t + C2 * h, &mut self.k2)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i] + h * (A31 * ctx.dx[i] + A32 * self.k2[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C3 * h, &mut self.k3)?;

        for i in 0..n {
            self.tmp[i] =
                ctx.x[i] + h * (A41 * ctx.dx[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C4 * h, &mut self.k4)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i]
                + h * (A51 * ctx.dx[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C5 * h, &mut self.k5)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i]
                + h * (A61 * ctx.dx[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C6 * h, &mut self.k6)?;

        for i in 0..n {
            ctx.new_x[i] = ctx.x[i]
                + h * (B1 * ctx.dx[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
            ctx.err[i] = h
                * (E1 * ctx.dx[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]);
        }
        *ctx.new_t = ctx.t + h;
        Ok(())
    }
}

/// Cash-Karp 4(5) embedded pair (Cash and Karp, 1990).
pub struct CashKarp45 {
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    tmp: Vec<f64>,
}

impl CashKarp45 {
    pub fn new(dim: usize) -> Self {
        Self {
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Stepper for CashKarp45 {
    fn properties(&self) -> StepperProps {
        StepperProps {
            derivatives_per_step: 5,
            has_error_estimate: true,
        }
    }

    fn step(&mut self, system: &System, ctx: &mut StepContext<'_>, h: f64) -> Result<(), OdeError> {
        const C2: f64 = 1.0 / 5.0;
        const C3: f64 = 3.0 / 10.0;
        const C4: f64 = 3.0 / 5.0;
        const C5: f64 = 1.0;
        const C6: f64 = 7.0 / 8.0;

        const A21: f64 = 1.0 / 5.0;
        const A31: f64 = 3.0 / 40.0;
        const A32: f64 = 9.0 / 40.0;
        const A41: f64 = 3.0 / 10.0;
        const A42: f64 = -9.0 / 10.0;
        const A43: f64 = 6.0 / 5.0;
        const A51: f64 = -11.0 / 54.0;
        const A52: f64 = 5.0 / 2.0;
        const A53: f64 = -70.0 / 27.0;
        const A54: f64 = 35.0 / 27.0;
        const A61: f64 = 1631.0 / 55296.0;
        const A62: f64 = 175.0 / 512.0;
        const A63: f64 = 575.0 / 13824.0;
        const A64: f64 = 44275.0 / 110592.0;
        const A65: f64 = 253.0 / 4096.0;

        // Fifth-order weights.
        const B1: f64 = 37.0 / 378.0;
        const B3: f64 = 250.0 / 621.0;
        const B4: f64 = 125.0 / 594.0;
        const B5: f64 = 0.0;
        const B6: f64 = 512.0 / 1771.0;

        // Fourth-order weights.
        const D1: f64 = 2825.0 / 27648.0;
        const D3: f64 = 18575.0 / 48384.0;
        const D4: f64 = 13525.0 / 55296.0;
        const D5: f64 = 277.0 / 14336.0;
        const D6: f64 = 1.0 / 4.0;

        const E1: f64 = B1 - D1;
        const E3: f64 = B3 - D3;
        const E4: f64 = B4 - D4;
        const E5: f64 = B5 - D5;
        const E6: f64 = B6 - D6;

        let n = ctx.x.len();

        for i in 0..n {
            self.tmp[i] = ctx.x[i] + h * A21 * ctx.dx[i];
        }
        system.eval_into(&self.tmp, ctx.t + C2 * h, &mut self.k2)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i] + h * (A31 * ctx.dx[i] + A32 * self.k2[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C3 * h, &mut self.k3)?;

        for i in 0..n {
            self.tmp[i] =
                ctx.x[i] + h * (A41 * ctx.dx[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C4 * h, &mut self.k4)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i]
                + h * (A51 * ctx.dx[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C5 * h, &mut self.k5)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i]
                + h * (A61 * ctx.dx[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C6 * h, &mut self.k6)?;

        for i in 0..n {
            ctx.new_x[i] = ctx.x[i]
                + h * (B1 * ctx.dx[i] + B3 * self.k3[i] + B4 * self.k4[i] + B6 * self.k6[i]);
            ctx.err[i] = h
                * (E1 * ctx.dx[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]);
        }
        *ctx.new_t = ctx.t + h;
        Ok(())
    }
}

/// Dormand-Prince 5(4) embedded pair (Dormand and Prince, 1980).
///
/// Seven stages whose last row coincides with the fifth-order weights.
/// The first-same-as-last structure is not exploited here: the driver
/// re-evaluates at the new base point after acceptance.
pub struct DormandPrince45 {
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
}

impl DormandPrince45 {
    pub fn new(dim: usize) -> Self {
        Self {
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Stepper for DormandPrince45 {
    fn properties(&self) -> StepperProps {
        StepperProps {
            derivatives_per_step: 6,
            has_error_estimate: true,
        }
    }

    fn step(&mut self, system: &System, ctx: &mut StepContext<'_>, h: f64) -> Result<(), OdeError> {
        const C2: f64 = 1.0 / 5.0;
        const C3: f64 = 3.0 / 10.0;
        const C4: f64 = 4.0 / 5.0;
        const C5: f64 = 8.0 / 9.0;
        const C6: f64 = 1.0;
        const C7: f64 = 1.0;

        const A21: f64 = 1.0 / 5.0;
        const A31: f64 = 3.0 / 40.0;
        const A32: f64 = 9.0 / 40.0;
        const A41: f64 = 44.0 / 45.0;
        const A42: f64 = -56.0 / 15.0;
        const A43: f64 = 32.0 / 9.0;
        const A51: f64 = 19372.0 / 6561.0;
        const A52: f64 = -25360.0 / 2187.0;
        const A53: f64 = 64448.0 / 6561.0;
        const A54: f64 = -212.0 / 729.0;
        const A61: f64 = 9017.0 / 3168.0;
        const A62: f64 = -355.0 / 33.0;
        const A63: f64 = 46732.0 / 5247.0;
        const A64: f64 = 49.0 / 176.0;
        const A65: f64 = -5103.0 / 18656.0;
        const A71: f64 = 35.0 / 384.0;
        const A73: f64 = 500.0 / 1113.0;
        const A74: f64 = 125.0 / 192.0;
        const A75: f64 = -2187.0 / 6784.0;
        const A76: f64 = 11.0 / 84.0;

        // Fourth-order weights.
        const D1: f64 = 5179.0 / 57600.0;
        const D3: f64 = 7571.0 / 16695.0;
        const D4: f64 = 393.0 / 640.0;
        const D5: f64 = -92097.0 / 339200.0;
        const D6: f64 = 187.0 / 2100.0;
        const D7: f64 = 1.0 / 40.0;

        const E1: f64 = A71 - D1;
        const E3: f64 = A73 - D3;
        const E4: f64 = A74 - D4;
        const E5: f64 = A75 - D5;
        const E6: f64 = A76 - D6;
        const E7: f64 = -D7;

        let n = ctx.x.len();

        for i in 0..n {
            self.tmp[i] = ctx.x[i] + h * A21 * ctx.dx[i];
        }
        system.eval_into(&self.tmp, ctx.t + C2 * h, &mut self.k2)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i] + h * (A31 * ctx.dx[i] + A32 * self.k2[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C3 * h, &mut self.k3)?;

        for i in 0..n {
            self.tmp[i] =
                ctx.x[i] + h * (A41 * ctx.dx[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C4 * h, &mut self.k4)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i]
                + h * (A51 * ctx.dx[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C5 * h, &mut self.k5)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i]
                + h * (A61 * ctx.dx[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C6 * h, &mut self.k6)?;

        for i in 0..n {
            self.tmp[i] = ctx.x[i]
                + h * (A71 * ctx.dx[i]
                    + A73 * self.k3[i]
                    + A74 * self.k4[i]
                    + A75 * self.k5[i]
                    + A76 * self.k6[i]);
        }
        system.eval_into(&self.tmp, ctx.t + C7 * h, &mut self.k7)?;

        for i in 0..n {
            // The fifth-order weights coincide with the last stage row, so
            // the stage-seven input is already the candidate state.
            ctx.new_x[i] = self.tmp[i];
            ctx.err[i] = h
                * (E1 * ctx.dx[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
        }
        *ctx.new_t = ctx.t + h;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Method;
    use crate::system::{FieldFn, Parameters, System};
    use crate::traits::{StepContext, Stepper};

    fn linear_system() -> System {
        let field: FieldFn = Box::new(|x, _t, _p, out| {
            out[0] = x[0];
            Ok(())
        });
        System::new(1, Parameters::default(), field).expect("system should build")
    }

    fn constant_system() -> System {
        let field: FieldFn = Box::new(|_x, _t, _p, out| {
            out[0] = 1.0;
            out[1] = -2.0;
            Ok(())
        });
        System::new(2, Parameters::default(), field).expect("system should build")
    }

    fn run_step(
        stepper: &mut dyn Stepper,
        system: &System,
        x: &[f64],
        t: f64,
        h: f64,
    ) -> (f64, Vec<f64>, Vec<f64>) {
        let dx = system.derivatives(x, t).expect("base derivative");
        let mut new_t = t;
        let mut new_x = vec![0.0; x.len()];
        let mut err = vec![0.0; x.len()];
        let mut ctx = StepContext {
            t,
            x,
            dx: &dx,
            new_t: &mut new_t,
            new_x: &mut new_x,
            err: &mut err,
        };
        stepper
            .step(system, &mut ctx, h)
            .expect("step should succeed");
        (new_t, new_x, err)
    }

    #[test]
    fn variant_properties() {
        let expectations = [
            (Method::Euler, 0, false),
            (Method::ClassicRk4, 3, false),
            (Method::Fehlberg45, 5, true),
            (Method::CashKarp45, 5, true),
            (Method::DormandPrince45, 6, true),
        ];
        for (method, derivatives, embedded) in expectations {
            let props = method.build(3).properties();
            assert_eq!(props.derivatives_per_step, derivatives, "{method:?}");
            assert_eq!(props.has_error_estimate, embedded, "{method:?}");
        }
    }

    #[test]
    fn euler_advances_along_the_base_derivative() {
        let system = linear_system();
        let mut stepper = Method::Euler.build(1);
        let (new_t, new_x, _) = run_step(stepper.as_mut(), &system, &[2.0], 0.0, 0.5);
        assert_eq!(new_t, 0.5);
        assert_eq!(new_x[0], 3.0);
    }

    #[test]
    fn classic_rk4_matches_fourth_order_taylor() {
        let system = linear_system();
        let mut stepper = Method::ClassicRk4.build(1);
        let h = 0.1;
        let (new_t, new_x, _) = run_step(stepper.as_mut(), &system, &[1.0], 0.0, h);
        let taylor = 1.0 + h + h * h / 2.0 + h * h * h / 6.0 + h * h * h * h / 24.0;
        assert_eq!(new_t, h);
        assert!(
            (new_x[0] - taylor).abs() < 1e-14,
            "expected {taylor}, got {}",
            new_x[0]
        );
    }

    #[test]
    fn embedded_pairs_are_exact_on_constant_fields() {
        // Weight rows of a consistent tableau sum to one, and both orders
        // agree on a constant derivative, so the estimate must vanish.
        let system = constant_system();
        for method in [
            Method::Fehlberg45,
            Method::CashKarp45,
            Method::DormandPrince45,
        ] {
            let mut stepper = method.build(2);
            let (new_t, new_x, err) =
                run_step(stepper.as_mut(), &system, &[1.0, 1.0], 2.0, 0.25);
            assert_eq!(new_t, 2.25);
            assert!(
                (new_x[0] - 1.25).abs() < 1e-14 && (new_x[1] - 0.5).abs() < 1e-14,
                "{method:?} moved to {new_x:?}"
            );
            assert!(
                err[0].abs() < 1e-14 && err[1].abs() < 1e-14,
                "{method:?} reported error {err:?}"
            );
        }
    }

    #[test]
    fn embedded_pairs_are_fifth_order_on_the_exponential() {
        let system = linear_system();
        let h: f64 = 0.1;
        let exact = h.exp();
        for method in [
            Method::Fehlberg45,
            Method::CashKarp45,
            Method::DormandPrince45,
        ] {
            let mut stepper = method.build(1);
            let (_, new_x, err) = run_step(stepper.as_mut(), &system, &[1.0], 0.0, h);
            assert!(
                (new_x[0] - exact).abs() < 1e-8,
                "{method:?} gave {}, exact {exact}",
                new_x[0]
            );
            assert!(
                err[0].abs() < 1e-5,
                "{method:?} error estimate {} is implausibly large",
                err[0]
            );
        }
    }

    #[test]
    fn steppers_accept_negative_steps() {
        let system = linear_system();
        let mut stepper = Method::CashKarp45.build(1);
        let (new_t, new_x, _) = run_step(stepper.as_mut(), &system, &[1.0], 0.0, -0.1);
        assert_eq!(new_t, -0.1);
        let exact = (-0.1f64).exp();
        assert!(
            (new_x[0] - exact).abs() < 1e-8,
            "backward step gave {}, exact {exact}",
            new_x[0]
        );
    }
}
