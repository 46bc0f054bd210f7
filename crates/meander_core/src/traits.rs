use crate::error::OdeError;
use crate::system::System;

/// Per-step exchange between a driver and its stepper.
///
/// The first three fields are the committed base point and are read-only to
/// the stepper; the driver guarantees `dx` already holds the field evaluated
/// at `(x, t)`, so a stepper never evaluates at the base point itself. The
/// remaining fields are the tentative result the stepper writes: the new
/// time, the candidate state, and (for embedded pairs only) the
/// per-component error estimate.
pub struct StepContext<'a> {
    pub t: f64,
    pub x: &'a [f64],
    pub dx: &'a [f64],
    pub new_t: &'a mut f64,
    pub new_x: &'a mut [f64],
    pub err: &'a mut [f64],
}

/// Static properties of a stepper variant.
///
/// `derivatives_per_step` counts the field evaluations one `step` call
/// performs, excluding the free base derivative supplied through the
/// context. `has_error_estimate` is true for embedded pairs that fill
/// `StepContext::err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepperProps {
    pub derivatives_per_step: usize,
    pub has_error_estimate: bool,
}

/// A single-step advancer over one explicit Runge-Kutta tableau.
///
/// Implementations own their stage and scratch buffers, sized once for the
/// system dimension and reused across steps. `h` may be negative; no sign
/// handling happens inside a stepper.
pub trait Stepper {
    fn properties(&self) -> StepperProps;

    /// Advances the base point in `ctx` by `h`, writing the tentative
    /// result fields. Fails only if a stage evaluation of the field fails.
    fn step(&mut self, system: &System, ctx: &mut StepContext<'_>, h: f64) -> Result<(), OdeError>;
}
