//! The `meander_core` crate is the numerical engine behind Meander: it
//! marches first-order ODE systems dx/dt = f(x, t) and samples their
//! solution curves for an external front end to display.
//!
//! Key components:
//! - **System**: a user vector field wrapped with its dimension and named
//!   scalar parameters, validating every evaluation.
//! - **Traits**: the `Stepper` seam and the per-step context it exchanges
//!   with a driver.
//! - **Solvers**: explicit Runge-Kutta variants (Euler, classic RK4, and
//!   the Fehlberg, Cash-Karp and Dormand-Prince embedded 4(5) pairs).
//! - **Driver**: fixed-step and embedded-error adaptive marching over any
//!   stepper, with validated tuning and an evaluation counter.
//! - **Sampler**: grid-spaced trajectory extraction with displacement-driven
//!   densification, in any ordering of the reference times.

pub mod driver;
pub mod error;
pub mod sampler;
pub mod solvers;
pub mod system;
pub mod traits;
pub mod trajectory;
