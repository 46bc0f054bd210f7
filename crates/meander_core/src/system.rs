use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::anyhow;

use crate::error::OdeError;

/// User-supplied vector field.
///
/// Called with the state vector, the time, the parameter store and the
/// output buffer to fill with dx/dt. The slices are views that must not
/// outlive the call. Faults inside the field are reported through
/// `anyhow::Error` and surface to callers as `OdeError::Computation`.
pub type FieldFn = Box<dyn Fn(&[f64], f64, &Parameters, &mut [f64]) -> anyhow::Result<()>>;

/// Named scalar parameters of a system.
///
/// The name list is canonical: it is fixed when the store is built and
/// later writes may only replace values. Fields read parameters by name or
/// by position in that canonical order.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    names: Vec<String>,
    index: HashMap<String, usize>,
    values: Vec<f64>,
}

impl Parameters {
    pub fn new(entries: &[(&str, f64)]) -> Result<Self, OdeError> {
        let mut params = Parameters::default();
        for &(name, value) in entries {
            if !value.is_finite() {
                return Err(OdeError::InvalidParameters {
                    name: name.to_string(),
                    reason: "value is not a finite real",
                });
            }
            if params.index.insert(name.to_string(), params.names.len()).is_some() {
                return Err(OdeError::InvalidParameters {
                    name: name.to_string(),
                    reason: "duplicate name",
                });
            }
            params.names.push(name.to_string());
            params.values.push(value);
        }
        Ok(params)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Canonical name order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.index_of(name).map(|slot| self.values[slot])
    }

    /// Lookup for field code that treats a missing name as a fault.
    pub fn require(&self, name: &str) -> anyhow::Result<f64> {
        self.get(name)
            .ok_or_else(|| anyhow!("undefined parameter `{name}`"))
    }

    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    fn to_map(&self) -> HashMap<String, f64> {
        self.names
            .iter()
            .cloned()
            .zip(self.values.iter().copied())
            .collect()
    }
}

/// A vector field f(x, t) wrapped with its dimension and parameter store.
///
/// Systems are shared by reference between drivers; nothing mutates one
/// during stepping. Parameter replacement goes through interior mutability
/// so every holder of the system observes the new values on the next
/// evaluation.
pub struct System {
    dim: usize,
    field: FieldFn,
    params: RefCell<Parameters>,
}

impl System {
    pub fn new(dim: usize, params: Parameters, field: FieldFn) -> Result<Self, OdeError> {
        if dim == 0 {
            return Err(OdeError::InvalidTuning {
                what: "dimension",
                value: 0.0,
            });
        }
        Ok(Self {
            dim,
            field,
            params: RefCell::new(params),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Evaluates the field at `(x, t)` into a fresh vector.
    pub fn derivatives(&self, x: &[f64], t: f64) -> Result<Vec<f64>, OdeError> {
        let mut out = vec![0.0; self.dim];
        self.eval_into(x, t, &mut out)?;
        Ok(out)
    }

    /// Buffer-filling evaluation used by steppers and drivers.
    ///
    /// Rejects inputs of the wrong length, converts any field fault into
    /// `Computation`, and rejects non-finite output components so an
    /// irregular derivative aborts integration instead of corrupting it.
    pub fn eval_into(&self, x: &[f64], t: f64, out: &mut [f64]) -> Result<(), OdeError> {
        if x.len() != self.dim {
            return Err(OdeError::DimensionMismatch {
                expected: self.dim,
                got: x.len(),
            });
        }
        let params = self.params.borrow();
        (self.field)(x, t, &params, out).map_err(OdeError::Computation)?;
        for (i, value) in out.iter().enumerate() {
            if !value.is_finite() {
                return Err(OdeError::Computation(anyhow!(
                    "derivative component {i} is not finite at t = {t}"
                )));
            }
        }
        Ok(())
    }

    /// Returns a copy of the parameter mapping.
    pub fn parameters(&self) -> HashMap<String, f64> {
        self.params.borrow().to_map()
    }

    /// Replaces every parameter value by copy.
    ///
    /// The replacement map must cover exactly the canonical name set; a
    /// missing or unknown name is rejected before any value is written, as
    /// is any non-finite value. Derivative vectors produced earlier are
    /// unaffected.
    pub fn set_parameters(&self, values: &HashMap<String, f64>) -> Result<(), OdeError> {
        let mut params = self.params.borrow_mut();
        for name in values.keys() {
            if !params.index.contains_key(name) {
                return Err(OdeError::InvalidParameters {
                    name: name.clone(),
                    reason: "not a parameter of this system",
                });
            }
        }
        for name in &params.names {
            if !values.contains_key(name) {
                return Err(OdeError::InvalidParameters {
                    name: name.clone(),
                    reason: "missing from replacement map",
                });
            }
        }
        for (name, &value) in values {
            if !value.is_finite() {
                return Err(OdeError::InvalidParameters {
                    name: name.clone(),
                    reason: "value is not a finite real",
                });
            }
        }
        for (name, &value) in values {
            let slot = params.index[name];
            params.values[slot] = value;
        }
        Ok(())
    }

    /// Replaces a single parameter value.
    pub fn set_parameter(&self, name: &str, value: f64) -> Result<(), OdeError> {
        if !value.is_finite() {
            return Err(OdeError::InvalidParameters {
                name: name.to_string(),
                reason: "value is not a finite real",
            });
        }
        let mut params = self.params.borrow_mut();
        let Some(slot) = params.index.get(name).copied() else {
            return Err(OdeError::InvalidParameters {
                name: name.to_string(),
                reason: "not a parameter of this system",
            });
        };
        params.values[slot] = value;
        Ok(())
    }
}
