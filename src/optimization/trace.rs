//! Text trace of the quasi-Newton iterations and its parser.
//!
//! The observer attached to every local minimization writes one line per
//! iterate in the classic L-BFGS-B layout:
//!
//! ```text
//! At iterate    3    f=  1.23456789D-04    |proj g|=  5.00000000D-03
//! ```
//!
//! Per-iterate costs are recovered with [`parse_iterate_costs`], which only
//! looks at lines starting with `At iterate`. Several local runs share one
//! buffer in basin hopping; [`split_runs`] cuts it at each [`RUN_HEADER`].

use crate::optimization::problem::Bounds;
use argmin::core::observers::Observe;
use argmin::core::{Error, IterState, State, KV};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// First line of every local run section.
pub const RUN_HEADER: &str = "RUNNING THE L-BFGS-B CODE";

const ITERATE_PREFIX: &str = "At iterate";

/// Formats `value` as a Fortran double, e.g. `1.23456789D-04`.
pub fn format_fortran_double(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let formatted = format!("{value:.8E}");
    match formatted.split_once('E') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}D{sign}{:02}", exponent.abs())
        }
        None => formatted,
    }
}

/// Parses a Fortran double such as `1.5D-03`; plain Rust floats are accepted too.
pub fn parse_fortran_double(token: &str) -> Option<f64> {
    token.replace(['D', 'd'], "E").parse().ok()
}

/// Costs of every `At iterate` line, in order. Empty when there are none.
pub fn parse_iterate_costs(text: &str) -> Vec<f64> {
    text.lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with(ITERATE_PREFIX))
        .filter_map(|line| {
            let (_, rest) = line.split_once("f=")?;
            parse_fortran_double(rest.split_whitespace().next()?)
        })
        .collect()
}

/// Splits a buffer holding several local runs into one section per run.
///
/// Text before the first header is dropped.
pub fn split_runs(text: &str) -> Vec<&str> {
    text.split(RUN_HEADER).skip(1).collect()
}

/// Shared text buffer for iteration traces.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer {
    text: Arc<Mutex<String>>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        TraceBuffer::default()
    }

    pub fn write_line(&self, line: &str) {
        let mut text = self.text.lock();
        text.push_str(line);
        text.push('\n');
    }

    /// Starts a new local run section.
    pub fn begin_run(&self, dimension: usize, memory: usize) {
        self.write_line(RUN_HEADER);
        self.write_line(&format!("N = {dimension:>12}     M = {memory:>12}"));
    }

    pub fn contents(&self) -> String {
        self.text.lock().clone()
    }
}

/// argmin observer that records iterate parameters and writes the text trace.
pub struct IterationObserver {
    trace: TraceBuffer,
    parameters: Arc<Mutex<Vec<Vec<f64>>>>,
    bounds: Bounds,
    iterate: usize,
}

impl IterationObserver {
    pub fn new(trace: TraceBuffer, parameters: Arc<Mutex<Vec<Vec<f64>>>>, bounds: Bounds) -> Self {
        IterationObserver {
            trace,
            parameters,
            bounds,
            iterate: 0,
        }
    }
}

impl Observe<IterState<Vec<f64>, Vec<f64>, (), (), (), f64>> for IterationObserver {
    fn observe_iter(
        &mut self,
        state: &IterState<Vec<f64>, Vec<f64>, (), (), (), f64>,
        _kv: &KV,
    ) -> Result<(), Error> {
        let Some(param) = state.get_param() else {
            return Ok(());
        };
        self.iterate += 1;
        let param = self.bounds.project(param);
        let gradient_norm = state
            .get_gradient()
            .map(|g| self.bounds.projected_gradient_norm(&param, g))
            .unwrap_or(f64::NAN);

        let line = format!(
            "{ITERATE_PREFIX} {:>4}    f= {:>15}    |proj g|= {:>15}",
            self.iterate,
            format_fortran_double(state.get_cost()),
            format_fortran_double(gradient_norm)
        );
        debug!("{line}");
        self.trace.write_line(&line);
        self.parameters.lock().push(param);
        Ok(())
    }
}
