//! A simulated GPIO backend wired as a key matrix.
//!
//! Any line can be used as a row or a column. A row reads high when a pressed key connects it
//! to a column that is currently driven high, which is how a real matrix with pull-down rows
//! behaves. Faults can be injected to exercise error paths.
use crate::{
    GpioActiveLevel, GpioBias, GpioDriver, GpioEdge, GpioError, GpioInput, GpioOutput, GpioPin,
    GpioResult,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};

#[derive(Default)]
struct SimState {
    claimed: BTreeSet<usize>,
    /// Electrical level of every line currently requested as an output.
    outputs: BTreeMap<usize, bool>,
    /// Pressed keys as (row offset, column offset).
    pressed: Vec<(usize, usize)>,
    stuck_high: BTreeSet<usize>,
    request_failures: BTreeMap<usize, GpioError>,
    read_failures: BTreeSet<usize>,
    write_failures: BTreeSet<usize>,
    reads: BTreeMap<usize, usize>,
    writes: BTreeMap<usize, usize>,
}

impl SimState {
    fn level(&self, offset: usize) -> bool {
        if self.stuck_high.contains(&offset) {
            return true;
        }
        self.pressed
            .iter()
            .any(|&(row, col)| row == offset && self.outputs.get(&col).copied().unwrap_or(false))
    }
}

/// A virtual key matrix with `lines` GPIO lines.
pub struct SimDriver {
    lines: usize,
    state: RefCell<SimState>,
}

impl SimDriver {
    pub fn new(lines: usize) -> Self {
        Self {
            lines,
            state: RefCell::new(SimState::default()),
        }
    }

    /// Presses the key connecting `row` and `col` (both line offsets).
    pub fn press(&self, row: usize, col: usize) {
        let mut state = self.state.borrow_mut();
        if !state.pressed.contains(&(row, col)) {
            state.pressed.push((row, col));
        }
    }

    /// Releases the key connecting `row` and `col`.
    pub fn release(&self, row: usize, col: usize) {
        self.state.borrow_mut().pressed.retain(|&key| key != (row, col));
    }

    /// Releases every key and unsticks every line.
    pub fn release_all(&self) {
        let mut state = self.state.borrow_mut();
        state.pressed.clear();
        state.stuck_high.clear();
    }

    /// Makes the line read high no matter what the columns do, like a shorted row.
    pub fn stick_high(&self, offset: usize) {
        self.state.borrow_mut().stuck_high.insert(offset);
    }

    /// Makes requesting the line as an input or output fail with `err`.
    pub fn fail_request(&self, offset: usize, err: GpioError) {
        self.state.borrow_mut().request_failures.insert(offset, err);
    }

    /// Makes every read of the line fail.
    pub fn fail_reads(&self, offset: usize) {
        self.state.borrow_mut().read_failures.insert(offset);
    }

    /// Makes every write of the line fail.
    pub fn fail_writes(&self, offset: usize) {
        self.state.borrow_mut().write_failures.insert(offset);
    }

    /// Offsets of all lines currently claimed.
    pub fn claimed(&self) -> Vec<usize> {
        self.state.borrow().claimed.iter().copied().collect()
    }

    /// Electrical level of an output line, if the line is requested as an output.
    pub fn output_level(&self, offset: usize) -> Option<bool> {
        self.state.borrow().outputs.get(&offset).copied()
    }

    /// Number of successful reads of the line so far.
    pub fn read_count(&self, offset: usize) -> usize {
        self.state.borrow().reads.get(&offset).copied().unwrap_or(0)
    }

    /// Number of successful writes of the line so far.
    pub fn write_count(&self, offset: usize) -> usize {
        self.state.borrow().writes.get(&offset).copied().unwrap_or(0)
    }

    fn check_request(&self, offset: usize) -> GpioResult<()> {
        match self.state.borrow().request_failures.get(&offset) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Debug for SimDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriver({})", self.lines)
    }
}

impl GpioDriver for SimDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.lines)
    }

    fn get_pin(&self, offset: usize) -> GpioResult<Box<dyn GpioPin<'_> + '_>> {
        if offset >= self.lines {
            return Err(GpioError::InvalidArgument);
        }

        if !self.state.borrow_mut().claimed.insert(offset) {
            return Err(GpioError::AlreadyInUse);
        }

        Ok(Box::new(SimPin {
            claim: SimClaim {
                driver: self,
                offset,
            },
            active_level: GpioActiveLevel::High,
            bias: GpioBias::None,
            edge: GpioEdge::None,
        }))
    }
}

struct SimClaim<'a> {
    driver: &'a SimDriver,
    offset: usize,
}

impl Drop for SimClaim<'_> {
    fn drop(&mut self) {
        let mut state = self.driver.state.borrow_mut();
        state.claimed.remove(&self.offset);
        state.outputs.remove(&self.offset);
    }
}

struct SimPin<'a> {
    claim: SimClaim<'a>,
    active_level: GpioActiveLevel,
    bias: GpioBias,
    edge: GpioEdge,
}

impl Debug for SimPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.claim.driver, self.claim.offset)
    }
}

impl<'a> GpioPin<'a> for SimPin<'a> {
    fn into_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput + 'a>> {
        self.claim.driver.check_request(self.claim.offset)?;
        Ok(Box::new(SimInput {
            claim: self.claim,
            active_level: self.active_level,
        }))
    }

    fn into_output(self: Box<Self>, initial: bool) -> GpioResult<Box<dyn GpioOutput + 'a>> {
        let driver = self.claim.driver;
        let offset = self.claim.offset;
        driver.check_request(offset)?;
        driver
            .state
            .borrow_mut()
            .outputs
            .insert(offset, self.active_level.get_state(initial));
        Ok(Box::new(SimOutput {
            claim: self.claim,
            active_level: self.active_level,
        }))
    }

    fn supports_active_level(&self) -> bool {
        true
    }

    fn active_level(&self) -> GpioActiveLevel {
        self.active_level
    }

    fn set_active_level(&mut self, level: GpioActiveLevel) -> GpioResult<()> {
        self.active_level = level;
        Ok(())
    }

    fn supports_bias(&self) -> bool {
        true
    }

    fn bias(&self) -> GpioBias {
        self.bias
    }

    fn set_bias(&mut self, bias: GpioBias) -> GpioResult<()> {
        self.bias = bias;
        Ok(())
    }

    fn supports_edge(&self) -> bool {
        true
    }

    fn edge(&self) -> GpioEdge {
        self.edge
    }

    fn set_edge(&mut self, edge: GpioEdge) -> GpioResult<()> {
        self.edge = edge;
        Ok(())
    }
}

struct SimInput<'a> {
    claim: SimClaim<'a>,
    active_level: GpioActiveLevel,
}

impl Debug for SimInput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][input]", self.claim.driver, self.claim.offset)
    }
}

impl GpioInput for SimInput<'_> {
    fn read(&self) -> GpioResult<bool> {
        let mut state = self.claim.driver.state.borrow_mut();
        if state.read_failures.contains(&self.claim.offset) {
            return Err(GpioError::Io(std::io::ErrorKind::Other));
        }
        *state.reads.entry(self.claim.offset).or_default() += 1;
        Ok(self.active_level.get_state(state.level(self.claim.offset)))
    }
}

struct SimOutput<'a> {
    claim: SimClaim<'a>,
    active_level: GpioActiveLevel,
}

impl Debug for SimOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][output]", self.claim.driver, self.claim.offset)
    }
}

impl GpioOutput for SimOutput<'_> {
    fn write(&self, value: bool) -> GpioResult<()> {
        let mut state = self.claim.driver.state.borrow_mut();
        if state.write_failures.contains(&self.claim.offset) {
            return Err(GpioError::Io(std::io::ErrorKind::Other));
        }
        *state.writes.entry(self.claim.offset).or_default() += 1;
        state
            .outputs
            .insert(self.claim.offset, self.active_level.get_state(value));
        Ok(())
    }
}
