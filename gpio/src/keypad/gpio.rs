use std::fmt::{Debug, Formatter};
use std::time::Duration;
use log::{debug, trace, warn};
use thiserror::Error;
use crate::{GpioBias, GpioDriver, GpioEdge, GpioError, GpioInput, GpioOutput, GpioResult};
use crate::keypad::{KeyPress, Keypad, KeypadLayout, LayoutError, ScanResult};

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

const PULL_DOWN_HINT: &str =
    "pull-down bias requires Linux 5.5 or later, check your kernel version";

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum AcquisitionError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("failed to acquire row {index} (line {offset}): {cause}")]
    Row {
        index: usize,
        offset: usize,
        cause: GpioError,
    },
    #[error("failed to acquire column {index} (line {offset}): {cause}")]
    Column {
        index: usize,
        offset: usize,
        cause: GpioError,
    },
}

impl AcquisitionError {
    /// Gets an extra hint for the operator, if the cause points at something beyond a wiring mistake.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            AcquisitionError::Row { cause: GpioError::InvalidArgument, .. } => Some(PULL_DOWN_HINT),
            _ => None,
        }
    }
}

/// A row asserted without any column pulling it back down.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
#[error("row {row} is asserted but no column isolates it")]
pub struct InconsistentScan {
    pub row: usize,
}

/// Where the scanner is between two presses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ScanState {
    /// Looking for an asserted row.
    #[default]
    Idle,
    /// A row is asserted, looking for the column it is connected to.
    ColumnResolving { row: usize },
    /// A key was reported, waiting for its row to go low.
    HeldWaitingRelease { row: usize },
}

/// A matrix keypad scanned over GPIO lines.
///
/// Rows are pulled down inputs and columns are outputs idling high. A pressed key connects its
/// row to its column, so the row reads high. The column is then found by driving one column low
/// at a time until the row drops.
///
/// Owns its lines; dropping the keypad releases all of them.
pub struct GpioKeypad<'a> {
    rows: Vec<Box<dyn GpioInput + 'a>>,
    cols: Vec<Box<dyn GpioOutput + 'a>>,
    layout: KeypadLayout,
    state: ScanState,
    poll_interval: Duration,
}

impl Debug for GpioKeypad<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpioKeypad({:?}, {:?})", self.cols, self.rows)
    }
}

impl<'a> GpioKeypad<'a> {
    /// Creates a new `GpioKeypad` from already configured lines.
    ///
    /// The rows must be pulled down and the columns must be driven high.
    pub fn new(
        rows: Vec<Box<dyn GpioInput + 'a>>,
        cols: Vec<Box<dyn GpioOutput + 'a>>,
        layout: KeypadLayout,
    ) -> Result<Self, LayoutError> {
        layout.check_dimensions(rows.len(), cols.len())?;
        Ok(GpioKeypad {
            rows,
            cols,
            layout,
            state: ScanState::Idle,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Claims and configures all row lines, then all column lines, in order.
    ///
    /// Stops at the first line that can't be acquired; lines acquired before it are released.
    pub fn acquire<D: GpioDriver + ?Sized>(
        driver: &'a D,
        row_offsets: &[usize],
        col_offsets: &[usize],
        layout: KeypadLayout,
    ) -> Result<Self, AcquisitionError> {
        layout.check_dimensions(row_offsets.len(), col_offsets.len())?;

        let mut rows = Vec::with_capacity(row_offsets.len());
        for (index, &offset) in row_offsets.iter().enumerate() {
            debug!("Assigning row {} to line {}", index, offset);
            let row = acquire_row(driver, offset)
                .map_err(|cause| AcquisitionError::Row { index, offset, cause })?;
            rows.push(row);
        }

        let mut cols = Vec::with_capacity(col_offsets.len());
        for (index, &offset) in col_offsets.iter().enumerate() {
            debug!("Assigning column {} to line {}", index, offset);
            let col = acquire_col(driver, offset)
                .map_err(|cause| AcquisitionError::Column { index, offset, cause })?;
            cols.push(col);
        }

        Ok(Self::new(rows, cols, layout)?)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn layout(&self) -> &KeypadLayout {
        &self.layout
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Scans the matrix once, without touching the press/release state.
    pub fn scan(&self) -> Result<ScanResult, InconsistentScan> {
        let Some(row) = self.find_row() else {
            return Ok(ScanResult::NoPress);
        };
        match self.find_col(row) {
            Some(col) => Ok(ScanResult::Pressed { row, col }),
            None => Err(InconsistentScan { row }),
        }
    }

    /// Gets the lowest row reading high.
    fn find_row(&self) -> Option<usize> {
        (0..self.rows.len()).find(|&row| self.read_row(row))
    }

    /// Gets the first column that pulls `row` low when driven low.
    fn find_col(&self, row: usize) -> Option<usize> {
        for col in 0..self.cols.len() {
            self.write_col(col, false);
            let level = self.read_row(row);
            self.write_col(col, true);

            if !level {
                return Some(col);
            }
        }
        None
    }

    /// Reads a row. A failed read counts as low.
    fn read_row(&self, row: usize) -> bool {
        self.rows[row].read().unwrap_or_else(|err| {
            debug!("Failed to read row {}, treating it as low: {}", row, err);
            false
        })
    }

    /// Drives a column. A failed write is ignored.
    fn write_col(&self, col: usize, level: bool) {
        if let Err(err) = self.cols[col].write(level) {
            debug!("Failed to drive column {} {}: {}", col, if level { "high" } else { "low" }, err);
        }
    }

    fn resolve(&mut self, row: usize) -> Option<KeyPress> {
        let Some(col) = self.find_col(row) else {
            warn!("{}", InconsistentScan { row });
            self.state = ScanState::Idle;
            return None;
        };

        self.state = ScanState::HeldWaitingRelease { row };
        let symbol = self.layout.get(row, col)?.to_string();
        debug!("Key {:?} pressed at ({}, {})", symbol, row, col);
        Some(KeyPress { row, col, symbol })
    }
}

impl Keypad for GpioKeypad<'_> {
    type Key = KeyPress;

    fn tick(&mut self) -> Option<KeyPress> {
        match self.state {
            ScanState::Idle => {
                let row = self.find_row()?;
                trace!("Row {} asserted", row);
                self.state = ScanState::ColumnResolving { row };
                self.resolve(row)
            }
            ScanState::ColumnResolving { row } => self.resolve(row),
            // Only the reported row is watched, whatever the other rows do.
            ScanState::HeldWaitingRelease { row } => {
                if !self.read_row(row) {
                    trace!("Row {} released", row);
                    self.state = ScanState::Idle;
                }
                None
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Drop for GpioKeypad<'_> {
    fn drop(&mut self) {
        debug!("Releasing {} row and {} column lines", self.rows.len(), self.cols.len());
    }
}

fn acquire_row<'a, D: GpioDriver + ?Sized>(
    driver: &'a D,
    offset: usize,
) -> GpioResult<Box<dyn GpioInput + 'a>> {
    let mut pin = driver.get_pin(offset)?;
    pin.set_bias(GpioBias::PullDown)?;
    if pin.supports_edge() {
        pin.set_edge(GpioEdge::Both)?;
    }
    pin.into_input()
}

fn acquire_col<'a, D: GpioDriver + ?Sized>(
    driver: &'a D,
    offset: usize,
) -> GpioResult<Box<dyn GpioOutput + 'a>> {
    driver.get_pin(offset)?.into_output(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDriver;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ROWS: [usize; 4] = [7, 8, 11, 25];
    const COLS: [usize; 3] = [9, 10, 15];

    fn keypad(sim: &SimDriver) -> GpioKeypad<'_> {
        GpioKeypad::acquire(sim, &ROWS, &COLS, KeypadLayout::phone())
            .unwrap()
            .with_poll_interval(Duration::ZERO)
    }

    fn symbol(key: Option<KeyPress>) -> Option<String> {
        key.map(|key| key.symbol)
    }

    #[test]
    fn idle_rows_emit_nothing() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        for _ in 0..20 {
            assert_eq!(keypad.tick(), None);
            assert_eq!(keypad.state(), ScanState::Idle);
        }
        for col in COLS {
            assert_eq!(sim.write_count(col), 0);
        }
    }

    #[test]
    fn columns_idle_high() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);
        for col in COLS {
            assert_eq!(sim.output_level(col), Some(true));
        }

        sim.press(ROWS[2], COLS[2]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("9"));
        for col in COLS {
            assert_eq!(sim.output_level(col), Some(true));
        }
    }

    #[test]
    fn zero_key() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.press(ROWS[3], COLS[1]);
        assert_eq!(
            keypad.tick(),
            Some(KeyPress { row: 3, col: 1, symbol: "0".to_string() })
        );
    }

    #[test]
    fn every_key_resolves() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);
        let layout = KeypadLayout::phone();

        for (row, &row_offset) in ROWS.iter().enumerate() {
            for (col, &col_offset) in COLS.iter().enumerate() {
                sim.press(row_offset, col_offset);
                assert_eq!(symbol(keypad.tick()).as_deref(), layout.get(row, col));
                sim.release_all();
                assert_eq!(keypad.tick(), None);
                assert_eq!(keypad.state(), ScanState::Idle);
            }
        }
    }

    #[test]
    fn held_key_is_reported_once() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.press(ROWS[1], COLS[1]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("5"));
        for _ in 0..100 {
            assert_eq!(keypad.tick(), None);
        }
        assert_eq!(keypad.state(), ScanState::HeldWaitingRelease { row: 1 });
    }

    #[test]
    fn press_after_release_is_reported_again() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        for _ in 0..3 {
            sim.press(ROWS[0], COLS[2]);
            assert_eq!(symbol(keypad.tick()).as_deref(), Some("3"));
            assert_eq!(keypad.tick(), None);
            sim.release(ROWS[0], COLS[2]);
            assert_eq!(keypad.tick(), None);
            assert_eq!(keypad.state(), ScanState::Idle);
        }
    }

    #[test]
    fn release_wait_only_watches_the_reported_row() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.press(ROWS[1], COLS[0]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("4"));

        let reads: Vec<_> = ROWS.iter().map(|&row| sim.read_count(row)).collect();
        sim.press(ROWS[0], COLS[0]);
        for _ in 0..5 {
            assert_eq!(keypad.tick(), None);
        }
        assert_eq!(sim.read_count(ROWS[0]), reads[0]);
        assert_eq!(sim.read_count(ROWS[1]), reads[1] + 5);

        // The other key is picked up once the reported one is released.
        sim.release(ROWS[1], COLS[0]);
        assert_eq!(keypad.tick(), None);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("1"));
    }

    #[test]
    fn lowest_row_wins() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.press(ROWS[2], COLS[0]);
        sim.press(ROWS[0], COLS[2]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("3"));
    }

    #[test]
    fn stuck_row_is_not_reported() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.stick_high(ROWS[2]);
        for _ in 0..10 {
            assert_eq!(keypad.tick(), None);
            assert_eq!(keypad.state(), ScanState::Idle);
        }
        assert_eq!(keypad.scan(), Err(InconsistentScan { row: 2 }));

        sim.release_all();
        sim.press(ROWS[2], COLS[1]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("8"));
    }

    #[test]
    fn key_held_forever_never_blocks() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.press(ROWS[3], COLS[2]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("#"));
        for _ in 0..10_000 {
            assert_eq!(keypad.tick(), None);
        }
        assert_eq!(keypad.state(), ScanState::HeldWaitingRelease { row: 3 });
    }

    #[test]
    fn failed_row_read_counts_as_low() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.fail_reads(ROWS[0]);
        sim.press(ROWS[0], COLS[0]);
        assert_eq!(keypad.tick(), None);

        sim.press(ROWS[1], COLS[2]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("6"));
    }

    #[test]
    fn failed_column_write_is_ignored() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);

        sim.fail_writes(COLS[0]);
        sim.press(ROWS[1], COLS[1]);
        assert_eq!(symbol(keypad.tick()).as_deref(), Some("5"));
        sim.release_all();
        assert_eq!(keypad.tick(), None);

        // A column that can't be driven low can't isolate its keys.
        sim.press(ROWS[1], COLS[0]);
        assert_eq!(keypad.tick(), None);
        assert_eq!(keypad.state(), ScanState::Idle);
    }

    #[test]
    fn scan_does_not_change_state() {
        let sim = SimDriver::new(28);
        let keypad = keypad(&sim);

        assert_eq!(keypad.scan(), Ok(ScanResult::NoPress));
        sim.press(ROWS[3], COLS[0]);
        assert_eq!(keypad.scan(), Ok(ScanResult::Pressed { row: 3, col: 0 }));
        assert_eq!(keypad.scan(), Ok(ScanResult::Pressed { row: 3, col: 0 }));
        assert_eq!(keypad.state(), ScanState::Idle);
    }

    #[test]
    fn run_reports_keys_until_stopped() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);
        let running = AtomicBool::new(true);
        let mut keys = Vec::new();

        sim.press(ROWS[0], COLS[1]);
        keypad
            .run(&running, |key| {
                keys.push(key.symbol);
                running.store(false, Ordering::Relaxed);
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(keys, vec!["2"]);
    }

    #[test]
    fn run_stops_on_callback_error() {
        let sim = SimDriver::new(28);
        let mut keypad = keypad(&sim);
        let running = AtomicBool::new(true);

        sim.press(ROWS[2], COLS[1]);
        let result = keypad.run(&running, |key| Err(key.symbol));
        assert_eq!(result, Err("8".to_string()));
    }

    #[test]
    fn first_row_failure_stops_acquisition() {
        let sim = SimDriver::new(28);
        sim.fail_request(ROWS[0], GpioError::InvalidArgument);

        let err = GpioKeypad::acquire(&sim, &ROWS, &COLS, KeypadLayout::phone()).unwrap_err();
        assert_eq!(
            err,
            AcquisitionError::Row { index: 0, offset: ROWS[0], cause: GpioError::InvalidArgument }
        );
        assert_eq!(err.hint(), Some(PULL_DOWN_HINT));
        assert!(sim.claimed().is_empty());
        assert_eq!(sim.output_level(COLS[0]), None);
    }

    #[test]
    fn column_failure_releases_acquired_rows() {
        let sim = SimDriver::new(28);
        sim.fail_request(COLS[2], GpioError::Io(std::io::ErrorKind::PermissionDenied));

        let err = GpioKeypad::acquire(&sim, &ROWS, &COLS, KeypadLayout::phone()).unwrap_err();
        assert!(matches!(err, AcquisitionError::Column { index: 2, offset: 15, .. }));
        assert_eq!(err.hint(), None);
        assert!(sim.claimed().is_empty());
    }

    #[test]
    fn busy_line_is_reported() {
        let sim = SimDriver::new(28);
        let _first = keypad(&sim);

        let err = GpioKeypad::acquire(&sim, &ROWS, &COLS, KeypadLayout::phone()).unwrap_err();
        assert_eq!(
            err,
            AcquisitionError::Row { index: 0, offset: ROWS[0], cause: GpioError::AlreadyInUse }
        );
        assert_eq!(err.hint(), None);
    }

    #[test]
    fn layout_must_match_lines() {
        let sim = SimDriver::new(28);

        let err = GpioKeypad::acquire(&sim, &ROWS[..3], &COLS, KeypadLayout::phone()).unwrap_err();
        assert!(matches!(err, AcquisitionError::Layout(LayoutError::DimensionMismatch { .. })));
        assert!(sim.claimed().is_empty());
    }

    #[test]
    fn drop_releases_every_line() {
        let sim = SimDriver::new(28);
        let keypad = keypad(&sim);
        assert_eq!(sim.claimed().len(), ROWS.len() + COLS.len());

        drop(keypad);
        assert!(sim.claimed().is_empty());
    }

    proptest! {
        #[test]
        fn any_cell_of_any_grid_resolves(
            (rows, cols, row, col) in (1usize..6, 1usize..6)
                .prop_flat_map(|(rows, cols)| (Just(rows), Just(cols), 0..rows, 0..cols))
        ) {
            let sim = SimDriver::new(rows + cols);
            let row_offsets: Vec<usize> = (0..rows).collect();
            let col_offsets: Vec<usize> = (rows..rows + cols).collect();
            let layout = KeypadLayout::new(
                (0..rows).map(|r| (0..cols).map(move |c| format!("{r}:{c}"))),
            ).unwrap();
            let mut keypad = GpioKeypad::acquire(&sim, &row_offsets, &col_offsets, layout).unwrap();

            sim.press(row_offsets[row], col_offsets[col]);
            let key = keypad.tick().unwrap();
            prop_assert_eq!((key.row, key.col), (row, col));
            prop_assert_eq!(key.symbol, format!("{row}:{col}"));
            prop_assert_eq!(keypad.tick(), None);
        }
    }
}
