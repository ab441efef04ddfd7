mod gpio;
mod layout;

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
pub use gpio::*;
pub use layout::*;

/// Outcome of a single row and column scan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScanResult {
    NoPress,
    Pressed { row: usize, col: usize },
}

/// A confirmed key press.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPress {
    pub row: usize,
    pub col: usize,
    /// The layout symbol at (`row`, `col`).
    pub symbol: String,
}

/// The `Keypad` trait defines the interface for polled keypad input devices.
pub trait Keypad: Debug {
    type Key;

    /// Performs one poll. Never blocks.
    ///
    /// Returns a key only once per physical press.
    fn tick(&mut self) -> Option<Self::Key>;

    /// The delay between two polls.
    fn poll_interval(&self) -> Duration;

    /// Polls the keypad until `running` is cleared, handing every press to `on_key`.
    ///
    /// Stops early with the error of `on_key`, if it returns one.
    fn run<E>(
        &mut self,
        running: &AtomicBool,
        mut on_key: impl FnMut(Self::Key) -> Result<(), E>,
    ) -> Result<(), E>
    where
        Self: Sized,
    {
        while running.load(Ordering::Relaxed) {
            if let Some(key) = self.tick() {
                on_key(key)?;
            }
            thread::sleep(self.poll_interval());
        }
        Ok(())
    }
}
