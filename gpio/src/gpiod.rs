//! GpiodDriver implementation for managing GPIO lines using the Linux GPIO character device.
use crate::{
    GpioActiveLevel, GpioBias, GpioDriver, GpioEdge, GpioError, GpioInput, GpioOutput, GpioPin,
    GpioResult,
};
use bitvec::vec::BitVec;
use log::trace;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::AtomicU8;

/// GpiodDriver is a GPIO driver that uses the gpiod library to manage GPIO lines.
pub struct GpiodDriver {
    chip: gpiod::Chip,
    used_pins: BitVec<AtomicU8>,
}

impl GpiodDriver {
    pub fn new(chip: gpiod::Chip) -> Self {
        let n = chip.num_lines() as usize;
        let bits = BitVec::repeat(false, n);
        Self {
            chip,
            used_pins: bits,
        }
    }

    /// Opens the chip by name (e.g. `gpiochip0`) or by device path.
    pub fn open(chip: &str) -> GpioResult<Self> {
        let path = if chip.starts_with('/') {
            chip.to_string()
        } else {
            format!("/dev/{chip}")
        };
        Ok(Self::new(gpiod::Chip::new(path)?))
    }

    fn release(&self, offset: usize) {
        trace!("Releasing {:?}[{}]", self, offset);
        self.used_pins.set_aliased(offset, false);
    }
}

impl Debug for GpiodDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpiodDriver({})", self.chip.name())
    }
}

impl GpioDriver for GpiodDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(self.chip.num_lines() as usize)
    }

    fn get_pin(&self, offset: usize) -> GpioResult<Box<dyn GpioPin<'_> + '_>> {
        if offset >= self.count()? {
            return Err(GpioError::InvalidArgument);
        }

        if self.used_pins[offset] {
            return Err(GpioError::AlreadyInUse);
        }

        self.used_pins.set_aliased(offset, true);

        Ok(Box::new(GpiodPin {
            claim: LineClaim {
                driver: self,
                offset,
            },
            active_level: GpioActiveLevel::High,
            bias: GpioBias::None,
            edge: GpioEdge::None,
        }))
    }
}

impl From<GpioActiveLevel> for gpiod::Active {
    fn from(level: GpioActiveLevel) -> Self {
        match level {
            GpioActiveLevel::High => gpiod::Active::High,
            GpioActiveLevel::Low => gpiod::Active::Low,
        }
    }
}

impl From<GpioBias> for gpiod::Bias {
    fn from(bias: GpioBias) -> Self {
        match bias {
            GpioBias::None => gpiod::Bias::Disable,
            GpioBias::PullUp => gpiod::Bias::PullUp,
            GpioBias::PullDown => gpiod::Bias::PullDown,
        }
    }
}

impl From<GpioEdge> for gpiod::EdgeDetect {
    fn from(edge: GpioEdge) -> Self {
        match edge {
            GpioEdge::None => gpiod::EdgeDetect::Disable,
            GpioEdge::Rising => gpiod::EdgeDetect::Rising,
            GpioEdge::Falling => gpiod::EdgeDetect::Falling,
            GpioEdge::Both => gpiod::EdgeDetect::Both,
        }
    }
}

/// A claimed line that has not been requested from the kernel yet.
///
/// Dropping it without turning it into an input or output gives the claim back.
struct GpiodPin<'a> {
    claim: LineClaim<'a>,
    active_level: GpioActiveLevel,
    bias: GpioBias,
    edge: GpioEdge,
}

impl Debug for GpiodPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.claim.driver, self.claim.offset)
    }
}

impl<'a> GpioPin<'a> for GpiodPin<'a> {
    fn into_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput + 'a>> {
        let line = self.claim.driver.chip.request_lines(
            gpiod::Options::input([self.claim.offset as u32])
                .consumer(env!("CARGO_PKG_NAME"))
                .active(self.active_level.into())
                .bias(self.bias.into())
                .edge(self.edge.into()),
        )?;
        let input = GpiodInput {
            line,
            claim: self.claim,
        };
        Ok(Box::new(input))
    }

    fn into_output(self: Box<Self>, initial: bool) -> GpioResult<Box<dyn GpioOutput + 'a>> {
        let line = self.claim.driver.chip.request_lines(
            gpiod::Options::output([self.claim.offset as u32])
                .consumer(env!("CARGO_PKG_NAME"))
                .active(self.active_level.into())
                .bias(self.bias.into())
                .values([initial]),
        )?;
        let output = GpiodOutput {
            line,
            claim: self.claim,
        };
        Ok(Box::new(output))
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

/// Keeps a line marked as used until dropped.
struct LineClaim<'a> {
    driver: &'a GpiodDriver,
    offset: usize,
}

impl Drop for LineClaim<'_> {
    fn drop(&mut self) {
        self.driver.release(self.offset);
    }
}

struct GpiodInput<'a> {
    line: gpiod::Lines<gpiod::Input>,
    claim: LineClaim<'a>,
}

impl Debug for GpiodInput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][input]", self.claim.driver, self.claim.offset)
    }
}

impl GpioInput for GpiodInput<'_> {
    fn read(&self) -> GpioResult<bool> {
        let values = self.line.get_values([false])?;
        Ok(values[0])
    }
}

struct GpiodOutput<'a> {
    line: gpiod::Lines<gpiod::Output>,
    claim: LineClaim<'a>,
}

impl Debug for GpiodOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}][output]", self.claim.driver, self.claim.offset)
    }
}

impl GpioOutput for GpiodOutput<'_> {
    fn write(&self, value: bool) -> GpioResult<()> {
        self.line.set_values([value])?;
        Ok(())
    }
}
