pub mod gpiod;
pub mod keypad;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("pin already in use")]
    AlreadyInUse,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            // EINVAL from the character device, usually an unsupported line flag.
            std::io::ErrorKind::InvalidInput => GpioError::InvalidArgument,
            kind => GpioError::Io(kind),
        }
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

pub trait GpioDriver: Debug {
    /// Gets the amount of GPIO lines available.
    fn count(&self) -> GpioResult<usize>;

    /// Claims the GPIO line at the given offset.
    ///
    /// The line stays claimed until the returned pin, or the input/output it turns into, is dropped.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the offset is out of range.
    /// - `GpioError::AlreadyInUse` if the line is already claimed.
    fn get_pin(&self, offset: usize) -> GpioResult<Box<dyn GpioPin<'_> + '_>>;
}

/// Specifies the active level of the GPIO pin.
///
/// By default, the active level is high.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioActiveLevel {
    #[default] High,
    Low,
}

impl GpioActiveLevel {
    /// Gets the real state that will be outputted on the GPIO pin based on the active level and the value.
    pub fn get_state(&self, value: bool) -> bool {
        match self {
            GpioActiveLevel::High => value,
            GpioActiveLevel::Low => !value,
        }
    }
}

/// Specifies the bias of the GPIO pin.
///
/// You can use this to enable pull-up or pull-down resistors.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioBias {
    #[default] None,
    PullUp,
    PullDown,
}

/// Specifies which edges of an input signal the kernel should watch for.
///
/// Works only in input mode.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioEdge {
    #[default] None,
    Rising,
    Falling,
    Both,
}

/// A claimed, not yet configured GPIO line.
///
/// `'d` is the lifetime of the driver the line was claimed from.
pub trait GpioPin<'d>: Debug {
    /// Turns the pin into an input, allowing reading its state.
    fn into_input(self: Box<Self>) -> GpioResult<Box<dyn GpioInput + 'd>>;
    /// Turns the pin into an output driven to `initial` right away, allowing writing its state.
    fn into_output(self: Box<Self>, initial: bool) -> GpioResult<Box<dyn GpioOutput + 'd>>;

    /// Gets whether the GPIO pin supports active level.
    fn supports_active_level(&self) -> bool {
        false
    }
    /// Gets the active level of the GPIO pin.
    fn active_level(&self) -> GpioActiveLevel {
        GpioActiveLevel::High
    }
    /// Sets the active level of the GPIO pin.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the pin does not support active level.
    fn set_active_level(&mut self, _level: GpioActiveLevel) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }

    /// Gets whether the GPIO pin supports bias (pull-up/pull-down resistors).
    fn supports_bias(&self) -> bool {
        false
    }
    /// Gets the bias of the GPIO pin.
    fn bias(&self) -> GpioBias {
        GpioBias::None
    }
    /// Sets the bias of the GPIO pin.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the pin does not support bias.
    fn set_bias(&mut self, _bias: GpioBias) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }

    /// Gets whether the GPIO pin supports edge detection.
    fn supports_edge(&self) -> bool {
        false
    }
    /// Gets the edge detection of the GPIO pin.
    fn edge(&self) -> GpioEdge {
        GpioEdge::None
    }
    /// Sets the edge detection of the GPIO pin.
    ///
    /// # Errors
    /// - `GpioError::NotSupported` if the pin does not support edge detection.
    fn set_edge(&mut self, _edge: GpioEdge) -> GpioResult<()> {
        Err(GpioError::NotSupported)
    }
}

pub trait GpioInput: Debug {
    /// Reads the state of the GPIO line.
    fn read(&self) -> GpioResult<bool>;
}

pub trait GpioOutput: Debug {
    /// Writes the state of the GPIO line.
    fn write(&self, value: bool) -> GpioResult<()>;
}
