mod config;

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use dotenv::dotenv;
use eyre::WrapErr;
use log::{debug, error, info, warn};
use keyscan_gpio::GpioDriver;
use keyscan_gpio::gpiod::GpiodDriver;
use keyscan_gpio::keypad::{GpioKeypad, Keypad};
use sysinfo::System;
use crate::config::Config;

const UNKNOWN_STR: &str = "???";

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    info!("keyscan starting...");
    info!(
        "System ver {} kernel ver {}",
        System::long_os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );

    let config = Config::load()?;
    info!("Keypad @ Chip: {}, Rows: {:?}, Cols: {:?}", config.chip, config.rows, config.cols);

    debug!("Initializing GPIO driver...");
    let gpio = GpiodDriver::open(&config.chip)
        .wrap_err_with(|| format!("failed to open GPIO chip {}", config.chip))?;
    debug!("{:?} initialized.", gpio);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })?;
    }

    let stdout = io::stdout();
    scan_keys(&gpio, &config, &running, &mut stdout.lock())?;

    info!("keyscan stopped.");
    Ok(())
}

/// Acquires the keypad lines and prints every key press to `out`, one per line, until `running` is cleared.
///
/// The lines are released before returning, whatever the outcome.
fn scan_keys(
    gpio: &dyn GpioDriver,
    config: &Config,
    running: &AtomicBool,
    out: &mut impl Write,
) -> eyre::Result<()> {
    let layout = config.layout()?;
    debug!("Layout: {}", layout);

    debug!("Initializing keypad driver...");
    let keypad = match GpioKeypad::acquire(gpio, &config.rows, &config.cols, layout) {
        Ok(keypad) => keypad,
        Err(err) => {
            error!("{}", err);
            if let Some(hint) = err.hint() {
                warn!(
                    "Note that {} (running {}).",
                    hint,
                    System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
                );
            }
            return Err(err.into());
        }
    };
    let mut keypad = keypad.with_poll_interval(config.poll_interval());
    debug!("{:?} initialized.", keypad);

    info!("Waiting for key presses...");
    keypad
        .run(running, |key| -> io::Result<()> {
            writeln!(out, "{}", key.symbol)?;
            out.flush()
        })
        .wrap_err("failed to write key press")?;

    Ok(())
}
