//! Logging configuration for the Viper engine
//!
//! The engine logs through the `log` facade; binaries and tests pick a
//! backend with one of the helpers below (all built on `env_logger`).
//!
//! # Log Levels
//!
//! - `error!` - Unhandled traps
//! - `warn!` - Unbalanced handler stacks, ignored configuration
//! - `info!` - Instruction trace when `VmConfig::trace` is set
//! - `debug!` - Frame push/pop, trap dispatch, switch backend selection
//! - `trace!` - Every executed instruction
//!
//! # Environment Variable
//!
//! ```bash
//! RUST_LOG=debug viper demo divide
//! RUST_LOG=vm::switch=debug viper run module.json
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging with a specific level. Subsequent calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {} - {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize from `RUST_LOG`, defaulting to Warn.
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Initialize logging for tests; safe to call from every test.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
        log::debug!("still fine");
    }
}
