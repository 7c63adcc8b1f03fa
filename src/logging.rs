use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::LevelFilter;

/// Installs the process logger: `[timestamp LEVEL target] message` on stderr.
/// `RUST_LOG` overrides `default_level`. Returns false if a logger was already set.
pub fn init(default_level: LevelFilter) -> bool {
    let env = Env::default().default_filter_or(default_level.as_str());
    Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}
