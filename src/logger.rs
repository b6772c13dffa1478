use std::io::Write;

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;

/// Installs the global logger. `RUST_LOG` still overrides `level` per module.
pub fn init(level: LevelFilter) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{:<30} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .init();
}
