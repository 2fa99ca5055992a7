//! Logger and shutdown plumbing shared by the demos.

use std::io::Write;
use std::str::FromStr;

use tokio::sync::oneshot;

/// Installs an `env_logger` writing `file:line [LEVEL] time - message`.
pub fn init_logger(log_level: &str) -> anyhow::Result<()> {
    let log_level = log::LevelFilter::from_str(log_level)?;
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, log_level)
        .try_init()?;
    Ok(())
}

/// Resolves on the first ctrl-c.
pub fn ctrl_c() -> anyhow::Result<oneshot::Receiver<()>> {
    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    })?;
    Ok(rx)
}
