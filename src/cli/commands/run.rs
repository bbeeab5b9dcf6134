//! Run command: the daemon itself.

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::supervisor::{RunOutcome, Supervisor};

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            crate::log_event!("supervisor", "shutdown requested");
            signal.cancel();
        }
    });

    let supervisor = Supervisor::new(settings);
    match supervisor.run(shutdown).await? {
        RunOutcome::Completed => crate::log_event!("supervisor", "done"),
        RunOutcome::Stopped => crate::log_event!("supervisor", "stopped"),
    }
    Ok(())
}
