use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a handler that cancels the returned token on SIGTERM or SIGINT.
///
/// Both signal streams are registered before this returns, so a signal that
/// arrives immediately afterwards is not lost.
pub fn install_shutdown_handler() -> Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
        }
        trigger.cancel();
    });

    Ok(token)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    use super::*;

    // One test only: the signal is delivered to the whole test process.
    #[tokio::test]
    async fn sigterm_cancels_the_token() {
        let token = install_shutdown_handler().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());

        kill(Pid::this(), Signal::SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("SIGTERM did not cancel the shutdown token");
    }
}
