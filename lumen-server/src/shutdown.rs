use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// A one-way flag the server waits on before draining connections.
#[derive(Debug, Clone)]
pub struct ShutdownEvent {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownEvent {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for ShutdownEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles one SIGTERM. Returns whether the event was set.
#[cfg(any(unix, test))]
fn on_sigterm(event: &ShutdownEvent, await_explicit_shutdown: bool) -> bool {
    if await_explicit_shutdown {
        info!("ignoring SIGTERM, waiting for an explicit shutdown");
        return false;
    }
    info!("received SIGTERM, shutting down");
    event.set();
    true
}

/// SIGINT always shuts down. SIGTERM does too, unless the server was told to
/// wait for an explicit `POST /shutdown`.
pub fn install_signal_handlers(
    event: &ShutdownEvent,
    await_explicit_shutdown: bool,
) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let event = event.clone();
        tokio::spawn(async move {
            while sigterm.recv().await.is_some() {
                if on_sigterm(&event, await_explicit_shutdown) {
                    break;
                }
            }
        });
    }
    #[cfg(not(unix))]
    let _ = await_explicit_shutdown;

    let event = event.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, shutting down");
            event.set();
        }
    });
    Ok(())
}
