//! Single-slot signal channels between callers and a guild's playback loop.
//!
//! Both directions are bounded mpsc channels of capacity one. Producers use
//! `try_send` and get an explicit [`SignalError`] instead of blocking.

use parking_lot::Mutex;
use std::fmt;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex as AsyncMutex, MutexGuard,
};
use tracing::debug;

use crate::error::SignalError;

/// Acciones que el usuario envía al loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSignal {
    Stop,
    Skip,
    /// Reentrar al canal de voz actual manteniendo la canción
    Swap,
    PauseResume,
}

impl fmt::Display for ActionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stop => "stop",
            Self::Skip => "skip",
            Self::Swap => "swap",
            Self::PauseResume => "pause/resume",
        };
        f.write_str(name)
    }
}

/// Transiciones que el loop informa al oyente
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    Playing,
    Resuming,
    Added,
    Paused,
    Resting,
    Error,
}

impl fmt::Display for StatusSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Playing => "playing",
            Self::Resuming => "resuming",
            Self::Added => "added",
            Self::Paused => "paused",
            Self::Resting => "resting",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Canal de acciones. El receptor se presta al loop mientras corre; quién
/// puede enviar lo decide el player, que sabe si hay un loop activo.
pub struct ActionChannel {
    tx: mpsc::Sender<ActionSignal>,
    rx: AsyncMutex<mpsc::Receiver<ActionSignal>>,
}

impl ActionChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: AsyncMutex::new(rx),
        }
    }

    pub fn send(&self, signal: ActionSignal) -> Result<(), SignalError> {
        match self.tx.try_send(signal) {
            Ok(()) => {
                debug!("📨 Acción enviada: {}", signal);
                Ok(())
            }
            Err(TrySendError::Full(pending)) => Err(SignalError::Busy(pending)),
            Err(TrySendError::Closed(_)) => Err(SignalError::NotRunning),
        }
    }

    /// Toma el receptor para un loop. Si la sesión anterior todavía lo tiene
    /// (saliendo del canal de voz), espera a que lo suelte.
    pub async fn claim(&self) -> MutexGuard<'_, mpsc::Receiver<ActionSignal>> {
        self.rx.lock().await
    }
}

/// Descarta acciones que llegaron cuando el loop ya había decidido terminar
pub fn drain_stale(rx: &mut mpsc::Receiver<ActionSignal>) {
    while let Ok(stale) = rx.try_recv() {
        debug!("🧹 Descartada acción vieja: {}", stale);
    }
}

impl Default for ActionChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Canal de estados. Cada `listen()` reemplaza al oyente anterior.
#[derive(Default)]
pub struct StatusChannel {
    tx: Mutex<Option<mpsc::Sender<StatusSignal>>>,
}

impl StatusChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(&self) -> mpsc::Receiver<StatusSignal> {
        let (tx, rx) = mpsc::channel(1);
        *self.tx.lock() = Some(tx);
        rx
    }

    /// No bloquea: sin oyente o con el hueco ocupado devuelve `ListenerNotReady`
    pub fn emit(&self, signal: StatusSignal) -> Result<(), SignalError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(SignalError::ListenerNotReady)?;
        tx.try_send(signal)
            .map_err(|_| SignalError::ListenerNotReady)
    }
}
