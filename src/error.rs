use thiserror::Error;

/// Fallos del núcleo de reproducción.
///
/// Una cola vacía no es un error: es la condición normal que arma el
/// temporizador de inactividad.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// El stream expiró o no responde; se recupera con un refresh y un reintento.
    #[error("No se pudo abrir la fuente: {0}")]
    TransientAcquisition(String),

    /// El reintento también falló; la pista se salta.
    #[error("Pista descartada tras reintentar: {0}")]
    TerminalAcquisition(String),

    #[error("La conexión de voz se perdió")]
    TransportDisconnected,

    #[error("No se pudo mover la reproducción: {0}")]
    SeekFailed(String),

    #[error("Ya hay un salto de posición en curso")]
    SeekInProgress,

    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("El historial está vacío")]
    EmptyHistory,

    #[error("La cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    /// La sesión fue limpiada mientras se encolaba en segundo plano.
    #[error("La reproducción se detuvo")]
    SessionEnded,

    #[error("Error del transporte de audio: {0}")]
    Transport(String),
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
