/// Cached knowledge of whether the native service is running.
///
/// `Unknown` means nobody asked yet (or the cache was invalidated); the
/// lifecycle queries the native side once and stores the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningState {
    #[default]
    Unknown,
    Running,
    Stopped,
}

impl RunningState {
    #[must_use]
    pub fn from_probe(running: bool) -> Self {
        if running { Self::Running } else { Self::Stopped }
    }

    #[must_use]
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}
