use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::model::Ms;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Source of "now" for the engine. `Manual` only moves when told to, so
/// lateness and sweeps can be driven deterministically.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    System,
    Manual(Arc<AtomicI64>),
}

impl Clock {
    pub fn manual(start: Ms) -> Self {
        Clock::Manual(Arc::new(AtomicI64::new(start)))
    }

    pub fn now(&self) -> Ms {
        match self {
            Clock::System => now_ms(),
            Clock::Manual(t) => t.load(Ordering::SeqCst),
        }
    }

    /// No-op on the system clock.
    pub fn advance(&self, by: Ms) {
        if let Clock::Manual(t) = self {
            t.fetch_add(by, Ordering::SeqCst);
        }
    }

    pub fn set(&self, to: Ms) {
        if let Clock::Manual(t) = self {
            t.store(to, Ordering::SeqCst);
        }
    }
}
