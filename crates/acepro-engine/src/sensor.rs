//! Filament sensor facade.
//!
//! Two logical sensors: one next to the nozzle and one before the splitter.
//! The splitter sensor is optional; without it every path check uses the
//! nozzle sensor alone.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

/// A presence switch, optionally with an encoder.
pub trait FilamentSensor: Send + Sync {
    /// Debounced presence.
    fn present(&self) -> bool;

    /// Raw presence without the debounce delay.
    fn instant_present(&self) -> bool {
        self.present()
    }

    /// Filament-motion encoder pulse count, if the sensor has one.
    fn encoder_pulses(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Nozzle,
    Splitter,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Nozzle => "toolhead",
            SensorKind::Splitter => "splitter",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Both sensors plus injected overrides for diagnostics.
pub struct SensorHub {
    nozzle: Arc<dyn FilamentSensor>,
    splitter: Option<Arc<dyn FilamentSensor>>,
    overrides: Mutex<HashMap<SensorKind, bool>>,
}

impl SensorHub {
    pub fn new(nozzle: Arc<dyn FilamentSensor>, splitter: Option<Arc<dyn FilamentSensor>>) -> Self {
        Self {
            nozzle,
            splitter,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    fn overrides(&self) -> MutexGuard<'_, HashMap<SensorKind, bool>> {
        self.overrides.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_splitter(&self) -> bool {
        self.splitter.is_some()
    }

    fn sensor(&self, kind: SensorKind) -> Option<&Arc<dyn FilamentSensor>> {
        match kind {
            SensorKind::Nozzle => Some(&self.nozzle),
            SensorKind::Splitter => self.splitter.as_ref(),
        }
    }

    /// Debounced presence. A missing sensor reads as absent.
    pub fn present(&self, kind: SensorKind) -> bool {
        if let Some(value) = self.overrides().get(&kind) {
            return *value;
        }
        self.sensor(kind).is_some_and(|s| s.present())
    }

    pub fn instant_present(&self, kind: SensorKind) -> bool {
        if let Some(value) = self.overrides().get(&kind) {
            return *value;
        }
        self.sensor(kind).is_some_and(|s| s.instant_present())
    }

    /// No sensor reports filament.
    pub fn path_free(&self) -> bool {
        !self.present(SensorKind::Nozzle) && !self.present(SensorKind::Splitter)
    }

    pub fn path_free_instant(&self) -> bool {
        !self.instant_present(SensorKind::Nozzle) && !self.instant_present(SensorKind::Splitter)
    }

    /// Sensor used to verify the first load phase.
    pub fn verification_sensor(&self) -> SensorKind {
        if self.has_splitter() {
            SensorKind::Splitter
        } else {
            SensorKind::Nozzle
        }
    }

    /// Encoder pulses from the splitter sensor.
    pub fn encoder_pulses(&self) -> Option<u64> {
        self.splitter.as_ref().and_then(|s| s.encoder_pulses())
    }

    /// Force a reading, or clear the override with `None`.
    pub fn inject(&self, kind: SensorKind, value: Option<bool>) {
        info!(sensor = %kind, ?value, "sensor override");
        let mut overrides = self.overrides();
        match value {
            Some(v) => {
                overrides.insert(kind, v);
            }
            None => {
                overrides.remove(&kind);
            }
        }
    }

    pub fn clear_overrides(&self) {
        self.overrides().clear();
    }
}

impl fmt::Debug for SensorHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorHub")
            .field("nozzle", &self.present(SensorKind::Nozzle))
            .field("splitter", &self.splitter.as_ref().map(|s| s.present()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;

    #[derive(Default)]
    struct Switch {
        present: AtomicBool,
        raw: AtomicBool,
        pulses: AtomicU64,
    }

    impl FilamentSensor for Switch {
        fn present(&self) -> bool {
            self.present.load(Ordering::SeqCst)
        }

        fn instant_present(&self) -> bool {
            self.raw.load(Ordering::SeqCst)
        }

        fn encoder_pulses(&self) -> Option<u64> {
            Some(self.pulses.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn test_missing_splitter_reads_absent() {
        let nozzle = Arc::new(Switch::default());
        nozzle.present.store(true, Ordering::SeqCst);
        let hub = SensorHub::new(nozzle, None);

        assert!(!hub.has_splitter());
        assert!(!hub.present(SensorKind::Splitter));
        assert!(!hub.path_free());
        assert_eq!(hub.verification_sensor(), SensorKind::Nozzle);
        assert_eq!(hub.encoder_pulses(), None);
    }

    #[test]
    fn test_instant_read_bypasses_debounce() {
        let nozzle = Arc::new(Switch::default());
        nozzle.present.store(true, Ordering::SeqCst);
        let hub = SensorHub::new(nozzle, None);
        assert!(hub.present(SensorKind::Nozzle));
        assert!(!hub.instant_present(SensorKind::Nozzle));
        assert!(hub.path_free_instant());
    }

    #[test]
    fn test_overrides_win_until_cleared() {
        let splitter = Arc::new(Switch::default());
        splitter.pulses.store(42, Ordering::SeqCst);
        let hub = SensorHub::new(Arc::new(Switch::default()), Some(splitter));

        hub.inject(SensorKind::Nozzle, Some(true));
        assert!(hub.present(SensorKind::Nozzle));
        assert!(hub.instant_present(SensorKind::Nozzle));
        hub.inject(SensorKind::Nozzle, None);
        assert!(!hub.present(SensorKind::Nozzle));

        hub.inject(SensorKind::Splitter, Some(true));
        hub.clear_overrides();
        assert!(hub.path_free());
        assert_eq!(hub.encoder_pulses(), Some(42));
    }
}
