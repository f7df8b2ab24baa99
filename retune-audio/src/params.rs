//! Correction parameters shared between the control plane and the audio thread
//!
//! The control side publishes whole snapshots; the audio thread copies the
//! current snapshot once per block. Neither side ever waits on the other.

use arc_swap::ArcSwap;
use retune_analysis::Scale;
use std::sync::Arc;

/// User-facing correction parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionConfig {
    /// Root key (0 = C .. 11 = B)
    pub root_key: u8,
    pub scale: Scale,
    /// 0.0 = instant (robotic), 1.0 = slow glide (natural)
    pub retune_speed: f32,
    /// Dry/wet blend (0.0 = dry, 1.0 = fully corrected)
    pub amount: f32,
    /// Vibrato and drift amount
    pub humanize: f32,
    /// Stored but not applied; the shifter moves formants with the pitch
    pub formant_shift: f32,
    pub bypass: bool,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            root_key: 0,
            scale: Scale::Major,
            retune_speed: 0.1,
            amount: 1.0,
            humanize: 0.0,
            formant_shift: 0.0,
            bypass: false,
        }
    }
}

impl CorrectionConfig {
    /// Clamp every field into its valid range; non-finite values reset to default
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            root_key: self.root_key % 12,
            scale: self.scale,
            retune_speed: unit_or(self.retune_speed, defaults.retune_speed),
            amount: unit_or(self.amount, defaults.amount),
            humanize: unit_or(self.humanize, defaults.humanize),
            formant_shift: if self.formant_shift.is_finite() {
                self.formant_shift.clamp(-1.0, 1.0)
            } else {
                defaults.formant_shift
            },
            bypass: self.bypass,
        }
    }
}

fn unit_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

/// Lock-free parameter snapshot cell
#[derive(Clone)]
pub struct ParamStore {
    inner: Arc<ArcSwap<CorrectionConfig>>,
}

impl ParamStore {
    pub fn new(initial: CorrectionConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial.sanitized())),
        }
    }

    /// Copy of the current snapshot
    #[inline]
    pub fn load(&self) -> CorrectionConfig {
        **self.inner.load()
    }

    /// Publish a new snapshot
    pub fn store(&self, config: CorrectionConfig) {
        self.inner.store(Arc::new(config.sanitized()));
    }

    /// Read-modify-write; retried if another writer raced us
    pub fn update<F>(&self, f: F) -> CorrectionConfig
    where
        F: Fn(&mut CorrectionConfig),
    {
        let mut next = CorrectionConfig::default();
        self.inner.rcu(|current| {
            next = **current;
            f(&mut next);
            next = next.sanitized();
            next
        });
        next
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new(CorrectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_clamps() {
        let config = CorrectionConfig {
            root_key: 14,
            scale: Scale::Minor,
            retune_speed: 3.0,
            amount: -1.0,
            humanize: f32::NAN,
            formant_shift: -7.0,
            bypass: true,
        }
        .sanitized();

        assert_eq!(config.root_key, 2);
        assert_eq!(config.retune_speed, 1.0);
        assert_eq!(config.amount, 0.0);
        assert_eq!(config.humanize, 0.0);
        assert_eq!(config.formant_shift, -1.0);
        assert!(config.bypass);
        assert_eq!(config.scale, Scale::Minor);
    }

    #[test]
    fn test_store_and_load() {
        let store = ParamStore::default();
        let reader = store.clone();
        assert_eq!(reader.load(), CorrectionConfig::default());

        store.store(CorrectionConfig {
            root_key: 9,
            ..CorrectionConfig::default()
        });
        assert_eq!(reader.load().root_key, 9);
    }

    #[test]
    fn test_update() {
        let store = ParamStore::default();
        let result = store.update(|c| {
            c.amount = 0.25;
            c.retune_speed = 5.0;
        });
        assert_eq!(result.amount, 0.25);
        assert_eq!(result.retune_speed, 1.0);
        assert_eq!(store.load(), result);
    }
}
