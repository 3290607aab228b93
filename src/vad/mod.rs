//! Voice activity detection for capture windows.
//!
//! Classifies each evaluation window as speech or non-speech using a
//! probability model when one is installed, with RMS energy thresholding as
//! the fallback. The detector keeps no state between calls; speech-boundary
//! tracking lives in the endpointing stage.

use crate::config::VadConfig;
use crate::engines::SpeechModel;
use tracing::{debug, trace};

/// Stateless per-window speech classifier.
///
/// A model failure degrades to the energy fallback for that single call;
/// a transient inference error never disables detection for the session.
pub struct VoiceActivityDetector {
    model: Option<Box<dyn SpeechModel>>,
    energy_threshold: f32,
}

impl VoiceActivityDetector {
    /// Create a detector that only uses the energy fallback.
    pub fn new(config: &VadConfig) -> Self {
        Self {
            model: None,
            energy_threshold: config.energy_threshold,
        }
    }

    /// Create a detector backed by a probability model.
    pub fn with_model(config: &VadConfig, model: Box<dyn SpeechModel>) -> Self {
        Self {
            model: Some(model),
            energy_threshold: config.energy_threshold,
        }
    }

    /// Classify one window of normalized mono samples.
    ///
    /// `threshold` applies to the model probability; the energy fallback
    /// uses its own pre-calibrated threshold.
    pub fn is_speech(&self, window: &[f32], threshold: f32) -> bool {
        let Some(model) = &self.model else {
            return self.energy_is_speech(window);
        };

        match model.probability(window) {
            Ok(probability) => {
                if probability > threshold {
                    trace!("speech window (probability {probability:.2})");
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                debug!("speech model failed, using energy fallback: {e}");
                self.energy_is_speech(window)
            }
        }
    }

    fn energy_is_speech(&self, window: &[f32]) -> bool {
        rms(window) > self.energy_threshold
    }
}

/// Root-mean-square energy of normalized samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use rand::Rng;

    struct FixedModel(f32);

    impl SpeechModel for FixedModel {
        fn probability(&self, _window: &[f32]) -> anyhow::Result<f32> {
            Ok(self.0)
        }
    }

    struct FailingModel;

    impl SpeechModel for FailingModel {
        fn probability(&self, _window: &[f32]) -> anyhow::Result<f32> {
            anyhow::bail!("inference backend unavailable")
        }
    }

    fn config() -> VadConfig {
        VadConfig::default()
    }

    fn loud_window() -> Vec<f32> {
        vec![0.5; 1024]
    }

    // ── energy fallback ──────────────────────────────────────────

    #[test]
    fn silence_is_not_speech_without_model() {
        let vad = VoiceActivityDetector::new(&config());
        assert!(!vad.is_speech(&vec![0.0; 1024], 0.6));
    }

    #[test]
    fn loud_window_is_speech_without_model() {
        let vad = VoiceActivityDetector::new(&config());
        assert!(vad.is_speech(&loud_window(), 0.6));
    }

    #[test]
    fn rms_above_energy_threshold_is_speech_regardless_of_model_state() {
        // Noise with RMS well above 0.015 must classify as speech on the
        // fallback path, independent of any probability threshold.
        let mut rng = rand::thread_rng();
        let window: Vec<f32> = (0..1024).map(|_| rng.gen_range(-0.3..0.3)).collect();
        assert!(rms(&window) > config().energy_threshold);

        let no_model = VoiceActivityDetector::new(&config());
        assert!(no_model.is_speech(&window, 0.99));

        let broken_model = VoiceActivityDetector::with_model(&config(), Box::new(FailingModel));
        assert!(broken_model.is_speech(&window, 0.99));
    }

    #[test]
    fn rms_of_empty_window_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal() {
        let window = vec![0.25; 512];
        assert!((rms(&window) - 0.25).abs() < 1e-6);
    }

    // ── model path ───────────────────────────────────────────────

    #[test]
    fn model_probability_above_threshold_is_speech() {
        let vad = VoiceActivityDetector::with_model(&config(), Box::new(FixedModel(0.9)));
        // A silent window still classifies as speech when the model says so.
        assert!(vad.is_speech(&vec![0.0; 1024], 0.6));
    }

    #[test]
    fn model_probability_at_threshold_is_not_speech() {
        let vad = VoiceActivityDetector::with_model(&config(), Box::new(FixedModel(0.6)));
        assert!(!vad.is_speech(&loud_window(), 0.6));
    }

    #[test]
    fn model_failure_degrades_to_energy_for_that_call() {
        let vad = VoiceActivityDetector::with_model(&config(), Box::new(FailingModel));
        assert!(vad.is_speech(&loud_window(), 0.6));
        assert!(!vad.is_speech(&vec![0.0; 1024], 0.6));
    }
}
