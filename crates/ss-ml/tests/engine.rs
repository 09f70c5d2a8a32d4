//! Request-engine scenarios with a deterministic stub model

use std::sync::Arc;

use ndarray::Array2;

use ss_ml::model::MaskPredictor;
use ss_ml::{
    Engine, EngineRequest, ModelCache, ModelProvider, ModelVariant, SeparationConfig,
    SeparationResult, StemRole, TargetRole,
};

/// Vocals above the split bin, accompaniment below.
#[derive(Debug)]
struct SplitBandPredictor {
    split_bin: usize,
}

impl MaskPredictor for SplitBandPredictor {
    fn variant(&self) -> ModelVariant {
        ModelVariant::TwoStem
    }

    fn mask_heads(&self) -> usize {
        1
    }

    fn predict_masks(&self, slice: &Array2<f32>) -> SeparationResult<Vec<Array2<f32>>> {
        let mask = Array2::from_shape_fn(slice.dim(), |(bin, _)| {
            if bin >= self.split_bin { 1.0 } else { 0.0 }
        });
        Ok(vec![mask])
    }
}

struct StubProvider;

impl ModelProvider for StubProvider {
    fn load(&self, _variant: ModelVariant) -> SeparationResult<Arc<dyn MaskPredictor>> {
        Ok(Arc::new(SplitBandPredictor { split_bin: 25 }))
    }
}

fn stub_engine() -> Engine {
    let cache = Arc::new(ModelCache::new(Arc::new(StubProvider)));
    Engine::new(SeparationConfig::default(), cache).unwrap()
}

fn sine_mix(freqs: &[f32], secs: f32, sample_rate: u32) -> Vec<f32> {
    let len = (secs * sample_rate as f32) as usize;
    (0..len)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            freqs
                .iter()
                .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                .sum::<f32>()
                / freqs.len() as f32
        })
        .collect()
}

#[test]
fn karaoke_request_returns_the_residual_stem() {
    let engine = stub_engine();
    let mix = sine_mix(&[440.0, 110.0], 5.0, 22050);

    let request = EngineRequest {
        variant: ModelVariant::TwoStem,
        target: TargetRole::Karaoke,
        ..Default::default()
    };
    let output = engine.process(&mix, 22050, &request).unwrap();

    assert_eq!(output.target_role, StemRole::Accompaniment);
    assert_eq!(output.sample_rate, 22050);
    assert_eq!(output.target.len(), mix.len());
    assert_eq!(output.stems.len(), 2);
    assert!(!output.key.is_empty());
}

#[test]
fn speed_change_scales_target_duration() {
    let engine = stub_engine();
    let mix = sine_mix(&[440.0], 5.0, 22050);

    let request = EngineRequest {
        variant: ModelVariant::TwoStem,
        target: TargetRole::Vocals,
        speed_rate: 1.25,
        ..Default::default()
    };
    let output = engine.process(&mix, 22050, &request).unwrap();

    let expected = (mix.len() as f64 / 1.25).round() as i64;
    assert!(
        (output.target.len() as i64 - expected).unsigned_abs() <= 2,
        "got {} samples, expected ~{expected}",
        output.target.len()
    );
    // The untouched stem keeps the original duration.
    let stem = output.stems.get(StemRole::Vocals).unwrap();
    assert_eq!(stem.samples.len(), mix.len());
}

#[test]
fn pitch_shift_keeps_target_duration() {
    let engine = stub_engine();
    let mix = sine_mix(&[440.0], 4.0, 22050);

    let request = EngineRequest {
        variant: ModelVariant::TwoStem,
        target: TargetRole::Vocals,
        pitch_semitones: -5,
        ..Default::default()
    };
    let output = engine.process(&mix, 22050, &request).unwrap();
    assert_eq!(output.target.len(), mix.len());
}

#[test]
fn analysis_rides_along_with_every_request() {
    let engine = stub_engine();
    // Steady C major chord, no rhythmic content.
    let mix = sine_mix(&[261.63, 329.63, 392.0], 5.0, 22050);

    let output = engine
        .process(&mix, 22050, &EngineRequest::default())
        .unwrap();
    assert_eq!(output.key, "C Major");
    assert!(output.tempo_bpm <= 180);
}

#[test]
fn invalid_requests_never_reach_the_model() {
    struct PanickyProvider;
    impl ModelProvider for PanickyProvider {
        fn load(&self, _variant: ModelVariant) -> SeparationResult<Arc<dyn MaskPredictor>> {
            panic!("request validation should have failed first");
        }
    }

    let cache = Arc::new(ModelCache::new(Arc::new(PanickyProvider)));
    let engine = Engine::new(SeparationConfig::default(), cache).unwrap();
    let mix = sine_mix(&[440.0], 2.0, 22050);

    let request = EngineRequest {
        variant: ModelVariant::TwoStem,
        target: TargetRole::Bass,
        ..Default::default()
    };
    assert!(engine.process(&mix, 22050, &request).is_err());
}
