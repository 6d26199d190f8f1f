use lunadsp::{Engine, EngineConfig, EngineState, ScriptSource};
use std::time::Instant;

const SCRIPT: &str = r#"
local sin = math.sin
local phase = 0
function base(x, prev, n, freq)
    phase = phase + 2 * math.pi * (freq or 440) / SAMPLE_RATE
    return 0.5 * sin(phase) + 0.5 * prev * x
end
"#;

#[test]
fn rt_timing_stability() {
    let mut engine = Engine::new(EngineConfig::default().with_script(ScriptSource::text("timing", SCRIPT))).unwrap();
    let input = vec![0.1f32; 64];
    let mut out = vec![0.0f32; 64];
    let start = Instant::now();
    for _ in 0..1000 {
        engine.process_block(&input, &mut out);
    }
    let duration = start.elapsed();
    assert_eq!(engine.state(), EngineState::Ready);
    // 1000 blocks of 64 frames is about 1.45 s of audio at 44.1 kHz.
    assert!(duration.as_millis() < 1450, "Execution took too long: {:?}", duration);
}
