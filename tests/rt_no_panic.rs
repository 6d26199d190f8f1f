use lunadsp::{Engine, EngineConfig, ScriptSource};
use proptest::prelude::*;

const SCRIPTS: &[&str] = &[
    "function base(x) return x end",
    "function base(x, prev) return prev - x * 3 end",
    "function base() return nil end",
    "function base() return 1/0 end",
    "function base(x) if x > 0 then error('positive') end return x end",
    "function base(x, p, n, a, b) return (a or 0) * x + (b or 0) end",
    "base = 7",
    "function base( return",
];

proptest! {
    #[test]
    fn rt_no_panic_fuzz(
        script in 0..SCRIPTS.len(),
        input in prop::collection::vec(-2.0f32..2.0, 0..96),
        frames in 0usize..96,
        params in prop::collection::vec(-4.0f64..4.0, 0..4),
    ) {
        let mut engine = Engine::new(
            EngineConfig::default().with_script(ScriptSource::text("fuzz", SCRIPTS[script])),
        )
        .unwrap();
        engine.param_writer().set_all(&params);
        let mut out = vec![0.0f32; frames];
        // This should not panic
        engine.process_block_safe(&input, &mut out);
        engine.process_block(&input, &mut out);
        prop_assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
        engine.service_faults();
    }
}
