// demos/render_wav.rs
use lunadsp::{render_offline, write_wav, Atom, Engine, EngineConfig, Message, ScriptSource};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let script = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join("scripts")
        .join("waveshaper.lua");
    let mut engine = Engine::new(
        EngineConfig::default()
            .with_block_size(512)
            .with_script(ScriptSource::file(script)),
    )?;
    engine.handle_message(Message::List(vec![Atom::Float(4.0)]))?;

    // One second of a 220 Hz sine, driven into the shaper
    let rate = engine.sample_rate();
    let input: Vec<f32> = (0..rate as usize)
        .map(|i| (2.0 * std::f64::consts::PI * 220.0 * i as f64 / rate).sin() as f32)
        .collect();
    let samples = render_offline(&mut engine, &input, input.len());
    engine.service_faults();

    write_wav("waveshaper.wav", &samples, rate as u32)?;
    println!("Generated waveshaper.wav");
    Ok(())
}
