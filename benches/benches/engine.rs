use std::sync::Arc;
use std::time::Duration;

use atomic_float::AtomicF32;
use cadenza_engine::chain::PluginChain;
use cadenza_engine::renderer::{CommandQueue, RenderCommand, RenderGraph, Renderer};
use cadenza_engine::sampler::SoundData;
use cadenza_engine::{
    BufferConfig, ChannelLayout, Module, ModuleDescriptor, PluginSelection, SamplerInfo, Session,
    WidgetDescriptor, WidgetValue,
};
use criterion::{criterion_group, criterion_main, Criterion};

fn session(voices: u32) -> Session {
    Session::new(60.0)
        .with_input("snd", "snd.wav")
        .with_sampler("snd", SamplerInfo::live(0.5))
        .with_sampler_lines("snd")
        .with_widget_value("polynum", WidgetValue::Number(voices.saturating_sub(1) as f32))
        .with_widget_value("polyspread", WidgetValue::Number(0.02))
        .with_plugin(0, PluginSelection::new("Reverb", [0.3, 6.0, 0.4]))
}

fn renderer(config: &BufferConfig, voices: u32) -> Renderer {
    let session = session(voices);
    let mut descriptor = ModuleDescriptor::default_module();
    descriptor.widgets.push(WidgetDescriptor::Poly {
        name: "poly".into(),
    });
    let (_module, graph) = Module::load_with(&session, &descriptor, config, |_, _| {
        let table = (0..96_000).map(|n| (n as f32 * 0.02).sin() * 0.5).collect();
        Ok(SoundData::from_channels(48_000.0, vec![table]))
    })
    .expect("module");
    let (_chain, processor) = PluginChain::build(&session.plugins, config).expect("chain");
    let mut renderer = Renderer::new(
        config.clone(),
        CommandQueue::new(),
        Arc::new(AtomicF32::new(1.0)),
    );
    renderer.apply(RenderCommand::SwapGraph(Box::new(RenderGraph {
        module: graph,
        chain: processor,
    })));
    renderer
}

fn sampler_module(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(30);

    for voices in [1, 8] {
        group.bench_function(format!("sampler_{voices}_voices_48k_block128"), |b| {
            let config = BufferConfig::new(48_000.0, 128, ChannelLayout::Stereo);
            let mut renderer = renderer(&config, voices);
            b.iter(|| {
                renderer.process_block();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, sampler_module);
criterion_main!(benches);
