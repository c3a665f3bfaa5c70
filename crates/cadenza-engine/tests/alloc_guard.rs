use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use cadenza_engine::chain::PluginChain;
use cadenza_engine::renderer::{CommandQueue, RenderCommand, RenderGraph, Renderer};
use cadenza_engine::sampler::SoundData;
use cadenza_engine::{
    BufferConfig, ChannelLayout, CurveLine, Module, ModuleDescriptor, PlayMode, PluginSelection,
    SamplerInfo, Session, WidgetDescriptor, WidgetValue,
};

struct CountingAllocator;

static COUNTING: AtomicBool = AtomicBool::new(false);
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if COUNTING.load(Ordering::Relaxed) {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if COUNTING.load(Ordering::Relaxed) {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        System.alloc_zeroed(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if COUNTING.load(Ordering::Relaxed) {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        System.realloc(ptr, layout, new_size)
    }
}

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

#[test]
fn steady_state_rendering_does_not_allocate() {
    let config = BufferConfig::new(48_000.0, 128, ChannelLayout::Stereo);
    let session = Session::new(10.0)
        .with_input("snd", "snd.wav")
        .with_sampler("snd", SamplerInfo::live(0.25))
        .with_sampler_lines("snd")
        .with_line(CurveLine::new("drive", vec![(0.0, 0.2), (10.0, 1.0)]).with_play(PlayMode::Play))
        .with_widget_value("polynum", WidgetValue::Number(1.0))
        .with_widget_value("polyspread", WidgetValue::Number(0.05))
        .with_plugin(0, PluginSelection::new("Reverb", [0.4, 5.0, 0.3]));
    let mut descriptor = ModuleDescriptor::default_module();
    descriptor.widgets.push(WidgetDescriptor::Slider {
        name: "drive".into(),
        init: 0.5,
        gliss: 0.0,
    });
    descriptor.widgets.push(WidgetDescriptor::Poly {
        name: "poly".into(),
    });
    descriptor.samplers[0] = cadenza_engine::SamplerNode::new("snd").with_amp("drive");

    let (_module, graph) = Module::load_with(&session, &descriptor, &config, |_, _| {
        let left = (0..48_000).map(|n| (n as f32 * 0.03).sin() * 0.5).collect();
        let right = (0..48_000).map(|n| (n as f32 * 0.05).sin() * 0.5).collect();
        Ok(SoundData::from_channels(48_000.0, vec![left, right]))
    })
    .unwrap();
    let (_chain, processor) = PluginChain::build(&session.plugins, &config).unwrap();

    let queue = CommandQueue::new();
    let amp = Arc::new(AtomicF32::new(0.8));
    let mut renderer = Renderer::new(config, queue.clone(), Arc::clone(&amp));
    renderer.apply(RenderCommand::SwapGraph(Box::new(RenderGraph {
        module: graph,
        chain: processor,
    })));

    for _ in 0..16 {
        renderer.process_block();
    }

    ALLOCATIONS.store(0, Ordering::SeqCst);
    COUNTING.store(true, Ordering::SeqCst);
    let mut peak = 0.0f32;
    for block in 0..256 {
        if block == 128 {
            amp.store(0.5, Ordering::Relaxed);
        }
        peak = peak.max(renderer.process_block().peak());
    }
    COUNTING.store(false, Ordering::SeqCst);

    assert_eq!(ALLOCATIONS.load(Ordering::SeqCst), 0, "allocations on the render path");
    assert!(peak > 0.0);
}
