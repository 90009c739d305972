use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use ash::vk;
use glam::{Affine3A, Vec3};
use prism_gfx::{
    GfxError,
    basic::engine::{GfxEngine, GfxEngineMask},
    commands::barrier::GfxResourceState,
    descriptors::descriptor::GfxDescriptorKind,
    foundation::{
        device::GfxDevice,
        soft_device::{GfxSoftDevice, GfxSoftEvent},
    },
    pipelines::{
        binding::{GfxBindPoint, GfxBindingSlot},
        pipeline::GfxFixedPipeline,
    },
    raytracing::{
        geometry::{AABB_STRIDE, GfxGeometryCollection},
        instance::GfxInstanceCollection,
        versioning::{GfxBuildOptions, GfxCollectionState},
    },
    resources::{
        desc::{GfxCpuAccess, GfxResourceDesc},
        view::GfxView,
    },
};
use prism_scheduler::{process, scheduler::GpuScheduler, settings::GpuSchedulerSettings};

fn settings() -> GpuSchedulerSettings {
    let mut settings = GpuSchedulerSettings {
        buffering: 2,
        worker_count: 4,
        ..Default::default()
    };
    settings.heaps.gpu_csu_capacity = 16 + 2 * 64;
    settings.heaps.gpu_csu_persistent = 16;
    settings
}

fn setup(settings: GpuSchedulerSettings) -> (Arc<GfxSoftDevice>, GpuScheduler) {
    prism_crate_tools::init_log::init_test_log();
    let soft = Arc::new(GfxSoftDevice::new());
    let device: Arc<dyn GfxDevice> = soft.clone();
    let scheduler = GpuScheduler::new(device, settings).unwrap();
    (soft, scheduler)
}

#[test]
fn test_clear_then_read_back() {
    let (_soft, scheduler) = setup(settings());
    let buffer = GfxView::create_buffer(scheduler.gfx(), 64, 4, GfxCpuAccess::None, "buffer").unwrap();
    let texture = GfxView::create(
        scheduler.gfx(),
        GfxResourceDesc::texture2d(vk::Format::R32_UINT, 5, 3, 1, 1),
        "texture",
    )
    .unwrap();

    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| {
            context.copy().clear_uav_uint(&buffer, [0xC0FFEE, 0, 0, 0])?;
            context.copy().clear_uav_uint(&texture, [17, 0, 0, 0])?;
            context.copy().load_from_gpu(&buffer)?;
            context.copy().load_from_gpu(&texture)
        }))
        .unwrap();
    let signal = scheduler.flush_and_signal(GfxEngineMask::ALL).unwrap();
    assert_ne!(signal.value(GfxEngine::Compute), 0);
    assert_eq!(signal.value(GfxEngine::Copy), 0);
    scheduler.wait_for(&signal).unwrap();

    assert_eq!(buffer.read_vec::<u32>().unwrap(), vec![0xC0FFEE; 64]);
    assert_eq!(texture.read_vec::<u32>().unwrap(), vec![17; 15]);
}

#[test]
fn test_graphics_clear_then_read_back() {
    let (_soft, scheduler) = setup(settings());
    let buffer = GfxView::create_buffer(scheduler.gfx(), 32, 4, GfxCpuAccess::None, "buffer").unwrap();

    scheduler
        .enqueue(process::from_fn(GfxEngine::Graphics, |context| {
            context.copy().clear_uav_uint(&buffer, [42, 0, 0, 0])?;
            context.copy().load_from_gpu(&buffer)
        }))
        .unwrap();
    let signal = scheduler.flush_and_signal(GfxEngineMask::GRAPHICS).unwrap();
    assert_ne!(signal.value(GfxEngine::Graphics), 0);
    scheduler.wait_for(&signal).unwrap();

    assert_eq!(buffer.read_vec::<u32>().unwrap(), vec![42; 32]);
}

#[test]
fn test_process_local_resource_outlives_recording() {
    let (soft, scheduler) = setup(settings());
    let buffer = GfxView::create_buffer(scheduler.gfx(), 16, 4, GfxCpuAccess::None, "buffer").unwrap();

    scheduler.setup_frame(0).unwrap();
    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| {
            let local = GfxView::create_buffer(context.gfx(), 16, 4, GfxCpuAccess::None, "local")?;
            context.copy().clear_uav_uint(&local, [9, 0, 0, 0])?;
            context.copy().copy_resource(&local, &buffer)?;
            context.copy().load_from_gpu(&buffer)
        }))
        .unwrap();
    let signal = scheduler.finish_frame().unwrap();
    scheduler.wait_for(&signal).unwrap();

    assert!(!soft.is_lost());
    assert_eq!(buffer.read_vec::<u32>().unwrap(), vec![9; 16]);

    // local 的内存在该帧 slot 的 allocator reset 之后才释放
    let live = soft.live_memory_count();
    scheduler.setup_frame(1).unwrap();
    scheduler.finish_frame().unwrap();
    assert_eq!(soft.live_memory_count(), live);
    scheduler.setup_frame(2).unwrap();
    assert_eq!(soft.live_memory_count(), live - 1);
    scheduler.finish_frame().unwrap();
}

#[test]
fn test_process_local_view_in_descriptor_table() {
    let (soft, scheduler) = setup(settings());

    for frame in 0..3 {
        scheduler.setup_frame(frame).unwrap();
        scheduler
            .enqueue_async(process::from_fn(GfxEngine::Compute, |context| {
                let desc = GfxResourceDesc::texture2d(vk::Format::R8G8B8A8_UNORM, 4, 4, 1, 1);
                let local = GfxView::create(context.gfx(), desc, "local")?;
                let pipeline = Arc::new(GfxFixedPipeline::new(
                    "sample-local",
                    GfxBindPoint::Compute,
                    vec![GfxBindingSlot::Table {
                        kind: GfxDescriptorKind::ShaderRead,
                        views: vec![Some(local)],
                    }],
                ));
                context.compute().set_pipeline(pipeline)?;
                context.compute().dispatch_threads([4, 4, 1], [4, 4, 1])
            }))
            .unwrap();
        let signal = scheduler.finish_frame().unwrap();
        scheduler.wait_for(&signal).unwrap();
    }
    assert!(!soft.is_lost());
}

#[test]
fn test_submission_follows_slot_order() {
    let (soft, scheduler) = setup(settings());
    let buffer = GfxView::create_buffer(scheduler.gfx(), 64, 4, GfxCpuAccess::None, "buffer").unwrap();
    soft.clear_journal();

    for i in 0..32 {
        let element = buffer.create_element_slice(i, 1).unwrap();
        scheduler
            .enqueue_async(process::from_fn(GfxEngine::Compute, move |context| {
                context.copy().clear_uav_uint(&element, [i, 0, 0, 0])
            }))
            .unwrap();
    }
    let element = buffer.create_element_slice(32, 1).unwrap();
    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| {
            context.copy().clear_uav_uint(&element, [32, 0, 0, 0])
        }))
        .unwrap();
    let signal = scheduler.flush_and_signal(GfxEngineMask::ALL).unwrap();
    scheduler.wait_for(&signal).unwrap();

    let lists = soft
        .journal()
        .into_iter()
        .find_map(|event| match event {
            GfxSoftEvent::Submit {
                engine: GfxEngine::Compute,
                lists,
            } => Some(lists),
            _ => None,
        })
        .unwrap();
    let slots: Vec<usize> = lists
        .iter()
        .map(|name| name.rsplit("-slot").next().unwrap().parse().unwrap())
        .collect();
    assert!(slots.len() >= 2);
    assert_eq!(slots[0], 0);
    assert!(slots.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_upload_then_copy_engine_round_trip() {
    let (_soft, scheduler) = setup(settings());
    let values: Vec<u32> = (0..32).collect();
    let buffer = GfxView::create_buffer(scheduler.gfx(), 32, 4, GfxCpuAccess::None, "buffer").unwrap();
    buffer.write_slice(&values).unwrap();

    scheduler
        .enqueue(process::from_fn(GfxEngine::Copy, |context| {
            context.copy().load_to_gpu(&buffer)?;
            context.copy().load_from_gpu(&buffer)
        }))
        .unwrap();
    let signal = scheduler.flush_and_signal(GfxEngineMask::COPY).unwrap();
    scheduler.wait_for(&signal).unwrap();

    assert_eq!(buffer.read_vec::<u32>().unwrap(), values);
}

#[test]
fn test_async_processes_are_recorded_exactly_once() {
    const COUNT: u32 = 64;
    let (_soft, scheduler) = setup(settings());
    let buffer = GfxView::create_buffer(scheduler.gfx(), COUNT as u64, 4, GfxCpuAccess::None, "buffer").unwrap();

    let recorded = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(HashSet::new()));
    for i in 0..COUNT {
        let element = buffer.create_element_slice(i, 1).unwrap();
        let recorded = recorded.clone();
        let seen = seen.clone();
        scheduler
            .enqueue_async(process::from_fn(GfxEngine::Compute, move |context| {
                recorded.fetch_add(1, Ordering::SeqCst);
                assert!(seen.lock().unwrap().insert(i));
                context.copy().clear_uav_uint(&element, [i * 10, 0, 0, 0])
            }))
            .unwrap();
    }

    // 第一次 flush 是 join 点：所有异步 process 都已经录制
    let first = scheduler.flush_and_signal(GfxEngineMask::ALL).unwrap();
    assert_eq!(recorded.load(Ordering::SeqCst), COUNT as usize);
    assert_eq!(seen.lock().unwrap().len(), COUNT as usize);

    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| context.copy().load_from_gpu(&buffer)))
        .unwrap();
    let second = scheduler.flush_and_signal(GfxEngineMask::ALL).unwrap();
    assert!(second.value(GfxEngine::Compute) > first.value(GfxEngine::Compute));
    scheduler.wait_for(&second).unwrap();

    let expected: Vec<u32> = (0..COUNT).map(|i| i * 10).collect();
    assert_eq!(buffer.read_vec::<u32>().unwrap(), expected);
    assert_eq!(scheduler.stats().processes_recorded, COUNT as u64 + 1);
}

#[test]
fn test_async_errors_and_panics_surface_on_flush() {
    let (_soft, scheduler) = setup(settings());
    scheduler
        .enqueue_async(process::from_fn(GfxEngine::Copy, |_| {
            Err(GfxError::invalid("recording failed"))
        }))
        .unwrap();
    assert!(matches!(
        scheduler.flush_and_signal(GfxEngineMask::ALL),
        Err(GfxError::InvalidOperation(message)) if message.contains("recording failed")
    ));

    scheduler
        .enqueue_async(process::from_fn(GfxEngine::Graphics, |_| panic!("boom")))
        .unwrap();
    assert!(matches!(
        scheduler.flush_and_signal(GfxEngineMask::ALL),
        Err(GfxError::InvalidOperation(message)) if message.contains("boom")
    ));
}

#[test]
fn test_frame_pipelining_waits_before_reset() {
    let (soft, scheduler) = setup(settings());
    let target = GfxView::create(
        scheduler.gfx(),
        GfxResourceDesc::render_target(vk::Format::R8G8B8A8_UNORM, 8, 8),
        "back-buffer",
    )
    .unwrap();
    scheduler.attach_render_targets(vec![target.clone()]).unwrap();

    let mut signals = Vec::new();
    for frame_index in 0..3u64 {
        if frame_index == 2 {
            soft.clear_journal();
        }
        scheduler.setup_frame(frame_index).unwrap();
        assert_eq!(target.resource().last_state().unwrap(), GfxResourceState::RENDER_TARGET);
        assert_eq!(scheduler.current_frame(), (frame_index % 2) as usize);

        scheduler
            .enqueue(process::from_fn(GfxEngine::Graphics, |context| {
                context.graphics().clear_render_target(&target, [0.0, 0.5, 1.0, 1.0])
            }))
            .unwrap();
        signals.push(scheduler.finish_frame().unwrap());
        assert_eq!(target.resource().last_state().unwrap(), GfxResourceState::PRESENT);
    }

    // 第 2 帧复用第 0 帧的 slot：先等待第 0 帧完成，再重置 allocator
    let journal = soft.journal();
    let wait = journal
        .iter()
        .position(|event| matches!(event, GfxSoftEvent::Wait { .. }))
        .unwrap();
    let reset = journal
        .iter()
        .position(|event| matches!(event, GfxSoftEvent::AllocatorReset { .. }))
        .unwrap();
    assert!(wait < reset);
    match &journal[wait] {
        GfxSoftEvent::Wait { handles } => {
            let graphics = scheduler.queue(GfxEngine::Graphics);
            assert!(handles.contains(&graphics.wait_handle(signals[0].value(GfxEngine::Graphics))));
        }
        _ => unreachable!(),
    }

    let stats = scheduler.stats();
    assert_eq!((stats.frames_started, stats.frames_finished), (3, 3));
}

#[test]
fn test_without_frame_buffering_finish_waits() {
    let (soft, scheduler) = setup(GpuSchedulerSettings {
        frame_buffering: false,
        ..settings()
    });
    let buffer = GfxView::create_buffer(scheduler.gfx(), 4, 4, GfxCpuAccess::None, "buffer").unwrap();

    scheduler.setup_frame(0).unwrap();
    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| context.copy().clear_uav_float(&buffer, [1.0; 4])))
        .unwrap();
    soft.clear_journal();
    let signal = scheduler.finish_frame().unwrap();

    let journal = soft.journal();
    assert!(matches!(journal.last(), Some(GfxSoftEvent::Wait { .. })));
    assert!(scheduler.queue(GfxEngine::Compute).completed_value().unwrap() >= signal.value(GfxEngine::Compute));
}

#[test]
fn test_frame_descriptor_region_exhaustion() {
    let mut settings = settings();
    settings.heaps.gpu_csu_capacity = 16 + 2 * 4;
    let (_soft, scheduler) = setup(settings);

    let views: Vec<Option<GfxView>> = (0..5)
        .map(|i| {
            let desc = GfxResourceDesc::texture2d(vk::Format::R8G8B8A8_UNORM, 4, 4, 1, 1);
            Some(GfxView::create(scheduler.gfx(), desc, &format!("texture-{i}")).unwrap())
        })
        .collect();
    let pipeline = Arc::new(GfxFixedPipeline::new(
        "too-many-bindings",
        GfxBindPoint::Compute,
        vec![GfxBindingSlot::Table {
            kind: GfxDescriptorKind::ShaderRead,
            views,
        }],
    ));

    let sync_pipeline = pipeline.clone();
    let result = scheduler.enqueue(process::from_fn(GfxEngine::Compute, move |context| {
        context.compute().set_pipeline(sync_pipeline.clone())?;
        context.compute().dispatch_threads([8, 8, 1], [8, 8, 1])
    }));
    assert!(matches!(result, Err(GfxError::ConfigurationExhaustion(_))));

    scheduler
        .enqueue_async(process::from_fn(GfxEngine::Compute, move |context| {
            context.compute().set_pipeline(pipeline.clone())?;
            context.compute().dispatch_threads([8, 8, 1], [8, 8, 1])
        }))
        .unwrap();
    assert!(matches!(
        scheduler.flush_and_signal(GfxEngineMask::ALL),
        Err(GfxError::ConfigurationExhaustion(_))
    ));
}

#[test]
fn test_device_lost_is_fatal() {
    let (soft, scheduler) = setup(settings());
    let buffer = GfxView::create_buffer(scheduler.gfx(), 4, 4, GfxCpuAccess::None, "buffer").unwrap();
    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| context.copy().clear_uav_uint(&buffer, [0; 4])))
        .unwrap();

    soft.lose_device("driver reset");
    assert!(matches!(
        scheduler.flush_and_signal(GfxEngineMask::ALL),
        Err(GfxError::DeviceLost(_))
    ));
}

#[test]
fn test_acceleration_structures_build_then_refit() {
    let (soft, scheduler) = setup(settings());
    let ctx = scheduler.gfx().clone();

    let aabbs = GfxView::create_buffer(&ctx, 3, AABB_STRIDE, GfxCpuAccess::None, "aabbs").unwrap();
    let mut blas = GfxGeometryCollection::new(&ctx, "boxes");
    blas.add_boxes(aabbs, true).unwrap();

    let mut tlas = GfxInstanceCollection::new(&ctx, "scene");
    let options = GfxBuildOptions::default();
    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| {
            let before = context.raytracing().build_geometry(&mut blas, options)?;
            assert_eq!(before, GfxCollectionState::NotBuilt);
            Ok(())
        }))
        .unwrap();

    let blas = blas.into_shared();
    tlas.add_instance(&blas, 0xFF, 0, None, Affine3A::IDENTITY).unwrap();
    tlas.add_instance(&blas, 0xFF, 0, None, Affine3A::from_translation(Vec3::Y)).unwrap();
    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| {
            context.raytracing().build_scene(&mut tlas, options).map(|_| ())
        }))
        .unwrap();
    let signal = scheduler.flush_and_signal(GfxEngineMask::COMPUTE).unwrap();
    scheduler.wait_for(&signal).unwrap();

    let scene = tlas.result().unwrap().resource().memory();
    let header = soft.read_acceleration_header(scene).unwrap();
    assert_eq!(header.primitive_count, 2);
    assert_eq!(header.refits, 0);

    tlas.set_transform(1, Affine3A::from_translation(Vec3::Z)).unwrap();
    assert_eq!(tlas.state(), GfxCollectionState::NeedsUpdate);
    scheduler
        .enqueue(process::from_fn(GfxEngine::Compute, |context| {
            let before = context.raytracing().build_scene(&mut tlas, options)?;
            assert_eq!(before, GfxCollectionState::NeedsUpdate);
            Ok(())
        }))
        .unwrap();
    let signal = scheduler.flush_and_signal(GfxEngineMask::COMPUTE).unwrap();
    scheduler.wait_for(&signal).unwrap();

    assert_eq!(tlas.state(), GfxCollectionState::UpToDate);
    assert_eq!(soft.read_acceleration_header(scene).unwrap().refits, 1);
    assert_eq!(soft.stats().builds, 3);
}

#[test]
fn test_raytracing_requires_built_scene() {
    let (_soft, scheduler) = setup(settings());
    let tlas = GfxInstanceCollection::new(scheduler.gfx(), "empty-scene");
    let pipeline = Arc::new(GfxFixedPipeline::new(
        "path-tracer",
        GfxBindPoint::RayTracing,
        vec![GfxBindingSlot::RootView(tlas.as_root_view())],
    ));

    let result = scheduler.enqueue(process::from_fn(GfxEngine::Compute, |context| {
        context.raytracing().set_pipeline(pipeline.clone())?;
        context.raytracing().dispatch_rays([16, 16, 1])
    }));
    assert!(matches!(result, Err(GfxError::InvalidOperation(_))));
}
