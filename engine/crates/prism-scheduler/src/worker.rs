use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::sync::WaitGroup;
use prism_gfx::{GfxError, GfxResult};

use crate::{context::GpuTag, process::GpuProcess, recorder::GpuRecorder};

/// 等待录制的异步 process
pub(crate) struct GpuWorkItem {
    pub process: Box<dyn GpuProcess>,
    pub tag: Option<GpuTag>,
    /// 录制结束（或被丢弃）时 drop，作为 flush 的 join barrier
    pub join: WaitGroup,
}

/// 录制异步 process 的线程池
///
/// # 线程生命周期
/// 1. 所有 worker 共享一个有界 channel，容量等于 worker 数，队列满时 `send` 阻塞
/// 2. 每个 worker 持有一个固定的录制 slot，处理完一个 item 之后 drop 它的 `WaitGroup`
/// 3. shutdown 时先由调度器设置 closed 标记，worker 丢弃剩余的 item；
///    然后 drop sender，`recv` 返回错误，线程退出并被 join
pub(crate) struct GpuWorkerPool {
    sender: Option<Sender<GpuWorkItem>>,
    threads: Vec<JoinHandle<()>>,
}

impl GpuWorkerPool {
    /// worker i 使用 slot i + 1
    pub fn new(recorder: &Arc<GpuRecorder>, worker_count: usize) -> GfxResult<Self> {
        let (sender, receiver) = crossbeam_channel::bounded::<GpuWorkItem>(worker_count);

        let threads = (0..worker_count)
            .map(|index| {
                let recorder = recorder.clone();
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("Gpu-Worker-{index}"))
                    .spawn(move || worker_main(recorder, index + 1, receiver))
                    .map_err(|e| GfxError::construction(format!("failed to spawn gpu worker {index}: {e}")))
            })
            .collect::<GfxResult<Vec<_>>>()?;

        Ok(Self {
            sender: Some(sender),
            threads,
        })
    }

    pub fn send(&self, item: GpuWorkItem) -> GfxResult<()> {
        let sender = self.sender.as_ref().ok_or_else(|| GfxError::invalid("gpu worker pool is shut down"))?;
        sender.send(item).map_err(|_| GfxError::invalid("gpu worker pool is shut down"))
    }

    pub fn shutdown(&mut self) {
        // 必须先 drop sender，否则 worker 的 recv 一直阻塞，join 死锁
        self.sender = None;
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("failed to join gpu worker thread");
            }
        }
    }
}

impl Drop for GpuWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(recorder: Arc<GpuRecorder>, slot: usize, receiver: Receiver<GpuWorkItem>) {
    while let Ok(item) = receiver.recv() {
        let GpuWorkItem {
            mut process,
            tag,
            join,
        } = item;
        if recorder.is_closed() {
            drop(join);
            continue;
        }

        let _span = tracy_client::span!("GpuWorker::record");
        let result = panic::catch_unwind(AssertUnwindSafe(|| recorder.record(slot, process.as_mut(), tag)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("async process failed on slot {}: {}", slot, e);
                recorder.push_error(e);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("async process panicked on slot {}: {}", slot, message);
                recorder.push_error(GfxError::invalid(format!("async process panicked: {message}")));
            }
        }
        drop(join);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
