use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::batch::BatchController;

/// 左右カメラから同時に読んだ1組。どちらかが欠けることもある
#[derive(Debug, Clone, PartialEq)]
pub struct FramePair<F> {
    pub left: Option<F>,
    pub right: Option<F>,
    /// 無ければコントローラがフレーム番号から決める
    pub timestamp: Option<f64>,
}

/// 2台のカメラ（または録画）からのフレームペア供給源
///
/// `Err` は一時的な読み込み失敗として読み飛ばされ、`Ok(None)` でストリーム終端。
pub trait FrameSource: Send + 'static {
    type Frame: Clone + Send + 'static;

    fn read_pair(&mut self) -> Result<Option<FramePair<Self::Frame>>>;
}

/// メモリ上のフレームペア列を順に返すソース
pub struct QueuedSource<F> {
    pairs: VecDeque<FramePair<F>>,
}

impl<F> QueuedSource<F> {
    pub fn new(pairs: impl IntoIterator<Item = FramePair<F>>) -> Self {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }
}

impl<F: Clone + Send + 'static> FrameSource for QueuedSource<F> {
    type Frame = F;

    fn read_pair(&mut self) -> Result<Option<FramePair<F>>> {
        Ok(self.pairs.pop_front())
    }
}

/// 別スレッドでソースを読み続け、コントローラのバッファへ追記する
pub struct ThreadedProducer {
    running: Arc<AtomicBool>,
    frame_id: Arc<AtomicU64>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadedProducer {
    /// `pace` を指定すると1ペアごとにその時間だけ待つ（録画の再生用）
    pub fn start<S: FrameSource>(
        mut source: S,
        controller: Arc<BatchController<S::Frame>>,
        pace: Option<Duration>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_ref = running.clone();
        let frame_id = Arc::new(AtomicU64::new(0));
        let frame_id_ref = frame_id.clone();

        let handle = thread::spawn(move || {
            while running_ref.load(Ordering::Acquire) {
                match source.read_pair() {
                    Ok(Some(pair)) => {
                        controller.add_frame_pair(pair.left, pair.right, pair.timestamp);
                        frame_id_ref.fetch_add(1, Ordering::Release);
                    }
                    Ok(None) => {
                        log::info!(
                            "Frame source exhausted after {} pairs",
                            frame_id_ref.load(Ordering::Acquire)
                        );
                        break;
                    }
                    Err(e) => log::debug!("Skipping unreadable frame pair: {:#}", e),
                }
                if let Some(d) = pace {
                    thread::sleep(d);
                }
            }
            running_ref.store(false, Ordering::Release);
        });

        Self {
            running,
            frame_id,
            handle: Some(handle),
        }
    }

    /// 追記したフレームペア数
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 読み込みスレッドに停止を指示する。終了は `join` で待つ
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Frame producer thread panicked");
            }
        }
    }
}

impl Drop for ThreadedProducer {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
