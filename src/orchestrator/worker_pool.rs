//! 工作者池 - 编排层
//!
//! 固定数量的工作者从共享任务队列取任务、跑完整条流程、把结果推入结果队列。
//! 两个队列容量都是 2W：任务队列满时提交方阻塞（背压）。
//!
//! 取消只在任务之间生效，正在执行的阶段不会被打断。

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::BatchError;
use crate::workflow::{PaperFlow, ProcessingJob, ProcessingResult};

/// 工作者池
pub struct WorkerPool {
    job_tx: Option<mpsc::Sender<ProcessingJob>>,
    result_rx: mpsc::Receiver<ProcessingResult>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    workers: usize,
}

impl WorkerPool {
    /// 启动 `workers` 个工作者（至少 1 个）
    pub fn start(workers: usize, flow: Arc<PaperFlow>, cancel: CancellationToken) -> Self {
        let workers = workers.max(1);
        let capacity = workers * 2;

        let (job_tx, job_rx) = mpsc::channel::<ProcessingJob>(capacity);
        let (result_tx, result_rx) = mpsc::channel::<ProcessingResult>(capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let handles = (1..=workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    job_rx.clone(),
                    result_tx.clone(),
                    flow.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        info!("👷 已启动 {} 个工作者 (队列容量 {})", workers, capacity);

        Self {
            job_tx: Some(job_tx),
            result_rx,
            handles,
            cancel,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 队列容量（任务队列与结果队列相同）
    pub fn capacity(&self) -> usize {
        self.workers * 2
    }

    /// 取一个提交端，可以移动到独立的生产者任务中
    ///
    /// 所有提交端（包括池自身持有的）都释放后，工作者在队列取空时退出
    pub fn submitter(&self) -> Option<mpsc::Sender<ProcessingJob>> {
        self.job_tx.clone()
    }

    /// 提交任务；队列满时等待
    pub async fn submit(&self, job: ProcessingJob) -> Result<(), BatchError> {
        let tx = self.job_tx.as_ref().ok_or(BatchError::QueueClosed)?;
        tx.send(job).await.map_err(|_| BatchError::QueueClosed)
    }

    /// 不再提交新任务
    pub fn close(&mut self) {
        self.job_tx.take();
    }

    /// 下一个结果；所有工作者退出后返回 `None`
    pub async fn next_result(&mut self) -> Option<ProcessingResult> {
        self.result_rx.recv().await
    }

    /// 通知所有工作者在当前任务结束后停止
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 等待所有工作者退出，未读取的结果被丢弃
    pub async fn join(mut self) {
        self.close();
        self.result_rx.close();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("工作者异常退出: {}", e);
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ProcessingJob>>>,
    results: mpsc::Sender<ProcessingResult>,
    flow: Arc<PaperFlow>,
    cancel: CancellationToken,
) {
    loop {
        // 持锁只为取一个任务
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };

        let result = flow.run(job, worker_id).await;
        if results.send(result).await.is_err() {
            debug!("[工作者 {}] 结果队列已关闭", worker_id);
            break;
        }
    }

    if cancel.is_cancelled() {
        info!("[工作者 {}] 🛑 已取消", worker_id);
    } else {
        debug!("[工作者 {}] 任务队列已空，退出", worker_id);
    }
}
