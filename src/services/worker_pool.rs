use crate::errors::{Result, SignalError};
use log::{info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};

/// 固定大小的异步任务池，限制同时执行的抓取任务数量。
///
/// 由调用方创建并持有，退出前通过 `shutdown` 释放。
pub struct WorkerPool {
    size: usize,
    permits: Arc<Semaphore>,
    in_flight: Mutex<Vec<AbortHandle>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    fn in_flight(&self) -> MutexGuard<'_, Vec<AbortHandle>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 提交任务；任务在拿到许可后才开始执行。
    /// 池在任务排队期间关闭时，任务不会执行，结果为 `None`。
    pub fn spawn<F, T>(&self, task: F) -> Result<JoinHandle<Option<T>>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(SignalError::Unknown("worker pool has been shut down".to_string()));
        }

        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(task.await)
        });

        let mut in_flight = self.in_flight();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle.abort_handle());
        Ok(handle)
    }

    /// 停止接收新任务，等待已提交任务完成，超过 `grace` 后强制中止剩余任务。
    /// 返回是否在宽限期内全部完成。
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if self.is_closed() {
            return true;
        }

        let all_permits = u32::try_from(self.size).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(grace, self.permits.acquire_many(all_permits)).await;
        self.permits.close();

        match drained {
            Ok(Ok(_permits)) => {
                self.in_flight().clear();
                info!("Worker pool drained");
                true
            }
            _ => {
                let mut in_flight = self.in_flight();
                let pending = in_flight.iter().filter(|h| !h.is_finished()).count();
                warn!(
                    "Worker pool did not drain within {:?}, aborting {} task(s)",
                    grace, pending
                );
                for handle in in_flight.drain(..) {
                    handle.abort();
                }
                false
            }
        }
    }
}
