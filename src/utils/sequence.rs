use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// 依次执行任务，相邻两个任务之间等待 `delay`
///
/// 同一时刻只有一个任务在运行，结果按输入顺序返回。
pub async fn run_sequential<I, F, Fut, T>(tasks: I, delay: Duration) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut outcomes = Vec::new();

    for (index, task) in tasks.into_iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            sleep(delay).await;
        }
        outcomes.push(task().await);
    }

    outcomes
}
