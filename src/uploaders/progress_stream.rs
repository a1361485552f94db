use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use crate::core::ProgressSender;

/// 请求体分块大小
pub const CHUNK_SIZE: usize = 64 * 1024;

/// 把内存中的文件内容切成块，作为请求体流
pub fn chunk_stream(data: Bytes) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
        .collect();

    futures::stream::iter(chunks)
}

pin_project! {
    /// 统计已发送字节，按百分比上报，百分比不变时不重复发送
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        progress_tx: ProgressSender,
        sent_bytes: u64,
        total_bytes: u64,
        last_percent: Option<u8>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, total_bytes: u64, progress_tx: ProgressSender) -> Self {
        Self {
            inner,
            progress_tx,
            sent_bytes: 0,
            total_bytes,
            last_percent: None,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.sent_bytes += chunk.len() as u64;

                let percent = if *this.total_bytes == 0 {
                    100
                } else {
                    ((*this.sent_bytes).min(*this.total_bytes) * 100 / *this.total_bytes) as u8
                };

                if *this.last_percent != Some(percent) {
                    *this.last_percent = Some(percent);
                    let _ = this.progress_tx.send(percent);
                }

                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
