//! Response bodies produced by the cache service.
//!
//! [`CaptureBody`] is the interceptor installed on a miss: it hands every
//! frame to the client as soon as the handler yields it and keeps a copy, so
//! the finished body can be committed to the store without the handler
//! knowing.

#![allow(missing_docs)]

use std::{
    fmt,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use response_cache::BoxError;

/// Receives the complete body of an intercepted response.
pub type Commit = Box<dyn FnOnce(Bytes) + Send + 'static>;

struct Capture {
    chunks: Vec<Bytes>,
    size: usize,
    limit: usize,
    commit: Commit,
}

impl Capture {
    fn finish(self) {
        let mut body = BytesMut::with_capacity(self.size);
        for chunk in &self.chunks {
            body.extend_from_slice(chunk);
        }
        (self.commit)(body.freeze());
    }
}

pin_project! {
    /// Decorates a response body so its bytes are captured while they stream
    /// to the client.
    ///
    /// `commit` runs at most once, when the inner body ends. A body that fails
    /// or outgrows the limit is forwarded without being committed.
    pub struct CaptureBody<B> {
        #[pin]
        inner: B,
        capture: Option<Capture>,
    }
}

impl<B: Body> CaptureBody<B> {
    /// Wrap `inner`, capturing at most `limit` bytes.
    pub fn new(inner: B, limit: usize, commit: Commit) -> Self {
        let hint = inner.size_hint();
        let capture = if hint.lower() > limit as u64 {
            log::debug!(
                "response body of at least {} bytes exceeds {limit}, not capturing",
                hint.lower()
            );
            None
        } else {
            Some(Capture { chunks: Vec::new(), size: 0, limit, commit })
        };
        let mut body = Self { inner, capture };
        // An already finished body may never be polled.
        if body.inner.is_end_stream() {
            if let Some(capture) = body.capture.take() {
                capture.finish();
            }
        }
        body
    }

    /// Returns `true` while the body is still being captured.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }
}

fn record(capture: &mut Option<Capture>, data: &Bytes) {
    let overflow = match capture {
        Some(c) => c.size + data.len() > c.limit,
        None => return,
    };
    if overflow {
        log::debug!("response body outgrew the capture limit, not capturing");
        *capture = None;
    } else if let Some(c) = capture {
        c.size += data.len();
        c.chunks.push(data.clone());
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body,
    B::Data: Into<Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        match ready!(this.inner.as_mut().poll_frame(cx)) {
            Some(Ok(frame)) => {
                let frame = frame.map_data(Into::into);
                if let Some(data) = frame.data_ref() {
                    record(this.capture, data);
                }
                if this.inner.is_end_stream() {
                    if let Some(capture) = this.capture.take() {
                        capture.finish();
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                if this.capture.take().is_some() {
                    log::debug!("response body failed, not capturing");
                }
                Poll::Ready(Some(Err(err.into())))
            }
            None => {
                if let Some(capture) = this.capture.take() {
                    capture.finish();
                }
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> fmt::Debug for CaptureBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBody")
            .field("capturing", &self.capture.is_some())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Body of a response leaving the cache service.
    #[project = ResponseBodyProj]
    pub enum ResponseBody<B> {
        /// Replayed from the cache.
        Cached {
            data: Option<Bytes>,
        },
        /// Produced by the handler and captured on the way out.
        Captured {
            #[pin]
            body: CaptureBody<B>,
        },
        /// Produced by the handler, untouched by the cache.
        Passthrough {
            #[pin]
            body: B,
        },
    }
}

impl<B> ResponseBody<B> {
    /// A body replayed from the cache.
    pub fn cached(data: Bytes) -> Self {
        Self::Cached { data: Some(data) }
    }

    /// A body being captured.
    pub fn captured(body: CaptureBody<B>) -> Self {
        Self::Captured { body }
    }

    /// A body the cache does not touch.
    pub fn passthrough(body: B) -> Self {
        Self::Passthrough { body }
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body,
    B::Data: Into<Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            ResponseBodyProj::Cached { data } => match data.take() {
                Some(bytes) if !bytes.is_empty() => {
                    Poll::Ready(Some(Ok(Frame::data(bytes))))
                }
                _ => Poll::Ready(None),
            },
            ResponseBodyProj::Captured { body } => body.poll_frame(cx),
            ResponseBodyProj::Passthrough { body } => {
                body.poll_frame(cx).map(|opt| {
                    opt.map(|res| {
                        res.map(|frame| frame.map_data(Into::into))
                            .map_err(Into::into)
                    })
                })
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Cached { data } => data.as_ref().is_none_or(Bytes::is_empty),
            Self::Captured { body } => body.is_end_stream(),
            Self::Passthrough { body } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Cached { data } => SizeHint::with_exact(
                data.as_ref().map_or(0, |d| d.len() as u64),
            ),
            Self::Captured { body } => body.size_hint(),
            Self::Passthrough { body } => body.size_hint(),
        }
    }
}

impl<B> fmt::Debug for ResponseBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached { data } => f
                .debug_struct("Cached")
                .field("len", &data.as_ref().map_or(0, Bytes::len))
                .finish(),
            Self::Captured { body } => {
                f.debug_tuple("Captured").field(body).finish()
            }
            Self::Passthrough { .. } => f.write_str("Passthrough"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Chunks {
        chunks: Vec<&'static [u8]>,
        fail_at: Option<usize>,
    }

    impl Body for Chunks {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
            if self.fail_at == Some(0) {
                self.fail_at = None;
                return Poll::Ready(Some(Err(std::io::Error::other("boom"))));
            }
            if self.chunks.is_empty() {
                return Poll::Ready(None);
            }
            self.fail_at = self.fail_at.map(|n| n - 1);
            let chunk = self.chunks.remove(0);
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(chunk)))))
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Bytes>>>, Commit) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |bytes| sink.lock().unwrap().push(bytes)))
    }

    async fn drain<B>(body: B) -> Result<Vec<u8>, BoxError>
    where
        B: Body<Data = Bytes, Error = BoxError>,
    {
        let mut body = std::pin::pin!(body);
        let mut out = Vec::new();
        while let Some(frame) =
            std::future::poll_fn(|cx| body.as_mut().poll_frame(cx)).await
        {
            if let Some(data) = frame?.data_ref() {
                out.extend_from_slice(data);
            }
        }
        Ok(out)
    }

    #[tokio::test]
    async fn forwards_and_commits_once() {
        let (seen, commit) = recorder();
        let body = CaptureBody::new(
            Chunks { chunks: vec![b"ab", b"cd", b"e"], fail_at: None },
            1024,
            commit,
        );
        assert_eq!(drain(body).await.unwrap(), b"abcde");
        assert_eq!(*seen.lock().unwrap(), vec![Bytes::from_static(b"abcde")]);
    }

    #[tokio::test]
    async fn oversized_body_is_delivered_but_not_committed() {
        let (seen, commit) = recorder();
        let body = CaptureBody::new(
            Chunks { chunks: vec![b"abc", b"def"], fail_at: None },
            4,
            commit,
        );
        assert_eq!(drain(body).await.unwrap(), b"abcdef");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_body_is_not_committed() {
        let (seen, commit) = recorder();
        let body = CaptureBody::new(
            Chunks { chunks: vec![b"abc", b"def"], fail_at: Some(1) },
            1024,
            commit,
        );
        assert!(drain(body).await.is_err());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn dropped_body_is_not_committed() {
        let (seen, commit) = recorder();
        let body = CaptureBody::new(
            Chunks { chunks: vec![b"abc"], fail_at: None },
            1024,
            commit,
        );
        assert!(body.is_capturing());
        drop(body);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_body_commits_immediately() {
        let (seen, commit) = recorder();
        let body = CaptureBody::new(
            http_body_util::Empty::<Bytes>::new(),
            1024,
            commit,
        );
        assert!(!body.is_capturing());
        assert_eq!(*seen.lock().unwrap(), vec![Bytes::new()]);
    }

    #[test]
    fn size_hint_over_limit_skips_capture() {
        let (seen, commit) = recorder();
        let body = CaptureBody::new(
            http_body_util::Full::new(Bytes::from_static(b"0123456789")),
            4,
            commit,
        );
        assert!(!body.is_capturing());
        drop(body);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cached_body_replays_bytes() {
        let body: ResponseBody<http_body_util::Empty<Bytes>> =
            ResponseBody::cached(Bytes::from_static(b"hello"));
        assert_eq!(body.size_hint().exact(), Some(5));
        assert!(!body.is_end_stream());
        assert_eq!(drain(body).await.unwrap(), b"hello");
    }
}
