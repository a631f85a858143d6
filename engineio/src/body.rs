//! A `http_body::Body` that unifies a single fully-buffered chunk with a
//! streaming body produced elsewhere, so polling and websocket-upgrade
//! responses can share one `Response<ResponseBody<B>>` return type.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::Body;
use pin_project::pin_project;

#[pin_project(project = ResponseBodyProj)]
pub enum ResponseBody<B> {
    Empty,
    Full {
        #[pin]
        body: http_body::Full<Bytes>,
    },
    Custom {
        #[pin]
        body: B,
    },
}

impl<B> ResponseBody<B> {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::Full {
            body: http_body::Full::new(data.into()),
        }
    }

    pub fn custom(body: B) -> Self {
        Self::Custom { body }
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body<Data = Bytes> + Send + 'static,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        match self.project() {
            ResponseBodyProj::Empty => Poll::Ready(None),
            ResponseBodyProj::Full { body } => body.poll_data(cx).map_err(|e| match e {}),
            ResponseBodyProj::Custom { body } => body.poll_data(cx),
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<http::HeaderMap>, Self::Error>> {
        match self.project() {
            ResponseBodyProj::Empty => Poll::Ready(Ok(None)),
            ResponseBodyProj::Full { body } => body.poll_trailers(cx).map_err(|e| match e {}),
            ResponseBodyProj::Custom { body } => body.poll_trailers(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Full { body } => body.is_end_stream(),
            ResponseBody::Custom { body } => body.is_end_stream(),
        }
    }
}
