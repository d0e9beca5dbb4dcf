//! Async progress streaming.
//!
//! A job spawned with [`Converter::spawn`](crate::Converter::spawn) publishes
//! one [`ProgressEvent`] per state transition. [`ProgressStream`] exposes that
//! channel as a [`tokio_stream::Stream`]; it ends once the job has reached a
//! terminal state and the background task has finished.
//!
//! # Example
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//!
//! use chaptermux::{ConversionJob, ConversionOptions, Converter, JobState};
//!
//! # async fn example() -> Result<(), chaptermux::ConversionError> {
//! let job = ConversionJob::new(["01.flac"], "cover.png", "single.mkv");
//! let mut handle = Converter::with_ffmpeg(ConversionOptions::new()).spawn(job);
//! let mut stream = handle.take_progress().expect("progress stream");
//!
//! let transitions: Vec<JobState> = (&mut stream).map(|event| event.state).collect().await;
//! println!("{transitions:?}");
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::Stream;

use crate::progress::ProgressEvent;

/// A stream of [`ProgressEvent`]s produced by a background conversion job.
///
/// Implements [`tokio_stream::Stream`] so it can be used with
/// [`StreamExt`](tokio_stream::StreamExt) combinators such as `next()`,
/// `map()`, and `filter()`. Dropping the stream does not affect the job.
#[derive(Debug)]
pub struct ProgressStream {
    receiver: UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    pub(crate) fn new(receiver: UnboundedReceiver<ProgressEvent>) -> Self {
        Self { receiver }
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
