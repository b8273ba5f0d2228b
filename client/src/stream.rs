//! Consume an execution stream body and dispatch its events.

use futures_util::{Stream, StreamExt};
use shared_types::{CompletedPayload, RunProgress, SseDecoder, StartedTestCase, StepEvent, StreamEvent};

use crate::error::ClientError;

/// Callbacks invoked while a run streams. Errors abort the read.
pub trait RunEventHandler {
    fn on_started(&mut self, _run_id: &str, _test_cases: &[StartedTestCase]) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_progress(&mut self, _progress: &RunProgress) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_step(&mut self, _step: &StepEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handler that ignores every intermediate event.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreEvents;

impl RunEventHandler for IgnoreEvents {}

/// Read `stream` to the end and return the `completed` payload.
///
/// An `error` event, a handler failure or a malformed complete frame fails the
/// read. A stream that ends without `completed` fails with
/// [`ClientError::MissingResult`].
pub async fn read_run_stream<S, B, E, H>(
    stream: S,
    handler: &mut H,
) -> Result<CompletedPayload, ClientError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ClientError>,
    H: RunEventHandler + ?Sized,
{
    let mut decoder = SseDecoder::new();
    let mut completed = None;
    futures_util::pin_mut!(stream);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        for event in decoder.push(chunk.as_ref())? {
            dispatch(event, handler, &mut completed)?;
        }
    }
    if let Some(event) = decoder.finish()? {
        dispatch(event, handler, &mut completed)?;
    }

    completed.ok_or(ClientError::MissingResult)
}

fn dispatch<H>(
    event: StreamEvent,
    handler: &mut H,
    completed: &mut Option<CompletedPayload>,
) -> Result<(), ClientError>
where
    H: RunEventHandler + ?Sized,
{
    if completed.is_some() {
        tracing::debug!(event = event.type_tag(), "Ignoring event after completion");
        return Ok(());
    }
    match event {
        StreamEvent::Started { run_id, test_cases } => handler
            .on_started(&run_id, &test_cases)
            .map_err(ClientError::Handler),
        StreamEvent::Progress(progress) => handler
            .on_progress(&progress)
            .map_err(ClientError::Handler),
        StreamEvent::Step(step) => handler.on_step(&step).map_err(ClientError::Handler),
        StreamEvent::Completed(payload) => {
            *completed = Some(payload);
            Ok(())
        }
        StreamEvent::Error { error } => Err(ClientError::Remote(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use shared_types::{encode_event, RunStatus};

    #[derive(Default)]
    struct Recorder {
        started: Vec<String>,
        progress: Vec<u32>,
        fail_on_progress: bool,
    }

    impl RunEventHandler for Recorder {
        fn on_started(&mut self, run_id: &str, _test_cases: &[StartedTestCase]) -> anyhow::Result<()> {
            self.started.push(run_id.to_string());
            Ok(())
        }

        fn on_progress(&mut self, progress: &RunProgress) -> anyhow::Result<()> {
            if self.fail_on_progress {
                anyhow::bail!("progress rejected");
            }
            self.progress.push(progress.current_test_case_index);
            Ok(())
        }
    }

    fn frames(events: &[StreamEvent]) -> String {
        events.iter().map(|e| encode_event(e).unwrap()).collect()
    }

    fn started() -> StreamEvent {
        StreamEvent::Started {
            run_id: "run-1".to_string(),
            test_cases: vec![],
        }
    }

    fn progress(index: u32) -> StreamEvent {
        StreamEvent::Progress(RunProgress {
            run_id: "run-1".to_string(),
            current_test_case_index: index,
            total_test_cases: 2,
            current_test_case_id: format!("tc-{index}"),
            status: RunStatus::Running,
            report_id: None,
            error: None,
        })
    }

    fn completed() -> StreamEvent {
        StreamEvent::Completed(CompletedPayload {
            report_id: Some("report-1".to_string()),
            ..Default::default()
        })
    }

    /// Split `body` into chunks of `size` bytes.
    fn chunked(body: &str, size: usize) -> impl Stream<Item = Result<Vec<u8>, ClientError>> {
        let chunks: Vec<_> = body
            .as_bytes()
            .chunks(size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_returns_completed_payload_across_chunk_splits() {
        let body = frames(&[started(), progress(0), progress(1), completed()]);
        for size in [1, 3, 7, body.len()] {
            let mut recorder = Recorder::default();
            let payload = read_run_stream(chunked(&body, size), &mut recorder)
                .await
                .unwrap();
            assert_eq!(payload.report_id.as_deref(), Some("report-1"));
            assert_eq!(recorder.started, vec!["run-1"]);
            assert_eq!(recorder.progress, vec![0, 1]);
        }
    }

    #[tokio::test]
    async fn test_error_event_rejects_with_message() {
        let body = frames(&[
            started(),
            StreamEvent::Error {
                error: "agent unreachable".to_string(),
            },
        ]);
        let err = read_run_stream(chunked(&body, 5), &mut IgnoreEvents)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref m) if m == "agent unreachable"));
    }

    #[tokio::test]
    async fn test_stream_without_completion_is_missing_result() {
        let body = frames(&[started(), progress(0)]);
        let err = read_run_stream(chunked(&body, 4), &mut IgnoreEvents)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingResult));
        assert_eq!(err.to_string(), "completed without returning result");
    }

    #[tokio::test]
    async fn test_handler_error_is_not_swallowed() {
        let body = frames(&[started(), progress(0), completed()]);
        let mut recorder = Recorder {
            fail_on_progress: true,
            ..Default::default()
        };
        let err = read_run_stream(chunked(&body, 2), &mut recorder)
            .await
            .unwrap_err();
        match err {
            ClientError::Handler(inner) => assert_eq!(inner.to_string(), "progress rejected"),
            other => panic!("expected handler error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_complete_frame_rejects() {
        let body = format!("{}data: {{not json}}\n\n", frames(&[started()]));
        let err = read_run_stream(chunked(&body, body.len()), &mut IgnoreEvents)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[tokio::test]
    async fn test_truncated_tail_after_completion_is_ignored() {
        let body = format!("{}data: {{\"type\":\"prog", frames(&[started(), completed()]));
        let payload = read_run_stream(chunked(&body, 6), &mut IgnoreEvents)
            .await
            .unwrap();
        assert_eq!(payload.report_id.as_deref(), Some("report-1"));
    }
}
