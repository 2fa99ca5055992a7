use std::sync::Arc;

use bytes::Bytes;
use netloom::{
    BufferError, Error, IoBuffer, IoHandler, IoSession, Message, PrefixWidth,
    ProtocolCodecFilter, Result,
};
use netloom_codec::{LineDelimiter, PrefixedBytesCodecFactory, TextLineCodecFactory};
use parking_lot::Mutex;

#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<String>>,
    records: Mutex<Vec<Bytes>>,
    sent: Mutex<Vec<String>>,
    errors: Mutex<Vec<Error>>,
    closed: Mutex<u32>,
    echo: bool,
    reject: Option<&'static str>,
}

impl IoHandler for Recorder {
    fn session_closed(&self, _session: &Arc<IoSession>) -> Result<()> {
        *self.closed.lock() += 1;
        Ok(())
    }

    fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<()> {
        let message = match message.downcast::<Bytes>() {
            Ok(record) => {
                self.records.lock().push(*record);
                return Ok(());
            }
            Err(message) => message,
        };
        if let Ok(line) = message.downcast::<String>() {
            self.received.lock().push((*line).clone());
            if self.reject == Some(line.as_str()) {
                return Err(Error::ProtocolDecode(format!("rejected {line}")));
            }
            if self.echo {
                session.write(line);
            }
        }
        Ok(())
    }

    fn message_sent(&self, _session: &Arc<IoSession>, message: Message) -> Result<()> {
        if let Ok(line) = message.downcast::<String>() {
            self.sent.lock().push(*line);
        }
        Ok(())
    }

    fn exception_caught(&self, _session: &Arc<IoSession>, cause: Error) -> Result<()> {
        self.errors.lock().push(cause);
        Ok(())
    }
}

fn session_with(recorder: &Arc<Recorder>, codec: Arc<dyn netloom::IoFilter>) -> Arc<IoSession> {
    let session = IoSession::builder(7, recorder.clone()).build();
    session.chain().add_last("codec", codec).unwrap();
    session.fire_created();
    session.fire_opened();
    session
}

#[test]
fn test_windows_line_echo_round_trip() {
    let recorder = Arc::new(Recorder {
        echo: true,
        ..Default::default()
    });
    let factory = TextLineCodecFactory::new()
        .with_delimiter(LineDelimiter::Windows)
        .unwrap();
    let session = session_with(&recorder, Arc::new(ProtocolCodecFilter::new(factory)));

    session.fire_received(IoBuffer::from("hello\r\n"));
    assert_eq!(*recorder.received.lock(), vec!["hello"]);

    let request = session.poll_write().unwrap();
    assert_eq!(request.buffer().unwrap().as_slice(), b"hello\r\n");
    assert!(session.poll_write().is_none());

    let future = request.future().clone();
    session.record_written(7);
    session.write_completed(request);
    assert!(future.is_written());
    assert_eq!(*recorder.sent.lock(), vec!["hello"]);
    assert_eq!(session.written_messages(), 1);
}

#[test]
fn test_length_prefixed_frame_split_across_two_reads() {
    let recorder = Arc::new(Recorder::default());
    let factory = PrefixedBytesCodecFactory::new(PrefixWidth::Four, 1024);
    let session = session_with(&recorder, Arc::new(ProtocolCodecFilter::new(factory)));

    session.fire_received(IoBuffer::wrap(vec![0, 0, 0, 10, 1, 2, 3]));
    assert!(recorder.records.lock().is_empty());

    session.fire_received(IoBuffer::wrap(vec![4, 5, 6, 7, 8, 9, 10]));
    let records = recorder.records.lock();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].as_ref(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn test_decode_error_reports_and_closes() {
    let recorder = Arc::new(Recorder::default());
    let factory = TextLineCodecFactory::new().with_max_line_length(8);
    let session = session_with(&recorder, Arc::new(ProtocolCodecFilter::new(factory)));

    session.fire_received(IoBuffer::from("ok\nthis line is far too long\n"));

    assert_eq!(*recorder.received.lock(), vec!["ok"]);
    assert!(matches!(
        recorder.errors.lock().as_slice(),
        [Error::ProtocolDecode(_)]
    ));
    assert!(session.is_closing());
    assert!(session.should_close_now());

    session.finish_close();
    session.finish_close();
    assert_eq!(*recorder.closed.lock(), 1);
    assert!(session.chain().is_empty());
}

#[test]
fn test_unterminated_line_is_dropped_on_close() {
    let recorder = Arc::new(Recorder::default());
    let session = session_with(
        &recorder,
        Arc::new(ProtocolCodecFilter::new(TextLineCodecFactory::new())),
    );

    session.fire_received(IoBuffer::from("first\nsecond"));
    session.close(true);
    session.finish_close();

    assert_eq!(*recorder.received.lock(), vec!["first"]);
    assert!(recorder.errors.lock().is_empty());
    assert_eq!(*recorder.closed.lock(), 1);
}

#[test]
fn test_failing_message_does_not_drop_rest_of_batch() {
    let recorder = Arc::new(Recorder {
        reject: Some("bad"),
        ..Default::default()
    });
    let session = session_with(
        &recorder,
        Arc::new(ProtocolCodecFilter::new(TextLineCodecFactory::new())),
    );

    session.fire_received(IoBuffer::from("bad\nsecond\nthird\n"));

    assert_eq!(*recorder.received.lock(), vec!["bad", "second", "third"]);
    assert_eq!(recorder.errors.lock().len(), 1);
    assert!(!session.is_closing());
}

#[test]
fn test_failing_message_still_reports_later_decode_error() {
    let recorder = Arc::new(Recorder {
        reject: Some("bad"),
        ..Default::default()
    });
    let factory = TextLineCodecFactory::new().with_max_line_length(8);
    let session = session_with(&recorder, Arc::new(ProtocolCodecFilter::new(factory)));

    session.fire_received(IoBuffer::from("bad\nok\nthis line is far too long\n"));

    assert_eq!(*recorder.received.lock(), vec!["bad", "ok"]);
    let errors = recorder.errors.lock();
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[1], Error::ProtocolDecode(_)));
    assert!(session.should_close_now());
}

#[test]
fn test_oversized_prefix_keeps_frame_limit_error() {
    let recorder = Arc::new(Recorder::default());
    let factory = PrefixedBytesCodecFactory::new(PrefixWidth::Two, 4);
    let session = session_with(&recorder, Arc::new(ProtocolCodecFilter::new(factory)));

    session.fire_received(IoBuffer::wrap(vec![0, 9, 1, 2]));

    assert!(matches!(
        recorder.errors.lock().as_slice(),
        [Error::Buffer(BufferError::FrameTooLarge { len: 9, max: 4 })]
    ));
    assert!(session.should_close_now());
}
