//! Child output pump: lines are buffered and flushed on a fixed timer

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::logic::events::{EventSink, OutputStream};

pub fn spawn_pump<R>(reader: R, stream: OutputStream, sink: EventSink, flush_every: Duration) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut buffer: Vec<String> = Vec::new();
        let mut ticker = interval(flush_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => buffer.push(line),
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("{:?} read ended: {}", stream, e);
                        break;
                    }
                },
                _ = ticker.tick() => {
                    sink.emit_output(stream, std::mem::take(&mut buffer));
                }
            }
        }

        sink.emit_output(stream, buffer);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::events::CoreEvent;

    #[tokio::test]
    async fn test_pump_flushes_remaining_lines_at_eof() {
        let (sink, mut rx) = EventSink::channel();
        let input: &[u8] = b"one\ntwo\nthree";
        spawn_pump(input, OutputStream::Stderr, sink, Duration::from_secs(60))
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Ok(CoreEvent::Output { stream, lines: batch }) = rx.try_recv() {
            assert_eq!(stream, OutputStream::Stderr);
            lines.extend(batch);
        }
        assert_eq!(lines, vec!["one", "two", "three"]);
    }
}
