use std::io::{self, BufWriter, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use crate::error::BuildError;

const CHUNK_SIZE: usize = 64 * 1024;
const PIPE_DEPTH: usize = 16;

enum Message {
    Data(Vec<u8>),
    Failed(BuildError),
    Eof,
}

/// Reading end of a tar stream produced on a background thread.
///
/// Producer failures surface as `io::Error`s wrapping the [`BuildError`]
/// (see [`BuildError::from_stream`]). Dropping the stream early disconnects
/// the pipe: the producer's next write fails and its thread exits.
pub struct TarStream {
    receiver: Receiver<Message>,
    chunk: Vec<u8>,
    offset: usize,
    producer: Option<JoinHandle<()>>,
    done: bool,
}

impl TarStream {
    pub fn spawn<F>(produce: F) -> Self
    where
        F: FnOnce(&mut dyn Write) -> Result<(), BuildError> + Send + 'static,
    {
        let (sender, receiver) = mpsc::sync_channel(PIPE_DEPTH);
        let producer = thread::spawn(move || {
            let mut writer = BufWriter::with_capacity(
                CHUNK_SIZE,
                PipeWriter {
                    sender: sender.clone(),
                },
            );
            let outcome = produce(&mut writer)
                .and_then(|()| writer.flush().map_err(BuildError::Archive));
            // Buffered bytes are discarded on failure.
            let _unflushed = writer.into_parts();
            let message = match outcome {
                Ok(()) => Message::Eof,
                Err(err) => Message::Failed(err),
            };
            // A dropped reader no longer wants the outcome.
            let _ = sender.send(message);
        });
        Self {
            receiver,
            chunk: Vec::new(),
            offset: 0,
            producer: Some(producer),
            done: false,
        }
    }

    fn join_producer(&mut self) -> io::Result<()> {
        match self.producer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| io::Error::other(BuildError::ProducerLost)),
            None => Ok(()),
        }
    }
}

impl Read for TarStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.offset < self.chunk.len() {
                let available = &self.chunk[self.offset..];
                let count = available.len().min(buf.len());
                buf[..count].copy_from_slice(&available[..count]);
                self.offset += count;
                return Ok(count);
            }
            if self.done {
                return Ok(0);
            }
            match self.receiver.recv() {
                Ok(Message::Data(chunk)) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                Ok(Message::Eof) => {
                    self.done = true;
                    self.join_producer()?;
                }
                Ok(Message::Failed(err)) => {
                    self.done = true;
                    return Err(io::Error::other(err));
                }
                Err(mpsc::RecvError) => {
                    self.done = true;
                    return Err(io::Error::other(BuildError::ProducerLost));
                }
            }
        }
    }
}

struct PipeWriter {
    sender: SyncSender<Message>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.sender
            .send(Message::Data(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "tar stream reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_everything_then_eof() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let mut stream = TarStream::spawn(move |out| {
            out.write_all(&payload).map_err(BuildError::Archive)
        });
        let mut received = Vec::new();
        stream.read_to_end(&mut received).expect("read");
        assert_eq!(received, expected);
        assert_eq!(stream.read(&mut [0u8; 8]).expect("eof"), 0);
    }

    #[test]
    fn producer_errors_reach_the_reader() {
        let mut stream = TarStream::spawn(|out| {
            out.write_all(b"partial").map_err(BuildError::Archive)?;
            Err(BuildError::InvalidLayerCount(0))
        });
        let err = stream.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            BuildError::from_stream(err),
            BuildError::InvalidLayerCount(0)
        ));
    }

    #[test]
    fn dropping_the_reader_releases_the_producer() {
        let (done_tx, done_rx) = mpsc::channel();
        let stream = TarStream::spawn(move |out| {
            let chunk = vec![0u8; CHUNK_SIZE];
            let outcome = loop {
                if let Err(err) = out.write_all(&chunk) {
                    break err;
                }
            };
            done_tx.send(outcome.kind()).expect("report");
            Ok(())
        });
        drop(stream);
        let kind = done_rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("producer finished");
        assert_eq!(kind, io::ErrorKind::BrokenPipe);
    }
}
