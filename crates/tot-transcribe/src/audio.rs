use crate::pcm::{chunk_duration, f32_from_le_bytes, float32_to_int16, int16_to_le_bytes, CHUNK_SAMPLES};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tot_core::SourceError;
use tracing::{debug, warn};

const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Yields S16LE 16 kHz mono chunks until the input ends.
#[async_trait]
pub trait AudioInput: Send + Sync {
    async fn open(&self) -> Result<mpsc::Receiver<Vec<u8>>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormat {
    S16Le,
    F32Le,
}

impl PcmFormat {
    fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::F32Le => 4,
        }
    }
}

/// Raw PCM from a file or FIFO (for example `arecord -f S16_LE -r 16000`
/// piped into a named pipe).
#[derive(Debug, Clone)]
pub struct FileAudioInput {
    path: PathBuf,
    format: PcmFormat,
    realtime: bool,
}

impl FileAudioInput {
    pub fn new(path: impl Into<PathBuf>, format: PcmFormat) -> Self {
        Self {
            path: path.into(),
            format,
            realtime: false,
        }
    }

    /// Paces chunks at playback speed, for recorded files.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

#[async_trait]
impl AudioInput for FileAudioInput {
    async fn open(&self) -> Result<mpsc::Receiver<Vec<u8>>, SourceError> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|err| SourceError::Audio(format!("{}: {err}", self.path.display())))?;
        let (tx, rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);
        let format = self.format;
        let realtime = self.realtime;
        let chunk_bytes = CHUNK_SAMPLES * format.bytes_per_sample();

        tokio::spawn(async move {
            let mut pending = Vec::with_capacity(chunk_bytes);
            let mut buf = vec![0u8; chunk_bytes];
            loop {
                let read = match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(read) => read,
                    Err(err) => {
                        warn!("audio_read_error: {err}");
                        break;
                    }
                };
                pending.extend_from_slice(&buf[..read]);
                while pending.len() >= chunk_bytes {
                    let raw = pending.drain(..chunk_bytes).collect::<Vec<_>>();
                    let chunk = encode_chunk(&raw, format);
                    let pace = chunk_duration(chunk.len());
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                    if realtime {
                        tokio::time::sleep(pace).await;
                    }
                }
            }
            if !pending.is_empty() {
                let _ = tx.send(encode_chunk(&pending, format)).await;
            }
            debug!("audio_input_finished");
        });

        Ok(rx)
    }
}

fn encode_chunk(raw: &[u8], format: PcmFormat) -> Vec<u8> {
    match format {
        PcmFormat::S16Le => raw[..raw.len() - raw.len() % 2].to_vec(),
        PcmFormat::F32Le => int16_to_le_bytes(&float32_to_int16(&f32_from_le_bytes(raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    async fn collect(mut rx: mpsc::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn s16_file_is_chunked() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(&vec![1u8; CHUNK_SAMPLES * 2 + 10])
            .expect("write pcm");

        let input = FileAudioInput::new(file.path(), PcmFormat::S16Le);
        let chunks = collect(input.open().await.expect("open")).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CHUNK_SAMPLES * 2);
        assert_eq!(chunks[1].len(), 10);
    }

    #[tokio::test]
    async fn f32_file_is_converted_to_s16() {
        let mut file = NamedTempFile::new().expect("temp file");
        for sample in [1.0f32, -1.0, 0.0] {
            file.write_all(&sample.to_le_bytes()).expect("write sample");
        }

        let input = FileAudioInput::new(file.path(), PcmFormat::F32Le);
        let chunks = collect(input.open().await.expect("open")).await;
        assert_eq!(chunks, vec![vec![0xff, 0x7f, 0x00, 0x80, 0x00, 0x00]]);
    }

    #[tokio::test]
    async fn missing_file_is_an_audio_error() {
        let input = FileAudioInput::new("/definitely/not/here.pcm", PcmFormat::S16Le);
        assert!(matches!(input.open().await, Err(SourceError::Audio(_))));
    }
}
