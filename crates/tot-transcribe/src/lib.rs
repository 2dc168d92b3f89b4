pub mod assemblyai;
pub mod audio;
pub mod pcm;

pub use assemblyai::{
    fetch_token, parse_realtime_message, request_temporary_token, AssemblyAiConfig,
    AssemblyAiSource, TokenSource,
};
pub use audio::{AudioInput, FileAudioInput, PcmFormat};
pub use pcm::{float32_to_int16, int16_to_le_bytes, SAMPLE_RATE};
