/// Sample rate used for capture and streaming.
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per streamed chunk (128 ms at 16 kHz).
pub const CHUNK_SAMPLES: usize = 2048;

/// Clamps to [-1, 1] and scales asymmetrically so both extremes are
/// representable.
pub fn float32_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|sample| {
            let s = sample.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// PCM S16LE wire bytes.
pub fn int16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect()
}

/// Decodes little-endian f32 samples; a trailing partial sample is ignored.
pub fn f32_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn chunk_duration(bytes: usize) -> std::time::Duration {
    let samples = (bytes / 2) as u64;
    std::time::Duration::from_micros(samples * 1_000_000 / SAMPLE_RATE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_and_clamps_float_samples() {
        assert_eq!(
            float32_to_int16(&[0.0, 1.0, -1.0, 2.5, -3.0, 0.5]),
            vec![0, 32767, -32768, 32767, -32768, 16383]
        );
    }

    #[test]
    fn packs_little_endian() {
        assert_eq!(int16_to_le_bytes(&[1, -2, 0x1234]), vec![1, 0, 0xfe, 0xff, 0x34, 0x12]);
    }

    #[test]
    fn decodes_float_bytes() {
        let mut bytes = 0.5f32.to_le_bytes().to_vec();
        bytes.extend((-1.0f32).to_le_bytes());
        bytes.push(7);
        assert_eq!(f32_from_le_bytes(&bytes), vec![0.5, -1.0]);
    }

    #[test]
    fn chunk_duration_follows_sample_rate() {
        assert_eq!(chunk_duration(CHUNK_SAMPLES * 2).as_millis(), 128);
    }
}
