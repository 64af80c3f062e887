use anyhow::Context;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::features::AudioTrack;
use crate::error::{BarwaveError, BarwaveResult};

/// Packets that fail to decode are tolerated up to this share of the stream;
/// anything beyond is treated as a corrupt file.
const MAX_BAD_PACKET_RATIO: f64 = 0.02;

pub fn decode_audio(path: &Path) -> BarwaveResult<AudioTrack> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open audio file {}", path.display()))
        .map_err(BarwaveError::input_from)?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("failed to probe {}", path.display()))
        .map_err(BarwaveError::unsupported_audio_from)?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| BarwaveError::unsupported_audio("no audio tracks found"))?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| BarwaveError::unsupported_audio("unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("no decoder for the audio codec")
        .map_err(BarwaveError::unsupported_audio_from)?;

    let mut all_samples: Vec<f32> = Vec::new();
    let mut packets = 0usize;
    let mut bad_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(BarwaveError::unsupported_audio_from(
                    anyhow::Error::new(e).context(format!("read failed after {packets} packets")),
                ))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }
        packets += 1;

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                log::warn!("Skipping undecodable packet {}: {}", packets, msg);
                bad_packets += 1;
                continue;
            }
            Err(e) => {
                return Err(BarwaveError::unsupported_audio_from(
                    anyhow::Error::new(e).context(format!("decode failed at packet {packets}")),
                ))
            }
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        // Downmix to mono
        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame_samples in samples.chunks(channels) {
                let mono: f32 = frame_samples.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        }
    }

    if packets > 0 && bad_packets as f64 / packets as f64 > MAX_BAD_PACKET_RATIO {
        return Err(BarwaveError::unsupported_audio(format!(
            "{} of {} packets failed to decode",
            bad_packets, packets
        )));
    }
    if all_samples.iter().any(|s| !s.is_finite()) {
        return Err(BarwaveError::unsupported_audio("decoded non-finite samples"));
    }

    let track = AudioTrack::new(all_samples, sample_rate, channels);
    log::info!(
        "Decoded audio: {} samples, {}Hz, {} channel(s), {:.1}s",
        track.samples.len(),
        sample_rate,
        channels,
        track.duration()
    );

    if track.samples.is_empty() {
        return Err(BarwaveError::EmptyAudioTrack);
    }
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[i16], channels: u16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("barwave-decode-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let dir = temp_dir("stereo");
        let path = dir.join("tone.wav");
        write_wav(&path, &[16_384, 0, 16_384, 0, -16_384, 0], 2);
        let track = decode_audio(&path).unwrap();
        assert_eq!(track.channels, 2);
        assert_eq!(track.sample_rate, 8_000);
        assert_eq!(track.samples.len(), 3);
        assert!((track.samples[0] - 0.25).abs() < 1e-3);
        assert!((track.samples[2] + 0.25).abs() < 1e-3);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn empty_wav_is_rejected() {
        let dir = temp_dir("empty");
        let path = dir.join("silence.wav");
        write_wav(&path, &[], 1);
        assert!(matches!(
            decode_audio(&path),
            Err(BarwaveError::EmptyAudioTrack) | Err(BarwaveError::UnsupportedAudioFormat(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn garbage_is_unsupported() {
        let dir = temp_dir("garbage");
        let path = dir.join("noise.bin");
        std::fs::write(&path, b"definitely not audio at all, just bytes").unwrap();
        assert!(matches!(
            decode_audio(&path),
            Err(BarwaveError::UnsupportedAudioFormat(_))
        ));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = decode_audio(Path::new("/nonexistent/barwave/track.wav")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Input);
        let message = err.to_string();
        assert!(
            message.contains("failed to open audio file /nonexistent/barwave/track.wav: "),
            "{message}"
        );
    }
}
