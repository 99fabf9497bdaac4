//! WAV file input and output via hound.

use crate::error::{CliError, CliResult};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use hushtone_core::{downmix, SampleSink, SampleSource, Signal, StegoError};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Read a WAV file as mono floats in [-1, 1].
pub fn read_wav(path: &Path) -> CliResult<Signal> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    check_spec(&spec)?;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = downmix(&interleaved, spec.channels as usize)?;
    Ok(Signal::new(samples, spec.sample_rate))
}

/// Write a mono signal as 16-bit PCM.
pub fn write_wav(path: &Path, signal: &Signal) -> CliResult<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: signal.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in &signal.samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn check_spec(spec: &WavSpec) -> CliResult<()> {
    if spec.channels == 0 {
        return Err(CliError::UnsupportedFormat("zero channels".into()));
    }
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) | (SampleFormat::Int, 8 | 16 | 24 | 32) => Ok(()),
        (format, bits) => Err(CliError::UnsupportedFormat(format!(
            "{:?} with {} bits per sample",
            format, bits
        ))),
    }
}

fn int_scale(bits: u16) -> f32 {
    (1u64 << (bits - 1)) as f32
}

/// Streams a WAV file to the listener, optionally paced to real time so a
/// long recording behaves like a live device.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    realtime: bool,
    frame: Vec<f32>,
}

impl WavSource {
    pub fn open(path: &Path, realtime: bool) -> CliResult<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        check_spec(&spec)?;
        Ok(Self {
            reader,
            spec,
            realtime,
            frame: Vec::with_capacity(spec.channels as usize),
        })
    }

    fn next_sample(&mut self) -> Option<Result<f32, hound::Error>> {
        match self.spec.sample_format {
            SampleFormat::Float => self.reader.samples::<f32>().next(),
            SampleFormat::Int => {
                let scale = int_scale(self.spec.bits_per_sample);
                self.reader
                    .samples::<i32>()
                    .next()
                    .map(|s| s.map(|v| v as f32 / scale))
            }
        }
    }
}

impl SampleSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn read(&mut self, buf: &mut [f32]) -> hushtone_core::Result<usize> {
        let channels = self.spec.channels as usize;
        let mut written = 0;

        'frames: while written < buf.len() {
            self.frame.clear();
            while self.frame.len() < channels {
                match self.next_sample() {
                    Some(Ok(sample)) => self.frame.push(sample),
                    Some(Err(e)) => return Err(StegoError::Capture(e.to_string())),
                    // A partial trailing frame is dropped
                    None => break 'frames,
                }
            }
            buf[written] = self.frame.iter().sum::<f32>() / channels as f32;
            written += 1;
        }

        if self.realtime && written > 0 {
            thread::sleep(Duration::from_secs_f64(
                written as f64 / self.spec.sample_rate as f64,
            ));
        }
        Ok(written)
    }
}

/// Writes each rendered signal to a WAV file at `path`.
pub struct WavSink {
    path: PathBuf,
}

impl WavSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SampleSink for WavSink {
    fn write(&mut self, signal: &Signal) -> hushtone_core::Result<()> {
        write_wav(&self.path, signal).map_err(|e| StegoError::Capture(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hushtone-wav-tests");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_write_then_read_is_close() {
        let path = temp_path("roundtrip.wav");
        let samples: Vec<f32> = (0..480).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();
        write_wav(&path, &Signal::new(samples.clone(), 48_000)).unwrap();

        let read = read_wav(&path).unwrap();
        assert_eq!(read.sample_rate, 48_000);
        assert_eq!(read.len(), samples.len());
        for (a, b) in read.samples.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_stereo_float_is_downmixed() {
        let path = temp_path("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(0.5f32).unwrap();
            writer.write_sample(-0.25f32).unwrap();
        }
        writer.finalize().unwrap();

        let signal = read_wav(&path).unwrap();
        assert_eq!(signal.len(), 100);
        assert!(signal.samples.iter().all(|&s| (s - 0.125).abs() < 1e-6));

        let mut source = WavSource::open(&path, false).unwrap();
        let mut buf = vec![0.0; 64];
        assert_eq!(source.read(&mut buf).unwrap(), 64);
        assert!((buf[0] - 0.125).abs() < 1e-6);
        assert_eq!(source.read(&mut buf).unwrap(), 36);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_sink_writes_file() {
        let path = temp_path("sink.wav");
        let mut sink = WavSink::new(&path);
        sink.write(&Signal::silence(0.01, 48_000)).unwrap();
        assert_eq!(read_wav(&path).unwrap().len(), 480);
    }
}
