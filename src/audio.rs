//! Filesystem audio store and WAV helpers.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use lectern_core::audio::{audio_ref, AudioStore};

/// Stores each chunk as `<root>/<document>/<index>.wav`.
pub struct FsAudioStore {
    root: PathBuf,
}

impl FsAudioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let rel = Path::new(reference);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid audio reference: {}", reference);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl AudioStore for FsAudioStore {
    async fn save(&self, document_id: &str, index: i64, bytes: &[u8]) -> Result<String> {
        let reference = audio_ref(document_id, index);
        let path = self.resolve(&reference)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(reference)
    }

    async fn load(&self, reference: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

/// Duration of a WAV payload in milliseconds, if the header parses.
pub fn wav_duration_ms(bytes: &[u8]) -> Option<i64> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let rate = reader.spec().sample_rate;
    if rate == 0 {
        return None;
    }
    Some(reader.duration() as i64 * 1000 / rate as i64)
}

#[cfg(test)]
pub(crate) fn silent_wav(sample_rate: u32, samples: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..samples {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
