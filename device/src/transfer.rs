use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use tracing::info;

use airdry_common::{FirmwareTransfer, ProgressSink, TransferOutcome};

const CHUNK_SIZE: usize = 4096;

/// Streams a firmware image over HTTP into a staging file, reporting one
/// progress event per chunk. The sha256 digest of the artifact is logged
/// for diagnostics; nothing here compares it against an expected value.
pub struct HttpFirmwareTransfer {
    staging_path: PathBuf,
}

impl HttpFirmwareTransfer {
    pub fn new(staging_path: PathBuf) -> Self {
        Self { staging_path }
    }

    fn stream_to_staging(
        &mut self,
        response: ureq::Response,
        sink: &mut dyn ProgressSink,
    ) -> anyhow::Result<(u64, String)> {
        let total_bytes = response
            .header("Content-Length")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);

        if let Some(parent) = self.staging_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create staging dir {}", parent.display()))?;
        }
        let mut staging = File::create(&self.staging_path).with_context(|| {
            format!("failed to create staging file {}", self.staging_path.display())
        })?;

        let mut reader = response.into_reader();
        let mut hasher = Sha256::new();
        let mut written = 0_u64;
        let mut chunk = [0_u8; CHUNK_SIZE];

        loop {
            let read = reader
                .read(&mut chunk)
                .context("failed reading firmware download body")?;
            if read == 0 {
                break;
            }

            staging
                .write_all(&chunk[..read])
                .context("failed writing firmware staging file")?;
            hasher.update(&chunk[..read]);
            written = written.saturating_add(read as u64);
            sink.on_progress(written, total_bytes);
        }

        if written == 0 {
            return Err(anyhow!("firmware download body is empty"));
        }
        staging
            .sync_all()
            .context("failed flushing firmware staging file")?;

        let digest = hasher.finalize();
        let mut digest_hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write as _;
            let _ = write!(&mut digest_hex, "{byte:02x}");
        }

        Ok((written, digest_hex))
    }
}

impl FirmwareTransfer for HttpFirmwareTransfer {
    fn download(&mut self, url: &str, sink: &mut dyn ProgressSink) -> TransferOutcome {
        let response = match ureq::get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(304, _)) => return TransferOutcome::NoUpdate,
            Err(ureq::Error::Status(code, _)) => {
                return TransferOutcome::Failed(format!(
                    "firmware download failed with HTTP {code}"
                ));
            }
            Err(err) => return TransferOutcome::Failed(err.to_string()),
        };

        match self.stream_to_staging(response, sink) {
            Ok((written, digest_hex)) => {
                info!(
                    "staged firmware image ({written} bytes, sha256 {digest_hex}) at {}",
                    self.staging_path.display()
                );
                TransferOutcome::Complete
            }
            Err(err) => TransferOutcome::Failed(format!("{err:#}")),
        }
    }
}
