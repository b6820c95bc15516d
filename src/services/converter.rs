use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use image::ImageFormat;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::services::classifier::FileCategory;
use crate::services::pdf;

/// Outcome of a conversion. `Degraded` marks a placeholder that was
/// produced because a real renderer failed, so callers can tell it
/// apart from the by-policy placeholder used for media and archives.
#[derive(Debug)]
pub enum Preview {
    /// A real rendering of the source content.
    Rendered(PathBuf),
    /// The by-policy placeholder for categories without a renderer.
    Placeholder(PathBuf),
    /// A placeholder substituted after a renderer failure.
    Degraded { path: PathBuf, reason: String },
}

impl Preview {
    pub fn path(&self) -> &Path {
        match self {
            Preview::Rendered(p) | Preview::Placeholder(p) => p,
            Preview::Degraded { path, .. } => path,
        }
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Preview::Degraded { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Routes a (source file, category) pair to the image renderer, the
/// office-document renderer, or the placeholder generator.
///
/// Image and document renders are CPU- and memory-heavy, so they take
/// a FIFO semaphore permit; excess requests queue rather than fail.
pub struct Converter {
    semaphore: Semaphore,
    work_dir: PathBuf,
    soffice_bin: String,
    soffice_timeout: Duration,
}

impl Converter {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            semaphore: Semaphore::new(config.convert_concurrency),
            work_dir: config.spool_dir.clone(),
            soffice_bin: config.soffice_bin.clone(),
            soffice_timeout: Duration::from_secs(config.convert_timeout_secs),
        }
    }

    /// Produce a single-page-per-content PDF preview for `source`.
    ///
    /// Never hard-fails for supported categories: renderer failures
    /// degrade to a placeholder. Blocked files are refused by the
    /// orchestrator before this point and are a hard error here.
    pub async fn convert(
        &self,
        source: &Path,
        filename: &str,
        category: FileCategory,
        size: u64,
    ) -> Result<Preview> {
        let out_path = self.work_dir.join(format!("preview-{}.pdf", Uuid::new_v4()));

        match category {
            FileCategory::Blocked => {
                bail!("blocked files must be refused before conversion")
            }
            FileCategory::Image => {
                let _permit = self.semaphore.acquire().await?;
                match self.render_image(source, &out_path).await {
                    Ok(()) => Ok(Preview::Rendered(out_path)),
                    Err(e) => {
                        tracing::warn!("Image render failed for {}: {:#}", filename, e);
                        self.write_placeholder(&out_path, filename, category, size)
                            .await?;
                        Ok(Preview::Degraded {
                            path: out_path,
                            reason: format!("image decode failed: {}", e),
                        })
                    }
                }
            }
            FileCategory::Document => {
                let _permit = self.semaphore.acquire().await?;
                match self.render_document(source, filename, &out_path).await {
                    Ok(()) => Ok(Preview::Rendered(out_path)),
                    Err(e) => {
                        tracing::warn!("Document render failed for {}: {:#}", filename, e);
                        self.write_placeholder(&out_path, filename, category, size)
                            .await?;
                        Ok(Preview::Degraded {
                            path: out_path,
                            reason: format!("document render failed: {}", e),
                        })
                    }
                }
            }
            FileCategory::Video
            | FileCategory::Audio
            | FileCategory::Archive
            | FileCategory::Unsupported => {
                self.write_placeholder(&out_path, filename, category, size)
                    .await?;
                Ok(Preview::Placeholder(out_path))
            }
        }
    }

    /// Decode the image, re-encode as JPEG and wrap it in a PDF page
    /// sized to the native pixel dimensions.
    async fn render_image(&self, source: &Path, out_path: &Path) -> Result<()> {
        let data = tokio::fs::read(source).await?;

        let pdf = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let img = image::load_from_memory(&data).context("decoding image")?;
            let (width, height) = (img.width(), img.height());

            let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
            let mut jpeg = Vec::new();
            rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
                .context("encoding JPEG")?;

            pdf::image_pdf(&jpeg, width, height)
        })
        .await??;

        tokio::fs::write(out_path, pdf).await?;
        Ok(())
    }

    /// Delegate office-document rendering to LibreOffice. The input is
    /// staged under its declared filename so the renderer can pick the
    /// right import filter from the extension.
    async fn render_document(&self, source: &Path, filename: &str, out_path: &Path) -> Result<()> {
        let scratch = tempfile::tempdir_in(&self.work_dir).context("creating scratch dir")?;
        let staged_name = crate::utils::validation::sanitize_filename(filename)?;
        let staged = scratch.path().join(&staged_name);
        tokio::fs::copy(source, &staged).await?;

        let mut command = tokio::process::Command::new(&self.soffice_bin);
        command
            .arg("--headless")
            .arg("--norestore")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(scratch.path())
            .arg(&staged)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.soffice_timeout, command.output())
            .await
            .map_err(|_| anyhow!("renderer timed out after {:?}", self.soffice_timeout))?
            .context("spawning document renderer")?;

        if !output.status.success() {
            bail!(
                "renderer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let stem = Path::new(&staged_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("could not derive output name"))?;
        let produced = scratch.path().join(format!("{}.pdf", stem));

        if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            bail!("renderer produced no output for {}", staged_name);
        }

        // The scratch dir is removed on drop, so move the PDF out.
        tokio::fs::copy(&produced, out_path).await?;
        Ok(())
    }

    async fn write_placeholder(
        &self,
        out_path: &Path,
        filename: &str,
        category: FileCategory,
        size: u64,
    ) -> Result<()> {
        let bytes = pdf::placeholder_pdf(filename, category, size)?;
        tokio::fs::write(out_path, bytes).await?;
        Ok(())
    }
}
