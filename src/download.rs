use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tokio::io::AsyncWriteExt;

use crate::config::{StoragePaths, file_present_nonempty};
use crate::sources::registry;

/// Make sure a registry extract is available locally, downloading and
/// unpacking the published archive when permitted. The registry is a
/// mandatory input, so every failure path here is fatal to the run.
pub async fn ensure_registry_extract(
    paths: &StoragePaths,
    url: &str,
    offline: bool,
) -> Result<PathBuf> {
    if let Some(existing) = registry::locate_extract(&paths.registry_dir)? {
        tracing::info!("Using registry extract {}", existing.display());
        return Ok(existing);
    }

    if offline {
        return Err(anyhow!(
            "No registry extract under {} (run without --offline to download from {url})",
            paths.registry_dir.display()
        ));
    }

    if file_present_nonempty(&paths.registry_zip) {
        tracing::info!(
            "Reusing downloaded archive {}",
            paths.registry_zip.display()
        );
    } else {
        download_file(url, &paths.registry_zip).await?;
    }
    let extracted = extract_registry_csv(&paths.registry_zip, &paths.registry_dir)
        .with_context(|| format!("Failed extracting {}", paths.registry_zip.display()))?;
    tracing::info!("Extracted registry data file {}", extracted.display());
    Ok(extracted)
}

async fn download_file(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed creating {}", parent.display()))?;
    }
    let tmp = tmp_path(dest);

    tracing::info!("Downloading {} -> {}", url, dest.display());
    let client = reqwest::Client::new();
    let mut resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;
    if !resp.status().is_success() {
        return Err(anyhow!("Download failed ({}): {}", resp.status(), url));
    }

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("Failed creating {}", tmp.display()))?;
    let mut downloaded: u64 = 0;
    while let Some(chunk) = resp
        .chunk()
        .await
        .with_context(|| format!("Failed reading download stream from {url}"))?
    {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("Failed writing {}", tmp.display()))?;
        downloaded += chunk.len() as u64;
        if downloaded % (50 * 1024 * 1024) < chunk.len() as u64 {
            tracing::info!("... downloaded {} MB", downloaded / (1024 * 1024));
        }
    }
    file.flush().await.context("Failed flushing download")?;
    drop(file);

    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("Failed moving {} to {}", tmp.display(), dest.display()))?;
    Ok(())
}

fn tmp_path(dest: &Path) -> PathBuf {
    let fname = dest
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    dest.with_file_name(format!("{fname}.part"))
}

/// Pull the `npidata_pfile_*.csv` data member out of the archive, skipping
/// the header-helper companion files.
fn extract_registry_csv(zip_path: &Path, out_dir: &Path) -> Result<PathBuf> {
    use std::io::{Read, Write};

    let file = std::fs::File::open(zip_path)
        .with_context(|| format!("Failed opening {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("Failed reading zip archive")?;

    let mut chosen: Option<(usize, String)> = None;
    for i in 0..archive.len() {
        let name = archive.by_index(i)?.name().to_string();
        let base = name.rsplit('/').next().unwrap_or(&name).to_string();
        if base.starts_with("npidata_pfile_")
            && base.ends_with(".csv")
            && !base.contains("fileheader")
        {
            chosen = Some((i, base));
            break;
        }
    }
    let (idx, base) =
        chosen.ok_or_else(|| anyhow!("No registry data CSV found in {}", zip_path.display()))?;

    let out_path = out_dir.join(base);
    let mut member = archive.by_index(idx)?;
    let mut out = std::fs::File::create(&out_path)
        .with_context(|| format!("Failed creating {}", out_path.display()))?;
    let mut buffer = [0u8; 1 << 20];
    loop {
        let read = member
            .read(&mut buffer)
            .context("Failed reading zip member")?;
        if read == 0 {
            break;
        }
        out.write_all(&buffer[..read])
            .with_context(|| format!("Failed writing {}", out_path.display()))?;
    }
    out.flush()
        .with_context(|| format!("Failed flushing {}", out_path.display()))?;
    Ok(out_path)
}
