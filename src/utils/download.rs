use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use super::console;

const USER_AGENT: &str = concat!("ptools/", env!("CARGO_PKG_VERSION"));

/// Streams `url` into `output`, replacing any previous file.
pub fn download_file(url: &str, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    if output.exists() {
        fs::remove_file(output)?;
    }
    console::print_info(format!("Download file: {}", output.display()));

    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .build()?;
    let mut response = client
        .get(url)
        .header("accept", "*/*")
        .send()
        .with_context(|| format!("Unable to download file from: {}", url))?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Unable to download file from: {} ({})",
            url,
            response.status()
        ));
    }

    let bar = match response.content_length() {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut file = BufWriter::new(File::create(output)?);
    let mut buffer = [0u8; 8192];
    loop {
        let read = response.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])?;
        bar.inc(read as u64);
    }
    file.flush()?;
    bar.finish_and_clear();

    Ok(())
}

/// Decompresses a single-member `.xz` container.
pub fn extract_xz(input: &Path, output: &Path) -> Result<()> {
    if !input.exists() {
        return Err(anyhow!("Input file not found: {}", input.display()));
    }
    if output.exists() {
        fs::remove_file(output)?;
    }

    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    lzma_rs::xz_decompress(&mut reader, &mut writer)
        .map_err(|e| anyhow!("Failed to extract {}: {:?}", input.display(), e))?;
    writer.flush()?;

    log::debug!("extracted {} -> {}", input.display(), output.display());
    Ok(())
}
