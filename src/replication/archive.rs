// Compression of mirrored locations into single .tar.gz archives

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::Builder;

/// Archive path for a mirrored directory: `<dir>.tar.gz`
pub fn archive_path(directory: &Path) -> PathBuf {
    let mut name = directory
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tar.gz");
    directory.with_file_name(name)
}

/// Pack `directory` into `<directory>.tar.gz` with entries relative to the
/// directory, then remove the directory. The archive is written under a
/// temporary name and renamed into place once complete.
pub fn compress_directory(directory: &Path) -> Result<PathBuf, String> {
    let target = archive_path(directory);
    let partial = target.with_extension("gz.partial");

    write_archive(directory, &partial).map_err(|e| {
        let _ = std::fs::remove_file(&partial);
        e
    })?;

    std::fs::rename(&partial, &target)
        .map_err(|e| format!("rename of {} failed: {}", partial.display(), e))?;
    std::fs::remove_dir_all(directory)
        .map_err(|e| format!("removing {} after archiving failed: {}", directory.display(), e))?;

    Ok(target)
}

fn write_archive(directory: &Path, output: &Path) -> Result<(), String> {
    let file = File::create(output).map_err(|e| format!("create {} failed: {}", output.display(), e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    builder
        .append_dir_all(".", directory)
        .map_err(|e| format!("tar append failed: {}", e))?;

    let encoder = builder
        .into_inner()
        .map_err(|e| format!("tar finalize failed: {}", e))?;
    let mut file = encoder.finish().map_err(|e| format!("gzip finish failed: {}", e))?;
    file.flush().map_err(|e| format!("gzip flush failed: {}", e))?;
    file.sync_all().map_err(|e| format!("archive sync failed: {}", e))
}
