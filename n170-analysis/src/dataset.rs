use anyhow::{Context, Result, bail};
use log::info;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::AnalysisConfig;

/// Source of a dataset that is not in the local cache yet.
pub trait DatasetFetcher {
    /// Populate `site_dir`, which does not exist or is empty.
    fn fetch(&self, site_dir: &Path) -> Result<()>;
}

/// Downloads a zip archive and unpacks it into the site directory.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    pub url: String,
}

impl HttpFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl DatasetFetcher for HttpFetcher {
    fn fetch(&self, site_dir: &Path) -> Result<()> {
        info!("downloading {}", self.url);
        let response = ureq::get(&self.url)
            .call()
            .with_context(|| format!("failed to download {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read body of {}", self.url))?;
        let n = extract_zip(&bytes, site_dir)?;
        info!("extracted {} entries into {}", n, site_dir.display());
        Ok(())
    }
}

/// Unpack a zip archive held in memory, returns the number of entries.
pub fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("not a zip archive")?;
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let n = archive.len();
    archive
        .extract(dest)
        .with_context(|| format!("failed to extract into {}", dest.display()))?;
    Ok(n)
}

/// Site directory of the configured dataset, fetching it once if missing.
///
/// Archives may wrap the recordings in extra folders; the returned site is the
/// directory that holds `<device>/`.
pub fn ensure_dataset(
    config: &AnalysisConfig,
    fetcher: Option<&dyn DatasetFetcher>,
) -> Result<PathBuf> {
    let site = config.site_dir()?;
    if !site.is_dir() {
        let Some(fetcher) = fetcher else {
            bail!(
                "dataset not found at {} and no dataset_url is configured",
                site.display()
            );
        };
        fetcher.fetch(&site)?;
        if !site.is_dir() {
            bail!("fetch finished but {} still does not exist", site.display());
        }
    }
    Ok(locate_device_root(&site, &config.device).unwrap_or(site))
}

/// Shallowest directory below `site` (inclusive) that contains `device/`.
fn locate_device_root(site: &Path, device: &str) -> Option<PathBuf> {
    if site.join(device).is_dir() {
        return Some(site.to_path_buf());
    }
    WalkDir::new(site)
        .min_depth(1)
        .max_depth(4)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_dir() && e.file_name() == device)
        .and_then(|e| e.path().parent().map(Path::to_path_buf))
}

/// `<site>/<device>/subjectNNNN/sessionNNN`
pub fn session_dir(site: &Path, device: &str, subject: u32, session: u32) -> PathBuf {
    site.join(device)
        .join(format!("subject{subject:04}"))
        .join(format!("session{session:03}"))
}

/// Recording files of one session, sorted by name.
pub fn session_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("session directory {} does not exist", dir.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        let is_csv = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if entry.file_type().is_file() && is_csv {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    if files.is_empty() {
        bail!("no csv recordings in {}", dir.display());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;

    struct FakeFetcher {
        calls: Cell<usize>,
    }

    impl DatasetFetcher for FakeFetcher {
        fn fetch(&self, site_dir: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            let dir = session_dir(site_dir, "muse2016_bfn", 1, 1);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join("recording_1.csv"), "timestamps,stim\n")?;
            Ok(())
        }
    }

    fn config_in(root: &Path) -> AnalysisConfig {
        AnalysisConfig {
            data_dir: Some(root.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn fetches_only_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        let fetcher = FakeFetcher { calls: Cell::new(0) };
        let site = ensure_dataset(&config, Some(&fetcher)).unwrap();
        assert_eq!(site, tmp.path().join("visual-N170").join("eegnb_examples"));
        ensure_dataset(&config, Some(&fetcher)).unwrap();
        assert_eq!(fetcher.calls.get(), 1);

        let files = session_files(&session_dir(&site, "muse2016_bfn", 1, 1)).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn missing_dataset_without_fetcher_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ensure_dataset(&config_in(tmp.path()), None).unwrap_err();
        assert!(err.to_string().contains("dataset not found"));
    }

    #[test]
    fn archive_wrapper_folders_are_looked_through() {
        struct NestedFetcher;
        impl DatasetFetcher for NestedFetcher {
            fn fetch(&self, site_dir: &Path) -> Result<()> {
                let wrapped = site_dir.join("data").join("visual-N170").join("eegnb_examples");
                let dir = session_dir(&wrapped, "muse2016_bfn", 1, 1);
                fs::create_dir_all(&dir)?;
                fs::write(dir.join("recording_1.csv"), "timestamps,stim\n")?;
                Ok(())
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        let site = ensure_dataset(&config, Some(&NestedFetcher)).unwrap();
        assert_eq!(
            site,
            config.site_dir().unwrap().join("data/visual-N170/eegnb_examples")
        );
        assert_eq!(session_files(&session_dir(&site, "muse2016_bfn", 1, 1)).unwrap().len(), 1);
    }

    #[test]
    fn session_files_are_sorted_csvs() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.csv", "notes.txt"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        fs::create_dir(tmp.path().join("nested.csv")).unwrap();
        let files = session_files(tmp.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn session_path_layout() {
        let p = session_dir(Path::new("/d"), "muse2016_bfn", 1, 1);
        assert_eq!(p, PathBuf::from("/d/muse2016_bfn/subject0001/session001"));
    }

    #[test]
    fn extracts_zip_archives() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("muse2016_bfn/subject0001/session001/r.csv", opts).unwrap();
            zip.write_all(b"timestamps,stim\n0,0\n").unwrap();
            zip.finish().unwrap();
        }
        let tmp = tempfile::tempdir().unwrap();
        let n = extract_zip(buf.get_ref(), tmp.path()).unwrap();
        assert_eq!(n, 1);
        let dir = session_dir(tmp.path(), "muse2016_bfn", 1, 1);
        assert_eq!(session_files(&dir).unwrap().len(), 1);
        assert!(extract_zip(b"not a zip", tmp.path()).is_err());
    }
}
