//! The `asfserial` download backend
//!
//! Lists the products of a template with `ssara_federated_query.py --print`,
//! hands their URLs to `download_ASF_serial.py` and keeps that client alive
//! through the serial monitor.

use crate::config::{DownloadSettings, Environment};
use crate::core::process::{CommandSpec, Pause, ProcessLauncher};
use crate::core::serial::{DirectoryProbe, SerialMonitor, SerialOutcome};
use crate::io::{SessionLog, Template};
use crate::types::{StackError, StackResult};
use globset::Glob;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// URL list consumed by `download_ASF_serial.py`
pub const URL_LIST: &str = "new_files.csv";

/// Cookie jar the ASF client reuses between runs; stale ones break authentication
pub const COOKIE_JAR: &str = ".bulk_download_cookiejar.txt";

/// Column of the ssara listing holding the download URL (zero based)
const URL_COLUMN: usize = 13;

/// Download URLs from `ssara_federated_query.py --print` output
pub fn parse_listing_urls(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split(',').nth(URL_COLUMN))
        .map(str::trim)
        .filter(|field| field.starts_with("http://") || field.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

/// Write the comma separated URL list into `directory`
pub fn write_url_list(directory: &Path, urls: &[String]) -> StackResult<PathBuf> {
    let path = directory.join(URL_LIST);
    std::fs::write(&path, urls.join(","))?;
    Ok(path)
}

/// Remove the client's cookie jar from `home`, if there is one
pub fn remove_cookie_jar(home: Option<&Path>) {
    let Some(home) = home else {
        return;
    };
    let jar = home.join(COOKIE_JAR);
    match std::fs::remove_file(&jar) {
        Ok(()) => log::debug!("Removed {}", jar.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove {}: {}", jar.display(), e),
    }
}

/// Archives the serial client leaves in the SLC directory
pub const ARCHIVE_PATTERN: &str = "S1*.zip";

/// Apply `mode` to the `S1*.zip` archives in `directory`; returns how many were changed
pub fn fix_archive_permissions(directory: &Path, mode: u32) -> usize {
    let archives = match Glob::new(ARCHIVE_PATTERN) {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            log::warn!("Invalid archive pattern {}: {}", ARCHIVE_PATTERN, e);
            return 0;
        }
    };

    let mut changed = 0;
    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Cannot list {}: {}", directory.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !archives.is_match(entry.file_name()) {
            continue;
        }
        match set_mode(entry.path(), mode) {
            Ok(()) => changed += 1,
            Err(e) => log::warn!("chmod {:o} {} failed: {}", mode, entry.path().display(), e),
        }
    }
    changed
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// One run of the serial backend for a template
pub struct AsfSerialDownload<'a> {
    launcher: &'a dyn ProcessLauncher,
    probe: &'a dyn DirectoryProbe,
    pause: &'a dyn Pause,
    env: &'a Environment,
    settings: &'a DownloadSettings,
    log: &'a SessionLog,
}

impl<'a> AsfSerialDownload<'a> {
    pub fn new(
        launcher: &'a dyn ProcessLauncher,
        probe: &'a dyn DirectoryProbe,
        pause: &'a dyn Pause,
        env: &'a Environment,
        settings: &'a DownloadSettings,
        log: &'a SessionLog,
    ) -> Self {
        Self {
            launcher,
            probe,
            pause,
            env,
            settings,
            log,
        }
    }

    /// List the template's products and write their URLs into `slc_dir`
    pub fn generate_url_list(&self, template: &Template, slc_dir: &Path) -> StackResult<PathBuf> {
        let options = template.with_ssara_date_format()?.ssara_options()?;
        let query = CommandSpec::new("ssara_federated_query.py")
            .args(options)
            .arg("--print")
            .current_dir(slc_dir);

        let output = self.launcher.capture(&query)?;
        if output.code != 0 {
            log::warn!("ssara_federated_query.py --print exited with {}", output.code);
        }

        let urls = parse_listing_urls(&output.stdout);
        self.log.info(&format!("{} products listed for download", urls.len()));
        write_url_list(slc_dir, &urls)
    }

    pub fn run(&self, template: &Template, slc_dir: &Path) -> StackResult<SerialOutcome> {
        let user = self
            .env
            .asf_user
            .as_deref()
            .ok_or_else(|| StackError::Config("ASF_USER is not set".to_string()))?;
        let password = self
            .env
            .asf_pass
            .as_deref()
            .ok_or_else(|| StackError::Config("ASF_PASS is not set".to_string()))?;

        remove_cookie_jar(dirs::home_dir().as_deref());
        let url_list = self.generate_url_list(template, slc_dir)?;

        let command = CommandSpec::new("download_ASF_serial.py")
            .args(["-username", user, "-password", password])
            .arg(url_list.to_string_lossy())
            .current_dir(slc_dir);

        let outcome = SerialMonitor::new(
            self.launcher,
            self.probe,
            self.pause,
            self.settings,
            self.log,
        )
        .run(&command, slc_dir)?;

        let changed = fix_archive_permissions(slc_dir, self.settings.archive_mode);
        log::debug!("Permissions set on {} archives", changed);

        self.log.info(&format!("SUCCESS: {:?}", outcome.exit_code));
        self.log.info("------------------------------------");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listing_row(url: &str) -> String {
        let mut fields: Vec<String> = (0..16).map(|i| format!("f{}", i)).collect();
        fields[URL_COLUMN] = url.to_string();
        fields.join(",")
    }

    #[test]
    fn test_parse_listing_urls_takes_fourteenth_column() {
        let listing = format!(
            "Running SSARA API Query\n{}\n{}\n",
            listing_row("https://datapool.asf.alaska.edu/SLC/SA/S1A_IW_SLC__1SDV_A.zip"),
            listing_row("https://datapool.asf.alaska.edu/SLC/SB/S1B_IW_SLC__1SDV_B.zip"),
        );

        assert_eq!(
            parse_listing_urls(&listing),
            vec![
                "https://datapool.asf.alaska.edu/SLC/SA/S1A_IW_SLC__1SDV_A.zip",
                "https://datapool.asf.alaska.edu/SLC/SB/S1B_IW_SLC__1SDV_B.zip",
            ]
        );
    }

    #[test]
    fn test_parse_listing_skips_header_rows() {
        let listing = format!("{}\n{}\n", listing_row("downloadUrl"), listing_row(""));
        assert!(parse_listing_urls(&listing).is_empty());
    }

    #[test]
    fn test_url_list_is_comma_joined() {
        let dir = TempDir::new().unwrap();
        let urls = vec!["https://a/1.zip".to_string(), "https://a/2.zip".to_string()];
        let path = write_url_list(dir.path(), &urls).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "https://a/1.zip,https://a/2.zip");
    }

    #[test]
    fn test_remove_cookie_jar_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        remove_cookie_jar(Some(dir.path()));

        std::fs::write(dir.path().join(COOKIE_JAR), "cookie").unwrap();
        remove_cookie_jar(Some(dir.path()));
        assert!(!dir.path().join(COOKIE_JAR).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_fix_archive_permissions_only_touches_sentinel_archives() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("S1A_IW_SLC__1SDV_A.zip");
        let other = dir.path().join("files.zip");
        let partial = dir.path().join("S1B_IW_SLC__1SDV_B.zip.part");
        std::fs::write(&archive, b"PK").unwrap();
        std::fs::write(&other, b"PK").unwrap();
        std::fs::write(&partial, b"PK").unwrap();
        std::fs::set_permissions(&other, std::fs::Permissions::from_mode(0o600)).unwrap();
        std::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o600)).unwrap();

        assert_eq!(fix_archive_permissions(dir.path(), 0o666), 1);
        let mode = std::fs::metadata(&partial).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let mode = std::fs::metadata(&archive).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o666);
        let mode = std::fs::metadata(&other).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
