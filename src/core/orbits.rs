use globset::GlobBuilder;
use std::path::Path;
use walkdir::WalkDir;

/// Precise orbit ephemeris files, relative to `<work_dir>/orbits`
pub const PRECISE_ORBIT_PATTERN: &str = "**/*POEORB*";

/// Copy precise orbit files found under `<work_dir>/orbits` into the shared cache
///
/// Best effort: copy failures are logged and skipped. Returns the number of
/// files copied.
pub fn cache_precise_orbits(work_dir: &Path, orbit_dir: Option<&Path>) -> usize {
    let local = work_dir.join("orbits");
    if !local.is_dir() {
        return 0;
    }
    let Some(orbit_dir) = orbit_dir else {
        log::warn!("SENTINEL_ORBITS is not set, local precise orbits are not cached");
        return 0;
    };

    let precise = match GlobBuilder::new(PRECISE_ORBIT_PATTERN)
        .literal_separator(true)
        .build()
    {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            log::warn!("Invalid orbit pattern {}: {}", PRECISE_ORBIT_PATTERN, e);
            return 0;
        }
    };

    let mut copied = 0;
    for entry in WalkDir::new(&local).min_depth(1).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(&local).unwrap_or(entry.path());
        if !precise.is_match(relative) {
            continue;
        }

        let target = orbit_dir.join(entry.file_name());
        match std::fs::copy(entry.path(), &target) {
            Ok(_) => {
                log::debug!("Cached orbit file: {}", target.display());
                copied += 1;
            }
            Err(e) => log::warn!("Could not cache {}: {}", entry.path().display(), e),
        }
    }

    if copied > 0 {
        log::info!("Cached {} precise orbit files in {}", copied, orbit_dir.display());
    }
    copied
}
