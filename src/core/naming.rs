//! Translation of `topsStack.*` template keys into ISCE stack option names

use crate::config::Environment;
use crate::io::Template;
use crate::types::{StackError, StackResult, Workflow};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Template prefix of processing-stack options
pub const STACK_PREFIX: &str = "topsStack.";

/// Template key names that differ from their ISCE option names
const ISCE_NAMES: [(&str, &str); 20] = [
    ("slcDir", "slc_directory"),
    ("demDir", "dem"),
    ("orbitDir", "orbit_directory"),
    ("auxDir", "aux_directory"),
    ("workingDir", "working_directory"),
    ("boundingBox", "bbox"),
    ("referenceDate", "reference_date"),
    ("numConnections", "num_connections"),
    ("numOverlapConnections", "num_overlap_connections"),
    ("subswath", "swath_num"),
    ("textCmd", "text_cmd"),
    ("excludeDate", "exclude_dates"),
    ("includeDate", "include_dates"),
    ("azimuthLooks", "azimuth_looks"),
    ("rangeLooks", "range_looks"),
    ("filtStrength", "filter_strength"),
    ("esdCoherenceThreshold", "esd_coherence_threshold"),
    ("snrMisregThreshold", "snr_misreg_threshold"),
    ("unwMethod", "unw_method"),
    ("stopDate", "stop_date"),
];

/// Values used when an option is absent or `auto`
const DEFAULTS: [(&str, &str); 12] = [
    ("workflow", "interferogram"),
    ("coregistration", "NESD"),
    ("swath_num", "1 2 3"),
    ("num_connections", "3"),
    ("num_overlap_connections", "3"),
    ("azimuth_looks", "3"),
    ("range_looks", "9"),
    ("filter_strength", "0.5"),
    ("esd_coherence_threshold", "0.85"),
    ("snr_misreg_threshold", "10"),
    ("unw_method", "snaphu"),
    ("polarization", "vv"),
];

/// Normalized options of one processing-stack run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackOptions {
    options: BTreeMap<String, String>,
    workflow: Workflow,
}

impl StackOptions {
    /// Normalize a template for a stack run rooted at `work_dir`
    ///
    /// The template must already carry `topsStack.demDir`.
    pub fn from_template(template: &Template, work_dir: &Path, env: &Environment) -> StackResult<Self> {
        let camel = Regex::new(r"([a-z0-9])([A-Z])")
            .map_err(|e| StackError::Template(format!("naming pattern: {}", e)))?;
        let mut options = BTreeMap::new();

        for (key, value) in template.with_prefix(STACK_PREFIX) {
            if value.is_empty() || value == "None" || value.eq_ignore_ascii_case("auto") {
                continue;
            }
            options.insert(isce_name(&camel, key), value.to_string());
        }

        let path_default = |path: &Path| path.to_string_lossy().into_owned();
        options
            .entry("working_directory".to_string())
            .or_insert_with(|| path_default(work_dir));
        options
            .entry("slc_directory".to_string())
            .or_insert_with(|| path_default(&work_dir.join("SLC")));
        options.entry("orbit_directory".to_string()).or_insert_with(|| {
            env.sentinel_orbits
                .as_deref()
                .map(path_default)
                .unwrap_or_else(|| path_default(&work_dir.join("orbits")))
        });
        options.entry("aux_directory".to_string()).or_insert_with(|| {
            env.sentinel_aux
                .as_deref()
                .map(path_default)
                .unwrap_or_else(|| path_default(&work_dir.join("aux")))
        });
        for (key, value) in DEFAULTS {
            options
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }

        if !options.contains_key("dem") {
            return Err(StackError::MissingTemplateKey(format!("{}demDir", STACK_PREFIX)));
        }

        let workflow = Workflow::parse(&options["workflow"])?;
        Ok(Self { options, workflow })
    }

    pub fn workflow(&self) -> Workflow {
        self.workflow
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Network-based enhanced spectral diversity adds the burst-overlap stages
    pub fn uses_esd(&self) -> bool {
        self.get("coregistration")
            .map(|value| value.eq_ignore_ascii_case("NESD"))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn isce_name(camel: &Regex, key: &str) -> String {
    ISCE_NAMES
        .iter()
        .find(|(template_key, _)| *template_key == key)
        .map(|(_, isce)| isce.to_string())
        .unwrap_or_else(|| camel.replace_all(key, "${1}_${2}").to_lowercase())
}
