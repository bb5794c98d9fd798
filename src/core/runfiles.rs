//! Run-file generation for the ISCE topsStack processor
//!
//! A run plan is the fixed stage sequence of the selected workflow. Each
//! stage becomes an executable `run_files/run_NN_<stage>` script invoking
//! `SentinelWrapper.py` on a per-stage config file, and the script paths are
//! recorded in order in `run_files_list` for the scheduler.

use crate::config::Environment;
use crate::core::naming::StackOptions;
use crate::core::orbits;
use crate::io::{persist_manifest, Template};
use crate::types::{RunFile, RunPlan, StackError, StackResult, Workflow};
use globset::Glob;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const RUN_FILES_DIR: &str = "run_files";
pub const CONFIGS_DIR: &str = "configs";

/// Stages shared by every workflow before coregistration
const REFERENCE_STAGES: [&str; 3] = ["unpack_topo_reference", "unpack_secondary_slc", "average_baseline"];

/// Burst-overlap stages run for NESD coregistration
const ESD_STAGES: [&str; 5] = [
    "extract_burst_overlaps",
    "overlap_geo2rdr",
    "overlap_resample",
    "pairs_misreg",
    "timeseries_misreg",
];

const COREGISTRATION_STAGES: [&str; 4] = [
    "fullBurst_geo2rdr",
    "fullBurst_resample",
    "extract_stack_valid_region",
    "merge_reference_secondary_slc",
];

const IGRAM_STAGES: [&str; 3] = ["generate_burst_igram", "merge_burst_igram", "filter_coherence"];

/// Stage names of a workflow in execution order
pub fn workflow_stages(workflow: Workflow, esd: bool) -> Vec<&'static str> {
    let mut stages: Vec<&'static str> = REFERENCE_STAGES.to_vec();
    if esd {
        stages.extend(ESD_STAGES);
    }
    stages.extend(COREGISTRATION_STAGES);

    match workflow {
        Workflow::Slc => stages.push("grid_baseline"),
        Workflow::Correlation => stages.extend(IGRAM_STAGES),
        Workflow::Interferogram => {
            stages.extend(IGRAM_STAGES);
            stages.push("unwrap");
        }
        Workflow::Offset => stages.push("dense_offsets"),
    }
    stages
}

/// DEM files the stack processor accepts, relative to `<work_dir>/DEM`
pub const DEM_PATTERN: &str = "*.wgs84";

/// Locate the DEM (`DEM/*.wgs84`) of a work directory
pub fn find_dem(work_dir: &Path) -> StackResult<PathBuf> {
    let dem_glob = Glob::new(DEM_PATTERN)?.compile_matcher();
    let dem_dir = work_dir.join("DEM");

    let mut candidates: Vec<PathBuf> = WalkDir::new(&dem_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file() && dem_glob.is_match(entry.file_name()))
        .map(|entry| entry.into_path())
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| StackError::MissingDem(work_dir.to_path_buf()))
}

pub struct RunFileGenerator<'a> {
    work_dir: PathBuf,
    env: &'a Environment,
}

impl<'a> RunFileGenerator<'a> {
    pub fn new<P: AsRef<Path>>(work_dir: P, env: &'a Environment) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            env,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Record the DEM in the template; fails when there is none
    pub fn attach_dem(&self, template: &mut Template) -> StackResult<PathBuf> {
        let dem = find_dem(&self.work_dir)?;
        log::info!("Using DEM: {}", dem.display());
        template.set("topsStack.demDir", dem.to_string_lossy());
        Ok(dem)
    }

    pub fn stack_options(&self, template: &Template) -> StackResult<StackOptions> {
        StackOptions::from_template(template, &self.work_dir, self.env)
    }

    /// Ordered run files for the template's workflow
    pub fn build_plan(&self, template: &Template) -> StackResult<RunPlan> {
        let options = self.stack_options(template)?;
        self.plan_for(&options)
    }

    fn plan_for(&self, options: &StackOptions) -> StackResult<RunPlan> {
        let run_dir = self.work_dir.join(RUN_FILES_DIR);
        let run_files = workflow_stages(options.workflow(), options.uses_esd())
            .into_iter()
            .enumerate()
            .map(|(i, stage)| {
                let stage_index = i as u32 + 1;
                let name = format!("run_{:02}_{}", stage_index, stage);
                RunFile {
                    script_path: run_dir.join(&name),
                    name,
                    stage_index,
                }
            })
            .collect();

        let plan = RunPlan::new(run_files)?;
        log::debug!("{} workflow: {} stages", options.workflow(), plan.len());
        Ok(plan)
    }

    /// Write every run file and its stage config
    ///
    /// Run files and configs of an earlier plan are removed first.
    pub fn write_run_files(&self, plan: &RunPlan, options: &StackOptions) -> StackResult<()> {
        let configs_dir = self.work_dir.join(CONFIGS_DIR);
        let run_dir = self.work_dir.join(RUN_FILES_DIR);
        for dir in [&run_dir, &configs_dir] {
            if dir.exists() {
                log::debug!("Removing previous {}", dir.display());
                std::fs::remove_dir_all(dir)?;
            }
            std::fs::create_dir_all(dir)?;
        }

        for run_file in &plan.run_files {
            let stage = stage_name(&run_file.name);
            let config_path = configs_dir.join(format!("config_{}", stage));

            let mut config = format!("###################\n{}\n", stage);
            for (key, value) in options.iter() {
                config.push_str(&format!("{} : {}\n", key, value));
            }
            std::fs::write(&config_path, config)?;

            let script = format!(
                "#!/bin/bash\nSentinelWrapper.py -c {}\n",
                config_path.display()
            );
            std::fs::write(&run_file.script_path, script)?;
            make_executable(&run_file.script_path)?;
        }

        log::info!("Wrote {} run files to {}", plan.len(), run_dir.display());
        Ok(())
    }

    /// Full run-file step: DEM check, plan, scripts, manifest and orbit caching
    pub fn generate(&self, template: &mut Template) -> StackResult<RunPlan> {
        self.attach_dem(template)?;

        let options = self.stack_options(template)?;
        let plan = self.plan_for(&options)?;
        self.write_run_files(&plan, &options)?;
        persist_manifest(&plan, &self.work_dir)?;

        orbits::cache_precise_orbits(&self.work_dir, self.env.sentinel_orbits.as_deref());
        Ok(plan)
    }
}

/// `run_07_pairs_misreg` -> `pairs_misreg`
fn stage_name(run_name: &str) -> &str {
    run_name
        .splitn(3, '_')
        .nth(2)
        .unwrap_or(run_name)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
