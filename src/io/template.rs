use crate::types::{StackError, StackResult};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Ordered ssara flags built from `ssaraopt.<key>` entries; other keys follow alphabetically
const SSARA_FLAG_ORDER: [(&str, &str); 5] = [
    ("platform", "platform"),
    ("relativeOrbit", "relativeOrbit"),
    ("frame", "frame"),
    ("startDate", "start"),
    ("endDate", "end"),
];

/// Dataset template: `key = value  # comment` lines describing one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    path: PathBuf,
    project_name: String,
    options: BTreeMap<String, String>,
}

impl Template {
    /// Read a template file; the project name is the file stem
    pub fn read<P: AsRef<Path>>(path: P) -> StackResult<Self> {
        let path = path.as_ref();
        log::debug!("Reading template: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let project_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                StackError::Template(format!("Cannot derive project name from {}", path.display()))
            })?
            .to_string();

        let mut template = Self::parse(&project_name, &content)?;
        template.path = path.to_path_buf();
        Ok(template)
    }

    /// Parse template text
    pub fn parse(project_name: &str, content: &str) -> StackResult<Self> {
        let mut options = BTreeMap::new();

        for (line_no, raw_line) in content.lines().enumerate() {
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            }
            .trim();

            if line.is_empty() {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                StackError::Template(format!(
                    "line {}: expected 'key = value', found '{}'",
                    line_no + 1,
                    line
                ))
            })?;

            let key = key.trim();
            if key.is_empty() {
                return Err(StackError::Template(format!("line {}: empty key", line_no + 1)));
            }
            options.insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self {
            path: PathBuf::from(format!("{}.template", project_name)),
            project_name: project_name.to_string(),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Value of a key; empty and `None` values count as unset
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty() && *value != "None")
    }

    pub fn require(&self, key: &str) -> StackResult<&str> {
        self.get(key)
            .ok_or_else(|| StackError::MissingTemplateKey(key.to_string()))
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.options.insert(key.to_string(), value.into());
    }

    /// Entries whose key starts with `prefix`, with the prefix removed
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.options.iter().filter_map(move |(key, value)| {
            key.strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, value.as_str()))
        })
    }

    /// Sentinel-1 projects carry the track direction in their name
    pub fn is_sentinel(&self) -> bool {
        self.project_name.contains("SenDT") || self.project_name.contains("SenAT")
    }

    /// Copy with `ssaraopt.startDate`/`endDate` rewritten from YYYYMMDD to YYYY-MM-DD
    pub fn with_ssara_date_format(&self) -> StackResult<Self> {
        let compact = Regex::new(r"^\d{8}$")
            .map_err(|e| StackError::Template(format!("date pattern: {}", e)))?;
        let mut corrected = self.clone();

        for key in ["ssaraopt.startDate", "ssaraopt.endDate"] {
            if let Some(value) = self.get(key) {
                if compact.is_match(value) {
                    let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|e| {
                        StackError::Template(format!("{} = {}: {}", key, value, e))
                    })?;
                    corrected.set(key, date.format("%Y-%m-%d").to_string());
                }
            }
        }

        Ok(corrected)
    }

    /// Query options handed to `ssara_federated_query.py`
    ///
    /// A raw `ssaraopt` entry is used verbatim; otherwise the flags are built
    /// from the `ssaraopt.<key>` entries, which must include `platform`.
    pub fn ssara_options(&self) -> StackResult<Vec<String>> {
        if let Some(raw) = self.get("ssaraopt") {
            return Ok(raw.split_whitespace().map(str::to_string).collect());
        }

        let entries: BTreeMap<&str, &str> = self
            .with_prefix("ssaraopt.")
            .filter(|(_, value)| !value.is_empty() && *value != "None")
            .collect();

        if !entries.contains_key("platform") {
            return Err(StackError::MissingTemplateKey("ssaraopt.platform".to_string()));
        }

        let mut args = Vec::new();
        for (key, flag) in SSARA_FLAG_ORDER {
            if let Some(value) = entries.get(key) {
                args.push(format!("--{}={}", flag, value));
            }
        }
        for (key, value) in &entries {
            if !SSARA_FLAG_ORDER.iter().any(|(known, _)| known == key) {
                args.push(format!("--{}={}", key, value));
            }
        }

        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Kokoxili, ascending track
ssaraopt.platform        = SENTINEL-1A,SENTINEL-1B
ssaraopt.relativeOrbit   = 128
ssaraopt.frame           = 482
ssaraopt.startDate       = 20160601   # first scene
ssaraopt.endDate         = 20161231
ssaraopt.beamMode        = IW

topsStack.subswath       = 1 2
topsStack.slcDir         = None
";

    #[test]
    fn test_parse_strips_comments_and_whitespace() {
        let template = Template::parse("KokoSenAT128", SAMPLE).unwrap();
        assert_eq!(template.get("ssaraopt.startDate"), Some("20160601"));
        assert_eq!(template.get("topsStack.subswath"), Some("1 2"));
        assert_eq!(template.get("topsStack.slcDir"), None);
        assert!(template.is_sentinel());
    }

    #[test]
    fn test_parse_rejects_line_without_assignment() {
        let err = Template::parse("p", "ssaraopt.platform SENTINEL-1A\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_require_reports_missing_key() {
        let template = Template::parse("p", SAMPLE).unwrap();
        assert!(matches!(
            template.require("topsStack.referenceDate"),
            Err(StackError::MissingTemplateKey(key)) if key == "topsStack.referenceDate"
        ));
    }

    #[test]
    fn test_ssara_date_format_correction() {
        let template = Template::parse("p", SAMPLE).unwrap().with_ssara_date_format().unwrap();
        assert_eq!(template.get("ssaraopt.startDate"), Some("2016-06-01"));
        assert_eq!(template.get("ssaraopt.endDate"), Some("2016-12-31"));
    }

    #[test]
    fn test_ssara_date_format_rejects_impossible_date() {
        let template = Template::parse("p", "ssaraopt.startDate = 20161341\n").unwrap();
        assert!(template.with_ssara_date_format().is_err());
    }

    #[test]
    fn test_ssara_options_order() {
        let template = Template::parse("p", SAMPLE).unwrap().with_ssara_date_format().unwrap();
        assert_eq!(
            template.ssara_options().unwrap(),
            vec![
                "--platform=SENTINEL-1A,SENTINEL-1B",
                "--relativeOrbit=128",
                "--frame=482",
                "--start=2016-06-01",
                "--end=2016-12-31",
                "--beamMode=IW",
            ]
        );
    }

    #[test]
    fn test_raw_ssaraopt_wins() {
        let template = Template::parse(
            "p",
            "ssaraopt = --platform=ALOS --relativeOrbit=77\nssaraopt.platform = SENTINEL-1A\n",
        )
        .unwrap();
        assert_eq!(
            template.ssara_options().unwrap(),
            vec!["--platform=ALOS", "--relativeOrbit=77"]
        );
    }

    #[test]
    fn test_ssara_options_need_platform() {
        let template = Template::parse("p", "ssaraopt.relativeOrbit = 128\n").unwrap();
        assert!(matches!(
            template.ssara_options(),
            Err(StackError::MissingTemplateKey(_))
        ));
    }
}
