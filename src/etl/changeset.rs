use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::data::Osm;
use crate::errors::Result;

use super::diff::restore_diff_file;
use super::generate_xml::{generate_osm_change, generate_xml_changeset};
use super::parse_osm::parse_osm_file;
use super::Etl;

pub const ETL_NAME: &str = "changeset";

/// Files of a project directory. The downloaded data is `<name>.osm`
/// (optionally xz compressed), local edits are kept in `<name>.diff`.
pub struct ProjectFiles {
    dir: PathBuf,
    name: String,
}

impl ProjectFiles {
    pub fn new(dir: &Path, name: &str) -> Self {
        ProjectFiles {
            dir: dir.to_path_buf(),
            name: name.to_string(),
        }
    }

    fn file(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.name, extension))
    }

    /// Downloaded data, the uncompressed file is preferred.
    pub fn osm(&self) -> Result<PathBuf> {
        ["osm", "osm.xz"]
            .iter()
            .map(|ext| self.file(ext))
            .find(|path| path.exists())
            .ok_or_else(|| format!("no OSM data for project {} in {}", self.name, self.dir.display()).into())
    }

    pub fn diff(&self) -> PathBuf {
        self.file("diff")
    }

    pub fn osm_change(&self) -> PathBuf {
        self.file("osc")
    }

    pub fn changeset(&self) -> PathBuf {
        self.file("changeset.xml")
    }
}

/// Documents needed to upload the edits of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDocuments {
    pub osm_change: String,
    pub changeset: String,
}

/// Loads the project data, re-applies the saved edits and writes the
/// osmChange and changeset documents for them.
pub struct ChangesetEtl {
    project_name: String,
    changeset_id: String,
    comment: String,
    source: Option<String>,
}

impl ChangesetEtl {
    pub fn new(project_name: &str, changeset_id: &str, comment: &str, source: Option<&str>) -> Self {
        ChangesetEtl {
            project_name: project_name.to_string(),
            changeset_id: changeset_id.to_string(),
            comment: comment.to_string(),
            source: source.map(str::to_string),
        }
    }

    fn files(&self, dir: &Path) -> ProjectFiles {
        ProjectFiles::new(dir, &self.project_name)
    }
}

impl Etl for ChangesetEtl {
    type Input = Osm;
    type Output = Option<UploadDocuments>;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(self.files(dir).osm_change().try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        let files = self.files(dir);
        for path in [files.osm_change(), files.changeset()] {
            if path.try_exists()? {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Osm> {
        let files = self.files(dir);
        let mut osm = parse_osm_file(&files.osm()?)?;
        if let Some(problem) = osm.sanity_check() {
            warn!(project = self.project_name.as_str(), problem = problem; "OSM data failed the sanity check");
        }
        match restore_diff_file(&mut osm, &files.diff())? {
            Some(result) => info!(
                restored = result.restored,
                ignored = result.ignored,
                hidden = result.has_hidden;
                "Applied local edits"
            ),
            None => info!(project = self.project_name.as_str(); "Project has no local edits"),
        }
        Ok(osm)
    }

    fn transform(&mut self, osm: Osm) -> Result<Option<UploadDocuments>> {
        let modified = osm.modified();
        if modified.is_empty() {
            info!(project = self.project_name.as_str(); "Nothing to upload");
            return Ok(None);
        }
        Ok(Some(UploadDocuments {
            osm_change: generate_osm_change(&osm, &self.changeset_id)?,
            changeset: generate_xml_changeset(&self.comment, self.source.as_deref())?,
        }))
    }

    fn load(&mut self, dir: &Path, output: Option<UploadDocuments>) -> Result<()> {
        let Some(documents) = output else {
            return Ok(());
        };
        let files = self.files(dir);
        fs::write(files.osm_change(), documents.osm_change)?;
        fs::write(files.changeset(), documents.changeset)?;
        info!(path = files.osm_change().display().to_string(); "Wrote osmChange");
        Ok(())
    }
}
