pub mod changeset;
pub mod diff;
pub mod generate_xml;
pub mod parse_osm;

use std::path::Path;

use log::{error, info};

use crate::errors::Result;

/// One step of a project pipeline: read the project data, turn it into
/// something new and store that next to it.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    fn is_cached(&self, dir: &Path) -> Result<bool>;
    fn clean(&self, dir: &Path) -> Result<()>;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    /// Log a failed stage and pass the result on.
    fn stage<T>(&self, stage: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            error!(etl_name = self.etl_name(), stage = stage, err = err.message.as_str(); "ETL stage failed with error");
        }
        result
    }

    /// Run all stages unless the output already exists. With `force` the
    /// old output is removed first.
    fn process(&mut self, dir: &Path, force: bool) -> Result<()> {
        info!(etl_name = self.etl_name(), dir = dir.display().to_string(); "Starting ETL process");
        if force {
            self.clean(dir)?;
        }
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
            return Ok(());
        }

        info!(etl_name = self.etl_name(); "Extracting");
        let result = self.extract(dir);
        let input = self.stage("extract", result)?;

        info!(etl_name = self.etl_name(); "Transforming");
        let result = self.transform(input);
        let output = self.stage("transform", result)?;

        info!(etl_name = self.etl_name(); "Loading");
        let result = self.load(dir, output);
        self.stage("load", result)?;

        info!(etl_name = self.etl_name(); "Process finished");
        Ok(())
    }
}
