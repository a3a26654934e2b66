//! Synchronous invocation of external command line tools.
//!
//! Arguments may contain `{name}` placeholders, which are replaced by the paths given at invocation time.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{AlicError, Result};
use crate::nifti::NiftiDataType;
use crate::parcellation::ParcellationPreprocessor;
use crate::volume::Volume;


/// An external program and its argument template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTool {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}


impl ExternalTool {

    pub fn new(program: &str, args: &[&str]) -> ExternalTool {
        ExternalTool {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: None,
        }
    }

    /// The arguments with every `{key}` replaced by its path.
    pub fn expand_args(&self, substitutions: &[(&str, &Path)]) -> Vec<String> {
        self.args.iter()
            .map(|arg| {
                substitutions.iter().fold(arg.clone(), |acc, (key, path)| {
                    acc.replace(&format!("{{{}}}", key), &path.to_string_lossy())
                })
            })
            .collect()
    }

    /// Run the tool and wait for it. A non-zero exit status is an [`AlicError::ExternalTool`] error.
    pub fn run(&self, substitutions: &[(&str, &Path)]) -> Result<()> {
        let args = self.expand_args(substitutions);
        info!(program = %self.program, args = ?args, "running external tool");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        let status = cmd.status()?;
        if !status.success() {
            error!(program = %self.program, code = ?status.code(), "external tool failed");
            return Err(AlicError::ExternalTool(self.program.clone(), status.code()));
        }
        Ok(())
    }
}


/// A parcellation preprocessor backed by an external tool reading `{input}` and writing `{output}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalPreprocessor {
    pub tool: ExternalTool,
    /// Directory for the exchanged images.
    pub scratch_dir: PathBuf,
}


impl ParcellationPreprocessor for ExternalPreprocessor {

    fn name(&self) -> &str {
        &self.tool.program
    }

    fn process(&self, parcellation: &Volume) -> Result<Volume> {
        let input = self.scratch_dir.join("parcellation_preproc_input.nii.gz");
        let output = self.scratch_dir.join("parcellation_preproc_output.nii.gz");
        parcellation.to_file(&input, NiftiDataType::Int32)?;

        self.tool.run(&[("input", input.as_path()), ("output", output.as_path())])?;
        if !output.is_file() {
            return Err(AlicError::MissingInput(output));
        }

        let processed = Volume::from_file(&output)?;
        processed.grid.ensure_shape(parcellation.grid.shape)?;
        Ok(processed)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let tool = ExternalTool::new("tckgen", &["{input}", "-seed_image", "{input}", "{output}"]);
        let args = tool.expand_args(&[("input", Path::new("/a/in.mif")), ("output", Path::new("/a/out.tck"))]);
        assert_eq!(vec!["/a/in.mif", "-seed_image", "/a/in.mif", "/a/out.tck"], args);
    }

    #[cfg(unix)]
    #[test]
    fn a_failing_tool_reports_its_exit_code() {
        let ok = ExternalTool::new("sh", &["-c", "exit 0"]);
        assert!(ok.run(&[]).is_ok());
        let failing = ExternalTool::new("sh", &["-c", "exit 3"]);
        assert!(matches!(failing.run(&[]), Err(AlicError::ExternalTool(p, Some(3))) if p == "sh"));
    }

    #[cfg(unix)]
    #[test]
    fn preprocessed_images_must_keep_the_grid_shape() {
        use crate::affine::Affine;
        use ndarray::Array3;

        let dir = tempfile::tempdir().unwrap();
        let parcellation = Volume::new(Array3::zeros((4, 4, 4)), Affine::identity());
        let copy = ExternalPreprocessor {
            tool: ExternalTool::new("cp", &["{input}", "{output}"]),
            scratch_dir: dir.path().to_path_buf(),
        };
        assert_eq!([4, 4, 4], copy.process(&parcellation).unwrap().grid.shape);

        let cropped = dir.path().join("cropped.nii.gz");
        Volume::new(Array3::zeros((4, 4, 3)), Affine::identity()).to_file(&cropped, NiftiDataType::Int32).unwrap();
        let crop = ExternalPreprocessor {
            tool: ExternalTool::new("cp", &[cropped.to_str().unwrap(), "{output}"]),
            scratch_dir: dir.path().to_path_buf(),
        };
        assert!(matches!(crop.process(&parcellation), Err(AlicError::ShapeMismatch([4, 4, 4], [4, 4, 3]))));
    }
}
