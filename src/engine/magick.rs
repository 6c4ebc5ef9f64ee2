//! ImageMagick engine.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Output};

use tracing::trace;

use super::{quote, EngineOutput, ImageEngine, Operation};
use crate::error::{ResizeError, Result};

/// Runs `identify` and `convert` from an ImageMagick install.
#[derive(Debug, Clone)]
pub struct MagickEngine {
    convert_bin: String,
    identify_bin: String,
}

impl Default for MagickEngine {
    fn default() -> Self {
        Self::new("convert", "identify")
    }
}

impl MagickEngine {
    pub fn new(convert_bin: impl Into<String>, identify_bin: impl Into<String>) -> Self {
        Self {
            convert_bin: convert_bin.into(),
            identify_bin: identify_bin.into(),
        }
    }

    fn convert_args(source: &Path, operations: &[Operation], output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![source.as_os_str().to_owned()];
        args.extend(operations.iter().flat_map(Operation::magick_args).map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Only the first frame is measured; multi-frame sources would otherwise
    /// print one size per frame with nothing in between.
    fn identify_args(source: &Path) -> Vec<OsString> {
        let mut first_frame = source.as_os_str().to_owned();
        first_frame.push("[0]");
        vec![OsString::from("-format"), OsString::from("%wx%h"), first_frame]
    }

    fn run(&self, program: &str, args: &[OsString]) -> Result<EngineOutput> {
        trace!(program, ?args, "running image engine");
        // The locale lives on the child only, so number formatting in the
        // output is fixed without touching this process's locale.
        let output = Command::new(program)
            .args(args)
            .env("LC_ALL", "C")
            .env("LANG", "C")
            .output()
            .map_err(|source| ResizeError::EngineUnavailable {
                program: program.to_string(),
                source,
            })?;
        Ok(combine(output))
    }
}

fn combine(output: Output) -> EngineOutput {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    EngineOutput {
        status: output.status.code(),
        output: text,
    }
}

impl ImageEngine for MagickEngine {
    fn identify(&self, source: &Path) -> Result<EngineOutput> {
        self.run(&self.identify_bin, &Self::identify_args(source))
    }

    fn convert(&self, source: &Path, operations: &[Operation], output: &Path) -> Result<EngineOutput> {
        let args = Self::convert_args(source, operations, output);
        self.run(&self.convert_bin, &args)
    }

    fn describe(&self, source: &Path, operations: &[Operation], output: &Path) -> String {
        let mut parts = vec![quote(&self.convert_bin)];
        parts.extend(
            Self::convert_args(source, operations, output)
                .iter()
                .map(|a| quote(&a.to_string_lossy())),
        );
        parts.join(" ")
    }
}
