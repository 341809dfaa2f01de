use std::fs;
use std::process::Command;

use crate::error::{LaunchError, LaunchResult};

/// External assembler turning kernel assembly into a loadable module image
/// for one compute capability.
pub trait AsmCompiler: Send + Sync {
    fn compile_asm(&self, cc_major: u32, cc_minor: u32, source: &str) -> LaunchResult<Vec<u8>>;
}

/// Production assembler: shells out to `ptxas` from `PATH`.
///
/// Sources are staged through a temporary directory that is removed when
/// compilation finishes, so no on-disk state outlives the call.
pub struct PtxasCompiler;

impl AsmCompiler for PtxasCompiler {
    fn compile_asm(&self, cc_major: u32, cc_minor: u32, source: &str) -> LaunchResult<Vec<u8>> {
        let staging = tempfile::tempdir()
            .map_err(|err| LaunchError::internal(format!("failed to create temp dir: {err}")))?;
        let source_path = staging.path().join("kernel.ptx");
        let output_path = staging.path().join("kernel.cubin");
        fs::write(&source_path, source).map_err(|err| {
            LaunchError::internal(format!("failed to stage kernel assembly: {err}"))
        })?;

        let arch = format!("sm_{cc_major}{cc_minor}");
        let output = Command::new("ptxas")
            .arg("--gpu-name")
            .arg(&arch)
            .arg("-o")
            .arg(&output_path)
            .arg(&source_path)
            .output()
            .map_err(|err| LaunchError::internal(format!("failed to run ptxas: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LaunchError::invalid_argument(format!(
                "ptxas failed for {arch} (status={}): {}",
                output.status,
                stderr.trim()
            )));
        }

        fs::read(&output_path)
            .map_err(|err| LaunchError::internal(format!("failed to read ptxas output: {err}")))
    }
}
