use flate2::{Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, LaunchResult};

/// Descriptor of a compiled kernel: the assembly plus everything needed to
/// key the kernel cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub asm: String,
    pub entry_name: String,
    pub num_warps: u32,
    pub shared_mem_bytes: u32,
    pub compute_capability: u32,
}

/// A 64-bit-wide scalar handed to the kernel by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterDescriptor {
    Array {
        bytes_to_zero: u64,
        require_16byte_alignment: bool,
    },
    Scalar(ScalarValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelCallDescriptor {
    pub kernel: KernelDescriptor,
    pub grid: [u32; 3],
    pub parameters: Vec<ParameterDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDescriptor {
    pub kernel_call: KernelCallDescriptor,
    pub description: String,
}

/// Descriptor-declared permission for the runtime to pass one device pointer
/// as both an input and an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOutputAlias {
    pub input_buffer_idx: usize,
    pub output_buffer_idx: usize,
    pub buffer_size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutotunedCallDescriptor {
    pub name: String,
    pub configs: Vec<ConfigDescriptor>,
    pub input_output_aliases: Vec<InputOutputAlias>,
}

/// Top-level descriptor variant tag. The wire form is this document as
/// serde_json, zlib-compressed; the front end producing it is updated in
/// lock-step with this schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDescriptor {
    KernelCall(KernelCallDescriptor),
    AutotunedKernelCall(AutotunedCallDescriptor),
}

/// Inflates a zlib-compressed opaque descriptor.
///
/// The output buffer starts at five times the compressed length and doubles
/// whenever it fills before the stream ends. A stream that stops making
/// progress without filling the buffer is malformed input, not a sizing
/// problem, and is rejected.
pub(crate) fn decompress_opaque(opaque: &[u8]) -> LaunchResult<Vec<u8>> {
    if opaque.is_empty() {
        return Err(LaunchError::invalid_argument("empty opaque descriptor"));
    }

    let mut capacity = opaque.len().saturating_mul(5);
    loop {
        let mut output = vec![0u8; capacity];
        let mut inflater = Decompress::new(true);
        match inflater.decompress(opaque, &mut output, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => {
                output.truncate(inflater.total_out() as usize);
                return Ok(output);
            }
            Ok(Status::Ok) | Ok(Status::BufError) => {
                if (inflater.total_out() as usize) < output.len() {
                    return Err(LaunchError::invalid_argument(
                        "failed to decompress opaque descriptor: truncated stream",
                    ));
                }
                capacity = capacity.saturating_mul(2);
            }
            Err(err) => {
                return Err(LaunchError::invalid_argument(format!(
                    "failed to decompress opaque descriptor: {err}"
                )));
            }
        }
    }
}

pub(crate) fn parse_descriptor(serialized: &[u8]) -> LaunchResult<CallDescriptor> {
    serde_json::from_slice(serialized).map_err(|err| {
        LaunchError::invalid_argument(format!("failed to parse call descriptor: {err}"))
    })
}
