//! Numeric status codes of the underlying compute runtime.
//!
//! The values are the ones defined by OpenCL; every runtime behind
//! [`Runtime`](crate::Runtime) reports failures with them.

pub const CL_SUCCESS: i32 = 0;
pub const CL_DEVICE_NOT_FOUND: i32 = -1;
pub const CL_DEVICE_NOT_AVAILABLE: i32 = -2;
pub const CL_COMPILER_NOT_AVAILABLE: i32 = -3;
pub const CL_MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
pub const CL_OUT_OF_RESOURCES: i32 = -5;
pub const CL_OUT_OF_HOST_MEMORY: i32 = -6;
pub const CL_PROFILING_INFO_NOT_AVAILABLE: i32 = -7;
pub const CL_MEM_COPY_OVERLAP: i32 = -8;
pub const CL_IMAGE_FORMAT_MISMATCH: i32 = -9;
pub const CL_IMAGE_FORMAT_NOT_SUPPORTED: i32 = -10;
pub const CL_BUILD_PROGRAM_FAILURE: i32 = -11;
pub const CL_MAP_FAILURE: i32 = -12;
pub const CL_MISALIGNED_SUB_BUFFER_OFFSET: i32 = -13;
pub const CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
pub const CL_INVALID_VALUE: i32 = -30;
pub const CL_INVALID_DEVICE_TYPE: i32 = -31;
pub const CL_INVALID_PLATFORM: i32 = -32;
pub const CL_INVALID_DEVICE: i32 = -33;
pub const CL_INVALID_CONTEXT: i32 = -34;
pub const CL_INVALID_QUEUE_PROPERTIES: i32 = -35;
pub const CL_INVALID_COMMAND_QUEUE: i32 = -36;
pub const CL_INVALID_HOST_PTR: i32 = -37;
pub const CL_INVALID_MEM_OBJECT: i32 = -38;
pub const CL_INVALID_IMAGE_FORMAT_DESCRIPTOR: i32 = -39;
pub const CL_INVALID_IMAGE_SIZE: i32 = -40;
pub const CL_INVALID_SAMPLER: i32 = -41;
pub const CL_INVALID_BINARY: i32 = -42;
pub const CL_INVALID_BUILD_OPTIONS: i32 = -43;
pub const CL_INVALID_PROGRAM: i32 = -44;
pub const CL_INVALID_PROGRAM_EXECUTABLE: i32 = -45;
pub const CL_INVALID_KERNEL_NAME: i32 = -46;
pub const CL_INVALID_KERNEL_DEFINITION: i32 = -47;
pub const CL_INVALID_KERNEL: i32 = -48;
pub const CL_INVALID_ARG_INDEX: i32 = -49;
pub const CL_INVALID_ARG_VALUE: i32 = -50;
pub const CL_INVALID_ARG_SIZE: i32 = -51;
pub const CL_INVALID_KERNEL_ARGS: i32 = -52;
pub const CL_INVALID_WORK_DIMENSION: i32 = -53;
pub const CL_INVALID_WORK_GROUP_SIZE: i32 = -54;
pub const CL_INVALID_WORK_ITEM_SIZE: i32 = -55;
pub const CL_INVALID_GLOBAL_OFFSET: i32 = -56;
pub const CL_INVALID_EVENT_WAIT_LIST: i32 = -57;
pub const CL_INVALID_EVENT: i32 = -58;
pub const CL_INVALID_OPERATION: i32 = -59;
pub const CL_INVALID_GL_OBJECT: i32 = -60;
pub const CL_INVALID_BUFFER_SIZE: i32 = -61;
pub const CL_INVALID_MIP_LEVEL: i32 = -62;
pub const CL_INVALID_GLOBAL_WORK_SIZE: i32 = -63;

pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR_CODE";

/// Returns the symbolic name of a runtime status code.
///
/// Unmapped values yield [`UNKNOWN_ERROR_CODE`].
/// # Example
/// ```
/// use sico::status::error_string;
///
/// assert_eq!(error_string(-11), "CL_BUILD_PROGRAM_FAILURE");
/// assert_eq!(error_string(-9999), "UNKNOWN_ERROR_CODE");
/// ```
pub fn error_string(code: i32) -> &'static str {
    match code {
        CL_SUCCESS => "CL_SUCCESS",
        CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
        CL_COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
        CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        CL_PROFILING_INFO_NOT_AVAILABLE => "CL_PROFILING_INFO_NOT_AVAILABLE",
        CL_MEM_COPY_OVERLAP => "CL_MEM_COPY_OVERLAP",
        CL_IMAGE_FORMAT_MISMATCH => "CL_IMAGE_FORMAT_MISMATCH",
        CL_IMAGE_FORMAT_NOT_SUPPORTED => "CL_IMAGE_FORMAT_NOT_SUPPORTED",
        CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        CL_MAP_FAILURE => "CL_MAP_FAILURE",
        CL_MISALIGNED_SUB_BUFFER_OFFSET => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
        CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
            "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
        }
        CL_INVALID_VALUE => "CL_INVALID_VALUE",
        CL_INVALID_DEVICE_TYPE => "CL_INVALID_DEVICE_TYPE",
        CL_INVALID_PLATFORM => "CL_INVALID_PLATFORM",
        CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
        CL_INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        CL_INVALID_QUEUE_PROPERTIES => "CL_INVALID_QUEUE_PROPERTIES",
        CL_INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        CL_INVALID_HOST_PTR => "CL_INVALID_HOST_PTR",
        CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        CL_INVALID_IMAGE_FORMAT_DESCRIPTOR => "CL_INVALID_IMAGE_FORMAT_DESCRIPTOR",
        CL_INVALID_IMAGE_SIZE => "CL_INVALID_IMAGE_SIZE",
        CL_INVALID_SAMPLER => "CL_INVALID_SAMPLER",
        CL_INVALID_BINARY => "CL_INVALID_BINARY",
        CL_INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
        CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
        CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        CL_INVALID_KERNEL_DEFINITION => "CL_INVALID_KERNEL_DEFINITION",
        CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
        CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
        CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
        CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
        CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
        CL_INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
        CL_INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
        CL_INVALID_WORK_ITEM_SIZE => "CL_INVALID_WORK_ITEM_SIZE",
        CL_INVALID_GLOBAL_OFFSET => "CL_INVALID_GLOBAL_OFFSET",
        CL_INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        CL_INVALID_EVENT => "CL_INVALID_EVENT",
        CL_INVALID_OPERATION => "CL_INVALID_OPERATION",
        CL_INVALID_GL_OBJECT => "CL_INVALID_GL_OBJECT",
        CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        CL_INVALID_MIP_LEVEL => "CL_INVALID_MIP_LEVEL",
        CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
        _ => UNKNOWN_ERROR_CODE,
    }
}

/// Long-form explanations of the ways a kernel launch can be rejected.
///
/// Returns an empty slice for codes that enqueueing a kernel never reports.
pub fn launch_error_details(code: i32) -> &'static [&'static str] {
    match code {
        CL_INVALID_PROGRAM_EXECUTABLE => &[
            "there is no successfully built program executable available for the device associated with the queue",
        ],
        CL_INVALID_COMMAND_QUEUE => &["the queue is not a valid host command queue"],
        CL_INVALID_KERNEL => &["the kernel is not a valid kernel object"],
        CL_INVALID_CONTEXT => &[
            "the context associated with the queue and the kernel is not the same",
        ],
        CL_INVALID_KERNEL_ARGS => &[
            "the kernel argument values have not been specified",
            "a kernel argument declared to be a pointer to a type does not point to a named address space",
        ],
        CL_INVALID_WORK_DIMENSION => &["the work dimension is not a value between 1 and 3"],
        CL_INVALID_GLOBAL_WORK_SIZE => &[
            "the global work size is missing, zero, or exceeds the range of size_t on the device",
        ],
        CL_INVALID_GLOBAL_OFFSET => &[
            "global work size plus global work offset exceeds the range of size_t on the device",
        ],
        CL_MISALIGNED_SUB_BUFFER_OFFSET => &[
            "a sub-buffer argument is not aligned to the device's base address alignment",
        ],
        CL_INVALID_IMAGE_SIZE => &["an image argument has dimensions the device does not support"],
        CL_IMAGE_FORMAT_NOT_SUPPORTED => &["an image argument has a format the device does not support"],
        CL_MEM_OBJECT_ALLOCATION_FAILURE => &[
            "the data store of an image or buffer argument could not be allocated",
        ],
        CL_INVALID_EVENT_WAIT_LIST => &["the event wait list is malformed"],
        CL_INVALID_OPERATION => &[
            "SVM or system pointers were passed to a device that does not support them",
        ],
        CL_OUT_OF_HOST_MEMORY => &["the runtime failed to allocate resources on the host"],
        CL_OUT_OF_RESOURCES => &[
            "insufficient resources (registers, local memory, image or sampler slots) to run the kernel with the requested local size",
            "the runtime failed to allocate resources on the device",
        ],
        CL_INVALID_WORK_ITEM_SIZE => &[
            "a local work size component exceeds the device's maximum work item size in that dimension",
        ],
        CL_INVALID_WORK_GROUP_SIZE => &[
            "the local work size does not match the kernel's reqd_work_group_size attribute",
            "the total local work size exceeds the device's maximum work group size",
            "the local work size is missing but the kernel declares reqd_work_group_size",
            "the global work size is not evenly divisible by the local work size",
        ],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::{error_string, launch_error_details, UNKNOWN_ERROR_CODE};

    #[test]
    fn test_every_code_in_range_decodes_without_panicking() {
        for code in -70..=0 {
            let name = error_string(code);
            assert!(name.starts_with("CL_") || name == UNKNOWN_ERROR_CODE);
        }
    }

    #[test]
    fn test_device_not_found_has_its_own_name() {
        assert_eq!(error_string(-1), "CL_DEVICE_NOT_FOUND");
        assert_eq!(error_string(-32), "CL_INVALID_PLATFORM");
    }

    #[test]
    fn test_unmapped_codes() {
        assert_eq!(error_string(i32::MIN), UNKNOWN_ERROR_CODE);
        assert_eq!(error_string(42), UNKNOWN_ERROR_CODE);
        assert!(launch_error_details(-11).is_empty());
        assert_eq!(launch_error_details(-54).len(), 4);
    }
}
