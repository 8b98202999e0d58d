//! Device status codes.
//!
//! The host device reports failures with the same numeric codes and names an
//! OpenCL driver would, so diagnostics read the same regardless of backend.

use std::fmt;

/// Status reported by the device for a rejected or failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    DeviceNotFound,
    MemObjectAllocationFailure,
    OutOfResources,
    BuildProgramFailure,
    ExecStatusErrorForEventsInWaitList,
    InvalidValue,
    InvalidDevice,
    InvalidCommandQueue,
    InvalidBuildOptions,
    InvalidProgramExecutable,
    InvalidKernelName,
    InvalidArgIndex,
    InvalidArgValue,
    InvalidArgSize,
    InvalidKernelArgs,
    InvalidWorkDimension,
    InvalidWorkGroupSize,
    InvalidWorkItemSize,
    InvalidGlobalOffset,
    InvalidBufferSize,
    InvalidGlobalWorkSize,
}

impl Status {
    const ALL: [Status; 22] = [
        Status::Success,
        Status::DeviceNotFound,
        Status::MemObjectAllocationFailure,
        Status::OutOfResources,
        Status::BuildProgramFailure,
        Status::ExecStatusErrorForEventsInWaitList,
        Status::InvalidValue,
        Status::InvalidDevice,
        Status::InvalidCommandQueue,
        Status::InvalidBuildOptions,
        Status::InvalidProgramExecutable,
        Status::InvalidKernelName,
        Status::InvalidArgIndex,
        Status::InvalidArgValue,
        Status::InvalidArgSize,
        Status::InvalidKernelArgs,
        Status::InvalidWorkDimension,
        Status::InvalidWorkGroupSize,
        Status::InvalidWorkItemSize,
        Status::InvalidGlobalOffset,
        Status::InvalidBufferSize,
        Status::InvalidGlobalWorkSize,
    ];

    /// Numeric status code.
    pub fn code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::DeviceNotFound => -1,
            Status::MemObjectAllocationFailure => -4,
            Status::OutOfResources => -5,
            Status::BuildProgramFailure => -11,
            Status::ExecStatusErrorForEventsInWaitList => -14,
            Status::InvalidValue => -30,
            Status::InvalidDevice => -33,
            Status::InvalidCommandQueue => -36,
            Status::InvalidBuildOptions => -43,
            Status::InvalidProgramExecutable => -45,
            Status::InvalidKernelName => -46,
            Status::InvalidArgIndex => -49,
            Status::InvalidArgValue => -50,
            Status::InvalidArgSize => -51,
            Status::InvalidKernelArgs => -52,
            Status::InvalidWorkDimension => -53,
            Status::InvalidWorkGroupSize => -54,
            Status::InvalidWorkItemSize => -55,
            Status::InvalidGlobalOffset => -56,
            Status::InvalidBufferSize => -61,
            Status::InvalidGlobalWorkSize => -63,
        }
    }

    /// Look up a status by its numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    /// Symbolic name, e.g. `CL_INVALID_WORK_GROUP_SIZE`.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "CL_SUCCESS",
            Status::DeviceNotFound => "CL_DEVICE_NOT_FOUND",
            Status::MemObjectAllocationFailure => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            Status::OutOfResources => "CL_OUT_OF_RESOURCES",
            Status::BuildProgramFailure => "CL_BUILD_PROGRAM_FAILURE",
            Status::ExecStatusErrorForEventsInWaitList => {
                "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
            }
            Status::InvalidValue => "CL_INVALID_VALUE",
            Status::InvalidDevice => "CL_INVALID_DEVICE",
            Status::InvalidCommandQueue => "CL_INVALID_COMMAND_QUEUE",
            Status::InvalidBuildOptions => "CL_INVALID_BUILD_OPTIONS",
            Status::InvalidProgramExecutable => "CL_INVALID_PROGRAM_EXECUTABLE",
            Status::InvalidKernelName => "CL_INVALID_KERNEL_NAME",
            Status::InvalidArgIndex => "CL_INVALID_ARG_INDEX",
            Status::InvalidArgValue => "CL_INVALID_ARG_VALUE",
            Status::InvalidArgSize => "CL_INVALID_ARG_SIZE",
            Status::InvalidKernelArgs => "CL_INVALID_KERNEL_ARGS",
            Status::InvalidWorkDimension => "CL_INVALID_WORK_DIMENSION",
            Status::InvalidWorkGroupSize => "CL_INVALID_WORK_GROUP_SIZE",
            Status::InvalidWorkItemSize => "CL_INVALID_WORK_ITEM_SIZE",
            Status::InvalidGlobalOffset => "CL_INVALID_GLOBAL_OFFSET",
            Status::InvalidBufferSize => "CL_INVALID_BUFFER_SIZE",
            Status::InvalidGlobalWorkSize => "CL_INVALID_GLOBAL_WORK_SIZE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a raw status code the way driver diagnostics print it.
pub fn status_str(code: i32) -> String {
    match Status::from_code(code) {
        Some(status) => format!("{} ({})", status.as_str(), code),
        None => format!("Unknown status code ({})", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip_for_every_status() {
        for status in Status::ALL {
            assert_eq!(Status::from_code(status.code()), Some(status));
        }
    }

    #[test]
    fn test_status_str() {
        assert_eq!(status_str(-54), "CL_INVALID_WORK_GROUP_SIZE (-54)");
        assert_eq!(status_str(0), "CL_SUCCESS (0)");
        assert_eq!(status_str(-9999), "Unknown status code (-9999)");
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::BuildProgramFailure.to_string(), "CL_BUILD_PROGRAM_FAILURE");
    }
}
