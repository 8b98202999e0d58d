//! Binding of kernel arguments to device memory.
//!
//! All arguments are checked against the kernel's declared parameters before
//! any device memory is allocated, then bound in declaration order.

use crate::arg::{Direction, KernelArg, Payload};
use crate::device::kernel::ArgValue;
use crate::device::{DeviceBuffer, DeviceContext, Kernel, MemAccess, Param, ParamKind, Status};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// An output-bearing argument waiting for its readback.
pub(crate) struct PendingOutput<'a> {
    pub arg_index: usize,
    pub direction: Direction,
    pub host: &'a mut [u8],
    pub buffer: DeviceBuffer,
    pub staging: Arc<Mutex<Vec<u8>>>,
}

pub(crate) struct Binding<'a> {
    /// Values in parameter order, as the device sees them.
    pub values: Vec<ArgValue>,
    /// Device buffer per argument; `None` for local and scalar arguments.
    pub buffers: Vec<Option<DeviceBuffer>>,
    /// Output and input-output arguments in declaration order.
    pub outputs: Vec<PendingOutput<'a>>,
}

pub(crate) struct Binder<'c> {
    context: &'c DeviceContext,
}

impl<'c> Binder<'c> {
    pub fn new(context: &'c DeviceContext) -> Self {
        Self { context }
    }

    pub fn bind<'a>(&self, kernel: &Kernel, args: Vec<KernelArg<'a>>) -> Result<Binding<'a>> {
        let params = kernel.params();
        if args.len() != params.len() {
            return Err(Error::submission(
                Status::InvalidKernelArgs,
                format!(
                    "kernel '{}' takes {} arguments, {} were given",
                    kernel.name(),
                    params.len(),
                    args.len()
                ),
            ));
        }

        for (index, (arg, param)) in args.iter().zip(params).enumerate() {
            self.check(index, arg, param)?;
        }

        let mut binding = Binding {
            values: Vec::with_capacity(args.len()),
            buffers: Vec::with_capacity(args.len()),
            outputs: Vec::new(),
        };

        for (index, arg) in args.into_iter().enumerate() {
            let direction = arg.direction();
            trace!(kernel = %kernel.name(), index, %direction, size = arg.size(), "bind argument");

            match arg.into_payload() {
                Payload::Input(host) => {
                    let buffer =
                        DeviceBuffer::with_host_data(self.context, MemAccess::ReadOnly, host)?;
                    binding.push_buffer(buffer);
                }
                Payload::InputOutput(host) => {
                    let buffer =
                        DeviceBuffer::with_host_data(self.context, MemAccess::ReadWrite, host)?;
                    binding.push_output(index, direction, host, buffer);
                }
                Payload::Output(host) => {
                    let buffer = DeviceBuffer::new(self.context, host.len(), MemAccess::WriteOnly)?;
                    binding.push_output(index, direction, host, buffer);
                }
                Payload::Local(size) => {
                    binding.values.push(ArgValue::Local(size));
                    binding.buffers.push(None);
                }
                Payload::Scalar(bytes) => {
                    binding.values.push(ArgValue::Scalar(bytes));
                    binding.buffers.push(None);
                }
            }
        }

        Ok(binding)
    }

    fn check(&self, index: usize, arg: &KernelArg<'_>, param: &Param) -> Result<()> {
        let direction = arg.direction();
        let size = arg.size();
        let invalid = |status: Status, reason: String| -> Result<()> {
            Err(Error::invalid_argument(index, status, reason))
        };

        match (direction, param.kind) {
            (
                Direction::Input | Direction::Output | Direction::InputOutput,
                ParamKind::Pointer { space, read_only },
            ) => {
                if space == crate::device::AddressSpace::Local {
                    return invalid(
                        Status::InvalidArgValue,
                        format!("{} buffer bound to __local parameter '{}'", direction, param.name),
                    );
                }
                if size == 0 {
                    return invalid(
                        Status::InvalidBufferSize,
                        format!("{} buffer is empty", direction),
                    );
                }
                if size as u64 > self.context.device.max_mem_alloc_size {
                    return invalid(
                        Status::InvalidBufferSize,
                        format!(
                            "{} bytes exceeds max allocation of {} bytes",
                            size, self.context.device.max_mem_alloc_size
                        ),
                    );
                }
                if direction.is_output() && read_only {
                    return invalid(
                        Status::InvalidArgValue,
                        format!(
                            "{} buffer bound to read-only parameter '{}'",
                            direction, param.name
                        ),
                    );
                }
                Ok(())
            }
            (Direction::Local, ParamKind::Pointer { space, .. }) => {
                if space != crate::device::AddressSpace::Local {
                    return invalid(
                        Status::InvalidArgValue,
                        format!("local memory bound to non-local parameter '{}'", param.name),
                    );
                }
                if size == 0 {
                    return invalid(Status::InvalidArgSize, "local memory size is zero".to_string());
                }
                Ok(())
            }
            (Direction::Scalar, ParamKind::Scalar { size: expected }) => {
                if size != expected {
                    return invalid(
                        Status::InvalidArgSize,
                        format!(
                            "scalar of {} bytes for parameter '{}' of type {} ({} bytes)",
                            size, param.name, param.type_name, expected
                        ),
                    );
                }
                Ok(())
            }
            (Direction::Scalar, ParamKind::Pointer { .. }) => invalid(
                Status::InvalidArgValue,
                format!("scalar bound to pointer parameter '{}'", param.name),
            ),
            (_, ParamKind::Scalar { .. }) => invalid(
                Status::InvalidArgValue,
                format!("{} argument bound to by-value parameter '{}'", direction, param.name),
            ),
        }
    }
}

impl<'a> Binding<'a> {
    fn push_buffer(&mut self, buffer: DeviceBuffer) {
        self.values.push(ArgValue::Buffer(buffer.clone()));
        self.buffers.push(Some(buffer));
    }

    fn push_output(
        &mut self,
        arg_index: usize,
        direction: Direction,
        host: &'a mut [u8],
        buffer: DeviceBuffer,
    ) {
        self.push_buffer(buffer.clone());
        self.outputs.push(PendingOutput {
            arg_index,
            direction,
            host,
            buffer,
            staging: Arc::new(Mutex::new(Vec::new())),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{test_context, KernelLibrary, Program};

    const SOURCE: &str = r#"
__kernel void saxpy(__global const float* x, __global float* y, __global float* out,
                    __local float* tmp, float a) {}
"#;

    fn kernel() -> Kernel {
        let library = KernelLibrary::new().with("saxpy", |_, _| {});
        let program = Arc::new(Program::build("b.cl", SOURCE, "", &library).unwrap());
        Kernel::create(&program, "saxpy").unwrap()
    }

    fn status(err: Error) -> (usize, Status) {
        match err {
            Error::InvalidArgument { index, status, .. } => (index, status),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_bind_all_directions() {
        let context = test_context();
        let x = [1.0f32; 4];
        let mut y = [2.0f32; 4];
        let mut out = [0.0f32; 4];

        let binding = Binder::new(&context)
            .bind(
                &kernel(),
                vec![
                    KernelArg::input(&x),
                    KernelArg::input_output(&mut y),
                    KernelArg::output(&mut out),
                    KernelArg::local::<f32>(4),
                    KernelArg::scalar(&2.0f32),
                ],
            )
            .unwrap();

        assert_eq!(binding.values.len(), 5);
        let allocated: Vec<bool> = binding.buffers.iter().map(Option::is_some).collect();
        assert_eq!(allocated, [true, true, true, false, false]);

        let outputs: Vec<(usize, Direction)> = binding
            .outputs
            .iter()
            .map(|o| (o.arg_index, o.direction))
            .collect();
        assert_eq!(outputs, [(1, Direction::InputOutput), (2, Direction::Output)]);

        let access: Vec<Option<MemAccess>> = binding
            .buffers
            .iter()
            .map(|b| b.as_ref().map(DeviceBuffer::access))
            .collect();
        assert_eq!(
            access,
            [
                Some(MemAccess::ReadOnly),
                Some(MemAccess::ReadWrite),
                Some(MemAccess::WriteOnly),
                None,
                None
            ]
        );

        // x and y are uploaded, out is not
        assert_eq!(context.metrics.snapshot().bytes_to_device, 32);
    }

    #[test]
    fn test_rejects_before_allocating() {
        let context = test_context();
        let x = [1.0f32; 4];
        let mut y = [2.0f32; 4];
        let mut out: [f32; 0] = [];

        let err = Binder::new(&context)
            .bind(
                &kernel(),
                vec![
                    KernelArg::input(&x),
                    KernelArg::input_output(&mut y),
                    KernelArg::output(&mut out),
                    KernelArg::local::<f32>(4),
                    KernelArg::scalar(&2.0f32),
                ],
            )
            .err()
            .unwrap();

        assert_eq!(status(err), (2, Status::InvalidBufferSize));
        assert_eq!(context.metrics.snapshot().buffers_allocated, 0);
    }

    #[test]
    fn test_rejects_wrong_count() {
        let context = test_context();
        let x = [1.0f32; 4];
        let err = Binder::new(&context).bind(&kernel(), vec![KernelArg::input(&x)]).err().unwrap();
        assert_eq!(err.status(), Some(Status::InvalidKernelArgs));
    }

    #[test]
    fn test_rejects_mismatched_kinds_and_sizes() {
        let context = test_context();
        let x = [1.0f32; 4];
        let mut y = [2.0f32; 4];
        let mut out = [0.0f32; 4];
        let mut other = [0.0f32; 4];

        // output bound to a const pointer
        let err = Binder::new(&context)
            .bind(
                &kernel(),
                vec![
                    KernelArg::output(&mut other),
                    KernelArg::input_output(&mut y),
                    KernelArg::output(&mut out),
                    KernelArg::local::<f32>(4),
                    KernelArg::scalar(&2.0f32),
                ],
            )
            .err()
            .unwrap();
        assert_eq!(status(err), (0, Status::InvalidArgValue));

        // double where float is declared
        let err = Binder::new(&context)
            .bind(
                &kernel(),
                vec![
                    KernelArg::input(&x),
                    KernelArg::input_output(&mut y),
                    KernelArg::output(&mut out),
                    KernelArg::local::<f32>(4),
                    KernelArg::scalar(&2.0f64),
                ],
            )
            .err()
            .unwrap();
        assert_eq!(status(err), (4, Status::InvalidArgSize));
    }

    #[test]
    fn test_rejects_empty_local() {
        let context = test_context();
        let x = [1.0f32; 4];
        let mut y = [2.0f32; 4];
        let mut out = [0.0f32; 4];

        let err = Binder::new(&context)
            .bind(
                &kernel(),
                vec![
                    KernelArg::input(&x),
                    KernelArg::input_output(&mut y),
                    KernelArg::output(&mut out),
                    KernelArg::local_bytes(0),
                    KernelArg::scalar(&2.0f32),
                ],
            )
            .err()
            .unwrap();
        assert_eq!(status(err), (3, Status::InvalidArgSize));
    }

    #[test]
    fn test_scalar_in_buffer_slot() {
        let context = test_context();
        let mut y = [2.0f32; 4];
        let mut out = [0.0f32; 4];

        let err = Binder::new(&context)
            .bind(
                &kernel(),
                vec![
                    KernelArg::scalar(&1.0f32),
                    KernelArg::input_output(&mut y),
                    KernelArg::output(&mut out),
                    KernelArg::local::<f32>(4),
                    KernelArg::scalar(&2.0f32),
                ],
            )
            .err()
            .unwrap();
        assert_eq!(status(err), (0, Status::InvalidArgValue));
    }
}
