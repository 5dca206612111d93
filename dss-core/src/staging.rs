//! Host/device staging.
//!
//! Every transfer between host memory and a [`Device`] goes through the types
//! here, and each one moves exactly the bytes implied by the current
//! dimensions. Transfers return the byte count so the engine can account for
//! them.

use crate::device::{DenseDescriptor, Device};
use crate::error::{EngineError, EngineResult};
use crate::scalar::{DataType, Scalar};

/// Host array with a device copy and a staleness flag.
///
/// The host side is the only copy callers may write. Mutable access marks
/// the device copy stale; [`sync`](Self::sync) uploads only when it is.
pub struct MirroredValues<T: Scalar, D: Device> {
    host: Vec<T>,
    device: D::Buffer,
    stale: bool,
}

impl<T: Scalar, D: Device> MirroredValues<T, D> {
    /// Allocate `len` device elements and fill the host side with `fill`.
    /// The device copy starts stale.
    pub fn new(device: &mut D, len: usize, fill: T) -> EngineResult<Self> {
        let buffer = device.allocate(len * std::mem::size_of::<T>())?;
        Ok(Self {
            host: vec![fill; len],
            device: buffer,
            stale: true,
        })
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn host(&self) -> &[T] {
        &self.host
    }

    /// Host values for in-place mutation. Marks the device copy stale.
    pub fn host_mut(&mut self) -> &mut [T] {
        self.stale = true;
        &mut self.host
    }

    /// Force the next [`sync`](Self::sync) to upload. Needed when the host
    /// values may have been written through a pointer held since an earlier
    /// [`host_mut`](Self::host_mut).
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// True when the host side has edits the device has not seen.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.device
    }

    /// Upload the host values if stale. Returns the bytes moved.
    pub fn sync(&mut self, device: &mut D) -> EngineResult<usize> {
        if !self.stale {
            return Ok(0);
        }
        device.upload(&mut self.device, self.host.as_slice())?;
        self.stale = false;
        let bytes = std::mem::size_of_val(self.host.as_slice());
        log::trace!("staged {} values ({} bytes) to device", self.host.len(), bytes);
        Ok(bytes)
    }
}

/// Column-major dense multi-vector on the device with its descriptor.
pub struct DenseOperand<D: Device> {
    // Declared before `buffer` so the descriptor is destroyed first.
    matrix: D::Matrix,
    buffer: D::Buffer,
    desc: DenseDescriptor,
}

impl<D: Device> DenseOperand<D> {
    pub fn new(device: &mut D, rows: usize, cols: usize, value_type: DataType) -> EngineResult<Self> {
        let desc = DenseDescriptor::column_major(rows, cols, value_type);
        let buffer = device.allocate(desc.size_bytes())?;
        let matrix = device.create_dense(&desc, &buffer)?;
        Ok(Self {
            matrix,
            buffer,
            desc,
        })
    }

    pub fn rows(&self) -> usize {
        self.desc.rows
    }

    pub fn cols(&self) -> usize {
        self.desc.cols
    }

    pub fn matrix(&self) -> &D::Matrix {
        &self.matrix
    }

    /// Overwrite the whole operand from a column-major host slice.
    pub fn upload<T: Scalar>(&mut self, device: &mut D, values: &[T]) -> EngineResult<usize> {
        self.check_len(values.len(), "dense upload")?;
        device.upload(&mut self.buffer, values)?;
        let bytes = std::mem::size_of_val(values);
        log::trace!("uploaded {}x{} operand ({} bytes)", self.rows(), self.cols(), bytes);
        Ok(bytes)
    }

    /// Copy the whole operand into a column-major host slice.
    pub fn download<T: Scalar>(&self, device: &mut D, out: &mut [T]) -> EngineResult<usize> {
        self.check_len(out.len(), "dense download")?;
        device.download(out, &self.buffer)?;
        let bytes = std::mem::size_of_val(out);
        log::trace!("downloaded {}x{} operand ({} bytes)", self.rows(), self.cols(), bytes);
        Ok(bytes)
    }

    fn check_len(&self, actual: usize, context: &'static str) -> EngineResult<()> {
        let expected = self.desc.rows * self.desc.cols;
        if actual != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                actual,
                context,
            });
        }
        Ok(())
    }
}

/// Right-hand-side and solution operands of one batch width.
pub struct OperandPair<D: Device> {
    pub rhs: DenseOperand<D>,
    pub solution: DenseOperand<D>,
}

impl<D: Device> OperandPair<D> {
    pub fn new(device: &mut D, rows: usize, width: usize, value_type: DataType) -> EngineResult<Self> {
        // Solution first, matching the allocation order of structural setup.
        let solution = DenseOperand::new(device, rows, width, value_type)?;
        let rhs = DenseOperand::new(device, rows, width, value_type)?;
        Ok(Self { rhs, solution })
    }

    pub fn width(&self) -> usize {
        self.rhs.cols()
    }
}

/// Make `slot` hold operands of `width` columns.
///
/// The current pair is released before the replacement is allocated. Returns
/// whether a reallocation took place; on error the slot is left empty.
pub fn reconcile_width<D: Device>(
    slot: &mut Option<OperandPair<D>>,
    device: &mut D,
    rows: usize,
    width: usize,
    value_type: DataType,
) -> EngineResult<bool> {
    if slot.as_ref().map(OperandPair::width) == Some(width) {
        return Ok(false);
    }
    let previous = slot.take().map(|pair| pair.width());
    *slot = Some(OperandPair::new(device, rows, width, value_type)?);
    log::debug!(
        "resized right-hand-side operands from {:?} to {} columns",
        previous,
        width
    );
    Ok(true)
}
