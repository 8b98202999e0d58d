//! Iteration geometry.

use super::{DeviceInfo, Status};
use crate::error::{Error, Result};
use smallvec::SmallVec;

pub(crate) type Extent = SmallVec<[usize; 3]>;

/// Iteration space of a kernel launch: offset, global and local extents of
/// 1 to 3 dimensions.
///
/// The range is forwarded to the device as given; the device validates it
/// when the launch is enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    offset: Extent,
    global: Extent,
    local: Option<Extent>,
}

impl NdRange {
    pub fn new(offset: &[usize], global: &[usize], local: Option<&[usize]>) -> Self {
        Self {
            offset: Extent::from_slice(offset),
            global: Extent::from_slice(global),
            local: local.map(Extent::from_slice),
        }
    }

    /// Zero offset, device-chosen work-group size.
    pub fn from_global(global: &[usize]) -> Self {
        let offset: Extent = global.iter().map(|_| 0).collect();
        Self {
            offset,
            global: Extent::from_slice(global),
            local: None,
        }
    }

    /// One-dimensional range of `global` items in groups of `local`.
    pub fn linear(global: usize, local: usize) -> Self {
        Self::new(&[0], &[global], Some(&[local]))
    }

    pub fn with_offset(mut self, offset: &[usize]) -> Self {
        self.offset = Extent::from_slice(offset);
        self
    }

    pub fn with_local(mut self, local: &[usize]) -> Self {
        self.local = Some(Extent::from_slice(local));
        self
    }

    pub fn dims(&self) -> usize {
        self.global.len()
    }

    pub fn offset(&self) -> &[usize] {
        &self.offset
    }

    pub fn global(&self) -> &[usize] {
        &self.global
    }

    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    /// Total number of work-items, saturating on overflow.
    pub fn work_items(&self) -> usize {
        self.global.iter().fold(1usize, |acc, &g| acc.saturating_mul(g))
    }
}

/// A validated launch geometry. Unused dimensions have extent 1 and offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub dims: usize,
    pub offset: [usize; 3],
    pub global: [usize; 3],
    pub local: [usize; 3],
}

impl Geometry {
    /// Check `range` against the device limits and pick a work-group size
    /// when none was requested.
    pub fn resolve(range: &NdRange, device: &DeviceInfo) -> Result<Self> {
        let dims = range.dims();
        let max_dims = device.max_work_item_dimensions as usize;

        if dims == 0 || dims > max_dims.min(3) {
            return Err(Error::submission(
                Status::InvalidWorkDimension,
                format!("work dimension {} outside 1..={}", dims, max_dims.min(3)),
            ));
        }
        if range.offset.len() != dims {
            return Err(Error::submission(
                Status::InvalidWorkDimension,
                format!("offset has {} dimensions, global has {}", range.offset.len(), dims),
            ));
        }
        if let Some(local) = &range.local {
            if local.len() != dims {
                return Err(Error::submission(
                    Status::InvalidWorkDimension,
                    format!("local size has {} dimensions, global has {}", local.len(), dims),
                ));
            }
        }

        let mut geometry = Geometry {
            dims,
            offset: [0; 3],
            global: [1; 3],
            local: [1; 3],
        };

        for d in 0..dims {
            let global = range.global[d];
            if global == 0 {
                return Err(Error::submission(
                    Status::InvalidGlobalWorkSize,
                    format!("global size is zero in dimension {}", d),
                ));
            }
            if range.offset[d].checked_add(global).is_none() {
                return Err(Error::submission(
                    Status::InvalidGlobalOffset,
                    format!(
                        "offset {} + global size {} overflows in dimension {}",
                        range.offset[d], global, d
                    ),
                ));
            }
            geometry.global[d] = global;
            geometry.offset[d] = range.offset[d];
        }

        match &range.local {
            Some(local) => {
                for d in 0..dims {
                    let l = local[d];
                    if l == 0 || geometry.global[d] % l != 0 {
                        return Err(Error::submission(
                            Status::InvalidWorkGroupSize,
                            format!(
                                "local size {} does not divide global size {} in dimension {}",
                                l, geometry.global[d], d
                            ),
                        ));
                    }
                    if l > device.max_work_item_sizes[d] {
                        return Err(Error::submission(
                            Status::InvalidWorkItemSize,
                            format!(
                                "local size {} exceeds max work-item size {} in dimension {}",
                                l, device.max_work_item_sizes[d], d
                            ),
                        ));
                    }
                    geometry.local[d] = l;
                }

                let volume = geometry.group_volume();
                if volume > device.max_work_group_size {
                    return Err(Error::submission(
                        Status::InvalidWorkGroupSize,
                        format!(
                            "work-group of {} items exceeds max work-group size {}",
                            volume, device.max_work_group_size
                        ),
                    ));
                }
            }
            None => geometry.local = default_local(&geometry.global, dims, device),
        }

        Ok(geometry)
    }

    pub fn group_volume(&self) -> usize {
        self.local.iter().product()
    }

    pub fn num_groups(&self) -> [usize; 3] {
        [
            self.global[0] / self.local[0],
            self.global[1] / self.local[1],
            self.global[2] / self.local[2],
        ]
    }

    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }
}

/// Largest divisor of each global extent that fits the per-dimension and
/// total work-group limits, filled from dimension 0.
fn default_local(global: &[usize; 3], dims: usize, device: &DeviceInfo) -> [usize; 3] {
    let mut local = [1; 3];
    let mut budget = device.max_work_group_size.max(1);

    for d in 0..dims {
        let cap = device.max_work_item_sizes[d].min(budget).max(1);
        let size = (1..=cap.min(global[d])).rev().find(|l| global[d] % l == 0).unwrap_or(1);
        local[d] = size;
        budget /= size;
    }

    local
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(range: NdRange) -> Result<Geometry> {
        Geometry::resolve(&range, &DeviceInfo::host())
    }

    fn status_of(range: NdRange) -> Option<Status> {
        resolve(range).unwrap_err().status()
    }

    #[test]
    fn test_linear_range() {
        let geometry = resolve(NdRange::linear(64, 16)).unwrap();
        assert_eq!(geometry.dims, 1);
        assert_eq!(geometry.global, [64, 1, 1]);
        assert_eq!(geometry.local, [16, 1, 1]);
        assert_eq!(geometry.num_groups(), [4, 1, 1]);
        assert_eq!(geometry.work_items(), 64);
    }

    #[test]
    fn test_offset_is_kept() {
        let range = NdRange::new(&[2, 3], &[4, 6], Some(&[2, 3]));
        let geometry = resolve(range).unwrap();
        assert_eq!(geometry.offset, [2, 3, 0]);
        assert_eq!(geometry.num_groups(), [2, 2, 1]);
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        assert_eq!(status_of(NdRange::new(&[], &[], None)), Some(Status::InvalidWorkDimension));
        assert_eq!(
            status_of(NdRange::new(&[0; 4], &[1; 4], None)),
            Some(Status::InvalidWorkDimension)
        );
        assert_eq!(
            status_of(NdRange::new(&[0], &[8, 8], None)),
            Some(Status::InvalidWorkDimension)
        );
        assert_eq!(
            status_of(NdRange::new(&[0, 0], &[8, 8], Some(&[2]))),
            Some(Status::InvalidWorkDimension)
        );
    }

    #[test]
    fn test_rejects_zero_global() {
        assert_eq!(status_of(NdRange::from_global(&[0])), Some(Status::InvalidGlobalWorkSize));
    }

    #[test]
    fn test_rejects_non_dividing_local() {
        assert_eq!(status_of(NdRange::linear(10, 3)), Some(Status::InvalidWorkGroupSize));
        assert_eq!(status_of(NdRange::linear(10, 0)), Some(Status::InvalidWorkGroupSize));
    }

    #[test]
    fn test_rejects_oversized_groups() {
        // dimension 2 allows at most 64
        assert_eq!(
            status_of(NdRange::new(&[0, 0, 0], &[1, 1, 128], Some(&[1, 1, 128]))),
            Some(Status::InvalidWorkItemSize)
        );
        assert_eq!(
            status_of(NdRange::new(&[0, 0], &[64, 64], Some(&[64, 32]))),
            Some(Status::InvalidWorkGroupSize)
        );
    }

    #[test]
    fn test_rejects_offset_overflow() {
        let range = NdRange::from_global(&[4]).with_offset(&[usize::MAX - 1]);
        assert_eq!(status_of(range), Some(Status::InvalidGlobalOffset));
    }

    #[test]
    fn test_default_local_fits_limits() {
        let device = DeviceInfo::host();
        let geometry = resolve(NdRange::from_global(&[3000, 7, 100])).unwrap();

        for d in 0..3 {
            assert_eq!(geometry.global[d] % geometry.local[d], 0);
            assert!(geometry.local[d] <= device.max_work_item_sizes[d]);
        }
        assert!(geometry.group_volume() <= device.max_work_group_size);
        assert_eq!(geometry.local[0], 1000);
    }
}
