//! Minimal NIfTI-1 volume reader.
//!
//! Reads just enough of the 348-byte header to get the montage generator a
//! voxel array: dimensions, datatype, data offset, either byte order, plain
//! or gzip-compressed files. Everything else in the header is ignored.

use crate::error::{ProcError, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;

const HEADER_LEN: usize = 348;
const DEFAULT_DATA_OFFSET: usize = 352;

// NIfTI-1 datatype codes
const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;

/// Voxel values, collapsed to the two representations the montage cares
/// about: u8 passes through untouched, everything else goes through f32 and
/// percentile windowing.
#[derive(Debug, Clone)]
pub enum VoxelData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl VoxelData {
    pub fn len(&self) -> usize {
        match self {
            VoxelData::U8(v) => v.len(),
            VoxelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory volumetric array, x fastest-varying.
#[derive(Debug, Clone)]
pub struct Volume {
    pub shape: Vec<usize>,
    pub data: VoxelData,
}

impl Volume {
    /// Read a `.nii` or `.nii.gz` file.
    pub fn read(path: &Path) -> Result<Volume> {
        let raw = std::fs::read(path)?;
        if raw.starts_with(&[0x1f, 0x8b]) {
            let mut decoded = Vec::new();
            GzDecoder::new(&raw[..]).read_to_end(&mut decoded)?;
            Self::parse(&decoded)
        } else {
            Self::parse(&raw)
        }
    }

    /// Parse an uncompressed NIfTI-1 byte stream.
    pub fn parse(bytes: &[u8]) -> Result<Volume> {
        if bytes.len() < HEADER_LEN {
            return Err(ProcError::Volume(format!(
                "truncated header: {} bytes",
                bytes.len()
            )));
        }

        // Byte order is detected from sizeof_hdr, which must read 348.
        let sizeof_le = i32::from_le_bytes(field::<4>(bytes, 0));
        let big_endian = if sizeof_le == HEADER_LEN as i32 {
            false
        } else if i32::from_be_bytes(field::<4>(bytes, 0)) == HEADER_LEN as i32 {
            true
        } else {
            return Err(ProcError::Volume(format!(
                "bad sizeof_hdr: {sizeof_le}"
            )));
        };

        let read_i16 = |off: usize| -> i16 {
            let b = field::<2>(bytes, off);
            if big_endian {
                i16::from_be_bytes(b)
            } else {
                i16::from_le_bytes(b)
            }
        };
        let read_f32 = |off: usize| -> f32 {
            let b = field::<4>(bytes, off);
            if big_endian {
                f32::from_be_bytes(b)
            } else {
                f32::from_le_bytes(b)
            }
        };

        let ndim = read_i16(40);
        if !(1..=7).contains(&ndim) {
            return Err(ProcError::Volume(format!("bad dim[0]: {ndim}")));
        }
        let mut shape = Vec::with_capacity(ndim as usize);
        for i in 1..=ndim as usize {
            let extent = read_i16(40 + 2 * i);
            if extent < 1 {
                return Err(ProcError::Volume(format!("bad dim[{i}]: {extent}")));
            }
            shape.push(extent as usize);
        }

        let datatype = read_i16(70);
        let vox_offset = read_f32(108);
        let offset = (vox_offset as usize).max(DEFAULT_DATA_OFFSET);

        let voxels: usize = shape.iter().product();
        let elem_size = match datatype {
            DT_UINT8 => 1,
            DT_INT16 => 2,
            DT_INT32 | DT_FLOAT32 => 4,
            DT_FLOAT64 => 8,
            other => {
                return Err(ProcError::Volume(format!(
                    "unsupported datatype code {other}"
                )))
            }
        };
        let end = offset + voxels * elem_size;
        if bytes.len() < end {
            return Err(ProcError::Volume(format!(
                "data truncated: need {end} bytes, have {}",
                bytes.len()
            )));
        }
        let body = &bytes[offset..end];

        let data = match datatype {
            DT_UINT8 => VoxelData::U8(body.to_vec()),
            DT_INT16 => VoxelData::F32(
                body.chunks_exact(2)
                    .map(|c| {
                        let b = [c[0], c[1]];
                        let v = if big_endian {
                            i16::from_be_bytes(b)
                        } else {
                            i16::from_le_bytes(b)
                        };
                        v as f32
                    })
                    .collect(),
            ),
            DT_INT32 => VoxelData::F32(
                body.chunks_exact(4)
                    .map(|c| {
                        let b = [c[0], c[1], c[2], c[3]];
                        let v = if big_endian {
                            i32::from_be_bytes(b)
                        } else {
                            i32::from_le_bytes(b)
                        };
                        v as f32
                    })
                    .collect(),
            ),
            DT_FLOAT32 => VoxelData::F32(
                body.chunks_exact(4)
                    .map(|c| {
                        let b = [c[0], c[1], c[2], c[3]];
                        if big_endian {
                            f32::from_be_bytes(b)
                        } else {
                            f32::from_le_bytes(b)
                        }
                    })
                    .collect(),
            ),
            DT_FLOAT64 => VoxelData::F32(
                body.chunks_exact(8)
                    .map(|c| {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(c);
                        let v = if big_endian {
                            f64::from_be_bytes(b)
                        } else {
                            f64::from_le_bytes(b)
                        };
                        v as f32
                    })
                    .collect(),
            ),
            _ => unreachable!(),
        };

        Ok(Volume { shape, data })
    }

    /// Number of 2-D slices when dims beyond the first two are flattened.
    pub fn num_slices(&self) -> usize {
        self.shape[2..].iter().product::<usize>().max(1)
    }
}

fn field<const N: usize>(bytes: &[u8], off: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[off..off + N]);
    out
}


#[cfg(test)]
mod tests {
    use super::test_support::synthesize;
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_parse_u8_little_endian() {
        let body: Vec<u8> = (0..24).collect();
        let bytes = synthesize(&[4, 3, 2], DT_UINT8, &body, false);
        let volume = Volume::parse(&bytes).unwrap();
        assert_eq!(volume.shape, vec![4, 3, 2]);
        assert_eq!(volume.num_slices(), 2);
        match volume.data {
            VoxelData::U8(data) => assert_eq!(data, body),
            other => panic!("expected u8 data, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_i16_big_endian() {
        let values: [i16; 4] = [-100, 0, 250, 32000];
        let mut body = Vec::new();
        for v in values {
            body.extend_from_slice(&v.to_be_bytes());
        }
        let bytes = synthesize(&[2, 2], DT_INT16, &body, true);
        let volume = Volume::parse(&bytes).unwrap();
        assert_eq!(volume.shape, vec![2, 2]);
        match volume.data {
            VoxelData::F32(data) => {
                assert_eq!(data, vec![-100.0, 0.0, 250.0, 32000.0]);
            }
            other => panic!("expected f32 data, got {other:?}"),
        }
    }

    #[test]
    fn test_read_gzip_round_trip() {
        let body: Vec<u8> = vec![9; 6];
        let bytes = synthesize(&[3, 2], DT_UINT8, &body, false);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).unwrap();
        let gz = encoder.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii.gz");
        std::fs::write(&path, gz).unwrap();

        let volume = Volume::read(&path).unwrap();
        assert_eq!(volume.shape, vec![3, 2]);
        assert_eq!(volume.data.len(), 6);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Volume::parse(&[0u8; 10]).is_err());
        let mut bytes = synthesize(&[2, 2], DT_UINT8, &[0; 4], false);
        bytes[0..4].copy_from_slice(&999i32.to_le_bytes());
        assert!(Volume::parse(&bytes).is_err());
    }

    #[test]
    fn test_rejects_truncated_data() {
        let bytes = synthesize(&[4, 4], DT_UINT8, &[1; 10], false);
        assert!(Volume::parse(&bytes).is_err());
    }

    #[test]
    fn test_rejects_unknown_datatype() {
        let bytes = synthesize(&[2, 2], 128, &[0; 16], false);
        assert!(matches!(
            Volume::parse(&bytes),
            Err(ProcError::Volume(msg)) if msg.contains("datatype")
        ));
    }
}
