//! NumPy `.npy` vector tables.
//!
//! Tables are read with `ndarray-npy` into a dense row-major `f32` matrix.
//! `f8` tables are narrowed to `f32` on load, and the `(0,)` shape numpy
//! writes for an empty table is accepted as a 0x0 matrix.

use ndarray::{Array1, Array2};
use ndarray_npy::{ReadNpyError, ReadNpyExt, ReadableElement};

/// Errors that can occur while decoding a `.npy` table.
#[derive(Debug, thiserror::Error)]
pub enum NpyError {
    #[error(transparent)]
    Read(#[from] ReadNpyError),

    #[error("unsupported shape ({0},), expected a 2-D matrix")]
    UnsupportedShape(usize),
}

/// A dense row-major `f32` matrix decoded from a `.npy` file.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

/// Decode a `.npy` byte buffer into a row-major `f32` matrix.
pub fn read_f32(bytes: &[u8]) -> Result<NpyMatrix, NpyError> {
    match read_table::<f32>(bytes) {
        Err(NpyError::Read(ReadNpyError::WrongDescriptor(_))) => {
            let (rows, cols, data) = read_table::<f64>(bytes)?;
            log::debug!("narrowing {rows}x{cols} float64 table to float32");
            Ok(NpyMatrix {
                rows,
                cols,
                data: data.into_iter().map(|v| v as f32).collect(),
            })
        }
        other => other.map(|(rows, cols, data)| NpyMatrix { rows, cols, data }),
    }
}

fn read_table<A: ReadableElement + Copy>(
    bytes: &[u8],
) -> Result<(usize, usize, Vec<A>), NpyError> {
    match Array2::<A>::read_npy(bytes) {
        Ok(array) => {
            let (rows, cols) = array.dim();
            Ok((rows, cols, into_row_major(array)))
        }
        // numpy writes an empty table as shape (0,)
        Err(ReadNpyError::WrongNdim(_, 1)) => {
            let array = Array1::<A>::read_npy(bytes)?;
            if array.is_empty() {
                Ok((0, 0, Vec::new()))
            } else {
                Err(NpyError::UnsupportedShape(array.len()))
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn into_row_major<A: Copy>(array: Array2<A>) -> Vec<A> {
    if array.is_standard_layout() {
        let (data, _) = array.into_raw_vec_and_offset();
        data
    } else {
        // fortran-ordered files
        array.iter().copied().collect()
    }
}

/// Encode a row-major `f32` matrix as a `.npy` buffer.
#[cfg(test)]
pub fn write_f32(rows: usize, cols: usize, data: &[f32]) -> Vec<u8> {
    use ndarray_npy::WriteNpyExt;

    let array = Array2::from_shape_vec((rows, cols), data.to_vec()).expect("rows * cols values");
    let mut out = Vec::new();
    array.write_npy(&mut out).expect("write to memory");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ShapeBuilder;
    use ndarray_npy::WriteNpyExt;

    fn encode<A: ndarray_npy::WritableElement, D: ndarray::Dimension>(
        array: &ndarray::Array<A, D>,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        array.write_npy(&mut out).unwrap();
        out
    }

    fn raw_npy(header: &str, payload: &[u8]) -> Vec<u8> {
        let mut header = header.to_string();
        header.push('\n');
        let mut out = Vec::new();
        out.extend_from_slice(b"\x93NUMPY");
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_written_file_is_readable() {
        let data = vec![1.0, -2.5, 3.25, f32::MIN_POSITIVE, 0.1, 7.0];
        let matrix = read_f32(&write_f32(2, 3, &data)).unwrap();
        assert_eq!((matrix.rows, matrix.cols), (2, 3));
        assert_eq!(matrix.data, data);
    }

    #[test]
    fn test_f64_is_narrowed() {
        let array = Array2::from_shape_vec((1, 2), vec![0.5f64, -1.0]).unwrap();
        let matrix = read_f32(&encode(&array)).unwrap();
        assert_eq!((matrix.rows, matrix.cols), (1, 2));
        assert_eq!(matrix.data, vec![0.5, -1.0]);
    }

    #[test]
    fn test_fortran_order_is_row_major() {
        // logical [[1, 2, 3], [4, 5, 6]] stored column by column
        let array =
            Array2::from_shape_vec((2, 3).f(), vec![1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        let matrix = read_f32(&encode(&array)).unwrap();
        assert_eq!(matrix.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_big_endian_f32() {
        let payload: Vec<u8> = [1.5f32, 2.0f32]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        let bytes = raw_npy(
            "{'descr': '>f4', 'fortran_order': False, 'shape': (2, 1), }",
            &payload,
        );

        let matrix = read_f32(&bytes).unwrap();
        assert_eq!(matrix.rows, 2);
        assert_eq!(matrix.data, vec![1.5, 2.0]);
    }

    #[test]
    fn test_empty_table_shape() {
        let empty = Array1::<f32>::from(Vec::new());
        let matrix = read_f32(&encode(&empty)).unwrap();
        assert_eq!((matrix.rows, matrix.cols), (0, 0));
        assert!(matrix.data.is_empty());
    }

    #[test]
    fn test_vector_rejected() {
        let vector = Array1::from(vec![1.0f32, 2.0]);
        assert!(matches!(
            read_f32(&encode(&vector)),
            Err(NpyError::UnsupportedShape(2))
        ));
    }

    #[test]
    fn test_three_dimensional_rejected() {
        let cube = ndarray::Array3::<f32>::zeros((1, 1, 1));
        assert!(matches!(read_f32(&encode(&cube)), Err(NpyError::Read(_))));
    }

    #[test]
    fn test_integer_dtype_rejected() {
        let ints = Array2::from_shape_vec((1, 1), vec![7i64]).unwrap();
        assert!(matches!(
            read_f32(&encode(&ints)),
            Err(NpyError::Read(ReadNpyError::WrongDescriptor(_)))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = write_f32(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(read_f32(&bytes), Err(NpyError::Read(_))));
    }

    #[test]
    fn test_not_an_npy_file() {
        assert!(matches!(read_f32(b"not an npy file"), Err(NpyError::Read(_))));
        assert!(matches!(read_f32(b""), Err(NpyError::Read(_))));
    }
}
