//! NumPy `.npy` loading, widened to `f64`.

use std::path::Path;

use bridge_rlds_shared::{BridgeRldsError, Result};
use ndarray::ArrayD;
use ndarray_npy::{ReadNpyExt, ReadableElement};

/// Every `.npy` file starts with these bytes.
const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Whether `bytes` look like an `.npy` payload.
pub fn is_npy(bytes: &[u8]) -> bool {
    bytes.starts_with(NPY_MAGIC)
}

/// Read an `.npy` file of any supported numeric dtype as `f64`.
pub fn read_npy_f64(path: &Path) -> Result<ArrayD<f64>> {
    let bytes = std::fs::read(path).map_err(|e| BridgeRldsError::io(path, e))?;
    decode_npy(path, &bytes)
}

/// Decode `.npy` bytes. Float, signed, unsigned and bool element types are
/// widened to `f64` (`true` becomes `1.0`).
pub fn decode_npy(path: &Path, bytes: &[u8]) -> Result<ArrayD<f64>> {
    if !is_npy(bytes) {
        return Err(BridgeRldsError::decode(path, "not an .npy file (bad magic)"));
    }

    widen::<f64>(bytes, |v| v)
        .or_else(|| widen::<f32>(bytes, f64::from))
        .or_else(|| widen::<i64>(bytes, |v| v as f64))
        .or_else(|| widen::<i32>(bytes, f64::from))
        .or_else(|| widen::<i16>(bytes, f64::from))
        .or_else(|| widen::<i8>(bytes, f64::from))
        .or_else(|| widen::<u64>(bytes, |v| v as f64))
        .or_else(|| widen::<u32>(bytes, f64::from))
        .or_else(|| widen::<u16>(bytes, f64::from))
        .or_else(|| widen::<u8>(bytes, f64::from))
        .or_else(|| widen::<bool>(bytes, f64::from))
        .ok_or_else(|| {
            BridgeRldsError::decode(path, "unsupported array payload (not a numeric or bool dtype)")
        })
}

fn widen<T>(bytes: &[u8], to_f64: impl Fn(T) -> f64) -> Option<ArrayD<f64>>
where
    T: ReadableElement + Clone,
{
    ArrayD::<T>::read_npy(bytes).ok().map(|array| array.mapv(to_f64))
}
