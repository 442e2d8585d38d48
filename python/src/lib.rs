//! Python bindings for medj2k using PyO3.
//!
//! Thin marshalling layer only: bytes in, bytes out. All decoding lives in
//! the core crate.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyBytes;

/// Image information class.
#[pyclass]
#[derive(Clone)]
struct ImageInfo {
    #[pyo3(get)]
    width: u32,
    #[pyo3(get)]
    height: u32,
    #[pyo3(get)]
    components: u32,
    #[pyo3(get)]
    bits_per_sample: u32,
    #[pyo3(get)]
    is_signed: bool,
}

#[pymethods]
impl ImageInfo {
    fn __repr__(&self) -> String {
        format!(
            "ImageInfo(width={}, height={}, components={}, bits={}, signed={})",
            self.width, self.height, self.components, self.bits_per_sample, self.is_signed
        )
    }
}

/// Decode a JPEG 2000 codestream or JP2 file to raw pixels.
///
/// Args:
///     data: compressed bytes
///     nr_bytes: optional declared length of `data` (consistency check)
///
/// Returns:
///     Raw little-endian pixel data as bytes, row-major, components
///     interleaved.
#[pyfunction]
#[pyo3(signature = (data, nr_bytes=None))]
fn decode(py: Python<'_>, data: &[u8], nr_bytes: Option<usize>) -> PyResult<Py<PyBytes>> {
    let expected = nr_bytes.unwrap_or(data.len());
    let pixels = medj2k_core::decode(data, expected)
        .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?;
    Ok(PyBytes::new(py, &pixels.samples.to_le_bytes()).into())
}

/// Decode a file path to raw pixels.
#[pyfunction]
fn decode_file(py: Python<'_>, path: &str) -> PyResult<Py<PyBytes>> {
    let data = std::fs::read(path)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyIOError, _>(format!("{e}")))?;
    decode(py, &data, None)
}

/// Get image information without decoding pixel data.
#[pyfunction]
fn get_info(data: &[u8]) -> PyResult<ImageInfo> {
    let header =
        medj2k_core::probe(data).map_err(|e| PyErr::new::<PyValueError, _>(e.to_string()))?;
    let info = &header.components[0];
    Ok(ImageInfo {
        width: header.width - header.x_origin,
        height: header.height - header.y_origin,
        components: header.components.len() as u32,
        bits_per_sample: info.depth as u32,
        is_signed: info.is_signed,
    })
}

/// Return the decoder version as a (major, minor, patch) tuple.
#[pyfunction]
fn get_version() -> (u32, u32, u32) {
    medj2k_core::get_version()
}

#[pymodule]
fn medj2k(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode, m)?)?;
    m.add_function(wrap_pyfunction!(decode_file, m)?)?;
    m.add_function(wrap_pyfunction!(get_info, m)?)?;
    m.add_function(wrap_pyfunction!(get_version, m)?)?;
    m.add_class::<ImageInfo>()?;
    Ok(())
}
