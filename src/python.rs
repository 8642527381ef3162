//! Python bindings for the classifier, no-data normalisation and summary

use ndarray::Axis;
use numpy::{PyReadonlyArray3, PyReadwriteArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::core::{fix_nodata_to_single_value, summarise as summarise_wofls, SummaryConfig, WaterClassifier};
use crate::types::{BandStack, GeoBox, SpectralBand, WofsError};

impl From<WofsError> for PyErr {
    fn from(e: WofsError) -> Self {
        match e {
            WofsError::ShapeMismatch { .. }
            | WofsError::MissingBand(_)
            | WofsError::InvalidParameter(_)
            | WofsError::DsmNotAligned(_) => PyValueError::new_err(e.to_string()),
            _ => PyRuntimeError::new_err(e.to_string()),
        }
    }
}

/// Classify a (6, y, x) int16 band cube ordered blue, green, red, nir, swir1, swir2
#[pyfunction]
fn classify(py: Python, bands: PyReadonlyArray3<i16>, nodata: i16) -> PyResult<PyObject> {
    let cube = bands.as_array();
    let (count, rows, cols) = cube.dim();
    if count != SpectralBand::ALL.len() {
        return Err(PyValueError::new_err(format!(
            "Expected 6 bands on the first axis, got {}",
            count
        )));
    }

    let mut stack = BandStack::new(GeoBox::pixel_grid(rows, cols));
    for (i, band) in SpectralBand::ALL.iter().enumerate() {
        stack.insert(band.name(), cube.index_axis(Axis(0), i).to_owned(), nodata)?;
    }

    let wofl = py.allow_threads(|| WaterClassifier::standard()?.classify(&stack))?;
    Ok(wofl.to_pyarray(py).into())
}

/// Force every pixel with the no-data bit set to exactly 1, in place
#[pyfunction]
fn fix_nodata(mut wofl: PyReadwriteArray2<u8>) -> PyResult<()> {
    let mut view = wofl.as_array_mut();
    fix_nodata_to_single_value(&mut view);
    Ok(())
}

/// Summarise a (t, y, x) uint8 WOFL stack into (clear, wet, frequency)
#[pyfunction]
#[pyo3(signature = (wofls, dilation = 0))]
fn summarise(py: Python, wofls: PyReadonlyArray3<u8>, dilation: usize) -> PyResult<PyObject> {
    let stack = wofls.as_array();
    let (_, rows, cols) = stack.dim();
    let frames: Vec<_> = stack.axis_iter(Axis(0)).map(|frame| frame.to_owned()).collect();
    let config = SummaryConfig::default().with_dilation(dilation);

    let summary = py.allow_threads(|| summarise_wofls((rows, cols), &frames, &config))?;
    Ok((
        summary.clear_count.to_pyarray(py),
        summary.wet_count.to_pyarray(py),
        summary.frequency.to_pyarray(py),
    )
        .into_py(py))
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(classify, m)?)?;
    m.add_function(wrap_pyfunction!(fix_nodata, m)?)?;
    m.add_function(wrap_pyfunction!(summarise, m)?)?;
    Ok(())
}
