//! Binary parameter-file reading.
//!
//! A model file is a little-endian container of named records: the magic
//! `"WVM1"`, a record count, then per record a length-prefixed name, the
//! number of dimensions, the dimensions and the `f32` payload. Everything is
//! read eagerly; a missing or misshapen record fails the whole load with a
//! typed error and no partially constructed classifier escapes.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info};
use thiserror::Error;

use crate::classifier::{
    ApproxFilter, QuickRejectClassifier, QuickRejectParams, RectValue, RefinementClassifier,
};
use crate::kernel::{Kernel, KernelKind, PolynomialKernel, RbfKernel};
use crate::math::Sigmoid;

/// `"WVM1"` as little-endian bytes.
const K_MAGIC: u32 = 0x314D_5657;

/// The RBF parameter is persisted for the 0-1 training domain; dividing by
/// 255^2 converts it to the 0-255 domain the classifiers evaluate in.
const K_BASIS_PARAM_SCALE: f32 = 65025.0;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file: {0}")]
    Io(#[from] io::Error),
    #[error("not a model parameter file (bad magic)")]
    BadMagic,
    #[error("missing required record `{0}`")]
    MissingRecord(&'static str),
    #[error("record `{name}` should have {expected} dimensions, found {actual}")]
    WrongDimensions {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("inconsistent model parameters: {0}")]
    Inconsistent(String),
}

struct Record {
    dims: Vec<usize>,
    data: Vec<f32>,
}

struct ModelReader {
    reader: Cursor<Vec<u8>>,
}

impl ModelReader {
    fn new(buf: Vec<u8>) -> Self {
        ModelReader {
            reader: Cursor::new(buf),
        }
    }

    fn read(mut self) -> Result<HashMap<String, Record>, ModelError> {
        if self.read_u32()? != K_MAGIC {
            return Err(ModelError::BadMagic);
        }

        let num_records = self.read_u32()? as usize;
        let mut records = HashMap::with_capacity(num_records);
        for _ in 0..num_records {
            let name = self.read_name()?;
            let ndims = self.read_u32()? as usize;
            let mut dims = Vec::with_capacity(ndims);
            for _ in 0..ndims {
                dims.push(self.read_u32()? as usize);
            }
            let len = dims.iter().product();
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                data.push(self.read_f32()?);
            }
            debug!("read record `{}` with dimensions {:?}", name, dims);
            records.insert(name, Record { dims, data });
        }

        Ok(records)
    }

    fn read_name(&mut self) -> Result<String, ModelError> {
        let len = self.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|_| ModelError::Inconsistent("record name is not valid UTF-8".into()))
    }

    fn read_u32(&mut self) -> Result<u32, ModelError> {
        Ok(self.reader.read_u32::<LittleEndian>()?)
    }

    fn read_f32(&mut self) -> Result<f32, ModelError> {
        Ok(self.reader.read_f32::<LittleEndian>()?)
    }
}

fn require<'a>(
    records: &'a HashMap<String, Record>,
    name: &'static str,
) -> Result<&'a Record, ModelError> {
    records.get(name).ok_or(ModelError::MissingRecord(name))
}

fn scalar(records: &HashMap<String, Record>, name: &'static str) -> Result<f32, ModelError> {
    let record = require(records, name)?;
    match record.data.as_slice() {
        [value] => Ok(*value),
        _ => Err(ModelError::Inconsistent(format!(
            "record `{}` should hold a single value",
            name
        ))),
    }
}

fn posterior(
    records: &HashMap<String, Record>,
    name: &'static str,
) -> Result<Sigmoid, ModelError> {
    match records.get(name) {
        None => Ok(Sigmoid::default()),
        Some(record) => match record.data.as_slice() {
            [a, b] => Ok(Sigmoid::new(*a, *b)),
            _ => Err(ModelError::Inconsistent(format!(
                "record `{}` should hold two values",
                name
            ))),
        },
    }
}

/// Scalar parameter record shared by both model kinds: bias, kernel type,
/// kernel parameter, polynomial degree and divisor.
struct NonlinearParams {
    bias: f32,
    kernel_kind: KernelKind,
    basis_param: f32,
    degree: i32,
    divisor: f32,
}

fn nonlinear_params(records: &HashMap<String, Record>) -> Result<NonlinearParams, ModelError> {
    let record = require(records, "param_nonlinear")?;
    match record.data.as_slice() {
        &[bias, kind, basis_param, degree, divisor] => {
            let kernel_kind = KernelKind::from(kind as i32).ok_or_else(|| {
                ModelError::Inconsistent(format!("unknown kernel type id {}", kind as i32))
            })?;
            Ok(NonlinearParams {
                bias,
                kernel_kind,
                basis_param: basis_param / K_BASIS_PARAM_SCALE,
                degree: degree as i32,
                divisor,
            })
        }
        _ => Err(ModelError::Inconsistent(
            "record `param_nonlinear` should hold five values".into(),
        )),
    }
}

fn make_kernel(params: &NonlinearParams) -> Box<dyn Kernel> {
    match params.kernel_kind {
        KernelKind::Rbf => Box::new(RbfKernel::new(params.basis_param)),
        KernelKind::Polynomial => Box::new(PolynomialKernel::new(params.degree, params.divisor)),
    }
}

/// Reads a 3-D `[height][width][count]` record into per-vector buffers,
/// reconstructing the 0-255 scale and converting the persisted x-outer,
/// y-inner element order to row-major.
fn read_vectors(
    records: &HashMap<String, Record>,
    name: &'static str,
) -> Result<(u32, u32, Vec<Vec<f32>>), ModelError> {
    let record = require(records, name)?;
    if record.dims.len() != 3 {
        return Err(ModelError::WrongDimensions {
            name,
            expected: 3,
            actual: record.dims.len(),
        });
    }
    let height = record.dims[0];
    let width = record.dims[1];
    let count = record.dims[2];
    if record.data.len() != height * width * count {
        return Err(ModelError::Inconsistent(format!(
            "record `{}` payload does not match its dimensions",
            name
        )));
    }

    let mut vectors = vec![vec![0f32; width * height]; count];
    let mut k = 0;
    for vector in vectors.iter_mut() {
        for x in 0..width {
            for y in 0..height {
                vector[y * width + x] = 255.0 * record.data[k];
                k += 1;
            }
        }
    }

    Ok((width as u32, height as u32, vectors))
}

fn build_refinement(
    records: &HashMap<String, Record>,
    limit_reliability: f32,
) -> Result<RefinementClassifier, ModelError> {
    let params = nonlinear_params(records)?;
    let (_, _, support_vectors) = read_vectors(records, "support_vectors")?;

    let weights = require(records, "sv_weights")?;
    if weights.dims.len() != 1 {
        return Err(ModelError::WrongDimensions {
            name: "sv_weights",
            expected: 1,
            actual: weights.dims.len(),
        });
    }
    if weights.data.len() != support_vectors.len() {
        return Err(ModelError::Inconsistent(format!(
            "{} support vectors but {} weights",
            support_vectors.len(),
            weights.data.len()
        )));
    }

    RefinementClassifier::new(
        support_vectors,
        weights.data.clone(),
        params.bias,
        limit_reliability,
        make_kernel(&params),
        posterior(records, "posterior_svm")?,
    )
}

fn read_approx(
    records: &HashMap<String, Record>,
    num_lin_filters: usize,
) -> Result<Option<Vec<ApproxFilter>>, ModelError> {
    let counts = records.get("approx_rect_counts");
    let rects = records.get("approx_rects");
    let convol = records.get("approx_convol");
    let (counts, rects, convol) = match (counts, rects, convol) {
        (None, None, None) => return Ok(None),
        (Some(c), Some(r), Some(v)) => (c, r, v),
        _ => {
            return Err(ModelError::Inconsistent(
                "approximate filter records must either all be present or all absent".into(),
            ))
        }
    };

    if counts.data.len() != num_lin_filters || convol.data.len() != num_lin_filters {
        return Err(ModelError::Inconsistent(
            "approximate filter records do not match the filter count".into(),
        ));
    }
    if rects.dims.len() != 2 {
        return Err(ModelError::WrongDimensions {
            name: "approx_rects",
            expected: 2,
            actual: rects.dims.len(),
        });
    }
    if rects.dims[1] != 5 {
        return Err(ModelError::Inconsistent(
            "approx_rects rows must hold x1, y1, x2, y2 and a gray value".into(),
        ));
    }
    let total: usize = counts.data.iter().map(|&c| c as usize).sum();
    if rects.dims[0] != total {
        return Err(ModelError::Inconsistent(format!(
            "approx_rects holds {} rectangles, counts sum to {}",
            rects.dims[0], total
        )));
    }

    let mut filters = Vec::with_capacity(num_lin_filters);
    let mut offset = 0;
    for (&count, &convol) in counts.data.iter().zip(&convol.data) {
        let count = count as usize;
        let mut filter_rects = Vec::with_capacity(count);
        for r in 0..count {
            let row = &rects.data[(offset + r) * 5..(offset + r) * 5 + 5];
            filter_rects.push(RectValue {
                x1: row[0] as u32,
                y1: row[1] as u32,
                x2: row[2] as u32,
                y2: row[3] as u32,
                value: row[4],
            });
        }
        offset += count;
        filters.push(ApproxFilter {
            rects: filter_rects,
            convol,
        });
    }

    Ok(Some(filters))
}

fn build_quick_reject(
    records: &HashMap<String, Record>,
    limit_reliability_filter: f32,
) -> Result<QuickRejectClassifier, ModelError> {
    let params = nonlinear_params(records)?;
    let num_levels = scalar(records, "num_levels")? as usize;
    let num_filters_per_level = scalar(records, "num_filters_per_level")? as usize;
    let num_used_filters = scalar(records, "num_used_filters")? as usize;
    let num_lin_filters = num_levels * num_filters_per_level;

    let (filter_width, filter_height, lin_filters) = read_vectors(records, "lin_filters")?;

    let hk = require(records, "hk_weights")?;
    if hk.dims.len() != 2 {
        return Err(ModelError::WrongDimensions {
            name: "hk_weights",
            expected: 2,
            actual: hk.dims.len(),
        });
    }
    if hk.dims[0] != num_lin_filters || hk.dims[1] != num_lin_filters {
        return Err(ModelError::Inconsistent(format!(
            "hk_weights should be {0}x{0}, found {1}x{2}",
            num_lin_filters, hk.dims[0], hk.dims[1]
        )));
    }
    // only the lower triangle is meaningful: level i weights kernels 0..=i
    let hk_weights = (0..num_lin_filters)
        .map(|i| hk.data[i * num_lin_filters..i * num_lin_filters + i + 1].to_vec())
        .collect();

    let thresholds = require(records, "hier_thresholds")?;
    if thresholds.dims.len() != 1 {
        return Err(ModelError::WrongDimensions {
            name: "hier_thresholds",
            expected: 1,
            actual: thresholds.dims.len(),
        });
    }

    QuickRejectClassifier::new(QuickRejectParams {
        filter_width,
        filter_height,
        basis_param: params.basis_param,
        num_levels,
        num_filters_per_level,
        num_used_filters,
        lin_filters,
        hk_weights,
        thresholds: thresholds.data.clone(),
        limit_reliability_filter,
        approx: read_approx(records, num_lin_filters)?,
        posterior: posterior(records, "posterior_wvm")?,
    })
}

/// Reads a refinement (SVM) model from a parameter buffer.
pub fn read_refinement_model(
    buf: Vec<u8>,
    limit_reliability: f32,
) -> Result<RefinementClassifier, ModelError> {
    let records = ModelReader::new(buf).read()?;
    let classifier = build_refinement(&records, limit_reliability)?;
    info!(
        "read refinement model with {} support vectors",
        classifier.num_support_vectors()
    );
    Ok(classifier)
}

/// Loads a refinement (SVM) model from a parameter file.
pub fn load_refinement_model(
    path: &str,
    limit_reliability: f32,
) -> Result<RefinementClassifier, ModelError> {
    info!("loading refinement model from {}", path);
    let mut buf = vec![];
    File::open(path)?.read_to_end(&mut buf)?;
    read_refinement_model(buf, limit_reliability)
}

/// Reads a quick-reject (WVM) model from a parameter buffer. The reliability
/// offset is folded into every hierarchical threshold up front.
pub fn read_quick_reject_model(
    buf: Vec<u8>,
    limit_reliability_filter: f32,
) -> Result<QuickRejectClassifier, ModelError> {
    let records = ModelReader::new(buf).read()?;
    let classifier = build_quick_reject(&records, limit_reliability_filter)?;
    info!(
        "read quick-reject model with {} levels of {} filters",
        classifier.num_levels(),
        classifier.num_filters_per_level()
    );
    Ok(classifier)
}

/// Loads a quick-reject (WVM) model from a parameter file.
pub fn load_quick_reject_model(
    path: &str,
    limit_reliability_filter: f32,
) -> Result<QuickRejectClassifier, ModelError> {
    info!("loading quick-reject model from {}", path);
    let mut buf = vec![];
    File::open(path)?.read_to_end(&mut buf)?;
    read_quick_reject_model(buf, limit_reliability_filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FeatureVector;
    use byteorder::WriteBytesExt;

    fn write_record(buf: &mut Vec<u8>, name: &str, dims: &[u32], data: &[f32]) {
        buf.write_u32::<LittleEndian>(name.len() as u32).unwrap();
        buf.extend_from_slice(name.as_bytes());
        buf.write_u32::<LittleEndian>(dims.len() as u32).unwrap();
        for &d in dims {
            buf.write_u32::<LittleEndian>(d).unwrap();
        }
        assert_eq!(data.len(), dims.iter().product::<u32>() as usize);
        for &v in data {
            buf.write_f32::<LittleEndian>(v).unwrap();
        }
    }

    fn container(records: &[(&str, &[u32], &[f32])]) -> Vec<u8> {
        let mut buf = vec![];
        buf.write_u32::<LittleEndian>(K_MAGIC).unwrap();
        buf.write_u32::<LittleEndian>(records.len() as u32).unwrap();
        for (name, dims, data) in records {
            write_record(&mut buf, name, dims, data);
        }
        buf
    }

    fn refinement_container() -> Vec<u8> {
        // one 2x2 support vector equal to [0.1, 0.2, 0.3, 0.4] in row-major
        // order, persisted x-outer / y-inner
        container(&[
            (
                "param_nonlinear",
                &[5],
                &[0.0, 0.0, K_BASIS_PARAM_SCALE, 0.0, 1.0],
            ),
            ("support_vectors", &[2, 2, 1], &[0.1, 0.3, 0.2, 0.4]),
            ("sv_weights", &[1], &[1.0]),
        ])
    }

    #[test]
    fn reads_refinement_model() {
        let svm = read_refinement_model(refinement_container(), 0.5).unwrap();
        assert_eq!(1, svm.num_support_vectors());
        assert_eq!(0.5, svm.limit_reliability());

        // the loaded support vector matches the row-major feature layout, so
        // the identical feature vector scores the kernel self-similarity of 1
        let fv = FeatureVector::new(vec![0.1, 0.2, 0.3, 0.4], 2, 2);
        assert!((svm.compute_hyperplane_distance(&fv) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = refinement_container();
        buf[0] = b'X';
        assert!(matches!(
            read_refinement_model(buf, 0.0),
            Err(ModelError::BadMagic)
        ));
    }

    #[test]
    fn rejects_missing_record() {
        let buf = container(&[(
            "param_nonlinear",
            &[5],
            &[0.0, 0.0, K_BASIS_PARAM_SCALE, 0.0, 1.0],
        )]);
        assert!(matches!(
            read_refinement_model(buf, 0.0),
            Err(ModelError::MissingRecord("support_vectors"))
        ));
    }

    #[test]
    fn rejects_two_dimensional_support_vectors() {
        let buf = container(&[
            (
                "param_nonlinear",
                &[5],
                &[0.0, 0.0, K_BASIS_PARAM_SCALE, 0.0, 1.0],
            ),
            ("support_vectors", &[2, 2], &[0.1, 0.3, 0.2, 0.4]),
            ("sv_weights", &[1], &[1.0]),
        ]);
        assert!(matches!(
            read_refinement_model(buf, 0.0),
            Err(ModelError::WrongDimensions {
                name: "support_vectors",
                expected: 3,
                actual: 2,
            })
        ));
    }

    #[test]
    fn rejects_unknown_kernel_kind() {
        let buf = container(&[
            ("param_nonlinear", &[5], &[0.0, 9.0, 1.0, 0.0, 1.0]),
            ("support_vectors", &[2, 2, 1], &[0.1, 0.3, 0.2, 0.4]),
            ("sv_weights", &[1], &[1.0]),
        ]);
        assert!(matches!(
            read_refinement_model(buf, 0.0),
            Err(ModelError::Inconsistent(_))
        ));
    }

    #[test]
    fn reads_quick_reject_model() {
        // 2 levels x 1 filter over a 2x2 window; filters are flat gray
        let buf = container(&[
            (
                "param_nonlinear",
                &[5],
                &[0.0, 0.0, K_BASIS_PARAM_SCALE, 0.0, 1.0],
            ),
            ("num_levels", &[1], &[2.0]),
            ("num_filters_per_level", &[1], &[1.0]),
            ("num_used_filters", &[1], &[0.0]),
            (
                "lin_filters",
                &[2, 2, 2],
                &[0.5, 0.5, 0.5, 0.5, 0.2, 0.2, 0.2, 0.2],
            ),
            ("hk_weights", &[2, 2], &[1.0, 0.0, 0.5, 0.5]),
            ("hier_thresholds", &[2], &[0.0, 0.0]),
        ]);
        let wvm = read_quick_reject_model(buf, 0.0).unwrap();
        assert_eq!(2, wvm.num_levels());
        assert_eq!(2, wvm.num_lin_filters());
        assert_eq!(0, wvm.num_used_filters());

        let fv = FeatureVector::new(vec![0.5; 4], 2, 2);
        let result = wvm.compute_hyperplane_distance(&fv);
        assert_eq!(1, result.level());
        assert!(wvm.classify_distance(result));
    }

    #[test]
    fn folds_reliability_offset_into_thresholds() {
        let buf = container(&[
            (
                "param_nonlinear",
                &[5],
                &[0.0, 0.0, K_BASIS_PARAM_SCALE, 0.0, 1.0],
            ),
            ("num_levels", &[1], &[1.0]),
            ("num_filters_per_level", &[1], &[1.0]),
            ("num_used_filters", &[1], &[0.0]),
            ("lin_filters", &[2, 2, 1], &[0.5, 0.5, 0.5, 0.5]),
            ("hk_weights", &[1, 1], &[1.0]),
            ("hier_thresholds", &[1], &[0.5]),
        ]);
        let fv = FeatureVector::new(vec![0.5; 4], 2, 2);

        let wvm = read_quick_reject_model(buf.clone(), 0.0).unwrap();
        assert!(wvm.classify(&fv));
        let strict = read_quick_reject_model(buf, 0.75).unwrap();
        assert!(!strict.classify(&fv));
    }

    #[test]
    fn rejects_partial_approx_records() {
        let buf = container(&[
            (
                "param_nonlinear",
                &[5],
                &[0.0, 0.0, K_BASIS_PARAM_SCALE, 0.0, 1.0],
            ),
            ("num_levels", &[1], &[1.0]),
            ("num_filters_per_level", &[1], &[1.0]),
            ("num_used_filters", &[1], &[0.0]),
            ("lin_filters", &[2, 2, 1], &[0.5, 0.5, 0.5, 0.5]),
            ("hk_weights", &[1, 1], &[1.0]),
            ("hier_thresholds", &[1], &[0.0]),
            ("approx_rect_counts", &[1], &[1.0]),
        ]);
        assert!(matches!(
            read_quick_reject_model(buf, 0.0),
            Err(ModelError::Inconsistent(_))
        ));
    }

    #[test]
    fn reads_approx_records() {
        let convol = 4.0 * 127.5 * 127.5;
        let buf = container(&[
            (
                "param_nonlinear",
                &[5],
                &[0.0, 0.0, 0.01 * K_BASIS_PARAM_SCALE, 0.0, 1.0],
            ),
            ("num_levels", &[1], &[1.0]),
            ("num_filters_per_level", &[1], &[1.0]),
            ("num_used_filters", &[1], &[0.0]),
            ("lin_filters", &[2, 2, 1], &[0.5, 0.5, 0.5, 0.5]),
            ("hk_weights", &[1, 1], &[1.0]),
            ("hier_thresholds", &[1], &[0.0]),
            ("approx_rect_counts", &[1], &[1.0]),
            ("approx_rects", &[1, 5], &[0.0, 0.0, 1.0, 1.0, 127.5]),
            ("approx_convol", &[1], &[convol]),
        ]);
        let wvm = read_quick_reject_model(buf, 0.0).unwrap();

        // flat filter is exactly representable by its one rectangle, so the
        // fast path reproduces the direct kernel evaluation
        let fv = FeatureVector::new(vec![0.5; 4], 2, 2);
        let distance = wvm.compute_hyperplane_distance(&fv).distance();
        assert!((distance - 1.0).abs() < 1e-4);
    }
}
