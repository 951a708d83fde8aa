use tracing::warn;

use crate::{Error, Result};

/// Excursions of the normalised dot product beyond [0, 1] smaller than this
/// are clamped silently; larger ones are clamped with a warning.
const CLAMP_WARN_BAND: f64 = 1e-4;

/// Something the tract caches can weigh against their byte budget.
pub trait ResidentSize {
    fn resident_size(&self) -> usize;
}

/// A vector-compacted probabilistic tractogram in float precision.
///
/// The flags track where the data is in its lifecycle: leaf and node files
/// store log-transformed, un-thresholded values; the dissimilarity metric
/// requires thresholded data with a materialised norm; averaging requires
/// natural units. Every mutation invalidates the cached norm.
#[derive(Debug, Clone)]
pub struct Tract {
    data: Vec<f32>,
    thresholded: bool,
    in_log_units: bool,
    norm: Option<f64>,
}

/// A tractogram in 8-bit precision with an implicit /255 scale, used for the
/// leaf tracts read from disk. Its norm is stored already divided by 255 so
/// that it is directly comparable with float norms.
#[derive(Debug, Clone)]
pub struct ByteTract {
    data: Vec<u8>,
    thresholded: bool,
    in_log_units: bool,
    norm: Option<f64>,
}

impl Tract {
    /// Wraps raw file data; tract files store log-transformed values.
    pub fn new(data: Vec<f32>) -> Tract {
        Tract { data, thresholded: false, in_log_units: true, norm: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn thresholded(&self) -> bool {
        self.thresholded
    }

    pub fn in_log_units(&self) -> bool {
        self.in_log_units
    }

    pub fn norm_ready(&self) -> bool {
        self.norm.is_some()
    }

    /// The cached norm, if one has been computed or attached.
    pub fn norm(&self) -> Option<f64> {
        self.norm
    }

    /// Attaches a precomputed norm.
    pub fn set_norm(&mut self, norm: f64) {
        self.norm = Some(norm);
    }

    /// Computes, caches and returns the L2 norm of the data.
    pub fn compute_norm(&mut self) -> Result<f64> {
        if !self.thresholded {
            return Err(precondition("compute_norm", "tract has not been thresholded"));
        }
        if !self.in_log_units {
            return Err(precondition("compute_norm", "tract is not in logarithmic units"));
        }
        let norm = l2_norm(self.data.iter().map(|&v| v as f64));
        self.norm = Some(norm);
        Ok(norm)
    }

    /// Zeroes every value below `threshold` and marks the tract thresholded.
    /// One-shot: re-thresholding is a programming error.
    pub fn threshold(&mut self, threshold: f32) -> Result<()> {
        if !self.in_log_units {
            return Err(precondition("threshold", "tract is not in logarithmic units"));
        }
        if self.thresholded {
            return Err(precondition("threshold", "tract has already been thresholded"));
        }
        if threshold != 0.0 {
            for value in &mut self.data {
                if *value < threshold {
                    *value = 0.0;
                }
            }
        }
        self.thresholded = true;
        self.norm = None;
        Ok(())
    }

    /// Switches the data from logarithmic to natural units: `10^(x * factor)`.
    /// A zero factor only toggles the unit flag.
    pub fn un_log(&mut self, factor: f32) -> Result<()> {
        if factor == 0.0 {
            self.in_log_units = false;
            return Ok(());
        }
        if self.thresholded {
            return Err(precondition("un_log", "tract has been thresholded"));
        }
        if !self.in_log_units {
            return Err(precondition("un_log", "tract is not in logarithmic units"));
        }
        for value in &mut self.data {
            *value = 10f32.powf(*value * factor);
        }
        self.in_log_units = false;
        self.norm = None;
        Ok(())
    }

    /// Switches the data from natural to logarithmic units: `log10(x) / factor`.
    pub fn do_log(&mut self, factor: f32) -> Result<()> {
        if factor == 0.0 {
            self.in_log_units = true;
            return Ok(());
        }
        if self.thresholded {
            return Err(precondition("do_log", "tract has been thresholded"));
        }
        if self.in_log_units {
            return Err(precondition("do_log", "tract is already in logarithmic units"));
        }
        for value in &mut self.data {
            *value = value.log10() / factor;
        }
        self.in_log_units = true;
        self.norm = None;
        Ok(())
    }

    /// Element-wise sum with another tract, both in natural units.
    pub fn add(&mut self, other: &Tract) -> Result<()> {
        if self.data.len() != other.data.len() {
            return Err(Error::TractLenMismatch { left: self.data.len(), right: other.data.len() });
        }
        if self.thresholded || other.thresholded {
            return Err(precondition("add", "one (or both) of the tracts has been thresholded"));
        }
        if self.in_log_units || other.in_log_units {
            return Err(precondition("add", "summing needs natural units on both sides"));
        }
        for (value, &rhs) in self.data.iter_mut().zip(&other.data) {
            *value += rhs;
        }
        self.norm = None;
        Ok(())
    }

    /// Multiplies every element by `coef`.
    pub fn scale(&mut self, coef: f32) {
        for value in &mut self.data {
            *value *= coef;
        }
        self.norm = None;
    }

    /// The size-weighted mean of two cluster tractograms:
    /// `(na*a + nb*b) / (na + nb)`, element-wise. Both inputs must be in
    /// natural units and un-thresholded; so is the result.
    pub fn join_average(a: &Tract, b: &Tract, na: u32, nb: u32) -> Result<Tract> {
        if a.data.len() != b.data.len() {
            return Err(Error::TractLenMismatch { left: a.data.len(), right: b.data.len() });
        }
        if a.thresholded || b.thresholded {
            return Err(precondition("join_average", "one (or both) of the tracts has been thresholded"));
        }
        if a.in_log_units || b.in_log_units {
            return Err(precondition("join_average", "one (or both) of the tracts is in logarithmic units"));
        }
        let (na, nb) = (na as f32, nb as f32);
        let total = na + nb;
        let data = a
            .data
            .iter()
            .zip(&b.data)
            .map(|(&va, &vb)| (va * na + vb * nb) / total)
            .collect();
        Ok(Tract { data, thresholded: false, in_log_units: false, norm: None })
    }

    /// Dissimilarity to another float tract: `1 - x.y / (|x| |y|)`.
    pub fn distance(&self, other: &Tract) -> Result<f64> {
        let (n1, n2) = check_metric_pair(
            self.data.len(),
            self.norm,
            self.thresholded,
            self.in_log_units,
            other.data.len(),
            other.norm,
            other.thresholded,
            other.in_log_units,
        )?;
        if n1 == 0.0 || n2 == 0.0 {
            warn!("at least one of the tractograms is a zero vector, their dissimilarity is 1");
            return Ok(1.0);
        }
        let dot: f64 =
            self.data.iter().zip(&other.data).map(|(&a, &b)| a as f64 * b as f64).sum();
        Ok(1.0 - clamp_unit(dot / (n1 * n2)))
    }

    /// Dissimilarity to a byte tract; byte lanes carry the implicit /255 scale.
    pub fn distance_to_bytes(&self, other: &ByteTract) -> Result<f64> {
        let (n1, n2) = check_metric_pair(
            self.data.len(),
            self.norm,
            self.thresholded,
            self.in_log_units,
            other.data.len(),
            other.norm,
            other.thresholded,
            other.in_log_units,
        )?;
        if n1 == 0.0 || n2 == 0.0 {
            warn!("at least one of the tractograms is a zero vector, their dissimilarity is 1");
            return Ok(1.0);
        }
        let dot: f64 =
            self.data.iter().zip(&other.data).map(|(&a, &b)| a as f64 * b as f64).sum();
        Ok(1.0 - clamp_unit(dot / 255.0 / (n1 * n2)))
    }
}

impl ByteTract {
    pub fn new(data: Vec<u8>) -> ByteTract {
        ByteTract { data, thresholded: false, in_log_units: true, norm: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn thresholded(&self) -> bool {
        self.thresholded
    }

    pub fn norm_ready(&self) -> bool {
        self.norm.is_some()
    }

    /// The cached norm, if one has been computed or attached.
    pub fn norm(&self) -> Option<f64> {
        self.norm
    }

    /// Attaches a precomputed norm (already on the /255 scale).
    pub fn set_norm(&mut self, norm: f64) {
        self.norm = Some(norm);
    }

    /// Computes, caches and returns the norm of the scaled data.
    pub fn compute_norm(&mut self) -> Result<f64> {
        if !self.thresholded {
            return Err(precondition("compute_norm", "tract has not been thresholded"));
        }
        if !self.in_log_units {
            return Err(precondition("compute_norm", "tract is not in logarithmic units"));
        }
        let norm = l2_norm(self.data.iter().map(|&v| v as f64)) / 255.0;
        self.norm = Some(norm);
        Ok(norm)
    }

    /// Zeroes every scaled value below `threshold`; one-shot like
    /// [`Tract::threshold`].
    pub fn threshold(&mut self, threshold: f32) -> Result<()> {
        if !self.in_log_units {
            return Err(precondition("threshold", "tract is not in logarithmic units"));
        }
        if self.thresholded {
            return Err(precondition("threshold", "tract has already been thresholded"));
        }
        if threshold != 0.0 {
            let cut = (threshold * 255.0) as u8;
            for value in &mut self.data {
                if *value < cut {
                    *value = 0;
                }
            }
        }
        self.thresholded = true;
        self.norm = None;
        Ok(())
    }

    /// Dissimilarity between two byte tracts.
    pub fn distance(&self, other: &ByteTract) -> Result<f64> {
        let (n1, n2) = check_metric_pair(
            self.data.len(),
            self.norm,
            self.thresholded,
            self.in_log_units,
            other.data.len(),
            other.norm,
            other.thresholded,
            other.in_log_units,
        )?;
        if n1 == 0.0 || n2 == 0.0 {
            warn!("at least one of the tractograms is a zero vector, their dissimilarity is 1");
            return Ok(1.0);
        }
        let dot: f64 =
            self.data.iter().zip(&other.data).map(|(&a, &b)| a as f64 * b as f64).sum();
        Ok(1.0 - clamp_unit(dot / (255.0 * 255.0) / (n1 * n2)))
    }
}

impl From<&ByteTract> for Tract {
    fn from(byte: &ByteTract) -> Tract {
        Tract {
            data: byte.data.iter().map(|&v| v as f32 / 255.0).collect(),
            thresholded: byte.thresholded,
            in_log_units: byte.in_log_units,
            norm: byte.norm,
        }
    }
}

impl ResidentSize for Tract {
    fn resident_size(&self) -> usize {
        std::mem::size_of::<Tract>() + self.data.len() * std::mem::size_of::<f32>()
    }
}

impl ResidentSize for ByteTract {
    fn resident_size(&self) -> usize {
        std::mem::size_of::<ByteTract>() + self.data.len()
    }
}

fn precondition(op: &'static str, reason: &'static str) -> Error {
    Error::TractPrecondition { op, reason }
}

fn l2_norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

#[allow(clippy::too_many_arguments)]
fn check_metric_pair(
    len1: usize,
    norm1: Option<f64>,
    thresholded1: bool,
    log1: bool,
    len2: usize,
    norm2: Option<f64>,
    thresholded2: bool,
    log2: bool,
) -> Result<(f64, f64)> {
    if len1 != len2 {
        return Err(Error::TractLenMismatch { left: len1, right: len2 });
    }
    let (Some(n1), Some(n2)) = (norm1, norm2) else {
        return Err(precondition(
            "distance",
            "one (or both) of the tracts has no precomputed norm",
        ));
    };
    if !thresholded1 || !thresholded2 {
        return Err(precondition("distance", "one (or both) of the tracts has not been thresholded"));
    }
    if !log1 || !log2 {
        return Err(precondition("distance", "one (or both) of the tracts is not in logarithmic units"));
    }
    Ok((n1, n2))
}

/// Clamps the normalised dot product into [0, 1]; mild rounding excursions
/// are silent, anything larger is reported.
fn clamp_unit(dot: f64) -> f64 {
    if dot < 0.0 {
        if dot < -CLAMP_WARN_BAND {
            warn!(dot, "negative normalised dot product, clamping to 0");
        }
        0.0
    } else if dot > 1.0 {
        if dot > 1.0 + CLAMP_WARN_BAND {
            warn!(dot, "normalised dot product above one, clamping to 1");
        }
        1.0
    } else {
        dot
    }
}
