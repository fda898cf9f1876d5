use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A lens preset whose parameters replace the camera-recorded lens tags on export.
///
/// Lenses are created through [`LensDraft::build`], stored in a
/// [`LensCatalog`](crate::catalog::LensCatalog), and never mutated afterwards.
/// Every string accessor is derived on demand from the numeric fields.
///
/// # Example
///
/// ```rust
/// use raw_exif::lens::LensDraft;
///
/// let lens = LensDraft {
///     make: "Sigma".into(),
///     model: "Contemporary".into(),
///     focal_length: 50,
///     focal_length_min: 18,
///     focal_length_max: 50,
///     f_stop: 2.8,
///     f_stop_min: 2.8,
///     f_stop_max: 4.5,
/// }
/// .build()
/// .unwrap();
///
/// assert_eq!(lens.display_string(), "Sigma Contemporary 18-50mm f/2.8-4.5");
/// assert_eq!(lens.exif_focal_length_string(), "50.0 mm");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lens {
    pub make: String,
    pub model: String,
    /// Focal length the picture was taken at, in mm.
    pub focal_length: u32,
    pub focal_length_min: u32,
    pub focal_length_max: u32,
    /// Aperture the picture was taken at.
    pub f_stop: f64,
    pub f_stop_min: f64,
    pub f_stop_max: f64,
    pub id: Uuid,
}

/// Raw input from the add-lens form, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LensDraft {
    pub make: String,
    pub model: String,
    pub focal_length: i64,
    pub focal_length_min: i64,
    pub focal_length_max: i64,
    pub f_stop: f64,
    pub f_stop_min: f64,
    pub f_stop_max: f64,
}

impl LensDraft {
    /// Validate the draft and turn it into a [`Lens`] with a fresh identifier.
    ///
    /// Make and model are trimmed and must be non-empty; every numeric field
    /// must be strictly positive.
    pub fn build(self) -> Result<Lens> {
        let make = self.make.trim();
        let model = self.model.trim();
        if make.is_empty() {
            bail!("Lens make must not be empty");
        }
        if model.is_empty() {
            bail!("Lens model must not be empty");
        }

        let focal_length = positive_mm("focal length", self.focal_length)?;
        let focal_length_min = positive_mm("minimum focal length", self.focal_length_min)?;
        let focal_length_max = positive_mm("maximum focal length", self.focal_length_max)?;

        for (name, value) in [
            ("f-stop", self.f_stop),
            ("minimum f-stop", self.f_stop_min),
            ("maximum f-stop", self.f_stop_max),
        ] {
            if !value.is_finite() || value <= 0.0 {
                bail!("Lens {name} must be positive, got {value}");
            }
        }

        Ok(Lens {
            make: make.to_string(),
            model: model.to_string(),
            focal_length,
            focal_length_min,
            focal_length_max,
            f_stop: self.f_stop,
            f_stop_min: self.f_stop_min,
            f_stop_max: self.f_stop_max,
            id: Uuid::new_v4(),
        })
    }
}

fn positive_mm(name: &str, value: i64) -> Result<u32> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => bail!("Lens {name} must be a positive number of mm, got {value}"),
    }
}

/// Render a decimal the way the lens tables and EXIF strings expect:
/// integral values keep one fractional digit (`2.0`), others print as-is (`2.8`).
pub fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

impl Lens {
    /// `"50mm"`
    pub fn image_focal_length_string(&self) -> String {
        format!("{}mm", self.focal_length)
    }

    /// `"50.0 mm"`, the form exiftool accepts for `FocalLength`.
    pub fn exif_focal_length_string(&self) -> String {
        format!("{}.0 mm", self.focal_length)
    }

    /// 35mm-equivalent focal length, `focal_length × scale_factor` to one decimal.
    ///
    /// # Panics
    ///
    /// Panics if `scale_factor` is not a number. The value comes from the metadata
    /// reader, so a malformed one means that reader is broken.
    pub fn exif_focal_length_35_string(&self, scale_factor: &str) -> String {
        let scale: f64 = match scale_factor.trim().parse() {
            Ok(v) => v,
            Err(_) => panic!("Unknown scale factor {scale_factor:?}"),
        };
        format!("{:.1} mm", f64::from(self.focal_length) * scale)
    }

    /// `"18mm"` for primes, `"18-50mm"` for zooms.
    pub fn full_focal_length_string(&self) -> String {
        if self.focal_length_min == self.focal_length_max {
            format!("{}mm", self.focal_length_min)
        } else {
            format!("{}-{}mm", self.focal_length_min, self.focal_length_max)
        }
    }

    /// `"f/2.8"` for fixed apertures, `"f/2.8-4.5"` for variable ones.
    pub fn exif_f_stop_string(&self) -> String {
        if self.f_stop_min == self.f_stop_max {
            format!("f/{}", format_decimal(self.f_stop_min))
        } else {
            format!(
                "f/{}-{}",
                format_decimal(self.f_stop_min),
                format_decimal(self.f_stop_max)
            )
        }
    }

    pub fn f_stop_string(&self) -> String {
        format_decimal(self.f_stop)
    }

    /// `"f/2.8 - f/4.5"`
    pub fn f_stop_range_string(&self) -> String {
        format!(
            "f/{} - f/{}",
            format_decimal(self.f_stop_min),
            format_decimal(self.f_stop_max)
        )
    }

    /// Composite `LensInfo` value: `"18-50mm f/2.8-4.5"`.
    pub fn exif_info_string(&self) -> String {
        format!(
            "{} {}",
            self.full_focal_length_string(),
            self.exif_f_stop_string()
        )
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} {} {} {}",
            self.make,
            self.model,
            self.full_focal_length_string(),
            self.exif_f_stop_string()
        )
    }
}

#[cfg(test)]
pub(crate) fn test_lens(min: u32, max: u32, f_min: f64, f_max: f64) -> Lens {
    LensDraft {
        make: "Example".into(),
        model: "Zoom".into(),
        focal_length: i64::from(min),
        focal_length_min: i64::from(min),
        focal_length_max: i64::from(max),
        f_stop: f_min,
        f_stop_min: f_min,
        f_stop_max: f_max,
    }
    .build()
    .unwrap()
}
