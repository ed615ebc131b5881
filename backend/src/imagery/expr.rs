//! Lazy band-math expressions.
//!
//! An [`ImageExpr`] describes a raster the geospatial service computes on our
//! behalf: composites of filtered collections, external assets and per-pixel
//! arithmetic over them. Nothing is evaluated client side except by the
//! in-memory service, which walks the same tree one pixel at a time through
//! [`ImageExpr::evaluate`].

use serde::{Deserialize, Serialize};

use super::composite::CompositeSpec;

/// Band values of one pixel, in band order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pixel {
    bands: Vec<(String, f64)>,
}

impl Pixel {
    pub fn single(name: &str, value: f64) -> Self {
        Self {
            bands: vec![(name.to_string(), value)],
        }
    }

    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        let mut pixel = Self::default();
        for (name, value) in pairs {
            pixel.set(name, *value);
        }
        pixel
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.bands.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Set a band, replacing it in place if present.
    pub fn set(&mut self, name: &str, value: f64) {
        match self.bands.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.bands.push((name.to_string(), value)),
        }
    }

    pub fn first(&self) -> Option<f64> {
        self.bands.first().map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.bands.iter().map(|(n, v)| (n.as_str(), *v))
    }

    fn value_at(&self, i: usize) -> Option<f64> {
        self.bands.get(i).map(|(_, v)| *v)
    }

    fn map_values(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            bands: self.bands.into_iter().map(|(n, v)| (n, f(v))).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
}

impl BinaryOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        let truth = |x: bool| if x { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            }
            BinaryOp::Gt => truth(a > b),
            BinaryOp::Gte => truth(a >= b),
            BinaryOp::Lt => truth(a < b),
            BinaryOp::Lte => truth(a <= b),
            BinaryOp::And => truth(a != 0.0 && b != 0.0),
            BinaryOp::Or => truth(a != 0.0 || b != 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ImageExpr {
    /// Single band named `constant`.
    Constant { value: f64 },
    Composite { spec: Box<CompositeSpec> },
    /// The image currently being mapped over in a per-image reduction.
    Current,
    Asset { id: String, band: String },
    Select { input: Box<ImageExpr>, bands: Vec<String> },
    /// `(a - b) / (a + b)` as a single band named `nd`.
    NormalizedDifference { input: Box<ImageExpr>, a: String, b: String },
    Binary { op: BinaryOp, left: Box<ImageExpr>, right: Box<ImageExpr> },
    Not { input: Box<ImageExpr> },
    FocalMedian { input: Box<ImageExpr>, radius_m: f64 },
    Clamp { input: Box<ImageExpr>, min: f64, max: f64 },
    /// Replace `base` with `value` wherever `mask` is non-zero.
    Overlay { base: Box<ImageExpr>, mask: Box<ImageExpr>, value: Box<ImageExpr> },
    Rename { input: Box<ImageExpr>, names: Vec<String> },
    Stack { inputs: Vec<ImageExpr> },
    /// Map first-band values; unmatched values become masked.
    Remap { input: Box<ImageExpr>, from: Vec<f64>, to: Vec<f64> },
    UpdateMask { input: Box<ImageExpr>, mask: Box<ImageExpr> },
}

impl From<f64> for ImageExpr {
    fn from(value: f64) -> Self {
        ImageExpr::Constant { value }
    }
}

impl ImageExpr {
    pub fn constant(value: f64) -> Self {
        ImageExpr::Constant { value }
    }

    pub fn composite(spec: CompositeSpec) -> Self {
        ImageExpr::Composite {
            spec: Box::new(spec),
        }
    }

    pub fn asset(id: impl Into<String>, band: impl Into<String>) -> Self {
        ImageExpr::Asset {
            id: id.into(),
            band: band.into(),
        }
    }

    pub fn select(&self, bands: &[&str]) -> Self {
        ImageExpr::Select {
            input: Box::new(self.clone()),
            bands: bands.iter().map(|b| b.to_string()).collect(),
        }
    }

    pub fn normalized_difference(&self, a: &str, b: &str) -> Self {
        ImageExpr::NormalizedDifference {
            input: Box::new(self.clone()),
            a: a.to_string(),
            b: b.to_string(),
        }
    }

    fn binary(&self, op: BinaryOp, rhs: impl Into<ImageExpr>) -> Self {
        ImageExpr::Binary {
            op,
            left: Box::new(self.clone()),
            right: Box::new(rhs.into()),
        }
    }

    pub fn add(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn subtract(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Subtract, rhs)
    }

    pub fn multiply(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Multiply, rhs)
    }

    pub fn divide(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Divide, rhs)
    }

    pub fn gt(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn gte(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Gte, rhs)
    }

    pub fn lt(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn lte(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Lte, rhs)
    }

    pub fn and(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(&self, rhs: impl Into<ImageExpr>) -> Self {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn not(&self) -> Self {
        ImageExpr::Not {
            input: Box::new(self.clone()),
        }
    }

    pub fn focal_median(&self, radius_m: f64) -> Self {
        ImageExpr::FocalMedian {
            input: Box::new(self.clone()),
            radius_m,
        }
    }

    pub fn clamp(&self, min: f64, max: f64) -> Self {
        ImageExpr::Clamp {
            input: Box::new(self.clone()),
            min,
            max,
        }
    }

    pub fn overlay(&self, mask: ImageExpr, value: impl Into<ImageExpr>) -> Self {
        ImageExpr::Overlay {
            base: Box::new(self.clone()),
            mask: Box::new(mask),
            value: Box::new(value.into()),
        }
    }

    pub fn rename(&self, names: &[&str]) -> Self {
        ImageExpr::Rename {
            input: Box::new(self.clone()),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn stack(inputs: Vec<ImageExpr>) -> Self {
        ImageExpr::Stack { inputs }
    }

    pub fn remap(&self, from: Vec<f64>, to: Vec<f64>) -> Self {
        ImageExpr::Remap {
            input: Box::new(self.clone()),
            from,
            to,
        }
    }

    pub fn update_mask(&self, mask: ImageExpr) -> Self {
        ImageExpr::UpdateMask {
            input: Box::new(self.clone()),
            mask: Box::new(mask),
        }
    }

    /// Evaluate at one pixel. `None` means the pixel is masked.
    ///
    /// Neighbourhood operations are not modelled per pixel: a focal median
    /// returns its input unchanged.
    pub fn evaluate(&self, src: &dyn PixelSource) -> Option<Pixel> {
        match self {
            ImageExpr::Constant { value } => Some(Pixel::single("constant", *value)),
            ImageExpr::Composite { spec } => src.composite(spec),
            ImageExpr::Current => src.current(),
            ImageExpr::Asset { id, band } => src.asset(id, band).map(|v| Pixel::single(band, v)),
            ImageExpr::Select { input, bands } => {
                let pixel = input.evaluate(src)?;
                let mut out = Pixel::default();
                for band in bands {
                    out.set(band, pixel.get(band)?);
                }
                Some(out)
            }
            ImageExpr::NormalizedDifference { input, a, b } => {
                let pixel = input.evaluate(src)?;
                let (a, b) = (pixel.get(a)?, pixel.get(b)?);
                Some(Pixel::single("nd", BinaryOp::Divide.apply(a - b, a + b)))
            }
            ImageExpr::Binary { op, left, right } => {
                let l = left.evaluate(src)?;
                let r = right.evaluate(src)?;
                let mut out = Pixel::default();
                for (i, (name, lv)) in l.iter().enumerate() {
                    let rv = (if r.len() == 1 { r.first() } else { r.value_at(i) })?;
                    out.set(name, op.apply(lv, rv));
                }
                Some(out)
            }
            ImageExpr::Not { input } => Some(
                input
                    .evaluate(src)?
                    .map_values(|v| if v == 0.0 { 1.0 } else { 0.0 }),
            ),
            ImageExpr::FocalMedian { input, .. } => input.evaluate(src),
            ImageExpr::Clamp { input, min, max } => {
                Some(input.evaluate(src)?.map_values(|v| v.clamp(*min, *max)))
            }
            ImageExpr::Overlay { base, mask, value } => {
                let base = base.evaluate(src)?;
                let hit = mask.evaluate(src).and_then(|m| m.first()).unwrap_or(0.0) != 0.0;
                if !hit {
                    return Some(base);
                }
                let Some(value) = value.evaluate(src) else {
                    return Some(base);
                };
                let mut out = Pixel::default();
                for (i, (name, bv)) in base.iter().enumerate() {
                    let v = if value.len() == 1 {
                        value.first()
                    } else {
                        value.value_at(i)
                    };
                    out.set(name, v.unwrap_or(bv));
                }
                Some(out)
            }
            ImageExpr::Rename { input, names } => {
                let pixel = input.evaluate(src)?;
                let mut out = Pixel::default();
                for (i, (name, v)) in pixel.iter().enumerate() {
                    out.set(names.get(i).map(String::as_str).unwrap_or(name), v);
                }
                Some(out)
            }
            ImageExpr::Stack { inputs } => {
                let mut out = Pixel::default();
                for input in inputs {
                    for (name, v) in input.evaluate(src)?.iter() {
                        out.set(name, v);
                    }
                }
                Some(out)
            }
            ImageExpr::Remap { input, from, to } => {
                let pixel = input.evaluate(src)?;
                let (name, v) = pixel.iter().next()?;
                let idx = from.iter().position(|f| (f - v).abs() < 1e-9)?;
                Some(Pixel::single(name, *to.get(idx)?))
            }
            ImageExpr::UpdateMask { input, mask } => {
                let keep = mask.evaluate(src)?.first()? != 0.0;
                if keep {
                    input.evaluate(src)
                } else {
                    None
                }
            }
        }
    }
}

/// Where [`ImageExpr::evaluate`] reads collections, assets and the mapped image.
pub trait PixelSource {
    fn composite(&self, spec: &CompositeSpec) -> Option<Pixel>;
    fn current(&self) -> Option<Pixel>;
    fn asset(&self, id: &str, band: &str) -> Option<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        image: Option<Pixel>,
    }

    impl PixelSource for Fixed {
        fn composite(&self, _spec: &CompositeSpec) -> Option<Pixel> {
            self.image.clone()
        }
        fn current(&self) -> Option<Pixel> {
            self.image.clone()
        }
        fn asset(&self, _id: &str, _band: &str) -> Option<f64> {
            Some(35.0)
        }
    }

    fn src(pairs: &[(&str, f64)]) -> Fixed {
        Fixed {
            image: Some(Pixel::from_pairs(pairs)),
        }
    }

    #[test]
    fn test_normalized_difference_zero_denominator() {
        let expr = ImageExpr::Current.normalized_difference("B8", "B4");
        let out = expr.evaluate(&src(&[("B8", 0.0), ("B4", 0.0)])).unwrap();
        assert_eq!(out.get("nd"), Some(0.0));
    }

    #[test]
    fn test_divide_by_zero_is_zero() {
        let expr = ImageExpr::Current.select(&["B4"]).divide(0.0);
        let out = expr.evaluate(&src(&[("B4", 12.0)])).unwrap();
        assert_eq!(out.get("B4"), Some(0.0));
    }

    #[test]
    fn test_overlay_last_write_wins() {
        let ndvi = ImageExpr::Current.select(&["NDVI"]);
        let expr = ImageExpr::constant(6.0)
            .overlay(ndvi.gt(0.2), 1.0)
            .overlay(ndvi.gt(0.4), 2.0)
            .overlay(ndvi.gt(0.9), 3.0);
        let out = expr.evaluate(&src(&[("NDVI", 0.5)])).unwrap();
        assert_eq!(out.get("constant"), Some(2.0));
    }

    #[test]
    fn test_masked_input_propagates() {
        let empty = Fixed { image: None };
        assert!(ImageExpr::Current.select(&["B4"]).evaluate(&empty).is_none());
        assert_eq!(
            ImageExpr::constant(6.0)
                .overlay(ImageExpr::Current.select(&["B4"]).gt(0.0), 1.0)
                .evaluate(&empty)
                .unwrap()
                .first(),
            Some(6.0)
        );
    }

    #[test]
    fn test_remap_and_update_mask() {
        let cls = ImageExpr::Current.select(&["classification"]);
        let remapped = cls.remap(vec![4.0, 30.0], vec![4.0, 9.0]);
        assert_eq!(
            remapped.evaluate(&src(&[("classification", 30.0)])).unwrap().first(),
            Some(9.0)
        );
        assert!(remapped.evaluate(&src(&[("classification", 17.0)])).is_none());

        let masked = cls.update_mask(cls.gte(30.0));
        assert!(masked.evaluate(&src(&[("classification", 4.0)])).is_none());
    }

    #[test]
    fn test_stack_and_rename() {
        let expr = ImageExpr::stack(vec![
            ImageExpr::Current.normalized_difference("B8", "B4").rename(&["NDVI"]),
            ImageExpr::asset("canopy", "height"),
        ]);
        let out = expr.evaluate(&src(&[("B8", 3.0), ("B4", 1.0)])).unwrap();
        assert_eq!(out.get("NDVI"), Some(0.5));
        assert_eq!(out.get("height"), Some(35.0));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_serializes_with_node_tag() {
        let json = serde_json::to_value(ImageExpr::constant(1.0).gt(0.5)).unwrap();
        assert_eq!(json["node"], "binary");
        assert_eq!(json["op"], "gt");
        assert_eq!(json["left"]["node"], "constant");
    }
}
