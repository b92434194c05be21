//! Haar cascade face detector
//! Loads OpenCV-format boosted cascades and runs the multi-scale window scan
//!
//! The cascade file describes a fixed detection window (24x24 for the frontal
//! face model), a pool of Haar features (weighted rectangle sums), and a chain
//! of stages. Each stage is a set of small decision trees over those features;
//! a window is accepted only if every stage's summed tree output reaches that
//! stage's threshold.
//!
//! Scanning downsizes the image by `scale_factor` per level and slides the
//! window over every level:
//! - step 2 pixels while the scale is <= 2, step 1 after that
//! - features are normalized by the window's standard deviation, measured over
//!   the window shrunk by one pixel on each side
//! - hits are mapped back to original coordinates and clustered

use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops::FilterType, GrayImage};
use ndarray::Array2;
use serde::Deserialize;

use crate::face::{group_rectangles, FaceBox, Rect};

/// Similarity tolerance used when clustering raw hits.
const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Deserialize)]
struct StorageXml {
    cascade: CascadeXml,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CascadeXml {
    stage_type: String,
    feature_type: String,
    height: u32,
    width: u32,
    stages: ItemsXml<StageXml>,
    features: ItemsXml<FeatureXml>,
}

/// OpenCV storage writes anonymous sequence entries as `<_>` elements
#[derive(Debug, Deserialize)]
struct ItemsXml<T> {
    #[serde(rename = "_", default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageXml {
    stage_threshold: f64,
    weak_classifiers: ItemsXml<WeakXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeakXml {
    internal_nodes: String,
    leaf_values: String,
}

#[derive(Debug, Deserialize)]
struct FeatureXml {
    rects: ItemsXml<String>,
    #[serde(default)]
    tilted: Option<u8>,
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

/// Internal tree node; child indices `<= 0` point at leaf `-index`
#[derive(Debug, Clone)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    trees: Vec<Tree>,
}

/// A loaded boosted Haar cascade
#[derive(Debug, Clone)]
pub struct HaarCascade {
    width: usize,
    height: usize,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

/// Summed-area tables of pixel values and squared pixel values
struct IntegralImage {
    sum: Array2<f64>,
    sqsum: Array2<f64>,
}

impl IntegralImage {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let mut sum = Array2::<f64>::zeros((h + 1, w + 1));
        let mut sqsum = Array2::<f64>::zeros((h + 1, w + 1));

        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = img.get_pixel(x as u32, y as u32).0[0] as f64;
                row += v;
                row_sq += v * v;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row;
                sqsum[[y + 1, x + 1]] = sqsum[[y, x + 1]] + row_sq;
            }
        }

        Self { sum, sqsum }
    }

    fn area(table: &Array2<f64>, x: usize, y: usize, w: usize, h: usize) -> f64 {
        table[[y + h, x + w]] - table[[y, x + w]] - table[[y + h, x]] + table[[y, x]]
    }
}

fn parse_numbers<T: std::str::FromStr>(text: &str, what: &str) -> Result<Vec<T>> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|_| anyhow::anyhow!("invalid number {:?} in {}", tok, what))
        })
        .collect()
}

fn parse_rect(text: &str) -> Result<WeightedRect> {
    let values = parse_numbers::<f64>(text, "feature rect")?;
    let &[x, y, width, height, weight] = values.as_slice() else {
        anyhow::bail!("feature rect needs 5 values, got {:?}", text.trim());
    };
    if [x, y, width, height].iter().any(|v| *v < 0.0 || v.fract() != 0.0) {
        anyhow::bail!("feature rect has non-integer geometry {:?}", text.trim());
    }
    Ok(WeightedRect {
        x: x as usize,
        y: y as usize,
        width: width as usize,
        height: height as usize,
        weight,
    })
}

fn parse_tree(weak: &WeakXml, feature_count: usize) -> Result<Tree> {
    let raw = parse_numbers::<f64>(&weak.internal_nodes, "internalNodes")?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        anyhow::bail!("internalNodes must hold groups of 4 values, got {}", raw.len());
    }
    let leaves = parse_numbers::<f64>(&weak.leaf_values, "leafValues")?;

    let nodes: Vec<Node> = raw
        .chunks(4)
        .map(|c| Node {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();

    for (idx, node) in nodes.iter().enumerate() {
        if node.feature >= feature_count {
            anyhow::bail!(
                "tree references feature {} but only {} exist",
                node.feature,
                feature_count
            );
        }
        for child in [node.left, node.right] {
            // Children only point forward, so evaluation always terminates
            let valid = if child > 0 {
                (child as usize) > idx && (child as usize) < nodes.len()
            } else {
                ((-child) as usize) < leaves.len()
            };
            if !valid {
                anyhow::bail!("tree child index {} out of range", child);
            }
        }
    }

    Ok(Tree { nodes, leaves })
}

impl HaarCascade {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading cascade {}", path.display()))?;
        Self::from_xml(&raw).with_context(|| format!("parsing cascade {}", path.display()))
    }

    pub fn from_xml(raw: &str) -> Result<Self> {
        let storage: StorageXml = quick_xml::de::from_str(raw)?;
        let xml = storage.cascade;

        if xml.stage_type.trim() != "BOOST" {
            anyhow::bail!("unsupported stage type {:?}", xml.stage_type);
        }
        if xml.feature_type.trim() != "HAAR" {
            anyhow::bail!("unsupported feature type {:?}", xml.feature_type);
        }
        if xml.width <= 2 || xml.height <= 2 {
            anyhow::bail!("window {}x{} is too small", xml.width, xml.height);
        }
        let (width, height) = (xml.width as usize, xml.height as usize);

        let mut features = Vec::with_capacity(xml.features.items.len());
        for (idx, f) in xml.features.items.iter().enumerate() {
            if f.tilted.unwrap_or(0) != 0 {
                anyhow::bail!("feature {} is tilted, only upright features are supported", idx);
            }
            let rects = f
                .rects
                .items
                .iter()
                .map(|r| parse_rect(r))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("feature {}", idx))?;
            if let Some(r) = rects
                .iter()
                .find(|r| r.x + r.width > width || r.y + r.height > height)
            {
                anyhow::bail!("feature {} rect {:?} exceeds the window", idx, r);
            }
            features.push(HaarFeature { rects });
        }

        let mut stages = Vec::with_capacity(xml.stages.items.len());
        for (idx, s) in xml.stages.items.iter().enumerate() {
            let trees = s
                .weak_classifiers
                .items
                .iter()
                .map(|w| parse_tree(w, features.len()))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("stage {}", idx))?;
            stages.push(Stage {
                threshold: s.stage_threshold,
                trees,
            });
        }

        if stages.is_empty() {
            anyhow::bail!("cascade has no stages");
        }

        log::debug!(
            "loaded {}x{} cascade: {} stages, {} features",
            width,
            height,
            stages.len(),
            features.len()
        );

        Ok(Self {
            width,
            height,
            stages,
            features,
        })
    }

    pub fn window_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn feature_value(&self, ii: &IntegralImage, feature: usize, x: usize, y: usize) -> f64 {
        self.features[feature]
            .rects
            .iter()
            .map(|r| r.weight * IntegralImage::area(&ii.sum, x + r.x, y + r.y, r.width, r.height))
            .sum()
    }

    fn eval_tree(&self, tree: &Tree, ii: &IntegralImage, x: usize, y: usize, norm: f64) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &tree.nodes[idx];
            let value = self.feature_value(ii, node.feature, x, y);
            let next = if value < node.threshold * norm {
                node.left
            } else {
                node.right
            };
            if next <= 0 {
                return tree.leaves[(-next) as usize];
            }
            idx = next as usize;
        }
    }

    /// Run every stage on the window whose top-left corner is `(x, y)`
    fn window_passes(&self, ii: &IntegralImage, x: usize, y: usize) -> bool {
        let (nw, nh) = (self.width - 2, self.height - 2);
        let area = (nw * nh) as f64;
        let s = IntegralImage::area(&ii.sum, x + 1, y + 1, nw, nh);
        let sq = IntegralImage::area(&ii.sqsum, x + 1, y + 1, nw, nh);
        let variance = area * sq - s * s;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        self.stages.iter().all(|stage| {
            let total: f64 = stage
                .trees
                .iter()
                .map(|t| self.eval_tree(t, ii, x, y, norm))
                .sum();
            total >= stage.threshold
        })
    }

    /// Collect every accepted window across the image pyramid, before grouping
    pub fn scan(&self, gray: &GrayImage, scale_factor: f64) -> Vec<Rect> {
        let mut hits = Vec::new();
        if !(scale_factor > 1.0) {
            return hits;
        }

        let (img_w, img_h) = (gray.width() as f64, gray.height() as f64);
        let mut factor = 1.0f64;
        loop {
            let scaled_w = (img_w / factor).round() as usize;
            let scaled_h = (img_h / factor).round() as usize;
            if scaled_w < self.width || scaled_h < self.height {
                break;
            }
            let win_w = (self.width as f64 * factor).round() as i32;
            let win_h = (self.height as f64 * factor).round() as i32;

            let ii = if scaled_w == gray.width() as usize && scaled_h == gray.height() as usize {
                IntegralImage::new(gray)
            } else {
                let scaled =
                    image::imageops::resize(gray, scaled_w as u32, scaled_h as u32, FilterType::Triangle);
                IntegralImage::new(&scaled)
            };

            let step = if factor > 2.0 { 1 } else { 2 };
            for y in (0..=scaled_h - self.height).step_by(step) {
                for x in (0..=scaled_w - self.width).step_by(step) {
                    if self.window_passes(&ii, x, y) {
                        hits.push(Rect::new(
                            (x as f64 * factor).round() as i32,
                            (y as f64 * factor).round() as i32,
                            win_w,
                            win_h,
                        ));
                    }
                }
            }

            factor *= scale_factor;
        }

        hits
    }

    /// Scan the pyramid and merge overlapping hits into face boxes
    pub fn detect_multi_scale(
        &self,
        gray: &GrayImage,
        scale_factor: f64,
        min_neighbors: i32,
    ) -> Vec<FaceBox> {
        let hits = self.scan(gray, scale_factor);
        log::debug!("cascade scan produced {} raw windows", hits.len());

        group_rectangles(&hits, min_neighbors, GROUP_EPS)
            .into_iter()
            .filter(|r| r.x >= 0 && r.y >= 0 && r.width > 0 && r.height > 0)
            .map(|r| FaceBox::new(r.x as u32, r.y as u32, r.width as u32, r.height as u32))
            .collect()
    }

    /// Single-stage cascade that accepts every window
    #[cfg(test)]
    pub(crate) fn always_pass(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            stages: vec![Stage {
                threshold: -1.0,
                trees: vec![],
            }],
            features: vec![],
        }
    }
}
