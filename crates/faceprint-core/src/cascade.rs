//! Boosted LBP cascade: resource parsing and per-window evaluation.
//!
//! Reads the OpenCV cascade XML layout (`<opencv_storage><cascade>`) for
//! `stageType BOOST` / `featureType LBP` cascades built from categorical
//! stumps, which is what `lbpcascade_frontalface.xml` ships as.

use crate::detector::DetectorError;
use image::GrayImage;
use ndarray::Array2;
use roxmltree::{Document, Node};
use std::str::FromStr;

/// Stage thresholds are loosened by this much on load, as the trainer expects.
const STAGE_THRESHOLD_EPS: f32 = 1e-5;
/// 256 categories packed into 32-bit words.
const SUBSET_WORDS: usize = 8;
/// `left right featureIdx` followed by the subset mask.
const STUMP_NODE_LEN: usize = 3 + SUBSET_WORDS;
const LBP_CATEGORIES: u32 = 256;

/// Neighbour blocks in bit order, as (column, row) in the 3×3 grid.
const NEIGHBOUR_BITS: [(u32, u32, u8); 8] = [
    (0, 0, 128),
    (1, 0, 64),
    (2, 0, 32),
    (2, 1, 16),
    (2, 2, 8),
    (1, 2, 4),
    (0, 2, 2),
    (0, 1, 1),
];

/// Summed-area table with a zero top row and left column.
pub struct IntegralImage {
    sums: Array2<u64>,
}

impl IntegralImage {
    pub fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let mut sums = Array2::<u64>::zeros((h + 1, w + 1));
        let data = gray.as_raw();
        for y in 0..h {
            let mut row_sum = 0u64;
            for x in 0..w {
                row_sum += data[y * w + x] as u64;
                sums[[y + 1, x + 1]] = sums[[y, x + 1]] + row_sum;
            }
        }
        Self { sums }
    }

    /// Sum of the `w`×`h` block whose top-left pixel is (`x`, `y`).
    pub fn block_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        self.sums[[y1, x1]] + self.sums[[y0, x0]] - self.sums[[y0, x1]] - self.sums[[y1, x0]]
    }
}

/// Multi-block LBP feature: a 3×3 grid of `block_w`×`block_h` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbpFeature {
    pub x: u32,
    pub y: u32,
    pub block_w: u32,
    pub block_h: u32,
}

impl LbpFeature {
    /// 8-bit code for the window at (`wx`, `wy`): a neighbour bit is set when
    /// its block sum is at least the centre block sum.
    pub fn code(&self, integral: &IntegralImage, wx: u32, wy: u32) -> u8 {
        let block = |col: u32, row: u32| {
            integral.block_sum(
                wx + self.x + col * self.block_w,
                wy + self.y + row * self.block_h,
                self.block_w,
                self.block_h,
            )
        };
        let centre = block(1, 1);
        NEIGHBOUR_BITS
            .iter()
            .fold(0u8, |code, &(col, row, bit)| {
                if block(col, row) >= centre {
                    code | bit
                } else {
                    code
                }
            })
    }
}

#[derive(Debug, Clone)]
struct Stump {
    feature: usize,
    subset: [u32; SUBSET_WORDS],
    leaves: [f32; 2],
}

impl Stump {
    fn vote(&self, code: u8) -> f32 {
        let c = code as usize;
        if self.subset[c >> 5] & (1 << (c & 31)) != 0 {
            self.leaves[0]
        } else {
            self.leaves[1]
        }
    }
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    stumps: Vec<Stump>,
}

/// A loaded cascade. Immutable after parsing.
#[derive(Debug, Clone)]
pub struct Cascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<LbpFeature>,
}

impl Cascade {
    /// Parse a cascade from OpenCV XML text.
    pub fn from_xml_str(text: &str) -> Result<Self, DetectorError> {
        let doc = Document::parse(text)?;
        let root = doc.root_element();
        let cascade = root
            .children()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| {
                DetectorError::Unsupported(
                    "no <cascade> element (legacy haar-classifier layout is not supported)".into(),
                )
            })?;

        let stage_type = child_text(cascade, "stageType")?.trim();
        if stage_type != "BOOST" {
            return Err(DetectorError::Unsupported(format!("stageType {stage_type}")));
        }
        let feature_type = child_text(cascade, "featureType")?.trim();
        if feature_type != "LBP" {
            return Err(DetectorError::Unsupported(format!("featureType {feature_type}")));
        }
        if let Some(params) = find_child(cascade, "featureParams") {
            if let Some(cats) = find_child(params, "maxCatCount") {
                let cats: u32 = parse_one(node_text(cats), "maxCatCount")?;
                if cats != LBP_CATEGORIES {
                    return Err(DetectorError::Unsupported(format!("maxCatCount {cats}")));
                }
            }
        }

        let window_width: u32 = parse_one(child_text(cascade, "width")?, "width")?;
        let window_height: u32 = parse_one(child_text(cascade, "height")?, "height")?;
        if window_width == 0 || window_height == 0 {
            return Err(DetectorError::InvalidCascade("zero window size".into()));
        }

        let features = items(child(cascade, "features")?)
            .enumerate()
            .map(|(i, node)| parse_feature(node, i, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = items(child(cascade, "stages")?)
            .enumerate()
            .map(|(i, node)| parse_stage(node, i, features.len()))
            .collect::<Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err(DetectorError::InvalidCascade("cascade has no stages".into()));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    /// Base detection window (`width`, `height`).
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Run every stage on the window at (`wx`, `wy`); `true` if none rejects it.
    pub fn classify(&self, integral: &IntegralImage, wx: u32, wy: u32) -> bool {
        self.stages.iter().all(|stage| {
            let sum: f32 = stage
                .stumps
                .iter()
                .map(|stump| stump.vote(self.features[stump.feature].code(integral, wx, wy)))
                .sum();
            sum >= stage.threshold
        })
    }
}

fn parse_feature(node: Node, index: usize, win_w: u32, win_h: u32) -> Result<LbpFeature, DetectorError> {
    let values: Vec<u32> = parse_list(child_text(node, "rect")?, "rect")?;
    let [x, y, block_w, block_h] = values[..] else {
        return Err(DetectorError::InvalidCascade(format!(
            "feature {index}: rect needs 4 values, got {}",
            values.len()
        )));
    };
    if block_w == 0 || block_h == 0 || x + 3 * block_w > win_w || y + 3 * block_h > win_h {
        return Err(DetectorError::InvalidCascade(format!(
            "feature {index}: rect {x} {y} {block_w} {block_h} does not fit the {win_w}x{win_h} window"
        )));
    }
    Ok(LbpFeature { x, y, block_w, block_h })
}

fn parse_stage(node: Node, index: usize, feature_count: usize) -> Result<Stage, DetectorError> {
    let threshold: f32 = parse_one(child_text(node, "stageThreshold")?, "stageThreshold")?;

    let stumps = items(child(node, "weakClassifiers")?)
        .map(|weak| {
            let nodes: Vec<i64> = parse_list(child_text(weak, "internalNodes")?, "internalNodes")?;
            if nodes.len() != STUMP_NODE_LEN {
                return Err(DetectorError::Unsupported(format!(
                    "stage {index}: only single-split stumps are supported ({} node values)",
                    nodes.len()
                )));
            }
            let feature = usize::try_from(nodes[2]).ok().filter(|&f| f < feature_count).ok_or_else(|| {
                DetectorError::InvalidCascade(format!("stage {index}: feature index {} out of range", nodes[2]))
            })?;
            let mut subset = [0u32; SUBSET_WORDS];
            for (word, &raw) in subset.iter_mut().zip(&nodes[3..]) {
                *word = raw as i32 as u32;
            }

            let leaves: Vec<f32> = parse_list(child_text(weak, "leafValues")?, "leafValues")?;
            let [pass, fail] = leaves[..] else {
                return Err(DetectorError::InvalidCascade(format!(
                    "stage {index}: stump needs 2 leaf values, got {}",
                    leaves.len()
                )));
            };
            Ok(Stump {
                feature,
                subset,
                leaves: [pass, fail],
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if stumps.is_empty() {
        return Err(DetectorError::InvalidCascade(format!("stage {index} has no weak classifiers")));
    }

    Ok(Stage {
        threshold: threshold - STAGE_THRESHOLD_EPS,
        stumps,
    })
}

fn items<'a, 'i>(node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(|n| n.is_element() && n.has_tag_name("_"))
}

fn find_child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Result<Node<'a, 'i>, DetectorError> {
    find_child(node, name).ok_or_else(|| DetectorError::InvalidCascade(format!("missing <{name}>")))
}

fn node_text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().unwrap_or("")
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, DetectorError> {
    child(node, name).map(node_text)
}

fn parse_one<T: FromStr>(text: &str, what: &str) -> Result<T, DetectorError> {
    text.trim()
        .parse()
        .map_err(|_| DetectorError::InvalidCascade(format!("bad <{what}> value: {:?}", text.trim())))
}

fn parse_list<T: FromStr>(text: &str, what: &str) -> Result<Vec<T>, DetectorError> {
    text.split_whitespace().map(|v| parse_one(v, what)).collect()
}
