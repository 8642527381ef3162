//! Spectral decision tree for per-pixel water classification.
//!
//! The tree is the CART water classifier of WOfS (N. Mueller, transcribed by
//! J. Sixsmith). It is kept as a node table keyed by the CART node numbers so
//! it can be audited against the published tree, and compiled once into a
//! dense index for evaluation.

use std::collections::{HashMap, VecDeque};

use ndarray::ArrayView1;
use num_traits::{AsPrimitive, Float};
use serde::{Deserialize, Serialize};

use crate::flags::{CLEAR_DRY, WATER};
use crate::types::{BandStack, Measurement, Reflectance, Wofl, WofsError, WofsResult};

/// Quantities tested by the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Band 1
    Blue,
    /// Band 3
    Red,
    /// Band 7
    Swir2,
    /// (swir1 - green) / (swir1 + green)
    Ndi52,
    /// (nir - red) / (nir + red)
    Ndi43,
    /// (swir2 - green) / (swir2 + green)
    Ndi72,
}

/// One row of the node table
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeNode {
    /// `feature <= threshold` goes to `le`, anything else (NaN included) to `gt`
    Split {
        id: u8,
        feature: Feature,
        threshold: f64,
        le: u8,
        gt: u8,
    },
    Leaf {
        id: u8,
        wet: bool,
    },
}

impl TreeNode {
    pub fn id(&self) -> u8 {
        match *self {
            TreeNode::Split { id, .. } | TreeNode::Leaf { id, .. } => id,
        }
    }
}

const fn split(id: u8, feature: Feature, threshold: f64, le: u8, gt: u8) -> TreeNode {
    TreeNode::Split {
        id,
        feature,
        threshold,
        le,
        gt,
    }
}

const fn wet(id: u8) -> TreeNode {
    TreeNode::Leaf { id, wet: true }
}

const fn dry(id: u8) -> TreeNode {
    TreeNode::Leaf { id, wet: false }
}

/// The WOfS water tree. Node 1 is the root.
pub const WOFS_TREE: &[TreeNode] = &[
    split(1, Feature::Ndi52, -0.01, 2, 21),
    split(2, Feature::Blue, 2083.5, 4, 3),
    dry(3),
    split(4, Feature::Swir2, 323.5, 5, 8),
    split(5, Feature::Ndi43, 0.61, 6, 7),
    wet(6),
    dry(7),
    split(8, Feature::Blue, 1400.5, 12, 9),
    split(9, Feature::Ndi43, -0.01, 10, 11),
    wet(10),
    dry(11),
    split(12, Feature::Ndi72, -0.23, 16, 13),
    split(13, Feature::Blue, 379.0, 14, 15),
    wet(14),
    dry(15),
    split(16, Feature::Ndi43, 0.22, 17, 18),
    wet(17),
    split(18, Feature::Blue, 473.0, 19, 20),
    wet(19),
    dry(20),
    split(21, Feature::Ndi52, 0.23, 22, 35),
    split(22, Feature::Blue, 334.5, 24, 23),
    dry(23),
    split(24, Feature::Ndi43, 0.54, 26, 25),
    dry(25),
    split(26, Feature::Ndi52, 0.12, 27, 28),
    wet(27),
    split(28, Feature::Red, 364.5, 29, 30),
    split(29, Feature::Blue, 129.5, 31, 32),
    split(30, Feature::Blue, 300.5, 33, 34),
    wet(31),
    dry(32),
    wet(33),
    dry(34),
    split(35, Feature::Ndi52, 0.34, 37, 36),
    dry(36),
    split(37, Feature::Blue, 249.5, 39, 38),
    dry(38),
    split(39, Feature::Ndi43, 0.45, 41, 40),
    dry(40),
    split(41, Feature::Red, 364.5, 43, 42),
    dry(42),
    split(43, Feature::Blue, 129.5, 44, 45),
    wet(44),
    dry(45),
];

/// Reflectance of one pixel in the tree's working precision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel<F> {
    pub blue: F,
    pub green: F,
    pub red: F,
    pub nir: F,
    pub swir1: F,
    pub swir2: F,
}

impl<F: Float> Pixel<F> {
    /// Band values in [`crate::types::SpectralBand::ALL`] order
    pub fn from_bands(values: [F; 6]) -> Self {
        Self {
            blue: values[0],
            green: values[1],
            red: values[2],
            nir: values[3],
            swir1: values[4],
            swir2: values[5],
        }
    }

    #[inline]
    pub fn feature(&self, feature: Feature) -> F {
        match feature {
            Feature::Blue => self.blue,
            Feature::Red => self.red,
            Feature::Swir2 => self.swir2,
            Feature::Ndi52 => ndi(self.swir1, self.green),
            Feature::Ndi43 => ndi(self.nir, self.red),
            Feature::Ndi72 => ndi(self.swir2, self.green),
        }
    }
}

#[inline]
fn ndi<F: Float>(a: F, b: F) -> F {
    (a - b) / (a + b)
}

#[derive(Debug, Clone)]
enum Node<F> {
    Split {
        feature: Feature,
        threshold: F,
        le: usize,
        gt: usize,
    },
    Leaf {
        wet: bool,
    },
}

/// A node table compiled into a dense, root-first index
#[derive(Debug, Clone)]
pub struct DecisionTree<F> {
    nodes: Vec<Node<F>>,
}

impl<F: Float> DecisionTree<F> {
    /// Compile a node table rooted at node 1.
    ///
    /// Fails when a child is missing, a node is referenced twice, a node is
    /// unreachable or a threshold is not representable in `F`.
    pub fn compile(table: &[TreeNode]) -> WofsResult<Self> {
        let mut by_id: HashMap<u8, &TreeNode> = HashMap::with_capacity(table.len());
        for node in table {
            if by_id.insert(node.id(), node).is_some() {
                return Err(WofsError::InvalidParameter(format!(
                    "Decision tree node {} is defined twice",
                    node.id()
                )));
            }
        }
        if !by_id.contains_key(&1) {
            return Err(WofsError::InvalidParameter(
                "Decision tree has no root node 1".to_string(),
            ));
        }

        // Breadth first from the root; index assignment doubles as a cycle check.
        let mut index: HashMap<u8, usize> = HashMap::with_capacity(table.len());
        let mut order: Vec<u8> = Vec::with_capacity(table.len());
        let mut queue = VecDeque::from([1u8]);
        index.insert(1, 0);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(TreeNode::Split { le, gt, .. }) = by_id.get(&id).copied() {
                for child in [*le, *gt] {
                    if !by_id.contains_key(&child) {
                        return Err(WofsError::InvalidParameter(format!(
                            "Decision tree node {} references missing child {}",
                            id, child
                        )));
                    }
                    if index.contains_key(&child) {
                        return Err(WofsError::InvalidParameter(format!(
                            "Decision tree node {} is reached twice",
                            child
                        )));
                    }
                    index.insert(child, index.len());
                    queue.push_back(child);
                }
            }
        }
        if order.len() != table.len() {
            return Err(WofsError::InvalidParameter(format!(
                "Decision tree has {} unreachable nodes",
                table.len() - order.len()
            )));
        }

        let mut nodes = Vec::with_capacity(order.len());
        for id in &order {
            let node = match by_id[id] {
                TreeNode::Split {
                    feature,
                    threshold,
                    le,
                    gt,
                    ..
                } => Node::Split {
                    feature: *feature,
                    threshold: F::from(*threshold).ok_or_else(|| {
                        WofsError::InvalidParameter(format!(
                            "Threshold {} of node {} is not representable",
                            threshold, id
                        ))
                    })?,
                    le: index[le],
                    gt: index[gt],
                },
                TreeNode::Leaf { wet, .. } => Node::Leaf { wet: *wet },
            };
            nodes.push(node);
        }

        Ok(Self { nodes })
    }

    /// Walk the tree for one pixel
    #[inline]
    pub fn predict(&self, pixel: &Pixel<F>) -> bool {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Split {
                    feature,
                    threshold,
                    le,
                    gt,
                } => {
                    i = if pixel.feature(*feature) <= *threshold {
                        *le
                    } else {
                        *gt
                    };
                }
                Node::Leaf { wet } => return *wet,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

/// Arithmetic used to evaluate the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// f32 throughout, matching the float32 reference product bit for bit
    #[default]
    Single,
    Double,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub precision: Precision,
}

#[derive(Debug, Clone)]
enum CompiledTree {
    Single(DecisionTree<f32>),
    Double(DecisionTree<f64>),
}

/// Water classifier producing the wet bit (128) per pixel
#[derive(Debug, Clone)]
pub struct WaterClassifier {
    config: ClassifierConfig,
    tree: CompiledTree,
}

impl WaterClassifier {
    pub fn new(config: ClassifierConfig) -> WofsResult<Self> {
        let tree = match config.precision {
            Precision::Single => CompiledTree::Single(DecisionTree::compile(WOFS_TREE)?),
            Precision::Double => CompiledTree::Double(DecisionTree::compile(WOFS_TREE)?),
        };
        Ok(Self { config, tree })
    }

    /// Single precision classifier
    pub fn standard() -> WofsResult<Self> {
        Self::new(ClassifierConfig::default())
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify every pixel of the stack: 128 where wet, 0 elsewhere.
    ///
    /// A pixel with any band at its no-data value is never wet.
    pub fn classify<T: Reflectance>(&self, stack: &BandStack<T>) -> WofsResult<Wofl> {
        log::info!(
            "Starting water classification of {:?} tile ({:?} precision)",
            stack.shape(),
            self.config.precision
        );
        let bands = stack.spectral_bands()?;

        let wofl = match &self.tree {
            CompiledTree::Single(tree) => classify_with(tree, &bands),
            CompiledTree::Double(tree) => classify_with(tree, &bands),
        };

        let wet = wofl.iter().filter(|&&v| v == WATER).count();
        log::debug!(
            "Classified {} of {} pixels as water",
            wet,
            wofl.len()
        );
        Ok(wofl)
    }
}

fn classify_with<T, F>(tree: &DecisionTree<F>, bands: &[&Measurement<T>; 6]) -> Wofl
where
    T: Reflectance + AsPrimitive<F>,
    F: Float + Send + Sync + 'static,
{
    let shape = bands[0].data.dim();
    super::fill_rows(shape, CLEAR_DRY, |r, mut row| {
        let band_rows: [ArrayView1<'_, T>; 6] = bands.map(|b| b.data.row(r));
        for c in 0..row.len() {
            let values = [
                band_rows[0][c],
                band_rows[1][c],
                band_rows[2][c],
                band_rows[3][c],
                band_rows[4][c],
                band_rows[5][c],
            ];
            if values
                .iter()
                .zip(bands.iter())
                .any(|(&v, band)| band.is_nodata(v))
            {
                continue;
            }
            let pixel = Pixel::from_bands(values.map(<T as AsPrimitive<F>>::as_));
            if tree.predict(&pixel) {
                row[c] = WATER;
            }
        }
    })
}

/// Classify with the default single precision tree
pub fn classify<T: Reflectance>(stack: &BandStack<T>) -> WofsResult<Wofl> {
    WaterClassifier::standard()?.classify(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoBox, SpectralBand};
    use ndarray::Array2;

    fn stack_from_pixels(pixels: &[[f32; 6]], nodata: f32) -> BandStack<f32> {
        let geobox = GeoBox::pixel_grid(1, pixels.len());
        let mut stack = BandStack::new(geobox);
        for (i, band) in SpectralBand::ALL.iter().enumerate() {
            let data = Array2::from_shape_fn((1, pixels.len()), |(_, c)| pixels[c][i]);
            stack.insert(band.name(), data, nodata).unwrap();
        }
        stack
    }

    fn predict(pixel: [f32; 6]) -> bool {
        let tree = DecisionTree::<f32>::compile(WOFS_TREE).unwrap();
        tree.predict(&Pixel::from_bands(pixel))
    }

    #[test]
    fn test_tree_compiles() {
        let tree = DecisionTree::<f32>::compile(WOFS_TREE).unwrap();
        assert_eq!(tree.len(), WOFS_TREE.len());
        assert_eq!(tree.leaf_count(), 23);
    }

    #[test]
    fn test_tree_validation() {
        let missing_child = [split(1, Feature::Blue, 10.0, 2, 3), wet(2)];
        assert!(DecisionTree::<f32>::compile(&missing_child).is_err());

        let shared_child = [split(1, Feature::Blue, 10.0, 2, 2), wet(2)];
        assert!(DecisionTree::<f32>::compile(&shared_child).is_err());

        let orphan = [split(1, Feature::Blue, 10.0, 2, 3), wet(2), dry(3), dry(4)];
        assert!(DecisionTree::<f32>::compile(&orphan).is_err());

        let no_root = [wet(2)];
        assert!(DecisionTree::<f32>::compile(&no_root).is_err());
    }

    #[test]
    fn test_open_water_is_wet() {
        // ndi52 < 0, dark blue, low swir2, ndi43 < 0.61: leaf 6
        assert!(predict([500.0, 600.0, 400.0, 200.0, 100.0, 50.0]));
    }

    #[test]
    fn test_bright_dry_surface() {
        // ndi52 > 0.34: leaf 36
        assert!(!predict([1200.0, 1300.0, 1500.0, 2500.0, 3000.0, 2500.0]));
    }

    #[test]
    fn test_deep_wet_leaf() {
        // ndi52 ~ 0.30, blue 100, red 300, ndi43 ~ 0.14: leaf 44
        assert!(predict([100.0, 1000.0, 300.0, 400.0, 1857.0, 900.0]));
        // Same path with blue above 129.5: leaf 45
        assert!(!predict([200.0, 1000.0, 300.0, 400.0, 1857.0, 900.0]));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(predict([2083.5, 600.0, 400.0, 200.0, 100.0, 50.0]));
        assert!(!predict([2083.6, 600.0, 400.0, 200.0, 100.0, 50.0]));
    }

    #[test]
    fn test_nan_ratio_takes_second_branch() {
        // All zero: every ratio is 0/0
        assert!(!predict([0.0; 6]));
    }

    #[test]
    fn test_classify_respects_nodata() {
        let stack = stack_from_pixels(
            &[
                [500.0, 600.0, 400.0, 200.0, 100.0, 50.0],
                [500.0, 600.0, 400.0, 200.0, -999.0, 50.0],
                [1200.0, 1300.0, 1500.0, 2500.0, 3000.0, 2500.0],
            ],
            -999.0,
        );
        let wofl = classify(&stack).unwrap();
        assert_eq!(wofl.row(0).to_vec(), vec![WATER, CLEAR_DRY, CLEAR_DRY]);
    }

    #[test]
    fn test_double_precision_agrees_on_typical_pixels() {
        let pixels = [
            [500.0, 600.0, 400.0, 200.0, 100.0, 50.0],
            [1200.0, 1300.0, 1500.0, 2500.0, 3000.0, 2500.0],
            [100.0, 1000.0, 300.0, 400.0, 1857.0, 900.0],
            [300.0, 500.0, 450.0, 900.0, 520.0, 400.0],
        ];
        let stack = stack_from_pixels(&pixels, -999.0);
        let single = WaterClassifier::standard().unwrap().classify(&stack).unwrap();
        let double = WaterClassifier::new(ClassifierConfig {
            precision: Precision::Double,
        })
        .unwrap()
        .classify(&stack)
        .unwrap();
        assert_eq!(single, double);
    }

    #[test]
    fn test_missing_band() {
        let stack = BandStack::<i16>::new(GeoBox::pixel_grid(2, 2))
            .with_band("blue", Array2::zeros((2, 2)), -999)
            .unwrap();
        let result = classify(&stack);
        assert!(matches!(result, Err(WofsError::MissingBand(_))));
    }
}
