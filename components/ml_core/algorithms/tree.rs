use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{
    params::{
        invalid, HyperParameters, FEATURE_SUBSET_STRATEGY, IMPURITY, MAX_DEPTH,
        MIN_SAMPLES_SPLIT, NUM_TREES, SEED,
    },
    Algorithm,
};
use crate::{dataset::Dataset, errors::ModelBuilderError};

/// Split criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Impurity {
    /// Regression: leaves predict the mean label.
    Variance,
    /// Classification: leaves predict the majority label.
    Gini,
}

impl Impurity {
    fn parse(raw: Option<&str>) -> Result<Self, ModelBuilderError> {
        match raw.map(|value| value.trim().to_ascii_lowercase()) {
            None => Ok(Self::Variance),
            Some(value) if value == "variance" => Ok(Self::Variance),
            Some(value) if value == "gini" => Ok(Self::Gini),
            Some(value) => Err(invalid(IMPURITY, &value, "expected `variance` or `gini`".into())),
        }
    }
}

/// Features examined at each split of a forest tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeatureSubset {
    All,
    Sqrt,
    OneThird,
}

impl FeatureSubset {
    fn parse(raw: Option<&str>) -> Result<Self, ModelBuilderError> {
        match raw.map(|value| value.trim().to_ascii_lowercase()) {
            None => Ok(Self::Sqrt),
            Some(value) if value == "all" => Ok(Self::All),
            Some(value) if value == "sqrt" || value == "auto" => Ok(Self::Sqrt),
            Some(value) if value == "onethird" => Ok(Self::OneThird),
            Some(value) => Err(invalid(
                FEATURE_SUBSET_STRATEGY,
                &value,
                "expected `all`, `sqrt` or `onethird`".into(),
            )),
        }
    }

    fn count(self, feature_dim: usize) -> usize {
        let count = match self {
            Self::All => feature_dim,
            Self::Sqrt => (feature_dim as f64).sqrt().ceil() as usize,
            Self::OneThird => (feature_dim as f64 / 3.0).ceil() as usize,
        };
        count.clamp(1, feature_dim.max(1)).min(feature_dim)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Self::Leaf { value } => return *value,
                Self::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = features.get(*feature).copied().unwrap_or(0.0);
                    node = if value <= *threshold { left } else { right };
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            Self::Leaf { .. } => 0,
            Self::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// CART decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeModel {
    root: Node,
    impurity: Impurity,
}

impl DecisionTreeModel {
    /// Predicts a single row.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.root.predict(features)
    }

    /// Longest root-to-leaf path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.root.depth()
    }
}

/// Bagged ensemble of decision trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    trees: Vec<DecisionTreeModel>,
    impurity: Impurity,
}

impl RandomForestModel {
    /// Number of trees.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Whether the forest has no trees.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Mean of tree outputs for regression, majority vote for classification.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> f64 {
        let votes: Vec<f64> = self.trees.iter().map(|tree| tree.predict(features)).collect();
        if votes.is_empty() {
            return 0.0;
        }
        match self.impurity {
            Impurity::Variance => votes.iter().sum::<f64>() / votes.len() as f64,
            Impurity::Gini => majority(&votes),
        }
    }
}

/// Most frequent value; ties go to the smallest.
fn majority(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(f64::total_cmp);
    let mut best = (sorted[0], 0_usize);
    let mut run = (sorted[0], 0_usize);
    for value in sorted {
        if value == run.0 {
            run.1 += 1;
        } else {
            run = (value, 1);
        }
        if run.1 > best.1 {
            best = run;
        }
    }
    best.0
}

/// Running label statistics for one side of a candidate split.
#[derive(Debug, Clone)]
enum Stats {
    Variance { count: f64, sum: f64, sum_sq: f64 },
    Gini { count: f64, per_class: Vec<f64> },
}

impl Stats {
    fn empty(impurity: Impurity, classes: usize) -> Self {
        match impurity {
            Impurity::Variance => Self::Variance {
                count: 0.0,
                sum: 0.0,
                sum_sq: 0.0,
            },
            Impurity::Gini => Self::Gini {
                count: 0.0,
                per_class: vec![0.0; classes],
            },
        }
    }

    fn update(&mut self, label: f64, class: usize, sign: f64) {
        match self {
            Self::Variance { count, sum, sum_sq } => {
                *count += sign;
                *sum += sign * label;
                *sum_sq += sign * label * label;
            }
            Self::Gini { count, per_class } => {
                *count += sign;
                per_class[class] += sign;
            }
        }
    }

    fn count(&self) -> f64 {
        match self {
            Self::Variance { count, .. } | Self::Gini { count, .. } => *count,
        }
    }

    fn impurity(&self) -> f64 {
        match self {
            Self::Variance { count, sum, sum_sq } if *count > 0.0 => {
                let mean = sum / count;
                (sum_sq / count - mean * mean).max(0.0)
            }
            Self::Gini { count, per_class } if *count > 0.0 => {
                1.0 - per_class.iter().map(|c| (c / count).powi(2)).sum::<f64>()
            }
            _ => 0.0,
        }
    }
}

struct TreeSettings {
    impurity: Impurity,
    max_depth: usize,
    min_samples_split: usize,
    subset: FeatureSubset,
}

struct Builder<'a> {
    data: &'a Dataset,
    classes: &'a [f64],
    class_of: Vec<usize>,
    feature_dim: usize,
    settings: &'a TreeSettings,
}

impl<'a> Builder<'a> {
    fn new(data: &'a Dataset, classes: &'a [f64], settings: &'a TreeSettings) -> Self {
        let class_of = data
            .points
            .iter()
            .map(|point| {
                classes
                    .binary_search_by(|probe| probe.total_cmp(&point.label))
                    .unwrap_or(0)
            })
            .collect();
        Self {
            data,
            classes,
            class_of,
            feature_dim: data.feature_dim(),
            settings,
        }
    }

    fn stats(&self, rows: &[usize]) -> Stats {
        let mut stats = Stats::empty(self.settings.impurity, self.classes.len());
        for &row in rows {
            stats.update(self.data.points[row].label, self.class_of[row], 1.0);
        }
        stats
    }

    fn leaf(&self, rows: &[usize]) -> Node {
        let value = match self.settings.impurity {
            Impurity::Variance => {
                rows.iter().map(|&row| self.data.points[row].label).sum::<f64>() / rows.len() as f64
            }
            Impurity::Gini => {
                let labels: Vec<f64> = rows.iter().map(|&row| self.data.points[row].label).collect();
                majority(&labels)
            }
        };
        Node::Leaf { value }
    }

    fn grow(&self, rows: &[usize], depth: usize, rng: &mut Option<StdRng>) -> Node {
        let parent = self.stats(rows);
        let parent_impurity = parent.impurity();
        if self.feature_dim == 0
            || depth >= self.settings.max_depth
            || rows.len() < self.settings.min_samples_split
            || parent_impurity <= 1e-12
        {
            return self.leaf(rows);
        }

        let features: Vec<usize> = match rng {
            Some(rng) => {
                let count = self.settings.subset.count(self.feature_dim);
                sample(rng, self.feature_dim, count).into_vec()
            }
            None => (0..self.feature_dim).collect(),
        };

        let Some((feature, threshold, score)) = self.best_split(rows, &features, &parent) else {
            return self.leaf(rows);
        };
        if score >= parent_impurity - 1e-12 {
            return self.leaf(rows);
        }

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&row| self.data.points[row].features[feature] <= threshold);
        Node::Split {
            feature,
            threshold,
            left: Box::new(self.grow(&left_rows, depth + 1, rng)),
            right: Box::new(self.grow(&right_rows, depth + 1, rng)),
        }
    }

    /// Lowest weighted child impurity over midpoint thresholds.
    fn best_split(&self, rows: &[usize], features: &[usize], parent: &Stats) -> Option<(usize, f64, f64)> {
        let total = rows.len() as f64;
        let mut best: Option<(usize, f64, f64)> = None;
        for &feature in features {
            let value = |row: usize| self.data.points[row].features[feature];
            let mut order = rows.to_vec();
            order.sort_by(|a, b| value(*a).total_cmp(&value(*b)));

            let mut left = Stats::empty(self.settings.impurity, self.classes.len());
            let mut right = parent.clone();
            for window in 0..order.len().saturating_sub(1) {
                let row = order[window];
                let label = self.data.points[row].label;
                left.update(label, self.class_of[row], 1.0);
                right.update(label, self.class_of[row], -1.0);
                let (current, next) = (value(row), value(order[window + 1]));
                if current == next {
                    continue;
                }
                let score = (left.count() * left.impurity() + right.count() * right.impurity()) / total;
                if best.map_or(true, |(_, _, best_score)| score < best_score) {
                    best = Some((feature, (current + next) / 2.0, score));
                }
            }
        }
        best
    }
}

fn settings(params: &HyperParameters) -> Result<TreeSettings, ModelBuilderError> {
    Ok(TreeSettings {
        impurity: Impurity::parse(params.get(IMPURITY))?,
        max_depth: params.parse_or(MAX_DEPTH, 5)?,
        min_samples_split: params.positive_usize(MIN_SAMPLES_SPLIT, 2)?,
        subset: FeatureSubset::parse(params.get(FEATURE_SUBSET_STRATEGY))?,
    })
}

fn distinct_labels(data: &Dataset) -> Vec<f64> {
    let mut labels = data.labels();
    labels.sort_by(f64::total_cmp);
    labels.dedup();
    labels
}

fn checked(algorithm: Algorithm, data: &Dataset) -> Result<(), ModelBuilderError> {
    data.validate()
        .map(|_| ())
        .map_err(|source| ModelBuilderError::Data {
            algorithm: algorithm.to_string(),
            source,
        })
}

/// Grows a single tree over every feature.
pub fn fit_tree(data: &Dataset, params: &HyperParameters) -> Result<DecisionTreeModel, ModelBuilderError> {
    checked(Algorithm::DecisionTree, data)?;
    let settings = settings(params)?;
    let classes = distinct_labels(data);
    let builder = Builder::new(data, &classes, &settings);
    let rows: Vec<usize> = (0..data.len()).collect();
    Ok(DecisionTreeModel {
        root: builder.grow(&rows, 0, &mut None),
        impurity: settings.impurity,
    })
}

/// Grows `Num_Trees` trees on bootstrap samples with per-split feature subsets.
pub fn fit_forest(data: &Dataset, params: &HyperParameters) -> Result<RandomForestModel, ModelBuilderError> {
    checked(Algorithm::RandomForest, data)?;
    let settings = settings(params)?;
    let num_trees = params.positive_usize(NUM_TREES, 10)?;
    let seed: u64 = params.parse_or(SEED, 42)?;
    let classes = distinct_labels(data);
    let builder = Builder::new(data, &classes, &settings);

    let mut trees = Vec::with_capacity(num_trees);
    for tree in 0..num_trees {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(tree as u64));
        let rows: Vec<usize> = (0..data.len())
            .map(|_| rng.gen_range(0..data.len()))
            .collect();
        let root = builder.grow(&rows, 0, &mut Some(rng));
        trees.push(DecisionTreeModel {
            root,
            impurity: settings.impurity,
        });
    }
    Ok(RandomForestModel {
        trees,
        impurity: settings.impurity,
    })
}
