//! Ranking curves over labeled scores

use crate::error::{PipelineError, PipelineResult};

/// One operating point of the precision-recall curve. Predictions are positive when
/// `score >= threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub true_positives: usize,
    pub false_positives: usize,
}

/// Precision-recall curve over the distinct scores, thresholds ascending (recall
/// non-increasing), followed by the terminal point `(precision 1, recall 0)` which has
/// no threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct PrCurve {
    pub points: Vec<CurvePoint>,
    pub positives: usize,
    pub negatives: usize,
}

/// Fail unless both classes are present; returns `(positives, negatives)`
pub fn check_label_diversity(labels: &[u8]) -> PipelineResult<(usize, usize)> {
    let positives = labels.iter().filter(|&&y| y == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(PipelineError::InsufficientLabelDiversity {
            positives,
            negatives,
        });
    }
    Ok((positives, negatives))
}

fn check_lengths(labels: &[u8], scores: &[f64]) -> PipelineResult<()> {
    if labels.len() != scores.len() {
        return Err(PipelineError::InvalidInput(format!(
            "{} labels for {} scores",
            labels.len(),
            scores.len()
        )));
    }
    Ok(())
}

impl PrCurve {
    pub fn compute(labels: &[u8], scores: &[f64]) -> PipelineResult<Self> {
        check_lengths(labels, scores)?;
        let (positives, negatives) = check_label_diversity(labels)?;

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        // Walk scores descending, emitting a point at the end of each run of equal scores
        let mut points = Vec::new();
        let (mut tp, mut fp) = (0usize, 0usize);
        for (pos, &idx) in order.iter().enumerate() {
            if labels[idx] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            let run_ends = order
                .get(pos + 1)
                .map_or(true, |&next| scores[next] != scores[idx]);
            if run_ends {
                points.push(CurvePoint {
                    threshold: scores[idx],
                    precision: tp as f64 / (tp + fp) as f64,
                    recall: tp as f64 / positives as f64,
                    true_positives: tp,
                    false_positives: fp,
                });
            }
        }
        points.reverse();

        Ok(Self {
            points,
            positives,
            negatives,
        })
    }

    /// Points with a threshold, i.e. excluding the terminal point
    pub fn operating_points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Trapezoidal area under precision as a function of recall, including the
    /// terminal point
    pub fn area(&self) -> f64 {
        let mut curve: Vec<(f64, f64)> = self.points.iter().map(|p| (p.recall, p.precision)).collect();
        curve.push((0.0, 1.0));
        curve
            .windows(2)
            .map(|w| (w[0].0 - w[1].0) * (w[0].1 + w[1].1) / 2.0)
            .sum()
    }
}

/// Area under the precision-recall curve
pub fn pr_auc(labels: &[u8], scores: &[f64]) -> PipelineResult<f64> {
    Ok(PrCurve::compute(labels, scores)?.area())
}

/// Area under the ROC curve via average ranks (ties count half)
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> PipelineResult<f64> {
    check_lengths(labels, scores)?;
    let (positives, negatives) = check_label_diversity(labels)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied block shares the mean rank
        let mean_rank = (start + end) as f64 / 2.0 + 1.0;
        let tied_positives = order[start..=end].iter().filter(|&&i| labels[i] == 1).count();
        positive_rank_sum += mean_rank * tied_positives as f64;
        start = end + 1;
    }

    let p = positives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_points() {
        let labels = [0, 0, 1, 1];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let curve = PrCurve::compute(&labels, &scores).unwrap();

        let thresholds: Vec<f64> = curve.points.iter().map(|p| p.threshold).collect();
        assert_eq!(thresholds, vec![0.1, 0.35, 0.4, 0.8]);
        let recalls: Vec<f64> = curve.points.iter().map(|p| p.recall).collect();
        assert_eq!(recalls, vec![1.0, 1.0, 0.5, 0.5]);
        let precisions: Vec<f64> = curve.points.iter().map(|p| p.precision).collect();
        assert_eq!(precisions, vec![0.5, 2.0 / 3.0, 0.5, 1.0]);
    }

    #[test]
    fn test_ties_collapse_to_one_point() {
        let labels = [0, 1, 1, 0];
        let scores = [0.5, 0.5, 0.9, 0.1];
        let curve = PrCurve::compute(&labels, &scores).unwrap();
        assert_eq!(curve.points.len(), 3);
        assert_eq!(curve.points[1].true_positives, 2);
        assert_eq!(curve.points[1].false_positives, 1);
    }

    #[test]
    fn test_perfect_ranking() {
        let labels = [0, 0, 1, 1];
        let scores = [0.1, 0.2, 0.8, 0.9];
        assert!((pr_auc(&labels, &scores).unwrap() - 1.0).abs() < 1e-12);
        assert!((roc_auc(&labels, &scores).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_areas() {
        let labels = [0, 0, 1, 1];
        let scores = [0.1, 0.4, 0.35, 0.8];
        assert!((roc_auc(&labels, &scores).unwrap() - 0.75).abs() < 1e-12);
        // trapezoids: (1,0.5)-(1,2/3) = 0, (1,2/3)-(0.5,0.5), (0.5,0.5)-(0.5,1) = 0, (0.5,1)-(0,1)
        let expected = 0.5 * (2.0 / 3.0 + 0.5) / 2.0 + 0.5 * 1.0;
        assert!((pr_auc(&labels, &scores).unwrap() - expected).abs() < 1e-12);

        // all scores tied
        assert!((roc_auc(&labels, &[0.5; 4]).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_rejected() {
        assert!(matches!(
            roc_auc(&[1, 1], &[0.2, 0.3]),
            Err(PipelineError::InsufficientLabelDiversity {
                positives: 2,
                negatives: 0
            })
        ));
        assert!(pr_auc(&[0, 0], &[0.2, 0.3]).is_err());
        assert!(matches!(
            pr_auc(&[0, 1], &[0.2]),
            Err(PipelineError::InvalidInput(_))
        ));
    }
}
