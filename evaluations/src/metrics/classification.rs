use std::collections::BTreeMap;

use common::{error::AppError, storage::types::nli_label::NliLabel};
use serde::{ser::SerializeMap, Serialize, Serializer};

use super::ranking::{harmonic_mean, ratio};

/// Counts of gold label (row) against predicted label (column).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: [[usize; 3]; 3],
}

impl ConfusionMatrix {
    pub fn from_pairs(pairs: &[(NliLabel, NliLabel)]) -> Self {
        let mut matrix = Self::default();
        for &(gold, predicted) in pairs {
            matrix.record(gold, predicted);
        }
        matrix
    }

    pub fn record(&mut self, gold: NliLabel, predicted: NliLabel) {
        if let Some(cell) = self
            .counts
            .get_mut(gold.index())
            .and_then(|row| row.get_mut(predicted.index()))
        {
            *cell += 1;
        }
    }

    pub fn count(&self, gold: NliLabel, predicted: NliLabel) -> usize {
        self.counts
            .get(gold.index())
            .and_then(|row| row.get(predicted.index()))
            .copied()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        NliLabel::ALL
            .iter()
            .map(|label| self.count(*label, *label))
            .sum()
    }

    /// Pairs whose gold label is `label`.
    pub fn gold_total(&self, label: NliLabel) -> usize {
        NliLabel::ALL
            .iter()
            .map(|predicted| self.count(label, *predicted))
            .sum()
    }

    /// Pairs predicted as `label`.
    pub fn predicted_total(&self, label: NliLabel) -> usize {
        NliLabel::ALL.iter().map(|gold| self.count(*gold, label)).sum()
    }

    /// Overall accuracy. Zero predictions is an error rather than 0 or NaN.
    pub fn accuracy(&self) -> Result<f64, AppError> {
        let total = self.total();
        if total == 0 {
            return Err(AppError::EmptyInput(
                "accuracy requires at least one prediction".into(),
            ));
        }
        Ok(ratio(self.correct(), total))
    }
}

impl Serialize for ConfusionMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NliLabel::ALL.len()))?;
        for gold in NliLabel::ALL {
            let row: BTreeMap<NliLabel, usize> = NliLabel::ALL
                .iter()
                .map(|predicted| (*predicted, self.count(gold, *predicted)))
                .collect();
            map.serialize_entry(&gold, &row)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Averages {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationReport {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub per_class: BTreeMap<NliLabel, ClassMetrics>,
    pub macro_avg: Averages,
    /// Pooled over classes; equals accuracy for single-label predictions.
    pub micro_avg: Averages,
    pub confusion: ConfusionMatrix,
    pub gold_distribution: BTreeMap<NliLabel, usize>,
    pub predicted_distribution: BTreeMap<NliLabel, usize>,
}

impl ClassificationReport {
    pub fn from_pairs(pairs: &[(NliLabel, NliLabel)]) -> Result<Self, AppError> {
        Self::from_matrix(ConfusionMatrix::from_pairs(pairs))
    }

    pub fn from_matrix(confusion: ConfusionMatrix) -> Result<Self, AppError> {
        let accuracy = confusion.accuracy()?;
        let total = confusion.total();
        let correct = confusion.correct();

        let per_class: BTreeMap<NliLabel, ClassMetrics> = NliLabel::ALL
            .iter()
            .map(|&label| {
                let tp = confusion.count(label, label);
                let predicted = confusion.predicted_total(label);
                let support = confusion.gold_total(label);
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                (
                    label,
                    ClassMetrics {
                        precision,
                        recall,
                        f1: harmonic_mean(precision, recall),
                        support,
                    },
                )
            })
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let classes = per_class.len() as f64;
        let macro_avg = Averages {
            precision: per_class.values().map(|m| m.precision).sum::<f64>() / classes,
            recall: per_class.values().map(|m| m.recall).sum::<f64>() / classes,
            f1: per_class.values().map(|m| m.f1).sum::<f64>() / classes,
        };

        // Every wrong prediction is one false positive for the predicted class
        // and one false negative for the gold class.
        let pooled_tp = correct;
        let pooled_fp = total.saturating_sub(correct);
        let pooled_fn = total.saturating_sub(correct);
        let micro_precision = ratio(pooled_tp, pooled_tp + pooled_fp);
        let micro_recall = ratio(pooled_tp, pooled_tp + pooled_fn);
        let micro_avg = Averages {
            precision: micro_precision,
            recall: micro_recall,
            f1: harmonic_mean(micro_precision, micro_recall),
        };

        let gold_distribution = NliLabel::ALL
            .iter()
            .map(|&label| (label, confusion.gold_total(label)))
            .collect();
        let predicted_distribution = NliLabel::ALL
            .iter()
            .map(|&label| (label, confusion.predicted_total(label)))
            .collect();

        Ok(Self {
            total,
            correct,
            accuracy,
            per_class,
            macro_avg,
            micro_avg,
            confusion,
            gold_distribution,
            predicted_distribution,
        })
    }

    /// Classes whose gold instances were never predicted correctly.
    pub fn unrecovered_classes(&self) -> Vec<NliLabel> {
        self.per_class
            .iter()
            .filter(|(_, metrics)| metrics.support > 0 && metrics.recall <= 0.0)
            .map(|(label, _)| *label)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use common::storage::types::nli_label::NliLabel::{
        Contradiction as C, Entailment as E, Neutral as N,
    };

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn neutral_never_recovered() {
        let pairs = [(E, E), (C, C), (N, C), (E, E)];
        let report = ClassificationReport::from_pairs(&pairs).unwrap();

        assert!(approx(report.accuracy, 0.75));
        assert_eq!(report.confusion.total(), 4);

        let neutral = report.per_class[&N];
        assert!(approx(neutral.recall, 0.0));
        assert!(approx(neutral.precision, 0.0));
        assert!(approx(neutral.f1, 0.0));
        assert_eq!(neutral.support, 1);

        let contradiction = report.per_class[&C];
        assert!(approx(contradiction.precision, 0.5));
        assert!(approx(contradiction.recall, 1.0));

        assert_eq!(report.unrecovered_classes(), vec![N]);
        assert_eq!(report.predicted_distribution[&C], 2);
        assert_eq!(report.gold_distribution[&E], 2);
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            ClassificationReport::from_pairs(&[]),
            Err(AppError::EmptyInput(_))
        ));
        assert!(ConfusionMatrix::default().accuracy().is_err());
    }

    #[test]
    fn matrix_serializes_as_nested_label_map() {
        let matrix = ConfusionMatrix::from_pairs(&[(E, N)]);
        let value = serde_json::to_value(&matrix).unwrap();
        assert_eq!(value["ENTAILMENT"]["NEUTRAL"], 1);
        assert_eq!(value["NEUTRAL"]["NEUTRAL"], 0);
    }

    fn label_strategy() -> impl Strategy<Value = NliLabel> {
        prop_oneof![Just(E), Just(C), Just(N)]
    }

    proptest! {
        #[test]
        fn micro_f1_equals_accuracy(
            pairs in prop::collection::vec((label_strategy(), label_strategy()), 1..60)
        ) {
            let report = ClassificationReport::from_pairs(&pairs).unwrap();
            prop_assert!(approx(report.micro_avg.f1, report.accuracy));
        }

        #[test]
        fn matrix_total_matches_pair_count(
            pairs in prop::collection::vec((label_strategy(), label_strategy()), 0..60)
        ) {
            prop_assert_eq!(ConfusionMatrix::from_pairs(&pairs).total(), pairs.len());
        }
    }
}
