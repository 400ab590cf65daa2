//! # Avaliação de Anotações
//!
//! Compara um conjunto de referência com um conjunto avaliado, sentença a sentença,
//! pela chave exata `(begin, end, category)`:
//!
//! - **TP**: span presente nos dois lados
//! - **FP**: span só no avaliado
//! - **FN**: span só na referência
//!
//! Documentos são pareados pelo `id`. Os que aparecem só de um lado, ou cujo número de
//! sentenças difere, não entram na contagem e são contados à parte.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::Document;

/// Contagens brutas de uma categoria.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl Counts {
    /// Spans na referência.
    pub fn reference(&self) -> usize {
        self.true_positives + self.false_negatives
    }

    /// Spans no conjunto avaliado.
    pub fn evaluated(&self) -> usize {
        self.true_positives + self.false_positives
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.evaluated())
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.reference())
    }

    /// Média harmônica de precisão e cobertura (0 quando ambas são 0).
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    fn add(&mut self, other: &Counts) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Linha do relatório: contagens e métricas derivadas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    #[serde(flatten)]
    pub counts: Counts,
    pub reference: usize,
    pub evaluated: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl From<Counts> for Score {
    fn from(counts: Counts) -> Self {
        Self {
            reference: counts.reference(),
            evaluated: counts.evaluated(),
            precision: counts.precision(),
            recall: counts.recall(),
            f1: counts.f1(),
            counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub documents_compared: usize,
    pub only_in_reference: usize,
    pub only_in_evaluated: usize,
    pub different_sentence_count: usize,
    pub categories: BTreeMap<String, Score>,
    /// Micro-média sobre todas as categorias.
    pub total: Score,
}

/// Acumulador de comparações entre referência e avaliado.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    counts: BTreeMap<String, Counts>,
    documents_compared: usize,
    only_in_reference: usize,
    only_in_evaluated: usize,
    different_sentence_count: usize,
}

impl Evaluation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compara um par de documentos. Devolve `false` (e conta o par à parte) quando o
    /// número de sentenças difere.
    pub fn compare_documents(&mut self, reference: &Document, evaluated: &Document) -> bool {
        let (left, right) = (reference.sentences().len(), evaluated.sentences().len());
        if left != right {
            warn!(document = %reference.id, reference = left, evaluated = right, "número de sentenças difere");
            self.different_sentence_count += 1;
            return false;
        }
        for sentence in 0..left {
            self.compare_sentence(reference, evaluated, sentence);
        }
        self.documents_compared += 1;
        true
    }

    /// Pareia os conjuntos pelo `id` do documento e compara cada par.
    pub fn compare_sets(&mut self, reference: &[Document], evaluated: &[Document]) {
        let left: HashMap<&str, &Document> = reference.iter().map(|d| (d.id.as_str(), d)).collect();
        let right: HashMap<&str, &Document> = evaluated.iter().map(|d| (d.id.as_str(), d)).collect();
        let names: BTreeSet<&str> = left.keys().chain(right.keys()).copied().collect();

        for name in names {
            match (left.get(name), right.get(name)) {
                (Some(r), Some(e)) => {
                    self.compare_documents(r, e);
                }
                (Some(_), None) => {
                    warn!(document = name, "documento só na referência");
                    self.only_in_reference += 1;
                }
                (None, Some(_)) => {
                    warn!(document = name, "documento só no conjunto avaliado");
                    self.only_in_evaluated += 1;
                }
                (None, None) => {}
            }
        }
    }

    fn compare_sentence(&mut self, reference: &Document, evaluated: &Document, sentence: usize) {
        // multiconjunto: spans repetidos contam uma vez cada
        let mut pending: HashMap<(usize, usize, &str), usize> = HashMap::new();
        for a in reference.annotations_in(sentence) {
            *pending.entry((a.begin, a.end, a.category.as_str())).or_default() += 1;
        }
        for a in evaluated.annotations_in(sentence) {
            let counts = self.counts.entry(a.category.clone()).or_default();
            match pending.get_mut(&(a.begin, a.end, a.category.as_str())) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    counts.true_positives += 1;
                }
                _ => counts.false_positives += 1,
            }
        }
        for ((_, _, category), left) in pending {
            if left > 0 {
                self.counts.entry(category.to_string()).or_default().false_negatives += left;
            }
        }
    }

    /// Contagens de uma categoria (zeradas se ela nunca apareceu).
    pub fn counts(&self, category: &str) -> Counts {
        self.counts.get(category).copied().unwrap_or_default()
    }

    pub fn report(&self) -> EvaluationReport {
        let mut total = Counts::default();
        for counts in self.counts.values() {
            total.add(counts);
        }
        let report = EvaluationReport {
            documents_compared: self.documents_compared,
            only_in_reference: self.only_in_reference,
            only_in_evaluated: self.only_in_evaluated,
            different_sentence_count: self.different_sentence_count,
            categories: self
                .counts
                .iter()
                .map(|(c, counts)| (c.clone(), Score::from(*counts)))
                .collect(),
            total: Score::from(total),
        };
        info!(
            documents = report.documents_compared,
            precision = report.total.precision,
            recall = report.total.recall,
            f1 = report.total.f1,
            "avaliação concluída"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Proposal, Sentence};

    fn doc(id: &str, spans: &[(usize, usize, usize, &str)]) -> Document {
        let mut d = Document::new(
            id,
            vec![
                Sentence::from_orths("s1", &["Jan", "Kowalski", "mieszka", "w", "Warszawie"]),
                Sentence::from_orths("s2", &["Maria", "też"]),
            ],
        );
        for (s, b, e, c) in spans {
            d.add_annotation(*s, Proposal::new(*b, *e, *c)).unwrap();
        }
        d
    }

    #[test]
    fn test_counts_per_category() {
        let reference = doc("d", &[(0, 0, 1, "PERSON"), (0, 4, 4, "PLACE"), (1, 0, 0, "PERSON")]);
        // [0,0] no lugar de [0,1]; PLACE certo; Maria ausente
        let evaluated = doc("d", &[(0, 0, 0, "PERSON"), (0, 4, 4, "PLACE")]);

        let mut eval = Evaluation::new();
        assert!(eval.compare_documents(&reference, &evaluated));
        let person = eval.counts("PERSON");
        assert_eq!(
            person,
            Counts {
                true_positives: 0,
                false_positives: 1,
                false_negatives: 2
            }
        );
        assert_eq!(eval.counts("PLACE").true_positives, 1);
        assert_eq!(eval.counts("ORGANIZATION"), Counts::default());

        let report = eval.report();
        assert_eq!(report.categories["PLACE"].f1, 1.0);
        assert_eq!(report.categories["PERSON"].precision, 0.0);
        assert_eq!(report.total.reference, 3);
        assert_eq!(report.total.evaluated, 2);
        assert!((report.total.precision - 0.5).abs() < 1e-9);
        assert!((report.total.recall - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.total.f1 - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_same_span_different_category_is_miss() {
        let reference = doc("d", &[(0, 4, 4, "PLACE")]);
        let evaluated = doc("d", &[(0, 4, 4, "ORGANIZATION")]);
        let mut eval = Evaluation::new();
        eval.compare_documents(&reference, &evaluated);
        assert_eq!(eval.counts("PLACE").false_negatives, 1);
        assert_eq!(eval.counts("ORGANIZATION").false_positives, 1);
    }

    #[test]
    fn test_sets_pair_by_id_and_skip_mismatches() {
        let short = Document::new("b", vec![Sentence::from_orths("s1", &["Jan"])]);
        let reference = vec![doc("a", &[(0, 0, 1, "PERSON")]), doc("b", &[]), doc("c", &[])];
        let evaluated = vec![short, doc("a", &[(0, 0, 1, "PERSON")]), doc("z", &[])];

        let mut eval = Evaluation::new();
        eval.compare_sets(&reference, &evaluated);
        let report = eval.report();
        assert_eq!(report.documents_compared, 1);
        assert_eq!(report.different_sentence_count, 1);
        assert_eq!(report.only_in_reference, 1);
        assert_eq!(report.only_in_evaluated, 1);
        assert_eq!(report.total.f1, 1.0);
    }

    #[test]
    fn test_report_serializes_flat_scores() {
        let reference = doc("d", &[(0, 4, 4, "PLACE")]);
        let mut eval = Evaluation::new();
        eval.compare_documents(&reference, &reference);
        let json = serde_json::to_value(eval.report()).unwrap();
        assert_eq!(json["categories"]["PLACE"]["true_positives"], 1);
        assert_eq!(json["total"]["f1"], 1.0);
        // sem comparações, métricas ficam em 0 em vez de NaN
        assert_eq!(Evaluation::new().report().total.precision, 0.0);
    }
}
