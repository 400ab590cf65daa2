//! # Fusão de Chunks
//!
//! Remove propostas sobrepostas entre as categorias concorrentes (o "grupo de tipos")
//! até que nenhum par sobrevivente do grupo se sobreponha.
//!
//! ## Comparador
//!
//! Para duas anotações `a` e `b` do grupo:
//!
//! 1. mesma anotação ou sem tokens em comum → incomparáveis (`Equal`);
//! 2. tamanhos diferentes → vence a mais longa;
//! 3. mesmo tamanho → vence a categoria com menor índice na lista de prioridade.
//!
//! ## Passo de remoção
//!
//! Todos os pares são comparados contra o conjunto **original** de candidatas; os
//! perdedores são marcados e removidos só no fim. A política é gulosa e local:
//!
//! - duas anotações da mesma categoria e mesmo tamanho que se sobrepõem empatam e
//!   ambas sobrevivem;
//! - com A–B e B–C em conflito mas A–C não, o resultado depende dos votos par a par
//!   (B pode perder para A e ainda assim derrubar C).
//!
//! Consumidores a jusante dependem desse comportamento; ele não é uma cobertura ótima.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::error::{AnotadorError, Result};
use crate::model::{Annotation, AnnotationId, Document};

/// Motor de fusão configurado com a ordem de prioridade das categorias.
#[derive(Debug, Clone)]
pub struct ChunkMerger {
    priority: Vec<String>,
    rank: HashMap<String, usize>,
}

impl ChunkMerger {
    /// Cria o motor. A lista não pode ser vazia nem repetir categorias.
    pub fn new(priority: Vec<String>) -> Result<Self> {
        if priority.is_empty() {
            return Err(AnotadorError::config("lista de prioridade da fusão vazia"));
        }
        let mut rank = HashMap::with_capacity(priority.len());
        for (i, category) in priority.iter().enumerate() {
            if rank.insert(category.clone(), i).is_some() {
                return Err(AnotadorError::config(format!(
                    "categoria '{category}' repetida na lista de prioridade"
                )));
            }
        }
        Ok(Self { priority, rank })
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// Posição da categoria na lista de prioridade (`None` = fora do grupo).
    pub fn rank(&self, category: &str) -> Option<usize> {
        self.rank.get(category).copied()
    }

    /// Compara duas anotações; `Less` significa que `a` vence `b`.
    pub fn compare(&self, a: &Annotation, b: &Annotation) -> Ordering {
        if a.id == b.id || !a.overlaps(b) {
            return Ordering::Equal;
        }
        if a.len() == b.len() {
            let ra = self.rank(&a.category).unwrap_or(usize::MAX);
            let rb = self.rank(&b.category).unwrap_or(usize::MAX);
            ra.cmp(&rb)
        } else {
            b.len().cmp(&a.len())
        }
    }

    /// Decide quais candidatas perdem algum confronto par a par.
    ///
    /// Candidatas fora do grupo de categorias são ignoradas.
    pub fn flatten(&self, candidates: &[&Annotation]) -> BTreeSet<AnnotationId> {
        let group: Vec<&Annotation> = candidates
            .iter()
            .copied()
            .filter(|a| self.rank(&a.category).is_some())
            .collect();
        let mut losers = BTreeSet::new();
        for a in &group {
            for b in &group {
                if self.compare(a, b) == Ordering::Less {
                    debug!(winner = %a.id, loser = %b.id, "conflito de chunks");
                    losers.insert(b.id);
                }
            }
        }
        losers
    }

    /// Funde as anotações de uma sentença e devolve as removidas.
    pub fn merge_sentence(&self, document: &mut Document, sentence: usize) -> Vec<Annotation> {
        let losers = self.flatten(&document.annotations_in(sentence));
        losers
            .into_iter()
            .filter_map(|id| document.remove_annotation(id))
            .collect()
    }

    /// Funde todas as sentenças do documento e devolve as anotações removidas.
    pub fn merge_document(&self, document: &mut Document) -> Vec<Annotation> {
        let mut removed = Vec::new();
        for sentence in 0..document.sentences().len() {
            removed.extend(self.merge_sentence(document, sentence));
        }
        info!(
            document = %document.id,
            removed = removed.len(),
            kept = document.annotation_count(),
            "fusão de chunks concluída"
        );
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Proposal, Sentence};

    fn doc(proposals: &[(usize, usize, &str)]) -> Document {
        let mut d = Document::new(
            "d",
            vec![Sentence::from_orths("s1", &["Jan", "poszedł", "do", "szkoły", "w", "Warszawie"])],
        );
        for (b, e, c) in proposals {
            d.add_annotation(0, Proposal::new(*b, *e, *c)).unwrap();
        }
        d
    }

    fn merger() -> ChunkMerger {
        ChunkMerger::new(vec!["PERSON".into(), "PLACE".into()]).unwrap()
    }

    fn spans(d: &Document) -> Vec<(usize, usize, String)> {
        d.annotations_in(0)
            .iter()
            .map(|a| (a.begin, a.end, a.category.clone()))
            .collect()
    }

    #[test]
    fn test_new_rejects_bad_priority() {
        assert!(ChunkMerger::new(vec![]).is_err());
        assert!(ChunkMerger::new(vec!["A".into(), "A".into()]).is_err());
    }

    #[test]
    fn test_longer_span_wins() {
        let mut d = doc(&[(0, 0, "PERSON"), (0, 1, "PERSON")]);
        let removed = merger().merge_document(&mut d);
        assert_eq!(removed.len(), 1);
        assert_eq!((removed[0].begin, removed[0].end), (0, 0));
        assert_eq!(spans(&d), vec![(0, 1, "PERSON".to_string())]);
    }

    #[test]
    fn test_equal_length_priority_decides() {
        let mut d = doc(&[(5, 5, "PLACE"), (5, 5, "PERSON")]);
        merger().merge_document(&mut d);
        assert_eq!(spans(&d), vec![(5, 5, "PERSON".to_string())]);
    }

    #[test]
    fn test_same_category_same_length_both_survive() {
        let mut d = doc(&[(0, 1, "PERSON"), (1, 2, "PERSON")]);
        assert!(merger().merge_document(&mut d).is_empty());
        assert_eq!(d.annotation_count(), 2);
    }

    #[test]
    fn test_non_overlapping_and_foreign_categories_untouched() {
        let mut d = doc(&[(0, 0, "PERSON"), (5, 5, "PLACE"), (0, 3, "EVENT")]);
        assert!(merger().merge_document(&mut d).is_empty());
        assert_eq!(d.annotation_count(), 3);
    }

    #[test]
    fn test_removals_use_original_set() {
        // A=[0,2] vence B=[2,3]; B ainda derruba C=[3,3] porque a remoção é adiada
        let mut d = doc(&[(0, 2, "PERSON"), (2, 3, "PLACE"), (3, 3, "PERSON")]);
        merger().merge_document(&mut d);
        assert_eq!(spans(&d), vec![(0, 2, "PERSON".to_string())]);
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        let d = doc(&[(0, 0, "PERSON"), (0, 1, "PLACE")]);
        let all = d.annotations_in(0);
        let m = merger();
        assert_eq!(m.compare(all[0], all[1]), Ordering::Greater);
        assert_eq!(m.compare(all[1], all[0]), Ordering::Less);
        assert_eq!(m.compare(all[0], all[0]), Ordering::Equal);
    }
}
