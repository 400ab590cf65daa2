//! # Resolução de Correferência Sequencial
//!
//! As menções são visitadas na ordem do texto, uma passada por menção:
//!
//! 1. **Candidatos**: cada cluster existente vira uma instância (menção, cluster),
//!    transformada em vetor pelo [`FeatureSet`] configurado.
//! 2. **Classificação**: o [`Classifier`] devolve um rótulo por instância.
//! 3. **Seleção**: entre os aceitos, vence o cluster cuja menção anterior mais próxima
//!    está a menor distância em tokens; empates ficam com o primeiro enumerado.
//! 4. **Commit**: relação `coreference` menção → cabeça do cluster vencedor; a menção
//!    entra no cluster.
//!
//! Uma menção sem candidato aceito abre um cluster unitário com ela mesma como cabeça,
//! para que menções seguintes possam se referir a ela.
//!
//! Nenhum commit é revisto. As relações são acumuladas e gravadas no documento só no
//! fim da passada: se o prazo do documento estourar, o documento fica intacto.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{is_accepted, Classifier};
use crate::error::{AnotadorError, Result};
use crate::features::{FeatureInput, FeatureSet, InputKind};
use crate::model::{Annotation, AnnotationCluster, AnnotationId, Document, Relation};

/// Seleciona as anotações que participam da correferência pela categoria.
#[derive(Debug, Clone)]
pub struct MentionSelector {
    patterns: Vec<Regex>,
}

impl MentionSelector {
    /// Cada padrão precisa casar com a categoria **inteira**.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        if patterns.is_empty() {
            return Err(AnotadorError::config("nenhum padrão de menção configurado"));
        }
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p.as_ref())))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, category: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(category))
    }

    /// Menções do documento, na ordem do texto.
    pub fn select<'d>(&self, document: &'d Document) -> Vec<&'d Annotation> {
        document
            .annotations_in_order()
            .into_iter()
            .filter(|a| self.matches(&a.category))
            .collect()
    }
}

/// Uma ligação confirmada pelo resolvedor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub mention: AnnotationId,
    /// Cabeça do cluster vencedor (destino da relação).
    pub head: AnnotationId,
    /// Posição do cluster na ordem de criação.
    pub cluster: usize,
    /// Distância até a menção anterior mais próxima do cluster.
    pub distance: usize,
}

/// Resumo de uma passada do resolvedor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub mentions: usize,
    pub links: Vec<Link>,
    pub unresolved: usize,
    /// Erros recuperados por menção (classificador ausente, tamanho errado, ...).
    pub recovered_errors: usize,
    pub clusters: Vec<AnnotationCluster>,
    pub elapsed_ms: u64,
}

impl ResolutionReport {
    pub fn relations_added(&self) -> usize {
        self.links.len()
    }
}

/// Resolvedor sequencial da esquerda para a direita.
pub struct SequentialResolver {
    selector: MentionSelector,
    features: FeatureSet,
    classifier: Arc<dyn Classifier>,
    timeout: Option<Duration>,
}

impl SequentialResolver {
    /// As features precisam ser do tipo menção × cluster.
    pub fn new(
        selector: MentionSelector,
        features: FeatureSet,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self> {
        if features.input_kind() != InputKind::ClusterMention {
            return Err(AnotadorError::config(format!(
                "o resolvedor sequencial exige features ClusterMention, recebeu {:?}",
                features.input_kind()
            )));
        }
        Ok(Self {
            selector,
            features,
            classifier,
            timeout: None,
        })
    }

    /// Prazo por documento; ao estourar, nenhuma relação é gravada.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn selector(&self) -> &MentionSelector {
        &self.selector
    }

    pub fn resolve(&self, document: &mut Document) -> Result<ResolutionReport> {
        self.resolve_with(document, |_| {})
    }

    /// Como [`SequentialResolver::resolve`], chamando `on_link` a cada ligação confirmada.
    pub fn resolve_with(
        &self,
        document: &mut Document,
        mut on_link: impl FnMut(&Link),
    ) -> Result<ResolutionReport> {
        let start = Instant::now();
        document.validate()?;

        let mentions: Vec<AnnotationId> =
            self.selector.select(document).iter().map(|a| a.id).collect();
        let mut report = ResolutionReport {
            mentions: mentions.len(),
            ..Default::default()
        };
        let mut clusters: Vec<AnnotationCluster> = Vec::new();

        for id in mentions {
            if let Some(limit) = self.timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    warn!(document = %document.id, "prazo esgotado, relações descartadas");
                    return Err(AnotadorError::Timeout {
                        elapsed_ms: elapsed.as_millis() as u64,
                        limit_ms: limit.as_millis() as u64,
                    });
                }
            }
            let Some(mention) = document.annotation(id) else {
                continue;
            };

            match self.select_cluster(document, mention, &clusters, &mut report)? {
                Some((index, distance)) => {
                    let link = Link {
                        mention: id,
                        head: clusters[index].head(),
                        cluster: index,
                        distance,
                    };
                    debug!(mention = %id, head = %link.head, distance, "menção resolvida");
                    clusters[index].push(id);
                    on_link(&link);
                    report.links.push(link);
                }
                None => {
                    report.unresolved += 1;
                    clusters.push(AnnotationCluster::new(id));
                }
            }
        }

        for link in &report.links {
            document.add_relation(Relation::coreference(link.mention, link.head))?;
        }
        report.clusters = clusters;
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            document = %document.id,
            mentions = report.mentions,
            relations = report.links.len(),
            unresolved = report.unresolved,
            recovered = report.recovered_errors,
            "correferência resolvida"
        );
        Ok(report)
    }

    /// Classifica os candidatos e escolhe o vencedor: `(índice do cluster, distância)`.
    fn select_cluster(
        &self,
        document: &Document,
        mention: &Annotation,
        clusters: &[AnnotationCluster],
        report: &mut ResolutionReport,
    ) -> Result<Option<(usize, usize)>> {
        if clusters.is_empty() {
            return Ok(None);
        }
        let inputs: Vec<FeatureInput> = clusters
            .iter()
            .map(|cluster| FeatureInput::ClusterMention { mention, cluster })
            .collect();
        let vectors = self.features.extract_batch(document, &inputs)?;

        let labels = match self.classifier.classify(&vectors) {
            Ok(labels) if labels.len() == vectors.len() => labels,
            Ok(labels) => {
                warn!(
                    mention = %mention.id,
                    expected = vectors.len(),
                    got = labels.len(),
                    "classificador devolveu rótulos de tamanho inesperado"
                );
                report.recovered_errors += 1;
                return Ok(None);
            }
            Err(e) => {
                warn!(mention = %mention.id, error = %e, "falha do classificador, menção não resolvida");
                report.recovered_errors += 1;
                return Ok(None);
            }
        };

        let mut accepted: Vec<(usize, usize)> = Vec::new();
        for (index, cluster) in clusters.iter().enumerate() {
            if !is_accepted(labels[index]) {
                continue;
            }
            match cluster.closest_preceding(document, mention) {
                Some(closest) => accepted.push((index, document.token_distance(closest, mention))),
                None => warn!(
                    mention = %mention.id,
                    cluster = index,
                    "cluster aceito sem menção anterior, ignorado"
                ),
            }
        }
        // min_by_key devolve o primeiro mínimo: empate fica com o cluster mais antigo
        Ok(accepted.into_iter().min_by_key(|&(_, distance)| distance))
    }
}

/// Agrupa as relações `coreference` de um documento em clusters (cabeça → menções).
pub fn clusters_from_relations(document: &Document) -> Vec<AnnotationCluster> {
    let mut order: Vec<AnnotationId> = Vec::new();
    let mut by_head: HashMap<AnnotationId, AnnotationCluster> = HashMap::new();
    for relation in document.relations_of_kind(Relation::COREFERENCE) {
        let cluster = by_head.entry(relation.to).or_insert_with(|| {
            order.push(relation.to);
            AnnotationCluster::new(relation.to)
        });
        cluster.push(relation.from);
    }
    order.into_iter().filter_map(|head| by_head.remove(&head)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ACCEPTED, REJECTED};
    use crate::features::FeatureRegistry;
    use crate::model::{Proposal, Sentence};

    /// Aceita todo candidato.
    struct AcceptAll;

    impl Classifier for AcceptAll {
        fn classify(&self, instances: &[crate::features::FeatureVector]) -> Result<Vec<i64>> {
            Ok(vec![ACCEPTED; instances.len()])
        }
    }

    /// Devolve sempre um rótulo a menos.
    struct Short;

    impl Classifier for Short {
        fn classify(&self, instances: &[crate::features::FeatureVector]) -> Result<Vec<i64>> {
            Ok(vec![ACCEPTED; instances.len().saturating_sub(1)])
        }
    }

    struct Failing;

    impl Classifier for Failing {
        fn classify(&self, _: &[crate::features::FeatureVector]) -> Result<Vec<i64>> {
            Err(AnotadorError::classifier("backend indisponível"))
        }
    }

    /// Aceita candidatos cuja menção mais próxima está a pelo menos 3 tokens.
    struct FarEnough;

    impl Classifier for FarEnough {
        fn classify(&self, instances: &[crate::features::FeatureVector]) -> Result<Vec<i64>> {
            Ok(instances
                .iter()
                .map(|v| match v.get("clustermention_closest_preceding_distance") {
                    Some(crate::features::FeatureValue::Int(d)) if *d >= 3 => ACCEPTED,
                    _ => REJECTED,
                })
                .collect())
        }
    }

    fn resolver(classifier: Arc<dyn Classifier>) -> SequentialResolver {
        let registry = FeatureRegistry::with_builtins(&["PERSON".to_string()]);
        let features = registry
            .select(&["clustermention_cluster_size", "clustermention_closest_preceding_distance"])
            .unwrap();
        SequentialResolver::new(MentionSelector::new(&["PERSON"]).unwrap(), features, classifier).unwrap()
    }

    fn doc(spans: &[(usize, usize)]) -> (Document, Vec<AnnotationId>) {
        let mut d = Document::new(
            "d",
            vec![Sentence::from_orths("s", &["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"])],
        );
        let ids = spans
            .iter()
            .map(|(b, e)| d.add_annotation(0, Proposal::new(*b, *e, "PERSON")).unwrap())
            .collect();
        d.add_annotation(0, Proposal::new(9, 9, "PLACE")).unwrap();
        (d, ids)
    }

    #[test]
    fn test_selector_full_match() {
        let s = MentionSelector::new(&["PERS.*", "AGENT"]).unwrap();
        assert!(s.matches("PERSON"));
        assert!(s.matches("AGENT"));
        assert!(!s.matches("AGENTS"));
        assert!(MentionSelector::new::<&str>(&[]).is_err());
        assert!(matches!(MentionSelector::new(&["("]), Err(AnotadorError::Regex(_))));
    }

    #[test]
    fn test_requires_cluster_mention_features() {
        let registry = FeatureRegistry::with_builtins(&[]);
        let features = registry.select(&["annotation_length"]).unwrap();
        let selector = MentionSelector::new(&["PERSON"]).unwrap();
        assert!(SequentialResolver::new(selector, features, Arc::new(AcceptAll)).is_err());
    }

    #[test]
    fn test_chain_links_to_first_head() {
        let (mut d, ids) = doc(&[(0, 0), (3, 3), (6, 6)]);
        let report = resolver(Arc::new(AcceptAll)).resolve(&mut d).unwrap();
        assert_eq!(report.mentions, 3);
        assert_eq!(report.unresolved, 1);
        let relations = d.relations();
        assert_eq!(relations.len(), 2);
        assert_eq!(relations[0], Relation::coreference(ids[1], ids[0]));
        assert_eq!(relations[1], Relation::coreference(ids[2], ids[0]));
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].mentions(), &[ids[0], ids[1], ids[2]]);
    }

    #[test]
    fn test_closest_preceding_wins() {
        // menção em 2 fica sozinha (distância 2 < 3); a menção em 5 aceita
        // C1 = {0} (distância 5) e C2 = {2} (distância 3) e fica com C2
        let (mut d, ids) = doc(&[(0, 0), (2, 2), (5, 5)]);
        let report = resolver(Arc::new(FarEnough)).resolve(&mut d).unwrap();
        assert_eq!(report.unresolved, 2);
        assert_eq!(report.links.len(), 1);
        let link = &report.links[0];
        assert_eq!(link.mention, ids[2]);
        assert_eq!(link.head, ids[1]);
        assert_eq!(link.distance, 3);
        assert_eq!(d.relations(), &[Relation::coreference(ids[2], ids[1])]);
    }

    #[test]
    fn test_tie_breaks_on_enumeration_order() {
        let (d, ids) = doc(&[(3, 4), (4, 4), (6, 6)]);
        let resolver = resolver(Arc::new(AcceptAll));
        let mention = d.annotation(ids[2]).unwrap();
        let mut report = ResolutionReport::default();
        for clusters in [
            vec![AnnotationCluster::new(ids[0]), AnnotationCluster::new(ids[1])],
            vec![AnnotationCluster::new(ids[1]), AnnotationCluster::new(ids[0])],
        ] {
            let winner = resolver.select_cluster(&d, mention, &clusters, &mut report).unwrap();
            assert_eq!(winner, Some((0, 2)));
        }
    }

    #[test]
    fn test_accepted_cluster_without_preceding_mention_is_skipped() {
        let (d, ids) = doc(&[(0, 0), (3, 3), (6, 6)]);
        let resolver = resolver(Arc::new(AcceptAll));
        let mention = d.annotation(ids[1]).unwrap();
        let mut report = ResolutionReport::default();

        // o cluster só tem uma menção posterior: aceito, mas fora da comparação
        let later = vec![AnnotationCluster::new(ids[2])];
        assert_eq!(resolver.select_cluster(&d, mention, &later, &mut report).unwrap(), None);

        let mixed = vec![AnnotationCluster::new(ids[2]), AnnotationCluster::new(ids[0])];
        assert_eq!(resolver.select_cluster(&d, mention, &mixed, &mut report).unwrap(), Some((1, 3)));
        assert_eq!(report.recovered_errors, 0);
    }

    #[test]
    fn test_classifier_errors_are_recovered() {
        let (mut d, _) = doc(&[(0, 0), (3, 3), (6, 6)]);
        let report = resolver(Arc::new(Short)).resolve(&mut d).unwrap();
        assert_eq!(report.recovered_errors, 2);
        assert_eq!(report.unresolved, 3);
        assert!(d.relations().is_empty());

        let (mut d, _) = doc(&[(0, 0), (3, 3)]);
        let report = resolver(Arc::new(Failing)).resolve(&mut d).unwrap();
        assert_eq!(report.recovered_errors, 1);
        assert!(d.relations().is_empty());
    }

    #[test]
    fn test_timeout_leaves_document_unchanged() {
        let (mut d, _) = doc(&[(0, 0), (3, 3), (6, 6)]);
        let resolver = resolver(Arc::new(AcceptAll)).with_timeout(Duration::ZERO);
        let result = resolver.resolve(&mut d);
        assert!(matches!(result, Err(AnotadorError::Timeout { .. })));
        assert!(d.relations().is_empty());
    }

    #[test]
    fn test_clusters_from_relations() {
        let (mut d, ids) = doc(&[(0, 0), (3, 3), (6, 6)]);
        resolver(Arc::new(AcceptAll)).resolve(&mut d).unwrap();
        let clusters = clusters_from_relations(&d);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].head(), ids[0]);
        assert_eq!(clusters[0].len(), 3);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::classifier::{ACCEPTED, REJECTED};
    use crate::features::{FeatureRegistry, FeatureValue, FeatureVector};
    use crate::model::{Proposal, Sentence};
    use proptest::prelude::*;

    /// Aceita conforme a paridade do tamanho do cluster.
    struct EvenClusters;

    impl Classifier for EvenClusters {
        fn classify(&self, instances: &[FeatureVector]) -> Result<Vec<i64>> {
            Ok(instances
                .iter()
                .map(|v| match v.get("clustermention_cluster_size") {
                    Some(FeatureValue::Int(n)) if n % 2 == 1 => ACCEPTED,
                    _ => REJECTED,
                })
                .collect())
        }
    }

    fn document(starts: &[usize]) -> Document {
        let orths: Vec<String> = (0..20).map(|i| format!("w{i}")).collect();
        let orths: Vec<&str> = orths.iter().map(String::as_str).collect();
        let mut d = Document::new("p", vec![Sentence::from_orths("s", &orths)]);
        for &b in starts {
            d.add_annotation(0, Proposal::new(b, b, "PERSON")).unwrap();
        }
        d
    }

    proptest! {
        #[test]
        fn prop_links_point_backwards(starts in proptest::collection::vec(0usize..20, 0..10)) {
            let mut d = document(&starts);
            let features = FeatureRegistry::with_builtins(&["PERSON".to_string()])
                .select(&["clustermention_cluster_size"])
                .unwrap();
            let resolver = SequentialResolver::new(
                MentionSelector::new(&["PERSON"]).unwrap(),
                features,
                Arc::new(EvenClusters),
            )
            .unwrap();
            let report = resolver.resolve(&mut d).unwrap();

            prop_assert_eq!(report.links.len() + report.unresolved, starts.len());
            prop_assert_eq!(report.clusters.len(), report.unresolved);
            prop_assert_eq!(d.relations().len(), report.links.len());
            for relation in d.relations() {
                let from = d.annotation(relation.from).unwrap();
                let to = d.annotation(relation.to).unwrap();
                prop_assert!(to.precedes(from));
                prop_assert!(relation.is_coreference());
            }
        }
    }
}
