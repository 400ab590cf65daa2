//! # Pipeline de Anotação com Eventos Observáveis
//!
//! Encadeia as etapas sobre um documento:
//!
//! ```text
//! Document ──► Chunker ──► ChunkMerger ──► SequentialResolver ──► Document
//!              (propostas)  (sem sobreposição)  (relações coreference)
//! ```
//!
//! Cada etapa é opcional. O documento é processado como unidade: as etapas rodam
//! sobre uma cópia que só substitui o original quando tudo dá certo, então um erro
//! de documento nunca deixa estado parcial.
//!
//! `process_streaming` emite [`PipelineEvent`]s por um canal `mpsc`, como o servidor
//! WebSocket espera; `process_batch` distribui documentos independentes entre threads
//! com `rayon`.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::config::PipelineConfig;
use crate::coref::{Link, MentionSelector, SequentialResolver};
use crate::error::Result;
use crate::features::FeatureRegistry;
use crate::merge::ChunkMerger;
use crate::model::{Annotation, Document};

/// Eventos emitidos durante o processamento de um documento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// Propostas do chunker adicionadas a uma sentença.
    ChunksProposed {
        sentence: usize,
        annotations: Vec<Annotation>,
    },
    /// Anotação removida pela fusão de chunks.
    ChunkRemoved { annotation: Annotation, text: String },
    /// Menção ligada à cabeça de um cluster.
    MentionResolved {
        link: Link,
        mention_text: String,
        head_text: String,
    },
    Done { summary: ProcessSummary },
    Error { message: String },
}

/// Estatísticas de um documento processado.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub document: String,
    pub proposed: usize,
    pub removed: usize,
    pub kept: usize,
    pub mentions: usize,
    pub relations: usize,
    pub unresolved: usize,
    pub recovered_errors: usize,
    pub processing_ms: u64,
}

/// Orquestrador chunk → fusão → correferência.
#[derive(Default)]
pub struct AnnotationPipeline {
    chunker: Option<Arc<dyn Chunker>>,
    merger: Option<ChunkMerger>,
    resolver: Option<SequentialResolver>,
}

impl AnnotationPipeline {
    /// Pipeline sem etapas.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn with_merger(mut self, merger: ChunkMerger) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn with_resolver(mut self, resolver: SequentialResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Monta todas as etapas a partir da configuração (validada antes).
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let mut pipeline = Self::new();
        if let Some(chunker) = config.build_chunker()? {
            pipeline = pipeline.with_chunker(chunker);
        }
        if let Some(merge) = &config.merge {
            pipeline = pipeline.with_merger(ChunkMerger::new(merge.priority.clone())?);
        }
        if let Some(coref) = &config.coreference {
            let registry = FeatureRegistry::with_builtins(&config.categories);
            let mut resolver = SequentialResolver::new(
                MentionSelector::new(&coref.mention_patterns)?,
                registry.select(&coref.features)?,
                coref.classifier.build()?,
            )?;
            if let Some(ms) = coref.timeout_ms {
                resolver = resolver.with_timeout(Duration::from_millis(ms));
            }
            pipeline = pipeline.with_resolver(resolver);
        }
        info!(
            chunker = pipeline.chunker.as_ref().map(|c| c.name().to_string()),
            merge = pipeline.merger.is_some(),
            coreference = pipeline.resolver.is_some(),
            "pipeline montado"
        );
        Ok(pipeline)
    }

    /// Processa o documento no lugar.
    pub fn process(&self, document: &mut Document) -> Result<ProcessSummary> {
        self.run(document, None)
    }

    /// Como [`AnnotationPipeline::process`], emitindo eventos por `tx`.
    ///
    /// O último evento é sempre `Done` ou `Error`.
    pub fn process_streaming(
        &self,
        document: &mut Document,
        tx: mpsc::Sender<PipelineEvent>,
    ) -> Result<ProcessSummary> {
        let result = self.run(document, Some(&tx));
        let _ = match &result {
            Ok(summary) => tx.send(PipelineEvent::Done {
                summary: summary.clone(),
            }),
            Err(e) => tx.send(PipelineEvent::Error {
                message: e.to_string(),
            }),
        };
        result
    }

    /// Monta um documento a partir de texto e o processa.
    pub fn annotate_text(&self, id: &str, text: &str) -> Result<(Document, ProcessSummary)> {
        let mut document = Document::from_text(id, text);
        let summary = self.process(&mut document)?;
        Ok((document, summary))
    }

    /// Processa documentos independentes em paralelo; um resultado por documento,
    /// na ordem de entrada. A falha de um documento não afeta os demais.
    pub fn process_batch(&self, documents: Vec<Document>) -> Vec<Result<(Document, ProcessSummary)>> {
        documents
            .into_par_iter()
            .map(|mut document| {
                let summary = self.process(&mut document).inspect_err(|e| {
                    warn!(document = %document.id, error = %e, "documento rejeitado");
                })?;
                Ok((document, summary))
            })
            .collect()
    }

    fn run(&self, document: &mut Document, tx: Option<&mpsc::Sender<PipelineEvent>>) -> Result<ProcessSummary> {
        let start = Instant::now();
        document.validate()?;
        let mut work = document.clone();
        let mut summary = ProcessSummary {
            document: work.id.clone(),
            ..Default::default()
        };
        let emit = |event: PipelineEvent| {
            if let Some(tx) = tx {
                let _ = tx.send(event);
            }
        };

        if let Some(chunker) = &self.chunker {
            let added = work.apply_chunker(chunker.as_ref())?;
            summary.proposed = added.len();
            if tx.is_some() {
                for sentence in 0..work.sentences().len() {
                    let annotations: Vec<Annotation> = added
                        .iter()
                        .filter_map(|id| work.annotation(*id))
                        .filter(|a| a.sentence == sentence)
                        .cloned()
                        .collect();
                    if !annotations.is_empty() {
                        emit(PipelineEvent::ChunksProposed {
                            sentence,
                            annotations,
                        });
                    }
                }
            }
        }

        if let Some(merger) = &self.merger {
            let removed = merger.merge_document(&mut work);
            summary.removed = removed.len();
            for annotation in removed {
                // o span não está mais no documento, mas os tokens continuam
                let text = work.span_text(&annotation);
                emit(PipelineEvent::ChunkRemoved { annotation, text });
            }
        }

        if let Some(resolver) = &self.resolver {
            let report = resolver.resolve(&mut work)?;
            for link in &report.links {
                let text = |id| work.annotation(id).map(|a| work.span_text(a)).unwrap_or_default();
                emit(PipelineEvent::MentionResolved {
                    link: link.clone(),
                    mention_text: text(link.mention),
                    head_text: text(link.head),
                });
            }
            summary.mentions = report.mentions;
            summary.relations = report.relations_added();
            summary.unresolved = report.unresolved;
            summary.recovered_errors = report.recovered_errors;
        }

        summary.kept = work.annotation_count();
        summary.processing_ms = start.elapsed().as_millis() as u64;
        *document = work;
        info!(
            document = %summary.document,
            proposed = summary.proposed,
            removed = summary.removed,
            relations = summary.relations,
            ms = summary.processing_ms,
            "documento processado"
        );
        Ok(summary)
    }
}
