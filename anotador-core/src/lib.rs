//! # anotador-core: Anotação de Sequências
//!
//! Este crate implementa o núcleo de um sistema de anotação de documentos já tokenizados:
//! atributos por token, spans tipados, fusão de propostas sobrepostas, extração de features
//! e resolução de correferência por agrupamento sequencial de menções.
//!
//! ## Arquitetura do Sistema
//!
//! O dado flui por um pipeline linear; cada estágio é opcional:
//!
//! 1.  **Entrada**: texto bruto ([`tokenizer`]) ou um [`Document`] em JSON ([`model`]).
//! 2.  **Chunking** ([`chunker`]): dicionários, uniões e correções propõem spans.
//! 3.  **Fusão** ([`merge`]): spans sobrepostos são resolvidos por tamanho e prioridade
//!     de categoria, deixando um conjunto sem sobreposição.
//! 4.  **Features** ([`features`]): funções tipadas sobre anotações, pares ou
//!     (menção, cluster), avaliadas em lote.
//! 5.  **Correferência** ([`coref`]): cada menção é ligada ao cluster aceito pelo
//!     [`classifier`] com a menção anterior mais próxima.
//! 6.  **Saída**: o documento com anotações e relações `coreference`.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use anotador_core::{AnnotationPipeline, PipelineConfig};
//!
//! // 1. Configuração padrão (PERSON / PLACE / ORGANIZATION)
//! let config = PipelineConfig::default();
//! let pipeline = AnnotationPipeline::from_config(&config).unwrap();
//!
//! // 2. Processa um texto
//! let (doc, summary) = pipeline.annotate_text("doc1", "Jan poszedł do szkoły.").unwrap();
//!
//! // 3. Exibe as anotações que sobreviveram à fusão
//! for ann in doc.annotations_in_order() {
//!     println!("{} [{}..{}] {}", ann.category, ann.begin, ann.end, doc.span_text(ann));
//! }
//! println!("{} relações em {} ms", summary.relations, summary.processing_ms);
//! ```
//!
//! ## Módulos Principais
//!
//! - [`pipeline`]: orquestrador que conecta todos os estágios e emite eventos.
//! - [`config`]: configuração TOML validada na carga.
//! - [`attributes`]: tabela de atributos por token com chave por índice ou nome.
//! - [`bio`]: codificação B/I/O de spans em atributos de token.
//! - [`eval`]: precisão, cobertura e F1 de um conjunto anotado contra uma referência.

pub mod attributes;
pub mod bio;
pub mod chunker;
pub mod classifier;
pub mod config;
pub mod coref;
pub mod error;
pub mod eval;
pub mod features;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod tokenizer;

pub use attributes::{AttributeKey, AttributeStore};
pub use chunker::{Chunker, ChunkFix, DictionaryChunker, FixChunker, UnionChunker};
pub use classifier::{Classifier, LinearClassifier};
pub use config::PipelineConfig;
pub use coref::{Link, MentionSelector, ResolutionReport, SequentialResolver};
pub use error::{AnotadorError, Result};
pub use eval::{Evaluation, EvaluationReport};
pub use features::{Feature, FeatureRegistry, FeatureSet, FeatureValue, FeatureVector, ValueKind};
pub use merge::ChunkMerger;
pub use model::{Annotation, AnnotationCluster, AnnotationId, Document, Proposal, Relation, Sentence};
pub use pipeline::{AnnotationPipeline, PipelineEvent, ProcessSummary};
pub use tokenizer::Token;
